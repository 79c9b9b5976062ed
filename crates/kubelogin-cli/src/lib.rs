//! # kubelogin CLI
//!
//! kubectl plugin for Kubernetes OpenID Connect authentication.
//!
//! Two entry points:
//! - `kubelogin` logs in and writes the tokens into the kubeconfig
//! - `kubelogin get-token` runs as a kubectl exec credential plugin and
//!   prints an `ExecCredential` document on stdout
//!
//! ## Architecture
//!
//! - Clap-based argument parsing with derive macros
//! - Handler-based command processing
//! - figment layered configuration for defaults
//! - Authentication provided by `kubelogin-sdk`

pub mod cli;
pub mod config;
pub mod error;
pub mod output;

pub use cli::*;
pub use error::*;
