//! Core shared utilities for kubelogin binaries

pub mod logging;
