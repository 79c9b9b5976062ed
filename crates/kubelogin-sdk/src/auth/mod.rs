//! OpenID Connect authentication for kubectl
//!
//! This module provides:
//! - The authorization code flow with PKCE through a loopback callback server
//! - The resource owner password credentials grant
//! - ID token verification against the provider's key set
//! - A file-backed token cache shared across invocations
//! - Kubeconfig and exec credential output

pub mod authorization;
pub mod browser;
pub mod callback_server;
pub mod credential;
pub mod flow;
pub mod kubeconfig;
pub mod oidc_client;
pub mod token_cache;
pub mod types;
pub mod verifier;

// Re-export commonly used types and functions
pub use browser::{BrowserLauncher, SystemBrowser};
pub use credential::{exec_credential, merge_into_kubeconfig, ExecCredential};
pub use flow::AuthenticationFlow;
pub use kubeconfig::{AuthProviderConfig, Kubeconfig, KubeconfigError};
pub use oidc_client::{OidcClient, ProviderMetadata, DEFAULT_HTTP_TIMEOUT};
pub use token_cache::{CacheError, CacheFingerprint, TokenCache};
pub use types::{
    default_token_cache_dir, AuthError, AuthResult, LoginRequest, TlsOptions, TokenSet,
    DEFAULT_CALLBACK_TIMEOUT, DEFAULT_LISTEN_PORTS,
};
pub use verifier::{TokenVerifier, VerificationError, DEFAULT_LEEWAY};
