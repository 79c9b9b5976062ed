//! # kubelogin SDK
//!
//! OpenID Connect authentication engine behind the `kubelogin` command.
//!
//! ```rust,no_run
//! use kubelogin_sdk::auth::{AuthenticationFlow, LoginRequest, OidcClient, TokenCache};
//! use kubelogin_sdk::auth::{default_token_cache_dir, exec_credential, DEFAULT_HTTP_TIMEOUT};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), kubelogin_sdk::auth::AuthError> {
//! let request = LoginRequest::new("https://issuer.example.com", "kubernetes");
//! let flow = AuthenticationFlow::new(OidcClient::new(&request.tls, DEFAULT_HTTP_TIMEOUT)?)
//!     .with_cache(TokenCache::new(default_token_cache_dir()?));
//!
//! let tokens = flow.authenticate(&request, &CancellationToken::new()).await?;
//! println!("{}", serde_json::to_string(&exec_credential(&tokens)).unwrap());
//! # Ok(())
//! # }
//! ```

pub mod auth;

pub use auth::{AuthError, AuthResult, AuthenticationFlow, LoginRequest, TokenSet};
