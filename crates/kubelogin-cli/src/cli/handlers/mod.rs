//! Command handlers for the kubelogin CLI

pub mod get_token;
pub mod login;

use crate::cli::commands::LoginOptions;
use crate::config::CliConfig;
use crate::error::{CliError, Result};
use color_eyre::eyre::{self, WrapErr};
use dialoguer::Password;
use kubelogin_sdk::auth::{
    AuthenticationFlow, LoginRequest, OidcClient, TlsOptions, TokenCache, TokenVerifier,
};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Print the version information
pub fn print_version() {
    eprintln!("kubelogin version {}", env!("CARGO_PKG_VERSION"));
}

/// Provider registration as given on the command line or in the kubeconfig
#[derive(Debug, Clone)]
pub struct ProviderParams {
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub extra_scopes: Vec<String>,
}

/// Assemble the login request; flags override configured defaults
pub fn build_login_request(
    provider: ProviderParams,
    login: LoginOptions,
    tls: TlsOptions,
    config: &CliConfig,
) -> Result<LoginRequest> {
    let password = match (&login.username, login.password) {
        (Some(username), None) if !username.is_empty() => Some(read_password(username)?),
        (_, password) => password,
    };

    let mut request = LoginRequest::new(provider.issuer_url, provider.client_id);
    request.client_secret = provider.client_secret.filter(|s| !s.is_empty());
    request.extra_scopes = provider.extra_scopes;
    request.listen_ports = if login.listen_port.is_empty() {
        config.listen_ports.clone()
    } else {
        login.listen_port
    };
    request.skip_browser = login.skip_open_browser;
    request.username = login.username.filter(|u| !u.is_empty());
    request.password = password;
    request.tls = tls;
    request.timeout = config.callback_timeout();

    request
        .validate()
        .map_err(|e| CliError::invalid_argument(e.to_string()))?;
    Ok(request)
}

fn read_password(username: &str) -> Result<String> {
    Ok(Password::new()
        .with_prompt(format!("Password for {}", username))
        .interact()?)
}

/// Read the CA certificate file, falling back to inline certificate data
pub fn load_certificate_authority(
    path: Option<&Path>,
    data: Option<Vec<u8>>,
) -> eyre::Result<Option<Vec<u8>>> {
    match path {
        Some(path) => std::fs::read(path).map(Some).wrap_err_with(|| {
            format!("Failed to read certificate authority {}", path.display())
        }),
        None => Ok(data),
    }
}

/// Create the authentication flow with the configured timeouts
pub fn build_flow(
    request: &LoginRequest,
    config: &CliConfig,
    cache: Option<TokenCache>,
) -> eyre::Result<AuthenticationFlow> {
    let client = OidcClient::new(&request.tls, config.http_timeout())
        .wrap_err("Failed to create the OpenID Connect client")?;
    let flow = AuthenticationFlow::new(client).with_verifier(TokenVerifier::new(config.clock_skew()));
    Ok(match cache {
        Some(cache) => flow.with_cache(cache),
        None => flow,
    })
}

/// Cancellation token fired on Ctrl-C
pub fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupted, cancelling authentication");
            token.cancel();
        }
    });
    cancel
}
