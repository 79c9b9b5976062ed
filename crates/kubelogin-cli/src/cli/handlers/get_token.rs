//! `kubelogin get-token`: kubectl exec credential plugin

use crate::cli::commands::GetTokenArgs;
use crate::config::CliConfig;
use crate::error::CliError;
use crate::output::json_output;
use color_eyre::eyre::{Result, WrapErr};
use kubelogin_sdk::auth::{exec_credential, TlsOptions, TokenCache};
use tracing::debug;

use super::{
    build_flow, build_login_request, cancel_on_interrupt, load_certificate_authority,
    ProviderParams,
};

/// Handle get-token command
pub async fn handle_get_token(args: GetTokenArgs, config: &CliConfig) -> Result<()> {
    let issuer_url = args
        .oidc_issuer_url
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CliError::invalid_argument("--oidc-issuer-url is missing"))?;
    let client_id = args
        .oidc_client_id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CliError::invalid_argument("--oidc-client-id is missing"))?;

    let tls = TlsOptions {
        certificate_authority: load_certificate_authority(
            args.certificate_authority.as_deref(),
            None,
        )?,
        skip_verify: args.insecure_skip_tls_verify,
    };
    let provider = ProviderParams {
        issuer_url,
        client_id,
        client_secret: args.oidc_client_secret,
        extra_scopes: args.oidc_extra_scope,
    };
    let request = build_login_request(provider, args.login, tls, config)?;

    let cache_dir = match args.token_cache_dir {
        Some(dir) => dir,
        None => config.token_cache_dir()?,
    };
    debug!("Using token cache directory {}", cache_dir.display());

    let flow = build_flow(&request, config, Some(TokenCache::new(cache_dir)))?;
    let tokens = flow
        .authenticate(&request, &cancel_on_interrupt())
        .await
        .wrap_err("Failed to obtain a token")?;

    json_output(&exec_credential(&tokens)).wrap_err("Failed to write the credential")?;
    Ok(())
}
