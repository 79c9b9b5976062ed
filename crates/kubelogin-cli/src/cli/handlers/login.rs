//! `kubelogin`: log in and write the tokens into the kubeconfig

use crate::cli::commands::{KubectlOptions, LoginOptions};
use crate::config::CliConfig;
use crate::output::{compress_path, print_info, print_success};
use color_eyre::eyre::{Result, WrapErr};
use kubelogin_sdk::auth::{Kubeconfig, TlsOptions};
use tracing::{debug, info};

use super::{
    build_flow, build_login_request, cancel_on_interrupt, load_certificate_authority,
    ProviderParams,
};

/// Handle login command
pub async fn handle_login(
    kubectl: KubectlOptions,
    login: LoginOptions,
    config: &CliConfig,
) -> Result<()> {
    let path = Kubeconfig::resolve_path(kubectl.kubeconfig.as_deref())?;
    let mut kubeconfig = Kubeconfig::load(&path)?;
    let auth_provider = kubeconfig
        .find_auth_provider(kubectl.context.as_deref(), kubectl.user.as_deref())
        .wrap_err("Failed to find the oidc auth-provider in the kubeconfig")?;
    info!(
        "Using user {} of kubeconfig {}",
        auth_provider.user_name,
        path.display()
    );

    let ca_path = kubectl
        .certificate_authority
        .as_deref()
        .or(auth_provider.certificate_authority.as_deref());
    let tls = TlsOptions {
        certificate_authority: load_certificate_authority(
            ca_path,
            auth_provider.certificate_authority_data.clone(),
        )?,
        skip_verify: kubectl.insecure_skip_tls_verify,
    };
    let provider = ProviderParams {
        issuer_url: auth_provider.issuer_url.clone(),
        client_id: auth_provider.client_id.clone(),
        client_secret: auth_provider.client_secret.clone(),
        extra_scopes: auth_provider.extra_scopes.clone(),
    };
    let mut request = build_login_request(provider, login, tls, config)?;
    request.seed_tokens = auth_provider.stored_tokens();

    let flow = build_flow(&request, config, None)?;
    let tokens = flow
        .authenticate(&request, &cancel_on_interrupt())
        .await
        .wrap_err("Failed to log in")?;

    if auth_provider.id_token.as_deref() == Some(tokens.id_token.as_str()) {
        debug!("Token in the kubeconfig is still valid");
        print_info(&format!(
            "You already have a valid token until {}",
            tokens.expires_at.to_rfc3339()
        ));
        return Ok(());
    }

    kubeconfig.update_tokens(&auth_provider.user_name, &tokens)?;
    kubeconfig
        .save()
        .wrap_err("Failed to update the kubeconfig")?;
    print_success(&format!("Updated {}", compress_path(&path)));
    Ok(())
}
