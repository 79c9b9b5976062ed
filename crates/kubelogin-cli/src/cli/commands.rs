use clap::{Args as ClapArgs, Subcommand};
use std::path::PathBuf;

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run as a kubectl credential plugin
    GetToken(GetTokenArgs),

    /// Print the version information
    Version,
}

/// kubectl specific options
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct KubectlOptions {
    /// Path to the kubeconfig file
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// The name of the kubeconfig context to use
    #[arg(long)]
    pub context: Option<String>,

    /// The name of the kubeconfig user to use. Prior to --context
    #[arg(long)]
    pub user: Option<String>,

    /// Path to a cert file for the certificate authority
    #[arg(long)]
    pub certificate_authority: Option<PathBuf>,

    /// If true, the server's certificate will not be checked for validity.
    /// This will make your HTTPS connections insecure
    #[arg(long)]
    pub insecure_skip_tls_verify: bool,
}

/// Options shared by login and get-token
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct LoginOptions {
    /// Port to bind to the local server. If multiple ports are given, it
    /// will try the ports in order [default: 8000,18000]
    #[arg(long, value_delimiter = ',')]
    pub listen_port: Vec<u16>,

    /// If true, it does not open the browser on authentication
    #[arg(long)]
    pub skip_open_browser: bool,

    /// If set, perform the resource owner password credentials grant
    #[arg(long)]
    pub username: Option<String>,

    /// If set, use the password instead of asking it
    #[arg(long)]
    pub password: Option<String>,
}

/// Options of the get-token command
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct GetTokenArgs {
    #[command(flatten)]
    pub login: LoginOptions,

    /// Issuer URL of the provider (mandatory)
    #[arg(long)]
    pub oidc_issuer_url: Option<String>,

    /// Client ID of the provider (mandatory)
    #[arg(long)]
    pub oidc_client_id: Option<String>,

    /// Client secret of the provider
    #[arg(long)]
    pub oidc_client_secret: Option<String>,

    /// Scopes to request to the provider
    #[arg(long, value_delimiter = ',')]
    pub oidc_extra_scope: Vec<String>,

    /// Path to a cert file for the certificate authority
    #[arg(long)]
    pub certificate_authority: Option<PathBuf>,

    /// If true, the server's certificate will not be checked for validity.
    /// This will make your HTTPS connections insecure
    #[arg(long)]
    pub insecure_skip_tls_verify: bool,

    /// Path to a directory for caching tokens [default: ~/.kube/cache/oidc-login]
    #[arg(long)]
    pub token_cache_dir: Option<PathBuf>,
}
