use crate::cli::{
    commands::{Commands, KubectlOptions, LoginOptions},
    handlers,
};
use crate::config::CliConfig;
use clap::Parser;
use clap_verbosity_flag::{LevelFilter, OffLevel, Verbosity};
use color_eyre::eyre::Result;

/// Login to the OpenID Connect provider and update the kubeconfig
#[derive(Parser, Debug)]
#[command(
    name = "kubelogin",
    version,
    about = "Login to the OpenID Connect provider and update the kubeconfig",
    args_conflicts_with_subcommands = true,
    after_help = "EXAMPLES:
  # Login to the provider using the authorization code flow.
  kubelogin

  # Login to the provider using the resource owner password credentials flow.
  kubelogin --username USERNAME --password PASSWORD

  # Run as a credential plugin.
  kubelogin get-token --oidc-issuer-url=https://issuer.example.com --oidc-client-id=kubernetes"
)]
pub struct Args {
    #[command(flatten)]
    pub kubectl: KubectlOptions,

    #[command(flatten)]
    pub login: LoginOptions,

    #[command(flatten)]
    pub verbosity: Verbosity<OffLevel>,

    /// Subcommand to execute; without one, log in and update the kubeconfig
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Args {
    /// Whether the full error report should be printed
    pub fn is_verbose(&self) -> bool {
        self.verbosity.log_level_filter() != LevelFilter::Off
    }

    /// Execute the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Some(Commands::GetToken(args)) => {
                handlers::get_token::handle_get_token(args, &CliConfig::load()?).await
            }
            Some(Commands::Version) => {
                handlers::print_version();
                Ok(())
            }
            None => {
                let config = CliConfig::load()?;
                handlers::login::handle_login(self.kubectl, self.login, &config).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    #[test]
    fn test_command_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_login_flags() {
        let args = Args::try_parse_from([
            "kubelogin",
            "--kubeconfig",
            "/tmp/config",
            "--context",
            "dev",
            "--listen-port",
            "8000,9000",
            "--listen-port",
            "10000",
            "--skip-open-browser",
        ])
        .unwrap();

        assert!(args.command.is_none());
        assert_eq!(args.kubectl.kubeconfig, Some(PathBuf::from("/tmp/config")));
        assert_eq!(args.kubectl.context.as_deref(), Some("dev"));
        assert_eq!(args.login.listen_port, vec![8000, 9000, 10000]);
        assert!(args.login.skip_open_browser);
        assert!(!args.is_verbose());
    }

    #[test]
    fn test_get_token_flags() {
        let args = Args::try_parse_from([
            "kubelogin",
            "get-token",
            "--oidc-issuer-url=https://issuer.example.com",
            "--oidc-client-id=kubernetes",
            "--oidc-extra-scope=email",
            "--oidc-extra-scope=groups",
            "--username=alice",
            "-v",
        ])
        .unwrap();

        assert!(args.is_verbose());
        match args.command {
            Some(Commands::GetToken(get_token)) => {
                assert_eq!(
                    get_token.oidc_issuer_url.as_deref(),
                    Some("https://issuer.example.com")
                );
                assert_eq!(get_token.oidc_client_id.as_deref(), Some("kubernetes"));
                assert_eq!(get_token.oidc_extra_scope, vec!["email", "groups"]);
                assert_eq!(get_token.login.username.as_deref(), Some("alice"));
            }
            other => panic!("expected get-token, got {:?}", other),
        }
    }

    #[test]
    fn test_version_ignores_broken_config() {
        figment::Jail::expect_with(|jail| {
            let dir = jail.directory().display().to_string();
            jail.set_env("XDG_CONFIG_HOME", dir);
            std::fs::create_dir(jail.directory().join("kubelogin")).unwrap();
            jail.create_file("kubelogin/config.toml", "listen_ports = \"not a list\"")?;
            assert!(CliConfig::load().is_err());

            let runtime = tokio::runtime::Runtime::new().unwrap();
            let args = Args::try_parse_from(["kubelogin", "version"]).unwrap();
            assert!(runtime.block_on(args.run()).is_ok());

            let args = Args::try_parse_from([
                "kubelogin",
                "get-token",
                "--oidc-issuer-url=https://issuer.example.com",
                "--oidc-client-id=kubernetes",
            ])
            .unwrap();
            assert!(runtime.block_on(args.run()).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_login_flags_conflict_with_subcommand() {
        assert!(Args::try_parse_from(["kubelogin", "--context", "dev", "get-token"]).is_err());
    }
}
