//! Configuration management for the kubelogin CLI
//!
//! Defaults are layered with figment: built-in values, then
//! `$XDG_CONFIG_HOME/kubelogin/config.toml`, then `KUBELOGIN_*` environment
//! variables. Command line flags override all of them.

use crate::error::{CliError, Result};
use etcetera::{choose_base_strategy, BaseStrategy};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use kubelogin_sdk::auth::{
    default_token_cache_dir, DEFAULT_CALLBACK_TIMEOUT, DEFAULT_HTTP_TIMEOUT, DEFAULT_LEEWAY,
    DEFAULT_LISTEN_PORTS,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "KUBELOGIN_";

/// CLI configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Ports tried in order for the loopback callback server
    pub listen_ports: Vec<u16>,

    /// Token cache directory (defaults to `~/.kube/cache/oidc-login`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_cache_dir: Option<PathBuf>,

    /// How long to wait for the browser login, in seconds
    pub callback_timeout_secs: u64,

    /// Timeout of a single request to the provider, in seconds
    pub http_timeout_secs: u64,

    /// Allowed clock skew for ID token validation, in seconds
    pub clock_skew_secs: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            listen_ports: DEFAULT_LISTEN_PORTS.to_vec(),
            token_cache_dir: None,
            callback_timeout_secs: DEFAULT_CALLBACK_TIMEOUT.as_secs(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT.as_secs(),
            clock_skew_secs: DEFAULT_LEEWAY.as_secs(),
        }
    }
}

impl CliConfig {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join("config.toml");
        Self::load_from_path(&path)
    }

    /// Load configuration from a specific file; a missing file is not an error
    pub fn load_from_path(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());

        let figment = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX));

        figment
            .extract()
            .map_err(|e| CliError::config(e.to_string()))
    }

    /// Get configuration directory
    pub fn config_dir() -> Result<PathBuf> {
        let strategy = choose_base_strategy().map_err(|e| {
            CliError::config(format!("Failed to determine base directories: {}", e))
        })?;
        Ok(strategy.config_dir().join("kubelogin"))
    }

    /// Token cache directory, falling back to the default location
    pub fn token_cache_dir(&self) -> Result<PathBuf> {
        match &self.token_cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_token_cache_dir().map_err(|e| CliError::config(e.to_string())),
        }
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew_secs)
    }
}
