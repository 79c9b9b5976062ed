//! Kubeconfig access for the `oidc` auth provider
//!
//! The file is kept as a generic YAML document so that clusters, contexts
//! and users this module does not touch are written back unchanged.

use super::credential::merge_into_kubeconfig;
use super::types::TokenSet;
use super::verifier::unverified_expiry;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{TimeZone, Utc};
use etcetera::home_dir;
use serde_yaml::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the auth provider handled by this tool
pub const OIDC_AUTH_PROVIDER: &str = "oidc";

/// Kubeconfig errors
#[derive(Debug, thiserror::Error)]
pub enum KubeconfigError {
    #[error("Failed to read kubeconfig {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse kubeconfig {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to write kubeconfig {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize kubeconfig")]
    Serialize(#[from] serde_yaml::Error),

    #[error("Failed to determine kubeconfig location: {0}")]
    Location(String),

    #[error("current-context is not set in the kubeconfig")]
    NoCurrentContext,

    #[error("context {0} not found in the kubeconfig")]
    ContextNotFound(String),

    #[error("user {0} not found in the kubeconfig")]
    UserNotFound(String),

    #[error("user {user} does not use the oidc auth-provider")]
    NotOidc { user: String },

    #[error("{field} is missing in the auth-provider config of user {user}")]
    MissingField { user: String, field: &'static str },

    #[error("idp-certificate-authority-data of user {user} is not valid base64")]
    InvalidCertificateData { user: String },
}

/// `oidc` auth-provider settings of one kubeconfig user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthProviderConfig {
    pub user_name: String,
    pub context_name: Option<String>,
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub extra_scopes: Vec<String>,
    pub certificate_authority: Option<PathBuf>,
    pub certificate_authority_data: Option<Vec<u8>>,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl AuthProviderConfig {
    /// Tokens already stored for this user, if any
    ///
    /// The expiry is read from the stored ID token without verification. A
    /// token that cannot be decoded is treated as expired so that only its
    /// refresh token is used.
    pub fn stored_tokens(&self) -> Option<TokenSet> {
        if self.id_token.is_none() && self.refresh_token.is_none() {
            return None;
        }
        let id_token = self.id_token.clone().unwrap_or_default();
        let expires_at = unverified_expiry(&id_token)
            .and_then(|exp| Utc.timestamp_opt(exp, 0).single())
            .unwrap_or_default();

        Some(TokenSet {
            access_token: String::new(),
            refresh_token: self.refresh_token.clone(),
            id_token,
            expires_at,
            issued_at: Utc::now(),
        })
    }
}

/// A loaded kubeconfig file
#[derive(Debug, Clone)]
pub struct Kubeconfig {
    path: PathBuf,
    document: Value,
}

impl Kubeconfig {
    /// Resolve the kubeconfig path: explicit path, else the first entry of
    /// `$KUBECONFIG`, else `~/.kube/config`
    pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf, KubeconfigError> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        if let Some(paths) = std::env::var_os("KUBECONFIG") {
            if let Some(first) = std::env::split_paths(&paths).find(|p| !p.as_os_str().is_empty())
            {
                return Ok(first);
            }
        }
        Self::default_path()
    }

    pub fn default_path() -> Result<PathBuf, KubeconfigError> {
        let home = home_dir().map_err(|e| KubeconfigError::Location(e.to_string()))?;
        Ok(home.join(".kube").join("config"))
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self, KubeconfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|source| KubeconfigError::Read {
            path: path.clone(),
            source,
        })?;
        let document =
            serde_yaml::from_str(&content).map_err(|source| KubeconfigError::Parse {
                path: path.clone(),
                source,
            })?;
        debug!("Loaded kubeconfig from {}", path.display());
        Ok(Self { path, document })
    }

    pub fn parse(path: impl Into<PathBuf>, content: &str) -> Result<Self, KubeconfigError> {
        let path = path.into();
        let document =
            serde_yaml::from_str(content).map_err(|source| KubeconfigError::Parse {
                path: path.clone(),
                source,
            })?;
        Ok(Self { path, document })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Find the `oidc` auth-provider of the selected user
    ///
    /// `user` wins over `context`; without either the user of
    /// `current-context` is used.
    pub fn find_auth_provider(
        &self,
        context: Option<&str>,
        user: Option<&str>,
    ) -> Result<AuthProviderConfig, KubeconfigError> {
        let (context_name, user_name) = match (user.filter(|u| !u.is_empty()), context) {
            (Some(user), _) => (context.map(str::to_string), user.to_string()),
            (None, context) => {
                let context_name = match context.filter(|c| !c.is_empty()) {
                    Some(name) => name.to_string(),
                    None => self
                        .document
                        .get("current-context")
                        .and_then(Value::as_str)
                        .filter(|c| !c.is_empty())
                        .ok_or(KubeconfigError::NoCurrentContext)?
                        .to_string(),
                };
                let context_entry = named_entry(&self.document, "contexts", &context_name)
                    .and_then(|entry| entry.get("context"))
                    .ok_or_else(|| KubeconfigError::ContextNotFound(context_name.clone()))?;
                let user_name = context_entry
                    .get("user")
                    .and_then(Value::as_str)
                    .ok_or_else(|| KubeconfigError::ContextNotFound(context_name.clone()))?
                    .to_string();
                (Some(context_name), user_name)
            }
        };

        let provider = named_entry(&self.document, "users", &user_name)
            .and_then(|entry| entry.get("user"))
            .ok_or_else(|| KubeconfigError::UserNotFound(user_name.clone()))?
            .get("auth-provider")
            .filter(|p| p.get("name").and_then(Value::as_str) == Some(OIDC_AUTH_PROVIDER))
            .ok_or_else(|| KubeconfigError::NotOidc {
                user: user_name.clone(),
            })?;

        let config = provider.get("config");
        let field = |key: &str| -> Option<String> {
            config
                .and_then(|c| c.get(key))
                .and_then(Value::as_str)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let required = |key: &'static str| -> Result<String, KubeconfigError> {
            field(key).ok_or_else(|| KubeconfigError::MissingField {
                user: user_name.clone(),
                field: key,
            })
        };

        let certificate_authority_data = field("idp-certificate-authority-data")
            .map(|data| {
                STANDARD
                    .decode(data.trim())
                    .map_err(|_| KubeconfigError::InvalidCertificateData {
                        user: user_name.clone(),
                    })
            })
            .transpose()?;

        Ok(AuthProviderConfig {
            issuer_url: required("idp-issuer-url")?,
            client_id: required("client-id")?,
            client_secret: field("client-secret"),
            extra_scopes: field("extra-scopes")
                .map(|scopes| {
                    scopes
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            certificate_authority: field("idp-certificate-authority").map(PathBuf::from),
            certificate_authority_data,
            id_token: field("id-token"),
            refresh_token: field("refresh-token"),
            context_name,
            user_name,
        })
    }

    /// Write `tokens` into the auth-provider config of `user`
    pub fn update_tokens(&mut self, user: &str, tokens: &TokenSet) -> Result<(), KubeconfigError> {
        merge_into_kubeconfig(&mut self.document, user, tokens)
    }

    /// Write the document back atomically, keeping the file mode
    pub fn save(&self) -> Result<(), KubeconfigError> {
        let content = serde_yaml::to_string(&self.document)?;
        let write_error = |source| KubeconfigError::Write {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut file = tempfile::NamedTempFile::new_in(&dir).map_err(write_error)?;
        if let Ok(metadata) = std::fs::metadata(&self.path) {
            std::fs::set_permissions(file.path(), metadata.permissions()).map_err(write_error)?;
        }
        file.write_all(content.as_bytes()).map_err(write_error)?;
        file.as_file().sync_all().map_err(write_error)?;
        file.persist(&self.path)
            .map_err(|e| write_error(e.error))?;

        debug!("Wrote kubeconfig to {}", self.path.display());
        Ok(())
    }
}

/// Find `{name: <name>, ...}` in the named list `key` of a kubeconfig document
pub(crate) fn named_entry<'a>(document: &'a Value, key: &str, name: &str) -> Option<&'a Value> {
    document
        .get(key)?
        .as_sequence()?
        .iter()
        .find(|entry| entry.get("name").and_then(Value::as_str) == Some(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: dev
clusters:
- name: dev-cluster
  cluster:
    server: https://k8s.example.com
contexts:
- name: dev
  context:
    cluster: dev-cluster
    user: oidc-user
- name: admin
  context:
    cluster: dev-cluster
    user: admin
users:
- name: admin
  user:
    token: static-token
- name: oidc-user
  user:
    auth-provider:
      name: oidc
      config:
        idp-issuer-url: https://issuer.example.com
        client-id: kubernetes
        client-secret: s3cr3t
        extra-scopes: email, groups
        idp-certificate-authority-data: aGVsbG8=
        refresh-token: old-refresh
"#;

    fn kubeconfig() -> Kubeconfig {
        Kubeconfig::parse("/tmp/kubeconfig", KUBECONFIG).unwrap()
    }

    #[test]
    fn test_current_context_user() {
        let config = kubeconfig().find_auth_provider(None, None).unwrap();
        assert_eq!(config.user_name, "oidc-user");
        assert_eq!(config.context_name.as_deref(), Some("dev"));
        assert_eq!(config.issuer_url, "https://issuer.example.com");
        assert_eq!(config.client_id, "kubernetes");
        assert_eq!(config.client_secret.as_deref(), Some("s3cr3t"));
        assert_eq!(config.extra_scopes, vec!["email", "groups"]);
        assert_eq!(config.certificate_authority_data, Some(b"hello".to_vec()));
        assert_eq!(config.id_token, None);
        assert_eq!(config.refresh_token.as_deref(), Some("old-refresh"));

        let stored = config.stored_tokens().unwrap();
        assert!(stored.is_expired());
        assert_eq!(stored.refresh_token.as_deref(), Some("old-refresh"));
    }

    #[test]
    fn test_explicit_user_wins_over_context() {
        let config = kubeconfig()
            .find_auth_provider(Some("admin"), Some("oidc-user"))
            .unwrap();
        assert_eq!(config.user_name, "oidc-user");
    }

    #[test]
    fn test_non_oidc_user_is_rejected() {
        let err = kubeconfig()
            .find_auth_provider(Some("admin"), None)
            .unwrap_err();
        assert!(matches!(err, KubeconfigError::NotOidc { user } if user == "admin"));
    }

    #[test]
    fn test_unknown_context() {
        let err = kubeconfig()
            .find_auth_provider(Some("prod"), None)
            .unwrap_err();
        assert!(matches!(err, KubeconfigError::ContextNotFound(name) if name == "prod"));
    }

    #[test]
    fn test_kubeconfig_path_prefers_explicit_flag() {
        let path = Kubeconfig::resolve_path(Some(Path::new("/etc/kube/config"))).unwrap();
        assert_eq!(path, PathBuf::from("/etc/kube/config"));
    }

    #[test]
    fn test_save_round_trip_preserves_other_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, KUBECONFIG).unwrap();

        let mut kubeconfig = Kubeconfig::load(&path).unwrap();
        let tokens = TokenSet {
            access_token: "access".to_string(),
            refresh_token: Some("new-refresh".to_string()),
            id_token: "new-id-token".to_string(),
            expires_at: chrono::Utc::now(),
            issued_at: chrono::Utc::now(),
        };
        kubeconfig.update_tokens("oidc-user", &tokens).unwrap();
        kubeconfig.save().unwrap();

        let reloaded = Kubeconfig::load(&path).unwrap();
        let config = reloaded.find_auth_provider(None, None).unwrap();
        assert_eq!(config.id_token.as_deref(), Some("new-id-token"));
        assert_eq!(config.refresh_token.as_deref(), Some("new-refresh"));

        let admin = named_entry(reloaded.document(), "users", "admin").unwrap();
        assert_eq!(
            admin["user"]["token"].as_str(),
            Some("static-token")
        );
        assert_eq!(
            reloaded.document()["clusters"][0]["cluster"]["server"].as_str(),
            Some("https://k8s.example.com")
        );
    }
}
