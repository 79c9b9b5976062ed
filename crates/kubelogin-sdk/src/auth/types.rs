//! Authentication-related types and data structures
//!
//! This module defines the login request, the token set produced by a
//! successful authentication, and the error taxonomy shared by every stage
//! of the flow.

use super::kubeconfig::KubeconfigError;
use super::token_cache::CacheError;
use super::verifier::VerificationError;
use chrono::{DateTime, Utc};
use etcetera::home_dir;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Result type for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Ports tried in order for the loopback callback server
pub const DEFAULT_LISTEN_PORTS: [u16; 2] = [8000, 18000];

/// How long a browser login may take before the attempt is abandoned
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// Scope always requested from the provider
pub const OPENID_SCOPE: &str = "openid";

/// Tokens expiring within this margin are treated as expired
pub const EXPIRY_MARGIN: Duration = Duration::from_secs(10);

/// TLS trust settings applied to every outbound provider call
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// PEM encoded CA certificate trusted in addition to the system roots
    pub certificate_authority: Option<Vec<u8>>,
    /// Disable certificate verification entirely
    pub skip_verify: bool,
}

/// Parameters of a single login
///
/// Built once by the caller and only read afterwards.
#[derive(Debug, Clone)]
pub struct LoginRequest {
    /// Issuer URL of the OpenID Connect provider
    pub issuer_url: String,
    /// OAuth client ID
    pub client_id: String,
    /// OAuth client secret, if the client is confidential
    pub client_secret: Option<String>,
    /// Scopes requested in addition to `openid`
    pub extra_scopes: Vec<String>,
    /// Candidate ports for the callback server, tried in order
    pub listen_ports: Vec<u16>,
    /// Do not launch a browser, only print the authorization URL
    pub skip_browser: bool,
    /// Username for the resource owner password credentials grant
    pub username: Option<String>,
    /// Password for the resource owner password credentials grant
    pub password: Option<String>,
    /// TLS trust for the provider
    pub tls: TlsOptions,
    /// Deadline for the whole attempt, including waiting for the browser
    pub timeout: Duration,
    /// Tokens already held by the caller (e.g. from the kubeconfig)
    pub seed_tokens: Option<TokenSet>,
}

impl LoginRequest {
    /// Create a request with default ports and timeout
    pub fn new(issuer_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            issuer_url: issuer_url.into(),
            client_id: client_id.into(),
            client_secret: None,
            extra_scopes: Vec::new(),
            listen_ports: DEFAULT_LISTEN_PORTS.to_vec(),
            skip_browser: false,
            username: None,
            password: None,
            tls: TlsOptions::default(),
            timeout: DEFAULT_CALLBACK_TIMEOUT,
            seed_tokens: None,
        }
    }

    /// Scopes sent to the provider: `openid` first, then the extra scopes in
    /// the order given, without duplicates.
    pub fn scopes(&self) -> Vec<String> {
        let mut scopes = vec![OPENID_SCOPE.to_string()];
        for scope in &self.extra_scopes {
            let scope = scope.trim();
            if !scope.is_empty() && !scopes.iter().any(|s| s == scope) {
                scopes.push(scope.to_string());
            }
        }
        scopes
    }

    /// Whether the password grant is requested instead of the browser flow
    pub fn uses_password_grant(&self) -> bool {
        self.username.as_deref().is_some_and(|u| !u.is_empty())
    }

    /// Check mandatory parameters before any I/O happens
    pub fn validate(&self) -> AuthResult<()> {
        if self.issuer_url.trim().is_empty() {
            return Err(AuthError::Configuration("issuer URL is missing".to_string()));
        }
        url::Url::parse(&self.issuer_url).map_err(|e| {
            AuthError::Configuration(format!("invalid issuer URL {}: {}", self.issuer_url, e))
        })?;
        if self.client_id.trim().is_empty() {
            return Err(AuthError::Configuration("client ID is missing".to_string()));
        }
        if self.uses_password_grant() {
            if self.password.is_none() {
                return Err(AuthError::Configuration(
                    "password is required for the password grant".to_string(),
                ));
            }
        } else if self.listen_ports.is_empty() {
            return Err(AuthError::Configuration(
                "at least one listen port is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tokens issued by the provider for one login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    /// OAuth access token
    pub access_token: String,
    /// Refresh token, if the provider issued one
    pub refresh_token: Option<String>,
    /// Signed ID token; this is the bearer credential handed to kubectl
    pub id_token: String,
    /// Expiry of the credential (the ID token `exp` once verified)
    pub expires_at: DateTime<Utc>,
    /// When the tokens were issued
    pub issued_at: DateTime<Utc>,
}

impl TokenSet {
    /// Check if the token is expired, allowing for [`EXPIRY_MARGIN`]
    pub fn is_expired(&self) -> bool {
        self.expires_within(EXPIRY_MARGIN)
    }

    /// Check if the token expires within the specified duration
    pub fn expires_within(&self, duration: Duration) -> bool {
        let threshold = Utc::now()
            + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
        self.expires_at <= threshold
    }
}

/// Authentication errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Missing or invalid parameters, raised before any I/O
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// None of the candidate ports could be bound
    #[error("No available port for the callback server (tried {ports:?})")]
    PortUnavailable { ports: Vec<u16> },

    /// The browser never came back before the deadline
    #[error("Timed out waiting for the authorization callback")]
    CallbackTimeout,

    /// Only callbacks with a wrong state arrived before the deadline
    #[error("Authorization callback state mismatch ({attempts} callback(s) rejected)")]
    CallbackStateMismatch { attempts: u32 },

    /// The provider rejected the request
    #[error("Provider error: {code}{}", .description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    Provider {
        code: String,
        description: Option<String>,
    },

    /// Transport failure talking to the provider
    #[error("Network error during {stage}")]
    Network {
        stage: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// A network stage did not finish before the flow deadline
    #[error("Timed out during {0}")]
    Timeout(&'static str),

    /// The ID token did not pass verification
    #[error("ID token verification failed")]
    Verification(#[from] VerificationError),

    /// Token cache failure (absorbed by the flow, surfaced by direct cache use)
    #[error("Token cache error")]
    Cache(#[from] CacheError),

    /// Kubeconfig could not be read or updated
    #[error(transparent)]
    Kubeconfig(#[from] KubeconfigError),

    /// Callback server failure other than binding
    #[error("Callback server error: {0}")]
    CallbackServer(String),

    /// The caller cancelled the attempt
    #[error("Authentication cancelled")]
    Cancelled,

    /// Generic IO error
    #[error("IO error")]
    Io(#[from] std::io::Error),
}

impl AuthError {
    pub(crate) fn network(stage: &'static str, source: reqwest::Error) -> Self {
        Self::Network { stage, source }
    }

    pub(crate) fn provider(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self::Provider {
            code: code.into(),
            description: Some(description.into()),
        }
    }
}

/// Default directory for the token cache (`~/.kube/cache/oidc-login`)
pub fn default_token_cache_dir() -> AuthResult<PathBuf> {
    let home = home_dir().map_err(|e| {
        AuthError::Configuration(format!("Failed to determine home directory: {}", e))
    })?;
    Ok(home.join(".kube").join("cache").join("oidc-login"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_set_expiring_in(seconds: i64) -> TokenSet {
        TokenSet {
            access_token: "access".to_string(),
            refresh_token: None,
            id_token: "id".to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(seconds),
            issued_at: Utc::now(),
        }
    }

    #[test]
    fn test_scopes_always_start_with_openid() {
        let mut request = LoginRequest::new("https://issuer.example.com", "kubernetes");
        request.extra_scopes = vec![
            "email".to_string(),
            "openid".to_string(),
            " groups ".to_string(),
            "email".to_string(),
        ];
        assert_eq!(request.scopes(), vec!["openid", "email", "groups"]);
    }

    #[test]
    fn test_validate_rejects_missing_issuer_and_client() {
        let request = LoginRequest::new("", "kubernetes");
        assert!(matches!(request.validate(), Err(AuthError::Configuration(_))));

        let request = LoginRequest::new("https://issuer.example.com", " ");
        assert!(matches!(request.validate(), Err(AuthError::Configuration(_))));

        let request = LoginRequest::new("not a url", "kubernetes");
        assert!(matches!(request.validate(), Err(AuthError::Configuration(_))));
    }

    #[test]
    fn test_validate_password_grant_needs_password() {
        let mut request = LoginRequest::new("https://issuer.example.com", "kubernetes");
        request.username = Some("alice".to_string());
        assert!(request.validate().is_err());

        request.password = Some("secret".to_string());
        request.listen_ports.clear();
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_token_expiry_with_margin() {
        assert!(token_set_expiring_in(-30).is_expired());
        assert!(token_set_expiring_in(5).is_expired());
        assert!(!token_set_expiring_in(3600).is_expired());
        assert!(token_set_expiring_in(3600).expires_within(Duration::from_secs(7200)));
    }

    #[test]
    fn test_provider_error_message_includes_description() {
        let err = AuthError::provider("invalid_grant", "code expired");
        assert_eq!(err.to_string(), "Provider error: invalid_grant (code expired)");

        let err = AuthError::Provider {
            code: "access_denied".to_string(),
            description: None,
        };
        assert_eq!(err.to_string(), "Provider error: access_denied");
    }
}
