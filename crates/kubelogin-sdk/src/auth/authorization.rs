//! Per-attempt authorization state for the authorization code flow with PKCE
//!
//! A fresh [`AuthorizationState`] is created for every browser login and
//! dropped when the attempt ends. Nothing in here is ever persisted.

use super::oidc_client::ProviderMetadata;
use super::types::{AuthError, AuthResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use oauth2::{
    basic::BasicClient, AuthUrl, ClientId, CsrfToken, PkceCodeChallenge, PkceCodeVerifier,
    RedirectUrl, Scope,
};
use rand::Rng;
use subtle::ConstantTimeEq;
use tokio::time::Instant;
use tracing::debug;

/// Generate a random 32-byte nonce in base64url encoding
pub fn generate_nonce() -> String {
    let mut rng = rand::thread_rng();
    let nonce_bytes: [u8; 32] = rng.gen();
    URL_SAFE_NO_PAD.encode(nonce_bytes)
}

/// Compare two secrets without leaking the position of the first difference
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// PKCE pair, anti-replay state, nonce and redirect URI of one login attempt
pub struct AuthorizationState {
    pkce_challenge: PkceCodeChallenge,
    pkce_verifier: PkceCodeVerifier,
    csrf_token: CsrfToken,
    nonce: String,
    redirect_uri: String,
    deadline: Instant,
}

impl AuthorizationState {
    /// Generate a new PKCE pair, state token and nonce
    pub fn new(redirect_uri: impl Into<String>, deadline: Instant) -> Self {
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        debug!("Generated PKCE pair and state for authorization request");
        Self {
            pkce_challenge,
            pkce_verifier,
            csrf_token: CsrfToken::new_random(),
            nonce: generate_nonce(),
            redirect_uri: redirect_uri.into(),
            deadline,
        }
    }

    pub fn code_verifier(&self) -> &str {
        self.pkce_verifier.secret()
    }

    pub fn code_challenge(&self) -> &str {
        self.pkce_challenge.as_str()
    }

    pub fn state(&self) -> &str {
        self.csrf_token.secret()
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Build the authorization URL the browser is sent to
    pub fn authorization_url(
        &self,
        metadata: &ProviderMetadata,
        client_id: &str,
        scopes: &[String],
    ) -> AuthResult<String> {
        let client = BasicClient::new(
            ClientId::new(client_id.to_string()),
            None,
            AuthUrl::new(metadata.authorization_endpoint.clone()).map_err(|e| {
                AuthError::provider(
                    "invalid_metadata",
                    format!("invalid authorization endpoint: {}", e),
                )
            })?,
            None,
        )
        .set_redirect_uri(RedirectUrl::new(self.redirect_uri.clone()).map_err(|e| {
            AuthError::Configuration(format!("Invalid redirect URI: {}", e))
        })?);

        let mut auth_request = client
            .authorize_url(|| self.csrf_token.clone())
            .set_pkce_challenge(self.pkce_challenge.clone())
            .add_extra_param("nonce", self.nonce.clone());

        for scope in scopes {
            auth_request = auth_request.add_scope(Scope::new(scope.clone()));
        }

        let (auth_url, _csrf_token) = auth_request.url();
        Ok(auth_url.to_string())
    }
}
