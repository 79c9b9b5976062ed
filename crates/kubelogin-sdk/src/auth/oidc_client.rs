//! OpenID Connect protocol client
//!
//! Discovery, JWKS retrieval and the token endpoint grants used by the
//! login flows. Discovery documents and key sets are memoized per
//! [`OidcClient`] instance, so dropping the client (or calling
//! [`OidcClient::clear_caches`]) resets them.

use super::types::{AuthError, AuthResult, TlsOptions, TokenSet};
use super::verifier::{IdTokenClaims, TokenVerifier, VerificationError};
use chrono::Utc;
use jsonwebtoken::jwk::JwkSet;
use moka::future::Cache;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Default timeout for a single provider request
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a fetched key set is reused before being fetched again
const JWKS_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Provider endpoints from the discovery document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
}

/// OAuth client registration used at the token endpoint
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Option<String>,
}

/// Successful token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// OAuth error response (RFC 6749 section 5.2)
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl TokenResponse {
    /// Convert into a token set; `fallback_refresh_token` is kept when the
    /// provider does not rotate refresh tokens.
    fn into_token_set(self, fallback_refresh_token: Option<&str>) -> AuthResult<TokenSet> {
        let id_token = self.id_token.ok_or_else(|| {
            AuthError::provider("invalid_response", "token response contains no id_token")
        })?;
        let issued_at = Utc::now();
        // Unrepresentable lifetimes count as unknown; the ID token `exp` decides later
        let expires_at = self
            .expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(chrono::Duration::try_seconds)
            .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
            .unwrap_or(issued_at);
        Ok(TokenSet {
            access_token: self.access_token,
            refresh_token: self
                .refresh_token
                .or_else(|| fallback_refresh_token.map(str::to_string)),
            id_token,
            expires_at,
            issued_at,
        })
    }
}

/// OpenID Connect client bound to one TLS configuration
pub struct OidcClient {
    http: reqwest::Client,
    discovery_cache: Cache<String, Arc<ProviderMetadata>>,
    jwks_cache: Cache<String, Arc<JwkSet>>,
}

impl OidcClient {
    /// Create a client with the given TLS trust and request timeout
    pub fn new(tls: &TlsOptions, timeout: Duration) -> AuthResult<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("kubelogin/", env!("CARGO_PKG_VERSION")));

        if let Some(pem) = &tls.certificate_authority {
            let certificate = reqwest::Certificate::from_pem(pem).map_err(|e| {
                AuthError::Configuration(format!("Invalid certificate authority: {}", e))
            })?;
            builder = builder.add_root_certificate(certificate);
        }
        if tls.skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder.build().map_err(|e| {
            AuthError::Configuration(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(Self {
            http,
            discovery_cache: Cache::builder().max_capacity(16).build(),
            jwks_cache: Cache::builder()
                .time_to_live(JWKS_CACHE_TTL)
                .max_capacity(16)
                .build(),
        })
    }

    /// Fetch the discovery document of the issuer (memoized)
    #[instrument(level = "debug", skip(self))]
    pub async fn discover(&self, issuer: &str) -> AuthResult<Arc<ProviderMetadata>> {
        if let Some(cached) = self.discovery_cache.get(issuer).await {
            debug!("Using cached discovery document for {}", issuer);
            return Ok(cached);
        }

        let url = format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        );
        debug!("Fetching discovery document from {}", url);

        let response = self
            .http
            .get(&url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| AuthError::network("discovery", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::provider(
                format!("http_{}", status.as_u16()),
                format!("discovery endpoint {} returned {}", url, status),
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AuthError::network("discovery", e))?;
        let metadata: ProviderMetadata = serde_json::from_slice(&body).map_err(|e| {
            AuthError::provider(
                "invalid_metadata",
                format!("failed to parse discovery document: {}", e),
            )
        })?;

        if metadata.issuer.trim_end_matches('/') != issuer.trim_end_matches('/') {
            return Err(AuthError::provider(
                "invalid_metadata",
                format!(
                    "discovery document issuer {} does not match {}",
                    metadata.issuer, issuer
                ),
            ));
        }

        let metadata = Arc::new(metadata);
        self.discovery_cache
            .insert(issuer.to_string(), metadata.clone())
            .await;
        Ok(metadata)
    }

    /// Fetch the provider's signing keys, bypassing the memo when `force_refresh` is set
    #[instrument(level = "debug", skip(self))]
    pub async fn fetch_jwks(&self, jwks_uri: &str, force_refresh: bool) -> AuthResult<Arc<JwkSet>> {
        if force_refresh {
            self.jwks_cache.invalidate(jwks_uri).await;
        } else if let Some(cached) = self.jwks_cache.get(jwks_uri).await {
            debug!("Using cached JWKS for {}", jwks_uri);
            return Ok(cached);
        }

        let response = self
            .http
            .get(jwks_uri)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| AuthError::network("JWKS fetch", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::provider(
                format!("http_{}", status.as_u16()),
                format!("JWKS endpoint {} returned {}", jwks_uri, status),
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AuthError::network("JWKS fetch", e))?;
        let jwks: JwkSet = serde_json::from_slice(&body).map_err(|e| {
            AuthError::provider("invalid_jwks", format!("failed to parse JWKS: {}", e))
        })?;

        debug!("Fetched JWKS with {} keys", jwks.keys.len());
        let jwks = Arc::new(jwks);
        self.jwks_cache
            .insert(jwks_uri.to_string(), jwks.clone())
            .await;
        Ok(jwks)
    }

    /// Exchange an authorization code and PKCE verifier for tokens
    #[instrument(level = "debug", skip(self, metadata, credentials, code, code_verifier))]
    pub async fn exchange_authorization_code(
        &self,
        metadata: &ProviderMetadata,
        credentials: &ClientCredentials,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> AuthResult<TokenSet> {
        let form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", code_verifier),
            ("redirect_uri", redirect_uri),
        ];
        let tokens = self
            .token_request(metadata, credentials, form, "token exchange", None)
            .await?;
        info!("Token exchange completed successfully");
        Ok(tokens)
    }

    /// Resource owner password credentials grant
    #[instrument(level = "debug", skip(self, metadata, credentials, password))]
    pub async fn exchange_password(
        &self,
        metadata: &ProviderMetadata,
        credentials: &ClientCredentials,
        username: &str,
        password: &str,
        scopes: &[String],
    ) -> AuthResult<TokenSet> {
        let scope = scopes.join(" ");
        let form = vec![
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
            ("scope", scope.as_str()),
        ];
        let tokens = self
            .token_request(metadata, credentials, form, "password grant", None)
            .await?;
        info!("Password grant completed successfully");
        Ok(tokens)
    }

    /// Refresh tokens; the old refresh token is kept if the provider does not return a new one
    #[instrument(level = "debug", skip(self, metadata, credentials, refresh_token))]
    pub async fn refresh(
        &self,
        metadata: &ProviderMetadata,
        credentials: &ClientCredentials,
        refresh_token: &str,
    ) -> AuthResult<TokenSet> {
        let form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let tokens = self
            .token_request(metadata, credentials, form, "token refresh", Some(refresh_token))
            .await?;
        info!("Token refresh completed successfully");
        Ok(tokens)
    }

    /// Verify an ID token against the provider's keys
    ///
    /// If the token is signed with a key ID that is not in the memoized key
    /// set, the set is fetched again once before giving up.
    pub async fn verify_id_token(
        &self,
        metadata: &ProviderMetadata,
        verifier: &TokenVerifier,
        id_token: &str,
        audience: &str,
        nonce: Option<&str>,
    ) -> AuthResult<IdTokenClaims> {
        let keys = self.fetch_jwks(&metadata.jwks_uri, false).await?;
        match verifier.verify(id_token, &metadata.issuer, audience, nonce, &keys) {
            Err(VerificationError::UnknownKeyId(kid)) => {
                debug!("Key {} not in cached JWKS, fetching keys again", kid);
                let keys = self.fetch_jwks(&metadata.jwks_uri, true).await?;
                Ok(verifier.verify(id_token, &metadata.issuer, audience, nonce, &keys)?)
            }
            result => Ok(result?),
        }
    }

    /// Drop memoized discovery documents and key sets
    pub fn clear_caches(&self) {
        self.discovery_cache.invalidate_all();
        self.jwks_cache.invalidate_all();
    }

    async fn token_request(
        &self,
        metadata: &ProviderMetadata,
        credentials: &ClientCredentials,
        mut form: Vec<(&str, &str)>,
        stage: &'static str,
        fallback_refresh_token: Option<&str>,
    ) -> AuthResult<TokenSet> {
        form.push(("client_id", credentials.client_id.as_str()));
        if let Some(secret) = credentials.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let response = self
            .http
            .post(&metadata.token_endpoint)
            .header(ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::network(stage, e))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| AuthError::network(stage, e))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_slice::<ErrorResponse>(&body) {
                return Err(AuthError::Provider {
                    code: error.error,
                    description: error.error_description,
                });
            }
            let text: String = String::from_utf8_lossy(&body).chars().take(200).collect();
            return Err(AuthError::provider(
                format!("http_{}", status.as_u16()),
                format!("{} failed: {}", stage, text),
            ));
        }

        let token_response: TokenResponse = serde_json::from_slice(&body).map_err(|e| {
            AuthError::provider(
                "invalid_response",
                format!("failed to parse token response: {}", e),
            )
        })?;
        token_response.into_token_set(fallback_refresh_token)
    }
}
