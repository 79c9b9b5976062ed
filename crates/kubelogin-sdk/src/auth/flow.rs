//! Authentication flow orchestration
//!
//! [`AuthenticationFlow::authenticate`] turns a [`LoginRequest`] into a
//! verified [`TokenSet`]. It reuses a cached token when one is still valid,
//! tries the refresh token next and only then starts a new login, either
//! through the browser (authorization code with PKCE) or with the resource
//! owner password credentials grant.

use super::authorization::AuthorizationState;
use super::browser::{BrowserLauncher, SystemBrowser};
use super::callback_server::CallbackServer;
use super::oidc_client::{ClientCredentials, OidcClient, ProviderMetadata};
use super::token_cache::{CacheFingerprint, TokenCache};
use super::types::{AuthError, AuthResult, LoginRequest, TokenSet};
use super::verifier::TokenVerifier;
use chrono::{TimeZone, Utc};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Run `operation` until it finishes, the deadline passes or `cancel` fires
async fn guarded<T>(
    stage: &'static str,
    deadline: Instant,
    cancel: &CancellationToken,
    operation: impl Future<Output = AuthResult<T>>,
) -> AuthResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AuthError::Cancelled),
        _ = tokio::time::sleep_until(deadline) => Err(AuthError::Timeout(stage)),
        result = operation => result,
    }
}

/// Orchestrates cache lookup, refresh and interactive login
pub struct AuthenticationFlow {
    client: OidcClient,
    verifier: TokenVerifier,
    cache: Option<TokenCache>,
    browser: Arc<dyn BrowserLauncher>,
}

impl AuthenticationFlow {
    /// Create a flow without a token cache that opens the system browser
    pub fn new(client: OidcClient) -> Self {
        Self {
            client,
            verifier: TokenVerifier::default(),
            cache: None,
            browser: Arc::new(SystemBrowser),
        }
    }

    pub fn with_cache(mut self, cache: TokenCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_browser(mut self, browser: Arc<dyn BrowserLauncher>) -> Self {
        self.browser = browser;
        self
    }

    pub fn with_verifier(mut self, verifier: TokenVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    /// Obtain a verified token set for `request`
    #[instrument(skip_all, fields(issuer = %request.issuer_url, client_id = %request.client_id))]
    pub async fn authenticate(
        &self,
        request: &LoginRequest,
        cancel: &CancellationToken,
    ) -> AuthResult<TokenSet> {
        request.validate()?;
        if cancel.is_cancelled() {
            return Err(AuthError::Cancelled);
        }

        let deadline = Instant::now() + request.timeout;
        let fingerprint = CacheFingerprint::for_request(request);

        if let Some(existing) = self.existing_tokens(&fingerprint, request).await {
            if !existing.is_expired() {
                info!("Using cached token valid until {}", existing.expires_at);
                return Ok(existing);
            }

            if let Some(refresh_token) = existing.refresh_token.as_deref() {
                match self.refresh(request, refresh_token, deadline, cancel).await {
                    Ok(tokens) => {
                        self.store(&fingerprint, &tokens).await;
                        return Ok(tokens);
                    }
                    Err(AuthError::Cancelled) => return Err(AuthError::Cancelled),
                    Err(e) => {
                        info!("Token refresh failed, starting a new login: {}", e);
                    }
                }
            }
        }

        let tokens = if request.uses_password_grant() {
            self.password_login(request, deadline, cancel).await?
        } else {
            self.browser_login(request, deadline, cancel).await?
        };

        self.store(&fingerprint, &tokens).await;
        Ok(tokens)
    }

    /// Cached record for the fingerprint, else the tokens the caller already holds
    async fn existing_tokens(
        &self,
        fingerprint: &CacheFingerprint,
        request: &LoginRequest,
    ) -> Option<TokenSet> {
        if let Some(cache) = &self.cache {
            match cache.get(fingerprint).await {
                Ok(Some(record)) => {
                    debug!("Found token cache record {}", fingerprint);
                    return Some(record.token_set);
                }
                Ok(None) => debug!("No token cache record for {}", fingerprint),
                Err(e) => debug!("Token cache lookup failed: {}", e),
            }
        }
        request.seed_tokens.clone()
    }

    async fn store(&self, fingerprint: &CacheFingerprint, tokens: &TokenSet) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(fingerprint, tokens).await {
                debug!("Failed to write token cache: {}", e);
            }
        }
    }

    fn credentials(request: &LoginRequest) -> ClientCredentials {
        ClientCredentials {
            client_id: request.client_id.clone(),
            client_secret: request.client_secret.clone(),
        }
    }

    async fn discover(
        &self,
        request: &LoginRequest,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> AuthResult<Arc<ProviderMetadata>> {
        guarded(
            "discovery",
            deadline,
            cancel,
            self.client.discover(&request.issuer_url),
        )
        .await
    }

    async fn refresh(
        &self,
        request: &LoginRequest,
        refresh_token: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> AuthResult<TokenSet> {
        debug!("Refreshing expired token");
        let metadata = self.discover(request, deadline, cancel).await?;
        let tokens = guarded(
            "token refresh",
            deadline,
            cancel,
            self.client
                .refresh(&metadata, &Self::credentials(request), refresh_token),
        )
        .await?;
        self.verified(&metadata, request, tokens, None, deadline, cancel)
            .await
    }

    async fn password_login(
        &self,
        request: &LoginRequest,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> AuthResult<TokenSet> {
        let username = request.username.as_deref().unwrap_or_default();
        let password = request.password.as_deref().unwrap_or_default();
        info!("Logging in with the password grant as {}", username);

        let metadata = self.discover(request, deadline, cancel).await?;
        let tokens = guarded(
            "password grant",
            deadline,
            cancel,
            self.client.exchange_password(
                &metadata,
                &Self::credentials(request),
                username,
                password,
                &request.scopes(),
            ),
        )
        .await?;
        self.verified(&metadata, request, tokens, None, deadline, cancel)
            .await
    }

    async fn browser_login(
        &self,
        request: &LoginRequest,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> AuthResult<TokenSet> {
        let metadata = self.discover(request, deadline, cancel).await?;
        let server = CallbackServer::bind(&request.listen_ports).await?;
        let state = AuthorizationState::new(server.redirect_uri(), deadline);
        let url = state.authorization_url(&metadata, &request.client_id, &request.scopes())?;

        self.browser.show_url(&url);
        if !request.skip_browser {
            let browser = self.browser.clone();
            let url = url.clone();
            tokio::task::spawn_blocking(move || {
                if let Err(e) = browser.open(&url) {
                    debug!("Failed to open browser: {}", e);
                }
            });
        }

        // Only a callback carrying the expected state completes the wait
        let response = server
            .wait_for_callback(state.state().to_string(), state.deadline(), cancel)
            .await?;

        let tokens = guarded(
            "token exchange",
            deadline,
            cancel,
            self.client.exchange_authorization_code(
                &metadata,
                &Self::credentials(request),
                &response.code,
                state.code_verifier(),
                state.redirect_uri(),
            ),
        )
        .await?;
        self.verified(&metadata, request, tokens, Some(state.nonce()), deadline, cancel)
            .await
    }

    /// Verify the ID token and take its `exp` as the expiry of the set
    async fn verified(
        &self,
        metadata: &ProviderMetadata,
        request: &LoginRequest,
        mut tokens: TokenSet,
        nonce: Option<&str>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> AuthResult<TokenSet> {
        let claims = guarded(
            "ID token verification",
            deadline,
            cancel,
            self.client.verify_id_token(
                metadata,
                &self.verifier,
                &tokens.id_token,
                &request.client_id,
                nonce,
            ),
        )
        .await?;

        if let Some(expires_at) = Utc.timestamp_opt(claims.exp, 0).single() {
            tokens.expires_at = expires_at;
        }
        info!("Authenticated as {}", claims.email.as_deref().unwrap_or(&claims.sub));
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::types::TlsOptions;
    use std::time::Duration;

    fn flow() -> AuthenticationFlow {
        AuthenticationFlow::new(
            OidcClient::new(&TlsOptions::default(), Duration::from_secs(1)).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_invalid_request_fails_before_io() {
        let request = LoginRequest::new("", "kubernetes");
        let result = flow()
            .authenticate(&request, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(AuthError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_already_cancelled() {
        let request = LoginRequest::new("http://127.0.0.1:1", "kubernetes");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = flow().authenticate(&request, &cancel).await;
        assert!(matches!(result, Err(AuthError::Cancelled)));
    }

    #[tokio::test]
    async fn test_valid_seed_tokens_skip_network() {
        let mut request = LoginRequest::new("http://127.0.0.1:1", "kubernetes");
        let seed = TokenSet {
            access_token: String::new(),
            refresh_token: None,
            id_token: "stored".to_string(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            issued_at: Utc::now(),
        };
        request.seed_tokens = Some(seed.clone());

        let tokens = flow()
            .authenticate(&request, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(tokens, seed);
    }

    #[tokio::test]
    async fn test_guarded_deadline() {
        let result: AuthResult<()> = guarded(
            "discovery",
            Instant::now() + Duration::from_millis(10),
            &CancellationToken::new(),
            std::future::pending(),
        )
        .await;
        assert!(matches!(result, Err(AuthError::Timeout("discovery"))));
    }
}
