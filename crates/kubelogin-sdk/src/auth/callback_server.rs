//! Local HTTP callback server for OAuth authorization code flow
//!
//! This module implements a temporary loopback HTTP server that receives
//! the authorization redirect from the OpenID Connect provider. One server
//! is bound per login attempt and shut down as soon as the attempt ends.

use super::authorization::constant_time_eq;
use super::types::{AuthError, AuthResult};
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long graceful shutdown may take before the server task is aborted
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Authorization response accepted by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationResponse {
    pub code: String,
    pub state: String,
}

/// OAuth callback query parameters
#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

type CallbackOutcome = AuthResult<AuthorizationResponse>;

/// Callback state shared between the server and the waiting flow
struct CallbackState {
    expected_state: String,
    sender: Mutex<Option<oneshot::Sender<CallbackOutcome>>>,
    rejected: AtomicU32,
    shutdown: CancellationToken,
}

impl CallbackState {
    /// Deliver the outcome if nothing was delivered yet
    fn complete(&self, outcome: CallbackOutcome) -> bool {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        match sender {
            Some(sender) => {
                let _ = sender.send(outcome);
                self.shutdown.cancel();
                true
            }
            None => false,
        }
    }
}

/// Loopback HTTP server bound to one port
pub struct CallbackServer {
    listener: TcpListener,
    port: u16,
}

impl CallbackServer {
    /// Bind the first available port of `ports` on 127.0.0.1
    ///
    /// A `0` entry binds any free port.
    pub async fn bind(ports: &[u16]) -> AuthResult<Self> {
        for &candidate in ports {
            match TcpListener::bind((Ipv4Addr::LOCALHOST, candidate)).await {
                Ok(listener) => {
                    let port = listener.local_addr()?.port();
                    debug!("Callback server bound to 127.0.0.1:{}", port);
                    return Ok(Self { listener, port });
                }
                Err(e) => {
                    debug!("Port {} unavailable: {}", candidate, e);
                }
            }
        }

        Err(AuthError::PortUnavailable {
            ports: ports.to_vec(),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Redirect URI registered in the authorization request
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/", self.port)
    }

    /// Serve until a callback with `expected_state` arrives, the deadline
    /// passes or `cancel` fires, whichever happens first.
    ///
    /// Callbacks with a wrong or missing state are answered with an error
    /// page and do not end the wait.
    pub async fn wait_for_callback(
        self,
        expected_state: String,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> AuthResult<AuthorizationResponse> {
        let (tx, rx) = oneshot::channel();
        let shutdown = CancellationToken::new();

        let state = Arc::new(CallbackState {
            expected_state,
            sender: Mutex::new(Some(tx)),
            rejected: AtomicU32::new(0),
            shutdown: shutdown.clone(),
        });

        let app = Router::new()
            .route("/", get(handle_callback))
            .fallback(handle_not_found)
            .with_state(state.clone());

        let server_shutdown = shutdown.clone();
        let listener = self.listener;
        let mut server_handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
                .await
        });

        info!("Waiting for authorization callback on port {}", self.port);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AuthError::Cancelled),
            received = rx => received.unwrap_or_else(|_| {
                Err(AuthError::CallbackServer("callback channel closed".to_string()))
            }),
            _ = tokio::time::sleep_until(deadline) => {
                match state.rejected.load(Ordering::SeqCst) {
                    0 => Err(AuthError::CallbackTimeout),
                    attempts => Err(AuthError::CallbackStateMismatch { attempts }),
                }
            }
        };

        shutdown.cancel();
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut server_handle).await {
            Ok(Ok(Err(e))) => debug!("Callback server stopped with error: {}", e),
            Ok(_) => debug!("Callback server stopped"),
            Err(_) => {
                debug!("Callback server did not stop in time, aborting");
                server_handle.abort();
            }
        }

        outcome
    }

    /// Generate success HTML page to display to user
    pub fn generate_success_page() -> String {
        page(
            "Authorization Successful",
            "#10B981",
            "&#10003;",
            "<p>Authentication successful!</p>",
            "You can now close this window and return to the terminal.",
        )
    }

    /// Generate error HTML page to display to user
    pub fn generate_error_page(error: &str) -> String {
        page(
            "Authorization Failed",
            "#EF4444",
            "&#10007;",
            &format!("<div class=\"error-details\">{}</div>", escape_html(error)),
            "Please close this window and try again.",
        )
    }
}

fn page(title: &str, color: &str, icon: &str, body: &str, footer: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title} - kubelogin</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, 'Helvetica Neue', Arial, sans-serif;
            background: #F3F4F6;
            margin: 0;
            display: flex;
            justify-content: center;
            align-items: center;
            min-height: 100vh;
        }}
        .container {{
            background: #ffffff;
            padding: 48px;
            border-radius: 8px;
            box-shadow: 0 4px 6px rgba(0, 0, 0, 0.1);
            max-width: 480px;
            text-align: center;
        }}
        .icon {{
            width: 64px;
            height: 64px;
            margin: 0 auto 24px;
            background: {color};
            border-radius: 50%;
            color: white;
            font-size: 32px;
            line-height: 64px;
        }}
        h1 {{ margin: 0 0 16px 0; font-size: 24px; color: #111827; }}
        p {{ margin: 0 0 8px 0; color: #6B7280; }}
        .error-details {{
            background: #F9FAFB;
            border: 1px solid #E5E7EB;
            padding: 12px;
            border-radius: 6px;
            font-family: 'SF Mono', Monaco, 'Courier New', monospace;
            color: #EF4444;
            word-break: break-word;
        }}
        .footer {{ margin-top: 24px; font-size: 14px; color: #9CA3AF; }}
    </style>
</head>
<body>
    <div class="container">
        <div class="icon">{icon}</div>
        <h1>{title}</h1>
        {body}
        <p class="footer">{footer}</p>
    </div>
</body>
</html>
"#
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn html_response(status: StatusCode, body: String) -> impl IntoResponse {
    (
        status,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        Html(body),
    )
}

/// Axum handler for the redirect path
async fn handle_callback(
    Query(params): Query<CallbackQuery>,
    State(state): State<Arc<CallbackState>>,
) -> impl IntoResponse {
    let received_state = params.state.unwrap_or_default();
    if received_state.is_empty() || !constant_time_eq(&received_state, &state.expected_state) {
        let attempts = state.rejected.fetch_add(1, Ordering::SeqCst) + 1;
        warn!("Rejected authorization callback with mismatched state (attempt {})", attempts);
        return html_response(
            StatusCode::BAD_REQUEST,
            CallbackServer::generate_error_page("State mismatch. Please restart the login."),
        );
    }

    let (outcome, page) = match (params.error, params.code) {
        (Some(error), _) => {
            let message = params
                .error_description
                .clone()
                .unwrap_or_else(|| error.clone());
            (
                Err(AuthError::Provider {
                    code: error,
                    description: params.error_description,
                }),
                CallbackServer::generate_error_page(&message),
            )
        }
        (None, Some(code)) if !code.is_empty() => (
            Ok(AuthorizationResponse {
                code,
                state: received_state,
            }),
            CallbackServer::generate_success_page(),
        ),
        (None, _) => (
            Err(AuthError::provider(
                "invalid_request",
                "authorization response contains no code",
            )),
            CallbackServer::generate_error_page("Missing authorization code"),
        ),
    };

    if state.complete(outcome) {
        html_response(StatusCode::OK, page)
    } else {
        html_response(
            StatusCode::CONFLICT,
            CallbackServer::generate_error_page("This login attempt has already completed."),
        )
    }
}

async fn handle_not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn browser() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    fn deadline(secs: u64) -> Instant {
        Instant::now() + Duration::from_secs(secs)
    }

    #[tokio::test]
    async fn test_bind_falls_back_to_next_port() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let busy_port = occupied.local_addr().unwrap().port();

        let server = CallbackServer::bind(&[busy_port, 0]).await.unwrap();
        assert_ne!(server.port(), busy_port);
        assert_eq!(
            server.redirect_uri(),
            format!("http://localhost:{}/", server.port())
        );
    }

    #[tokio::test]
    async fn test_bind_reports_all_ports_busy() {
        let first = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let second = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let ports = vec![
            first.local_addr().unwrap().port(),
            second.local_addr().unwrap().port(),
        ];

        match CallbackServer::bind(&ports).await {
            Err(AuthError::PortUnavailable { ports: tried }) => assert_eq!(tried, ports),
            other => panic!("expected PortUnavailable, got {:?}", other.map(|s| s.port())),
        }
    }

    #[tokio::test]
    async fn test_mismatched_state_keeps_waiting() {
        let server = CallbackServer::bind(&[0]).await.unwrap();
        let port = server.port();
        let cancel = CancellationToken::new();
        let waiter = tokio::spawn(async move {
            server
                .wait_for_callback("expected".to_string(), deadline(10), &cancel)
                .await
        });

        let client = browser();
        let rejected = client
            .get(format!("http://127.0.0.1:{}/?code=evil&state=forged", port))
            .send()
            .await
            .unwrap();
        assert_eq!(rejected.status(), reqwest::StatusCode::BAD_REQUEST);

        let not_found = client
            .get(format!("http://127.0.0.1:{}/favicon.ico", port))
            .send()
            .await
            .unwrap();
        assert_eq!(not_found.status(), reqwest::StatusCode::NOT_FOUND);

        let accepted = client
            .get(format!("http://127.0.0.1:{}/?code=good&state=expected", port))
            .send()
            .await
            .unwrap();
        assert_eq!(accepted.status(), reqwest::StatusCode::OK);

        let response = waiter.await.unwrap().unwrap();
        assert_eq!(response.code, "good");
        assert_eq!(response.state, "expected");
    }

    #[tokio::test]
    async fn test_timeout_without_callback() {
        let server = CallbackServer::bind(&[0]).await.unwrap();
        let result = server
            .wait_for_callback(
                "expected".to_string(),
                Instant::now() + Duration::from_millis(100),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(AuthError::CallbackTimeout)));
    }

    #[tokio::test]
    async fn test_timeout_after_rejected_callback_reports_mismatch() {
        let server = CallbackServer::bind(&[0]).await.unwrap();
        let port = server.port();
        let cancel = CancellationToken::new();
        let waiter = tokio::spawn(async move {
            server
                .wait_for_callback(
                    "expected".to_string(),
                    Instant::now() + Duration::from_millis(500),
                    &cancel,
                )
                .await
        });

        browser()
            .get(format!("http://127.0.0.1:{}/?code=x&state=wrong", port))
            .send()
            .await
            .unwrap();

        assert!(matches!(
            waiter.await.unwrap(),
            Err(AuthError::CallbackStateMismatch { attempts: 1 })
        ));
    }

    #[tokio::test]
    async fn test_provider_error_callback() {
        let server = CallbackServer::bind(&[0]).await.unwrap();
        let port = server.port();
        let cancel = CancellationToken::new();
        let waiter = tokio::spawn(async move {
            server
                .wait_for_callback("expected".to_string(), deadline(10), &cancel)
                .await
        });

        browser()
            .get(format!(
                "http://127.0.0.1:{}/?error=access_denied&error_description=denied&state=expected",
                port
            ))
            .send()
            .await
            .unwrap();

        match waiter.await.unwrap() {
            Err(AuthError::Provider { code, description }) => {
                assert_eq!(code, "access_denied");
                assert_eq!(description.as_deref(), Some("denied"));
            }
            other => panic!("expected provider error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation() {
        let server = CallbackServer::bind(&[0]).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = server
            .wait_for_callback("expected".to_string(), deadline(10), &cancel)
            .await;
        assert!(matches!(result, Err(AuthError::Cancelled)));
    }

    #[test]
    fn test_error_page_escapes_html() {
        let page = CallbackServer::generate_error_page("<script>alert('x')</script>");
        assert!(!page.contains("<script>"));
        assert!(page.contains("&lt;script&gt;"));
    }
}
