//! Stateless HTTP transport.
//!
//! Every `POST /mcp` request is served by a fresh ephemeral server over
//! the shared state; teardown is tied to the response lifecycle through
//! a one-shot [`CleanupGuard`] that fires exactly once whether the
//! stream reaches EOF, the client cancels, or the connection errors.
//!
//! `POST /api/v1/auth` exchanges an encrypted credential envelope for a
//! bearer token and its dedicated pool.

use crate::protocol::{codes, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::rate_limit::client_key;
use crate::server::McpServer;
use crate::state::AppState;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use db2i_auth::envelope::EncryptedEnvelope;
use db2i_protocol::defaults::DEFAULT_DB2I_PORT;
use db2i_protocol::{IbmiCredentials, McpError, PoolSizing};
use futures::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// One-shot teardown of an ephemeral server/transport pair.
///
/// `run` is idempotent; the `Drop` impl covers every stream-termination
/// path (EOF, client cancel, mid-stream error).
pub struct CleanupGuard {
    done: AtomicBool,
    request_id: String,
    counter: Option<Arc<AtomicUsize>>,
}

impl CleanupGuard {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            done: AtomicBool::new(false),
            request_id: request_id.into(),
            counter: None,
        }
    }

    pub fn with_counter(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.counter = Some(counter);
        self
    }

    pub fn run(&self) {
        if !self.done.swap(true, Ordering::SeqCst) {
            if let Some(counter) = &self.counter {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            debug!(request_id = %self.request_id, "ephemeral server torn down");
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.run();
    }
}

/// SSE stream with one final event; the guard rides along so teardown
/// fires when the stream completes or is dropped mid-flight.
struct FinalEventStream {
    event: Option<Event>,
    guard: Option<CleanupGuard>,
}

impl Stream for FinalEventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.event.take() {
            Some(event) => Poll::Ready(Some(Ok(event))),
            None => {
                if let Some(guard) = this.guard.take() {
                    guard.run();
                }
                Poll::Ready(None)
            }
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/mcp", post(handle_mcp))
        .route("/api/v1/auth", post(handle_auth))
        .route("/api/v1/auth/keys", get(handle_auth_keys))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the shutdown future resolves, then close pools.
pub async fn serve(
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), McpError> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| McpError::initialization(format!("Failed to bind {addr}: {e}")))?;
    info!(%addr, "HTTP transport listening");

    let app = router(Arc::clone(&state));
    let (drain_tx, drain_rx) = tokio::sync::oneshot::channel::<()>();
    let graceful = async move {
        shutdown.await;
        let _ = drain_tx.send(());
    };

    let serve_fut = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(graceful)
    .into_future();
    tokio::pin!(serve_fut);

    // Drain in-flight requests up to a deadline once shutdown fires.
    let deadline = async {
        let _ = drain_rx.await;
        tokio::time::sleep(std::time::Duration::from_secs(
            db2i_protocol::defaults::SHUTDOWN_TIMEOUT_SECS,
        ))
        .await;
    };

    let result = tokio::select! {
        result = &mut serve_fut => {
            result.map_err(|e| McpError::internal(format!("HTTP server failed: {e}")))
        }
        _ = deadline => {
            tracing::warn!("drain deadline exceeded; abandoning in-flight requests");
            Ok(())
        }
    };

    state.shutdown().await;
    info!("HTTP transport stopped");
    result
}

async fn handle_mcp(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: String,
) -> Response {
    // Rate limit before any work.
    let key = client_key(
        header_str(&headers, "x-forwarded-for"),
        header_str(&headers, "x-real-ip"),
        Some(addr),
    );
    if let Err(e) = state.rate_limiter.check(&key) {
        return rpc_error_response(StatusCode::TOO_MANY_REQUESTS, JsonRpcError::from_mcp(&e));
    }

    // Auth middleware: a bearer token, when present, must validate.
    let auth_token = match bearer_token(&headers) {
        Some(token) => match state.tokens.validate_token(&token) {
            Ok(_) => Some(token),
            Err(e) => {
                return rpc_error_response(StatusCode::UNAUTHORIZED, JsonRpcError::from_mcp(&e))
            }
        },
        None => None,
    };

    let request: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            return rpc_error_response(
                StatusCode::BAD_REQUEST,
                JsonRpcError::new(codes::PARSE_ERROR, format!("Invalid JSON: {e}")),
            )
        }
    };

    let wants_stream = header_str(&headers, "accept")
        .map(|accept| accept.contains("text/event-stream"))
        .unwrap_or(false);

    // Ephemeral server per request; no state survives this scope.
    let server = McpServer::new(Arc::clone(&state), auth_token);
    let guard = CleanupGuard::new(key);
    let response = server.handle(request).await;

    match response {
        // Notification: no body, immediate teardown.
        None => {
            guard.run();
            StatusCode::ACCEPTED.into_response()
        }
        Some(response) if wants_stream => {
            let payload = serde_json::to_string(&response).unwrap_or_else(|_| {
                r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"serialization failed"}}"#.to_string()
            });
            let stream = FinalEventStream {
                event: Some(Event::default().event("message").data(payload)),
                guard: Some(guard),
            };
            Sse::new(stream).into_response()
        }
        Some(response) => {
            guard.run();
            (StatusCode::OK, Json(response)).into_response()
        }
    }
}

async fn handle_auth(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if !state.config.auth.enabled {
        return auth_error_response(&McpError::method_not_found(
            "Authentication endpoint is disabled",
        ));
    }

    if let Err(e) = enforce_tls(&state, &headers) {
        return auth_error_response(&e);
    }

    let envelope: EncryptedEnvelope = match serde_json::from_str(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            return auth_error_response(&McpError::invalid_request(format!(
                "Malformed auth envelope: {e}"
            )))
        }
    };

    match create_session(&state, &envelope).await {
        Ok(response) => (StatusCode::CREATED, Json(response)).into_response(),
        Err(e) => auth_error_response(&e),
    }
}

async fn handle_auth_keys(State(state): State<Arc<AppState>>) -> Response {
    let Some(keyring) = &state.keyring else {
        return auth_error_response(&McpError::method_not_found(
            "Authentication endpoint is disabled",
        ));
    };
    let keys: Vec<_> = keyring
        .key_ids()
        .into_iter()
        .filter_map(|key_id| {
            keyring
                .public_key_pem(&key_id)
                .ok()
                .map(|pem| json!({ "keyId": key_id, "publicKeyPem": pem }))
        })
        .collect();
    Json(json!({ "keys": keys })).into_response()
}

async fn create_session(
    state: &Arc<AppState>,
    envelope: &EncryptedEnvelope,
) -> Result<serde_json::Value, McpError> {
    let keyring = state
        .keyring
        .as_ref()
        .ok_or_else(|| McpError::internal("Key ring unavailable"))?;

    let payload = keyring.open(envelope)?;

    if !state.tokens.can_create_new_session() {
        return Err(McpError::rate_limited("Concurrent session limit reached"));
    }

    let (host, port) = split_host_port(&payload.request.host);
    let credentials = IbmiCredentials {
        host,
        port,
        user: payload.credentials.username.clone(),
        password: payload.credentials.password.clone(),
        ignore_unauthorized: state
            .config
            .db2
            .as_ref()
            .map(|c| c.credentials.ignore_unauthorized)
            .unwrap_or(false),
    };

    let sizing = PoolSizing {
        starting_size: payload
            .request
            .poolstart
            .unwrap_or(PoolSizing::default().starting_size),
        max_size: payload
            .request
            .poolmax
            .unwrap_or(PoolSizing::default().max_size),
    };

    let duration = payload
        .request
        .duration
        .unwrap_or(state.config.auth.token_expiry_seconds);

    let session = state
        .tokens
        .create_session(credentials.clone(), Some(duration), sizing)?;

    if let Err(e) = state
        .auth_pools
        .create_pool(&session.token, credentials, sizing)
        .await
    {
        state.tokens.remove_token(&session.token);
        return Err(e);
    }

    info!(user = %session.credentials.user, host = %session.credentials.host, "session issued");

    Ok(json!({
        "access_token": session.token,
        "token_type": "Bearer",
        "expires_in": session.expires_in_seconds(),
        "expires_at": session.expires_at.to_rfc3339(),
    }))
}

/// Reject plain HTTP unless explicitly allowed in development.
fn enforce_tls(state: &Arc<AppState>, headers: &HeaderMap) -> Result<(), McpError> {
    let https = header_str(headers, "x-forwarded-proto")
        .map(|proto| proto.eq_ignore_ascii_case("https"))
        .unwrap_or(false);
    if https {
        return Ok(());
    }
    if state.config.auth.allow_http && state.config.environment.is_development() {
        return Ok(());
    }
    Err(McpError::invalid_request(
        "Authentication requires HTTPS; set IBMI_AUTH_ALLOW_HTTP=true for development only",
    ))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    header_str(headers, header::AUTHORIZATION.as_str())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn split_host_port(value: &str) -> (String, u16) {
    match value.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (value.to_string(), DEFAULT_DB2I_PORT),
        },
        None => (value.to_string(), DEFAULT_DB2I_PORT),
    }
}

fn rpc_error_response(status: StatusCode, error: JsonRpcError) -> Response {
    (status, Json(JsonRpcResponse::error(None, error))).into_response()
}

fn auth_error_response(error: &McpError) -> Response {
    let status = match error {
        McpError::InvalidRequest { .. } | McpError::Validation { .. } => StatusCode::BAD_REQUEST,
        McpError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
        McpError::MethodNotFound { .. } => StatusCode::NOT_FOUND,
        McpError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": error.to_structured() }))).into_response()
}
