//! HTTP surface of the relay
//!
//! Routes:
//! - `POST /api/chat`: one-shot generation, or NDJSON pass-through with `stream: true`
//! - `POST /api/stream`: generation relayed as server-sent events
//! - `GET /api/models`: upstream model list
//! - `GET /health`: liveness
//!
//! Chat and stream requests are rate limited per client identity.

use axum::{
    Json, Router,
    body::Body,
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, Response, header},
    middleware::{self, Next},
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::limiter::{Admission, RateLimiter};
use crate::stream::{FrameMode, RelayStream};
use crate::upstream::{GenerateRequest, UpstreamClient};

use super::error::ApiError;
use super::identity::ClientIdentity;

/// Shared application state for all handlers
pub struct AppState {
    pub config: Config,
    /// Client for the generation service
    pub upstream: UpstreamClient,
    /// Per-identity request counters
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        let upstream = UpstreamClient::new(&config.upstream)?;
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit)?);

        Ok(Self {
            config,
            upstream,
            limiter,
        })
    }
}

/// Body of `/api/chat` and `/api/stream`
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Only honoured by `/api/chat`
    #[serde(default)]
    pub stream: bool,
}

/// The relay server
pub struct RelayServer {
    config: Config,
}

impl RelayServer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Bind the listener and serve until Ctrl+C or SIGTERM
    pub async fn serve(&self) -> Result<()> {
        let state = Arc::new(AppState::new(self.config.clone())?);
        let sweeper = state
            .limiter
            .spawn_sweeper(self.config.rate_limit.sweep_interval());

        let app = create_router(state);

        let addr: SocketAddr = self
            .config
            .server
            .listen_addr
            .parse()
            .map_err(|e| RelayError::Config(format!("Invalid listen address: {e}")))?;

        tracing::info!("Starting relay server on {addr}");
        tracing::info!("Upstream generation service: {}", self.config.upstream.base_url);
        tracing::info!(
            "Rate limit: {} requests per {}s per client",
            self.config.rate_limit.max_requests,
            self.config.rate_limit.window_secs
        );

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RelayError::Server(format!("Failed to bind to {addr}: {e}")))?;

        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        sweeper.abort();
        served.map_err(|e| RelayError::Server(format!("Server error: {e}")))?;

        tracing::info!("Relay server shut down gracefully");
        Ok(())
    }
}

/// Create the router with all routes configured
pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/stream", post(stream_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/models", get(models_handler))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Reject requests over the identity's window ceiling before any upstream call
async fn rate_limit(
    State(state): State<Arc<AppState>>,
    identity: ClientIdentity,
    request: axum::extract::Request,
    next: Next,
) -> Response<Body> {
    match state.limiter.admit(identity.as_str()) {
        Admission::Allowed => next.run(request).await,
        Admission::Rejected { retry_after_secs } => {
            tracing::debug!(identity = %identity, retry_after_secs, "Rate limit exceeded");
            ApiError::RateLimited { retry_after_secs }.into_response()
        }
    }
}

/// Health check endpoint - returns JSON status
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn chat_handler(
    State(state): State<Arc<AppState>>,
    identity: ClientIdentity,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> std::result::Result<Response<Body>, ApiError> {
    let chat = parse_chat(payload)?;
    let request = state
        .upstream
        .request(&chat.message, chat.model.as_deref(), chat.stream);

    tracing::info!(
        identity = %identity,
        model = %request.model,
        stream = request.stream,
        "Relaying chat request"
    );

    if request.stream {
        return relay_stream(&state, &request, FrameMode::Ndjson).await;
    }

    let reply = state.upstream.generate(&request).await?;
    let content_type = reply
        .content_type
        .unwrap_or_else(|| "application/json".to_string());

    Ok(([(header::CONTENT_TYPE, content_type)], reply.body).into_response())
}

async fn stream_handler(
    State(state): State<Arc<AppState>>,
    identity: ClientIdentity,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> std::result::Result<Response<Body>, ApiError> {
    let chat = parse_chat(payload)?;
    let request = state
        .upstream
        .request(&chat.message, chat.model.as_deref(), true);

    tracing::info!(
        identity = %identity,
        model = %request.model,
        "Relaying streaming request"
    );

    relay_stream(&state, &request, FrameMode::Sse).await
}

async fn models_handler(
    State(state): State<Arc<AppState>>,
) -> std::result::Result<Response<Body>, ApiError> {
    let reply = state.upstream.list_models().await?;
    let content_type = reply
        .content_type
        .unwrap_or_else(|| "application/json".to_string());

    Ok(([(header::CONTENT_TYPE, content_type)], reply.body).into_response())
}

fn parse_chat(
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> std::result::Result<ChatRequest, ApiError> {
    let Json(chat) = payload.map_err(|e| ApiError::Request(e.body_text()))?;

    if chat.message.trim().is_empty() {
        return Err(ApiError::Request("Message is required".to_string()));
    }

    Ok(chat)
}

/// Open the upstream stream and hand it to the response body
///
/// Upstream failures up to this point become a JSON error response. Once
/// the body is returned, failures are reported inline by [`RelayStream`].
async fn relay_stream(
    state: &AppState,
    request: &GenerateRequest,
    mode: FrameMode,
) -> std::result::Result<Response<Body>, ApiError> {
    let upstream = state.upstream.generate_stream(request).await?;

    let mut response = Response::new(Body::from_stream(RelayStream::new(upstream, mode)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(mode.content_type()),
    );
    if mode == FrameMode::Sse {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    }

    Ok(response)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}
