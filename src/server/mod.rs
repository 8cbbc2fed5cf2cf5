//! HTTP transport: chat streaming, tool statistics, health.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::store::UsageRecorder;
use crate::types::ConversationMessage;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub usage: Arc<dyn UsageRecorder>,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, usage: Arc<dyn UsageRecorder>) -> Self {
        Self { dispatcher, usage }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ClientMessage>,
}

/// A message as sent by the browser client.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

/// Build the application router. When `frontend_dir` is given, its files are
/// served under `/static` and its `index.html` at `/`.
pub fn router(state: AppState, frontend_dir: Option<&Path>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/api/chat/stream", post(chat_stream))
        .route("/api/tools/stats", get(tool_stats));

    if let Some(dir) = frontend_dir {
        app = app
            .nest_service("/static", ServeDir::new(dir))
            .route_service("/", ServeFile::new(dir.join("index.html")));
    }

    app.layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(addr: SocketAddr, app: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Pharmacy assistant listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn chat_stream(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    let messages = request
        .messages
        .into_iter()
        .map(|m| ConversationMessage::from_client(&m.role, m.content))
        .collect();

    let frames = state
        .dispatcher
        .stream(messages)
        .map(|event| Ok::<Bytes, Infallible>(Bytes::from(format!("data: {}\n\n", event.to_json()))));
    sse_response(frames)
}

async fn tool_stats(State(state): State<AppState>) -> Response {
    match state.usage.snapshot().await {
        Ok(tools) => Json(json!({ "tools": tools })).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to read tool usage");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

fn sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = std::result::Result<Bytes, Infallible>> + Send + 'static,
{
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    (headers, Body::from_stream(stream)).into_response()
}
