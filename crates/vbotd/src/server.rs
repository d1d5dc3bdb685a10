//! Slash-command webhook server.
//!
//! The chat platform POSTs a form-encoded payload to `/` and renders the JSON
//! body of the reply in the channel.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Form, Json, Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use vbot_core::{CommandPayload, Response};

use crate::commander::Commander;

/// Body returned by `GET /`.
pub const GREETING: &str = "Yessir!";

/// Shared state for HTTP handlers.
#[derive(Debug)]
pub struct AppState {
    pub commander: Arc<Commander>,
    /// Expected slash-command token, if verification is enabled.
    pub token: Option<String>,
    pub max_payload_bytes: usize,
}

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let limit = state.max_payload_bytes;
    Router::new()
        .route("/", get(greeting).post(handle_command))
        .route("/health", get(health_check))
        .layer(DefaultBodyLimit::max(limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
pub async fn start_server(
    state: Arc<AppState>,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

fn check_token(
    state: &AppState,
    payload: &CommandPayload,
) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    let Some(expected) = &state.token else {
        return Ok(());
    };
    match payload.token.as_deref() {
        Some(token) if token == expected => Ok(()),
        Some(_) => Err(error_response(StatusCode::UNAUTHORIZED, "invalid token")),
        None => Err(error_response(StatusCode::UNAUTHORIZED, "missing token")),
    }
}

async fn greeting() -> &'static str {
    GREETING
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST / - run a slash command.
async fn handle_command(
    State(state): State<Arc<AppState>>,
    Form(payload): Form<CommandPayload>,
) -> Result<Json<Response>, (StatusCode, Json<ErrorResponse>)> {
    if let Err(rejection) = check_token(&state, &payload) {
        warn!(
            user = payload.user_name.as_deref().unwrap_or("-"),
            "rejected command with bad token"
        );
        return Err(rejection);
    }

    // Handlers read files and may call git.
    let commander = Arc::clone(&state.commander);
    let resp = tokio::task::spawn_blocking(move || commander.handle(&payload))
        .await
        .map_err(|e| {
            error!("command handler failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "command handler failed")
        })?;

    Ok(Json(resp))
}
