//! Stride realtime server library.
//!
//! The real-time backbone of the Stride fitness app:
//!
//! 1. **Presence**: tracks which users have a live connection, broadcasts
//!    online/offline deltas, and remembers last-seen timestamps.
//!
//! 2. **Chat delivery**: persists every message through the chat store,
//!    then pushes it to the receiver's connection when they're online.
//!    Typing indicators and read receipts are relayed best-effort.
//!
//! 3. **Call signaling**: relays WebRTC offers/answers/ICE between exactly
//!    two parties per call, with server-side lifecycle tracking so stale
//!    signals are rejected and a dropped peer ends the call. Media never
//!    touches the server.

pub mod calls;
pub mod delivery;
pub mod error;
pub mod handler;
pub mod presence;
pub mod protocol;
pub mod state;
pub mod storage;

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use error::{SendError, StoreError};
use protocol::MessageType;
use state::AppState;

/// Build the Axum application: the WebSocket endpoint, the thin REST
/// companions, CORS for the web client, and request tracing.
pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/ws/chat", get(ws_handler))
        .route("/send", post(send_handler))
        .route("/online-count", get(online_count_handler))
        .route("/user-status/:user_id", get(user_status_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Route Handlers ────────────────────────────────────────────────────────────

/// WebSocket upgrade handler for client connections.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handler::handle_websocket(socket, state))
}

/// Fallback non-live send for clients without an open socket.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest {
    sender_id: String,
    receiver_id: String,
    content: String,
    #[serde(default)]
    message_type: MessageType,
}

async fn send_handler(
    State(state): State<AppState>,
    Json(req): Json<SendRequest>,
) -> impl IntoResponse {
    match delivery::send_message(
        &state,
        &req.sender_id,
        &req.receiver_id,
        &req.content,
        req.message_type,
    )
    .await
    {
        Ok(message) => (StatusCode::OK, Json(json!({ "message": message }))),
        Err(e) => {
            let status = match &e {
                SendError::Validation(_) => StatusCode::BAD_REQUEST,
                SendError::Store(StoreError::NotPermitted(_)) => StatusCode::FORBIDDEN,
                SendError::Store(StoreError::Backend(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(json!({ "error": e.to_string() })))
        }
    }
}

/// Number of currently connected users.
async fn online_count_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "onlineCount": state.registry.online_count() }))
}

/// Liveness of one user: online now, or when they were last seen.
async fn user_status_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    Json(json!({
        "userId": user_id,
        "online": state.registry.is_online(&user_id),
        "lastSeen": state.registry.last_seen(&user_id),
    }))
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "stride-realtime",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Statistics endpoint.
async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "online_clients": state.registry.online_count(),
        "active_calls": state.calls.active_count(),
    }))
}
