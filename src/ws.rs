//! `/chat` WebSocket endpoint

use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::stream::StreamExt;
use serde::Deserialize;
use std::sync::Arc;

use crate::identity::resolve_identity_now;
use crate::session::run_session;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    pub username: Option<String>,
}

/// WebSocket upgrade handler
pub async fn chat_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ChatQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    tracing::info!("WebSocket connection request: username={:?}", params.username);

    ws.on_failed_upgrade(|e| tracing::warn!("Upgrade error: {}", e))
        .on_upgrade(move |socket| handle_socket(socket, params, state))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, params: ChatQuery, state: Arc<AppState>) {
    // Resolved once, after the upgrade succeeded
    let identity = resolve_identity_now(params.username.as_deref());
    tracing::info!("WebSocket connected as {}", identity);

    let (sender, receiver) = socket.split();
    run_session(
        sender,
        receiver,
        identity,
        state.hub.clone(),
        state.session.clone(),
    )
    .await;
}
