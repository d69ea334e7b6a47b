//! HTTP API endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

/// Response body for `GET /api/stats`
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Connected sessions
    pub users: usize,
    /// Chat messages held for replay
    pub history: usize,
}

/// Current hub statistics.
///
/// GET /api/stats
///
/// Answered by the hub itself, so the numbers are consistent with each other.
pub async fn stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatsResponse>, StatusCode> {
    match state.hub.snapshot().await {
        Ok(snapshot) => Ok(Json(StatsResponse {
            users: snapshot.users,
            history: snapshot.history.len(),
        })),
        Err(e) => {
            tracing::error!("Stats unavailable: {}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
