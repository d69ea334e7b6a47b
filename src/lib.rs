// Public API for integration tests and potential library usage

pub mod api;
pub mod config;
pub mod history;
pub mod hub;
pub mod identity;
pub mod protocol;
pub mod session;
pub mod state;
pub mod ws;

use axum::{routing::get, Router};
use std::path::Path;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::state::AppState;

/// Build the HTTP router: `/chat` upgrade, `/api/stats`, static fallback
pub fn router(state: Arc<AppState>, static_dir: impl AsRef<Path>) -> Router {
    Router::new()
        .route("/chat", get(ws::chat_handler))
        .route("/api/stats", get(api::stats))
        .fallback_service(ServeDir::new(static_dir.as_ref()))
        // Any origin is accepted
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
