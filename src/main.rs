use std::future::IntoFuture;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hallway::{config::ServerConfig, hub::Hub, state::AppState};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hallway=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();

    let (hub, hub_task) = Hub::spawn(&config.hub);
    let state = Arc::new(AppState::new(hub, config.session.clone()));
    let app = hallway::router(state, &config.static_dir);

    let listener = match tokio::net::TcpListener::bind(config.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", config.bind, e);
            std::process::exit(1);
        }
    };
    tracing::info!("Hallway Server running on http://{}", config.bind);

    // Without the hub nothing can register or broadcast, so its exit is fatal
    tokio::select! {
        result = axum::serve(listener, app).into_future() => {
            if let Err(e) = result {
                tracing::error!("Server error: {}", e);
                std::process::exit(1);
            }
        }
        result = hub_task => {
            match result {
                Ok(()) => tracing::error!("Hub event loop exited unexpectedly"),
                Err(e) => tracing::error!("Hub event loop crashed: {}", e),
            }
            std::process::exit(1);
        }
    }
}
