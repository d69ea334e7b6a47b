use crate::config::SessionConfig;
use crate::hub::HubHandle;

/// Shared application state handed to axum handlers
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub session: SessionConfig,
}

impl AppState {
    pub fn new(hub: HubHandle, session: SessionConfig) -> Self {
        Self { hub, session }
    }
}
