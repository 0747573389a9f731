use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use dealflow_agent::CollabService;
use dealflow_core::config::GatewayConfig;

/// Shared application state for axum handlers.
pub struct AppState {
    pub config: GatewayConfig,
    pub service: Arc<CollabService>,
    /// Cancelled on shutdown; each request runs under a child token.
    pub shutdown: CancellationToken,
}
