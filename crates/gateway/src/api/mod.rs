pub mod health;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
pub fn router() -> Router<AppState> {
    Router::new()
        // Health
        .route("/v1/health", get(health::health))
        // Device call-home (WebSocket)
        .route("/v1/callhome/:protocol", get(crate::callhome::ws::callhome_ws))
}
