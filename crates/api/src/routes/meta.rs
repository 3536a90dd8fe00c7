//! Route definitions for the stage catalog, settings, and status probe.

use axum::routing::get;
use axum::Router;

use crate::handlers::meta;
use crate::state::AppState;

/// ```text
/// GET /steps     -> filtered stage catalog
/// GET /settings  -> concurrency settings
/// PUT /settings  -> update concurrency
/// GET /status    -> worker environment probe
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/steps", get(meta::steps))
        .route("/settings", get(meta::settings).put(meta::update_settings))
        .route("/status", get(meta::status))
}
