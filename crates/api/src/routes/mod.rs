//! Route definitions, grouped by resource.

use axum::Router;

use crate::state::AppState;

pub mod jobs;
pub mod meta;
pub mod photos;

/// All API routes, mounted at the server root.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(photos::router())
        .merge(jobs::router())
        .merge(meta::router())
}
