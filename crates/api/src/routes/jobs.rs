//! Route definitions for the `/jobs` resource.

use axum::routing::{get, post, put};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes for the job queue.
///
/// ```text
/// POST   /jobs                   -> create
/// GET    /jobs                   -> list (refreshes the heartbeat)
/// POST   /jobs/cancel-all        -> cancel_all
/// PUT    /jobs/reorder           -> reorder
/// GET    /jobs/{id}              -> get
/// POST   /jobs/{id}/input        -> submit_input
/// POST   /jobs/{id}/skip         -> skip
/// POST   /jobs/{id}/back         -> back
/// POST   /jobs/{id}/retry        -> retry
/// POST   /jobs/{id}/skip-failed  -> skip_failed
/// POST   /jobs/{id}/cancel       -> cancel
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(jobs::create).get(jobs::list))
        .route("/jobs/cancel-all", post(jobs::cancel_all))
        .route("/jobs/reorder", put(jobs::reorder))
        .route("/jobs/{id}", get(jobs::get))
        .route("/jobs/{id}/input", post(jobs::submit_input))
        .route("/jobs/{id}/skip", post(jobs::skip))
        .route("/jobs/{id}/back", post(jobs::back))
        .route("/jobs/{id}/retry", post(jobs::retry))
        .route("/jobs/{id}/skip-failed", post(jobs::skip_failed))
        .route("/jobs/{id}/cancel", post(jobs::cancel))
}
