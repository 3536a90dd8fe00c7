//! Route definitions for the `/photos` resource.

use axum::routing::{delete, get, post};
use axum::Router;

use crate::handlers::photos;
use crate::state::AppState;

/// Routes for photo management.
///
/// ```text
/// POST   /photos            -> upload (multipart)
/// GET    /photos            -> list
/// DELETE /photos            -> clear
/// POST   /photos/import     -> import
/// DELETE /photos/{id}       -> remove
/// POST   /photos/{id}/crop  -> crop
/// GET    /auto-crop/{id}    -> auto_crop
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/photos",
            post(photos::upload).get(photos::list).delete(photos::clear),
        )
        .route("/photos/import", post(photos::import))
        .route("/photos/{id}", delete(photos::remove))
        .route("/photos/{id}/crop", post(photos::crop))
        .route("/auto-crop/{id}", get(photos::auto_crop))
}
