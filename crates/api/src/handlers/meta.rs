//! Handlers for the stage catalog, scheduler settings, and the
//! environment probe.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use restora_core::stages;

use crate::error::AppResult;
use crate::state::AppState;

/// GET /steps
///
/// The filtered stage catalog, in presentation order. Stages that are
/// disabled or missing their API key are absent entirely.
pub async fn steps() -> AppResult<impl IntoResponse> {
    let mut catalog = serde_json::Map::new();
    for (key, info) in stages::available_steps() {
        catalog.insert(
            key.key().to_string(),
            serde_json::to_value(info).unwrap_or_default(),
        );
    }
    Ok(Json(serde_json::Value::Object(catalog)))
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    pub max_concurrent: usize,
    pub max_concurrent_limit: usize,
}

/// GET /settings
pub async fn settings(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Json(SettingsView {
        max_concurrent: state.scheduler.max_concurrent(),
        max_concurrent_limit: state.scheduler.max_concurrent_limit(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsRequest {
    pub max_concurrent: usize,
}

/// PUT /settings
///
/// Out-of-range values are ignored; the response always carries the
/// effective settings.
pub async fn update_settings(
    State(state): State<AppState>,
    Json(req): Json<UpdateSettingsRequest>,
) -> AppResult<impl IntoResponse> {
    let max_concurrent = state.scheduler.set_max_concurrent(req.max_concurrent);
    tracing::info!(max_concurrent, "Concurrency setting applied");
    Ok(Json(SettingsView {
        max_concurrent,
        max_concurrent_limit: state.scheduler.max_concurrent_limit(),
    }))
}

// ---------------------------------------------------------------------------
// Environment probe
// ---------------------------------------------------------------------------

/// GET /status
pub async fn status(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Json(state.setup.status().await))
}
