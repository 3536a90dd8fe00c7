//! Handlers for the `/jobs` resource: creation, queries, and every
//! queue operation (input, skip, rewind, retry, cancel, reorder).

use std::collections::HashMap;
use std::path::PathBuf;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use restora_core::error::CoreError;
use restora_core::job::JobView;
use restora_core::scheduler::CreateJob;
use restora_core::stages::{self, StageKey};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobsRequest {
    pub photo_ids: Vec<String>,
    pub steps: Vec<StageKey>,
    /// Per-stage model selection, shared by every created job.
    #[serde(default)]
    pub options: HashMap<StageKey, String>,
    /// Inpaint masks as data URLs, keyed by photo id.
    #[serde(default)]
    pub masks: HashMap<String, String>,
    /// Crop rectangles, keyed by photo id.
    #[serde(default)]
    pub crop_rects: HashMap<String, String>,
}

/// POST /jobs
///
/// Create one job per photo. Fails wholesale with 400 on any unknown
/// photo, stage, or model, and with 503 while the worker environment is
/// not installed. Worker failures later never surface here.
pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateJobsRequest>,
) -> AppResult<impl IntoResponse> {
    if !state.setup.ai_ready() {
        return Err(AppError::Core(CoreError::NotReady(
            "Worker environment is not installed; run the setup first".into(),
        )));
    }

    stages::validate_options(&req.options)?;

    // Stages gated behind an absent API key are rejected up front.
    let exposed: Vec<StageKey> = stages::available_steps().iter().map(|(k, _)| *k).collect();
    for step in &req.steps {
        if !exposed.contains(step) {
            return Err(AppError::Core(CoreError::Validation(format!(
                "Stage '{}' is not available",
                step.key()
            ))));
        }
    }

    // Resolve every photo before mutating anything.
    let mut resolved = Vec::with_capacity(req.photo_ids.len());
    for photo_id in &req.photo_ids {
        let photo = state
            .photos
            .get(photo_id)
            .ok_or_else(|| CoreError::Validation(format!("Unknown photo id '{photo_id}'")))?;
        resolved.push(photo);
    }

    let mut inputs = Vec::with_capacity(resolved.len());
    for photo in resolved {
        let mask_path: Option<PathBuf> = match req.masks.get(&photo.id) {
            Some(data_url) => Some(state.artifacts.write_mask(data_url).await?),
            None => None,
        };
        inputs.push(CreateJob {
            original_path: state.artifacts.uploads_dir().join(&photo.file_name),
            photo_id: photo.id.clone(),
            photo_name: photo.name,
            steps: req.steps.clone(),
            options: req.options.clone(),
            crop_rect: req.crop_rects.get(&photo.id).cloned(),
            mask_path,
        });
    }

    let created: Vec<JobView> = state
        .scheduler
        .create_jobs(inputs)
        .iter()
        .map(|j| j.view())
        .collect();
    Ok(Json(created))
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// GET /jobs
///
/// Snapshot of the queue. Doubles as the client heartbeat.
pub async fn list(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    state.heartbeat.touch();
    let jobs: Vec<JobView> = state.scheduler.list().iter().map(|j| j.view()).collect();
    Ok(Json(jobs))
}

/// GET /jobs/{id}
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job = state.scheduler.job(&id).ok_or(CoreError::NotFound {
        entity: "Job",
        id,
    })?;
    Ok(Json(job.view()))
}

// ---------------------------------------------------------------------------
// Waiting-job operations
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitInputRequest {
    /// Inpaint mask as a data URL.
    pub mask: Option<String>,
    pub crop_rect: Option<String>,
}

/// POST /jobs/{id}/input
pub async fn submit_input(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SubmitInputRequest>,
) -> AppResult<impl IntoResponse> {
    let mask_path = match req.mask {
        Some(data_url) => Some(state.artifacts.write_mask(&data_url).await?),
        None => None,
    };
    state.scheduler.submit_input(&id, req.crop_rect, mask_path)?;
    Ok(Json(json!({ "ok": true })))
}

/// POST /jobs/{id}/skip
pub async fn skip(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    state.scheduler.skip_step(&id)?;
    Ok(Json(json!({ "ok": true })))
}

/// POST /jobs/{id}/back
pub async fn back(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    state.scheduler.rewind(&id).await?;
    Ok(Json(json!({ "ok": true })))
}

// ---------------------------------------------------------------------------
// Failure recovery
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct RetryRequest {
    pub model: Option<String>,
}

/// POST /jobs/{id}/retry
///
/// The body is optional; an empty body retries with the same model.
pub async fn retry(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: axum::body::Bytes,
) -> AppResult<impl IntoResponse> {
    let model = if body.is_empty() {
        None
    } else {
        let req: RetryRequest = serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid retry body: {e}")))?;
        req.model
    };
    state.scheduler.retry(&id, model)?;
    Ok(Json(json!({ "ok": true })))
}

/// POST /jobs/{id}/skip-failed
pub async fn skip_failed(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    state.scheduler.skip_failed(&id)?;
    Ok(Json(json!({ "ok": true })))
}

// ---------------------------------------------------------------------------
// Cancellation and queue order
// ---------------------------------------------------------------------------

/// POST /jobs/{id}/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    state.scheduler.cancel(&id)?;
    Ok(Json(json!({ "ok": true })))
}

/// POST /jobs/cancel-all
pub async fn cancel_all(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let cancelled = state.scheduler.cancel_all();
    Ok(Json(json!({ "ok": true, "cancelled": cancelled })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderRequest {
    pub job_ids: Vec<String>,
}

/// PUT /jobs/reorder
pub async fn reorder(
    State(state): State<AppState>,
    Json(req): Json<ReorderRequest>,
) -> AppResult<impl IntoResponse> {
    state.scheduler.reorder(&req.job_ids);
    Ok(Json(json!({ "ok": true })))
}
