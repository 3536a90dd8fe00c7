//! Handlers for the `/photos` resource and the auto-crop probe.

use axum::extract::{Multipart, Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use restora_core::artifacts::UPLOADS_URL_PREFIX;
use restora_core::error::CoreError;
use restora_core::job::{Photo, PhotoView};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Upload limits: at most this many files per request.
const MAX_FILES_PER_UPLOAD: usize = 20;

/// Upload limits: per-file size cap (50 MiB).
const MAX_FILE_BYTES: usize = 50 * 1024 * 1024;

/// Accepted upload extensions.
const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "tiff", "bmp"];

fn photo_view(photo: &Photo) -> PhotoView {
    photo.view(format!("{UPLOADS_URL_PREFIX}/{}", photo.file_name))
}

// ---------------------------------------------------------------------------
// Upload / list / delete
// ---------------------------------------------------------------------------

/// POST /photos
///
/// Multipart upload, field name `photos`, up to 20 files of 50 MiB each.
/// Returns the created photo records.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let mut created: Vec<PhotoView> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("photos") {
            continue;
        }
        if created.len() >= MAX_FILES_PER_UPLOAD {
            return Err(AppError::BadRequest(format!(
                "At most {MAX_FILES_PER_UPLOAD} files per upload"
            )));
        }

        let original_name = field.file_name().unwrap_or("photo").to_string();
        let ext = original_name
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .to_lowercase();
        if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(AppError::BadRequest(format!(
                "Unsupported image format '.{ext}'. Supported: {}",
                ALLOWED_EXTENSIONS.join(", ")
            )));
        }

        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        if data.len() > MAX_FILE_BYTES {
            return Err(AppError::BadRequest(format!(
                "'{original_name}' exceeds the {} MiB per-file limit",
                MAX_FILE_BYTES / (1024 * 1024)
            )));
        }

        let path = state.artifacts.upload_path(&ext);
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| AppError::InternalError(format!("Failed to store upload: {e}")))?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let photo = Photo::new(file_name, original_name);
        tracing::info!(photo_id = %photo.id, name = %photo.name, "Photo uploaded");

        created.push(photo_view(&photo));
        state.photos.insert(photo);
    }

    if created.is_empty() {
        return Err(AppError::BadRequest(
            "Missing required 'photos' field".into(),
        ));
    }
    Ok(Json(created))
}

/// GET /photos
pub async fn list(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let photos: Vec<PhotoView> = state.photos.list().iter().map(photo_view).collect();
    Ok(Json(photos))
}

/// DELETE /photos/{id}
pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let photo = state.photos.remove(&id).ok_or(CoreError::NotFound {
        entity: "Photo",
        id: id.clone(),
    })?;
    state
        .artifacts
        .remove(&state.artifacts.uploads_dir().join(&photo.file_name))
        .await;
    tracing::info!(photo_id = %id, "Photo deleted");
    Ok(Json(json!({ "ok": true })))
}

/// DELETE /photos
pub async fn clear(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let removed = state.photos.clear();
    for photo in &removed {
        state
            .artifacts
            .remove(&state.artifacts.uploads_dir().join(&photo.file_name))
            .await;
    }
    tracing::info!(count = removed.len(), "Photo library cleared");
    Ok(Json(json!({ "ok": true })))
}

// ---------------------------------------------------------------------------
// Import a result as a new photo
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    pub result_path: String,
}

/// POST /photos/import
///
/// Copy a served `/results/...` or `/uploads/...` artifact into uploads as
/// a fresh photo, so a finished restoration can seed another pipeline.
pub async fn import(
    State(state): State<AppState>,
    Json(req): Json<ImportRequest>,
) -> AppResult<impl IntoResponse> {
    let source = state
        .artifacts
        .path_for_url(&req.result_path)
        .ok_or_else(|| {
            AppError::BadRequest(format!(
                "'{}' is not a servable artifact path",
                req.result_path
            ))
        })?;
    if !source.is_file() {
        return Err(AppError::Core(CoreError::NotFound {
            entity: "Artifact",
            id: req.result_path.clone(),
        }));
    }

    let ext = source
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("png")
        .to_lowercase();
    let dest = state.artifacts.upload_path(&ext);
    tokio::fs::copy(&source, &dest)
        .await
        .map_err(|e| AppError::InternalError(format!("Failed to import artifact: {e}")))?;

    let display_name = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("imported")
        .to_string();
    let file_name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    let photo = Photo::new(file_name, display_name);
    let view = photo_view(&photo);
    tracing::info!(photo_id = %photo.id, source = %req.result_path, "Result imported as photo");
    state.photos.insert(photo);
    Ok(Json(view))
}

// ---------------------------------------------------------------------------
// Synchronous crop
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CropRequest {
    pub crop_rect: String,
}

/// POST /photos/{id}/crop
///
/// Run the crop worker synchronously and register its output as a new
/// photo. The rectangle string is passed through to the worker untouched.
pub async fn crop(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CropRequest>,
) -> AppResult<impl IntoResponse> {
    let photo = state.photos.get(&id).ok_or(CoreError::NotFound {
        entity: "Photo",
        id: id.clone(),
    })?;

    let input = state.artifacts.uploads_dir().join(&photo.file_name);
    let output = state.artifacts.upload_path("png");
    let argv = vec![
        input.display().to_string(),
        output.display().to_string(),
        req.crop_rect,
    ];

    let key = format!("photo-crop:{}", Uuid::new_v4().simple());
    state
        .invoker
        .invoke("crop.py", &argv, &key)
        .await
        .map_err(|e| AppError::BadRequest(format!("Crop failed: {e}")))?;

    let file_name = output
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let cropped = Photo::new(file_name, format!("{} (cropped)", photo.name));
    let view = photo_view(&cropped);
    tracing::info!(photo_id = %id, cropped_id = %cropped.id, "Photo cropped");
    state.photos.insert(cropped);
    Ok(Json(view))
}

/// GET /auto-crop/{photoId}
///
/// Run the content-bounds heuristic and relay its `{x,y,w,h}` JSON, in
/// original-pixel coordinates.
pub async fn auto_crop(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let photo = state.photos.get(&id).ok_or(CoreError::NotFound {
        entity: "Photo",
        id: id.clone(),
    })?;

    let input = state.artifacts.uploads_dir().join(&photo.file_name);
    let key = format!("auto-crop:{}", Uuid::new_v4().simple());
    let stdout = state
        .invoker
        .invoke("auto_crop.py", &[input.display().to_string()], &key)
        .await
        .map_err(|e| AppError::BadRequest(format!("Auto-crop failed: {e}")))?;

    let bounds: serde_json::Value = serde_json::from_str(&stdout).map_err(|e| {
        AppError::InternalError(format!("Auto-crop worker produced invalid JSON: {e}"))
    })?;
    Ok(Json(bounds))
}
