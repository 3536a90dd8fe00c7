//! Integration tests for the photo endpoints.

mod common;

use axum::http::StatusCode;
use common::{body_json, delete, get, post_json, upload, upload_photo};
use http_body_util::BodyExt;

// ---------------------------------------------------------------------------
// Upload and list
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_returns_photo_records() {
    let ctx = common::test_context();
    let response = upload(
        ctx.app(),
        &[("vacances.jpg", b"aaaa"), ("noel.png", b"bbbb")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let photos = body_json(response).await;
    let photos = photos.as_array().unwrap();
    assert_eq!(photos.len(), 2);
    assert_eq!(photos[0]["name"], "vacances.jpg");
    assert!(photos[0]["url"].as_str().unwrap().starts_with("/uploads/"));
    assert!(photos[0]["id"].is_string());
    assert!(photos[0]["createdAt"].is_string());
}

#[tokio::test]
async fn uploaded_files_are_served_statically() {
    let ctx = common::test_context();
    let photo = upload_photo(&ctx, "scan.png").await;
    let url = photo["url"].as_str().unwrap();

    let response = get(ctx.app(), url).await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"fake image bytes");
}

#[tokio::test]
async fn upload_rejects_unsupported_extensions() {
    let ctx = common::test_context();
    let response = upload(ctx.app(), &[("payload.exe", b"mz")]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upload_without_photos_field_is_rejected() {
    let ctx = common::test_context();
    let response = upload(ctx.app(), &[]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_returns_uploaded_photos() {
    let ctx = common::test_context();
    upload_photo(&ctx, "a.png").await;
    upload_photo(&ctx, "b.png").await;

    let response = get(ctx.app(), "/photos").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 2);
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delete_removes_the_record_and_the_file() {
    let ctx = common::test_context();
    let photo = upload_photo(&ctx, "gone.png").await;
    let id = photo["id"].as_str().unwrap();
    let url = photo["url"].as_str().unwrap().to_string();

    let response = delete(ctx.app(), &format!("/photos/{id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["ok"], true);

    assert_eq!(get(ctx.app(), &url).await.status(), StatusCode::NOT_FOUND);
    assert!(ctx.state.photos.is_empty());
}

#[tokio::test]
async fn delete_unknown_photo_is_404() {
    let ctx = common::test_context();
    let response = delete(ctx.app(), "/photos/no-such-photo").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn clear_empties_the_library() {
    let ctx = common::test_context();
    upload_photo(&ctx, "a.png").await;
    upload_photo(&ctx, "b.png").await;

    let response = delete(ctx.app(), "/photos").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(ctx.state.photos.is_empty());
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

#[tokio::test]
async fn import_copies_a_result_into_uploads() {
    let ctx = common::test_context();
    let result = ctx.state.artifacts.results_dir().join("restored_face_abc123.png");
    std::fs::write(&result, b"restored bytes").unwrap();

    let response = post_json(
        ctx.app(),
        "/photos/import",
        serde_json::json!({ "resultPath": "/results/restored_face_abc123.png" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let photo = body_json(response).await;
    assert_eq!(photo["name"], "restored_face_abc123");
    let url = photo["url"].as_str().unwrap();
    assert!(url.starts_with("/uploads/"));

    // The copy is a real file in uploads, independent of the result.
    let copied = ctx.state.artifacts.path_for_url(url).unwrap();
    assert_eq!(std::fs::read(copied).unwrap(), b"restored bytes");
}

#[tokio::test]
async fn import_of_missing_artifact_is_404() {
    let ctx = common::test_context();
    let response = post_json(
        ctx.app(),
        "/photos/import",
        serde_json::json!({ "resultPath": "/results/never-existed.png" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn import_rejects_paths_outside_served_directories() {
    let ctx = common::test_context();
    let response = post_json(
        ctx.app(),
        "/photos/import",
        serde_json::json!({ "resultPath": "/etc/passwd" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Synchronous crop and auto-crop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn crop_creates_a_new_photo() {
    let ctx = common::test_context();
    let photo = upload_photo(&ctx, "framed.png").await;
    let id = photo["id"].as_str().unwrap();

    let response = post_json(
        ctx.app(),
        &format!("/photos/{id}/crop"),
        serde_json::json!({ "cropRect": "10,10,200,200" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let cropped = body_json(response).await;
    assert_eq!(cropped["name"], "framed.png (cropped)");
    assert_ne!(cropped["id"], photo["id"]);
    assert_eq!(ctx.state.photos.len(), 2);
}

#[tokio::test]
async fn crop_failure_is_reported_to_the_caller() {
    let ctx = common::test_context();
    ctx.script("crop.py", "echo 'bad rectangle' >&2; exit 1\n");
    let photo = upload_photo(&ctx, "framed.png").await;
    let id = photo["id"].as_str().unwrap();

    let response = post_json(
        ctx.app(),
        &format!("/photos/{id}/crop"),
        serde_json::json!({ "cropRect": "nonsense" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    // Nothing registered.
    assert_eq!(ctx.state.photos.len(), 1);
}

#[tokio::test]
async fn auto_crop_relays_the_detected_bounds() {
    let ctx = common::test_context();
    let photo = upload_photo(&ctx, "framed.png").await;
    let id = photo["id"].as_str().unwrap();

    let response = get(ctx.app(), &format!("/auto-crop/{id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let bounds = body_json(response).await;
    assert_eq!(bounds, serde_json::json!({ "x": 0, "y": 0, "w": 100, "h": 50 }));
}

#[tokio::test]
async fn auto_crop_of_unknown_photo_is_404() {
    let ctx = common::test_context();
    let response = get(ctx.app(), "/auto-crop/no-such-photo").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
