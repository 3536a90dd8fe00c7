// All functions in this module are shared test helpers. Not every test
// binary uses every helper, so we suppress dead_code warnings here.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use restora_api::config::ServerConfig;
use restora_api::router::build_app_router;
use restora_api::setup::SetupProbe;
use restora_api::state::AppState;
use restora_core::artifacts::ArtifactStore;
use restora_core::cleanup::CleanupConfig;
use restora_core::heartbeat::HeartbeatMonitor;
use restora_core::scheduler::Scheduler;
use restora_core::store::PhotoStore;
use restora_core::worker::WorkerInvoker;

pub const MULTIPART_BOUNDARY: &str = "test-boundary-7f93d1";

/// Everything a test needs: the temp workspace and the shared state from
/// which fresh routers are built.
pub struct TestContext {
    pub dir: TempDir,
    pub state: AppState,
}

impl TestContext {
    /// A fresh router over the shared state, mirroring production wiring.
    pub fn app(&self) -> Router {
        build_app_router(self.state.clone())
    }

    /// Replace one fake worker's body.
    pub fn script(&self, name: &str, body: &str) {
        std::fs::write(self.dir.path().join("ai").join(name), body).unwrap();
    }
}

/// Build a test context with a ready worker environment.
pub fn test_context() -> TestContext {
    test_context_with_ready(true)
}

/// Build a test context; when `ready` is false the bootstrap venv marker
/// is absent and job creation must 503.
pub fn test_context_with_ready(ready: bool) -> TestContext {
    let dir = TempDir::new().unwrap();
    let ai = dir.path().join("ai");
    std::fs::create_dir_all(&ai).unwrap();
    write_fake_workers(&ai);

    if ready {
        let bin = ai.join("venv").join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("python"), b"").unwrap();
    }

    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        uploads_dir: dir.path().join("uploads"),
        results_dir: dir.path().join("results"),
        masks_dir: dir.path().join("masks"),
        ai_dir: ai.clone(),
        max_concurrent_limit: 2,
        heartbeat_timeout: Duration::from_secs(10),
        cleanup: CleanupConfig::default(),
        request_timeout_secs: 30,
    };

    let artifacts = Arc::new(
        ArtifactStore::open(&config.uploads_dir, &config.results_dir, &config.masks_dir)
            .unwrap(),
    );
    let photos = Arc::new(PhotoStore::new());
    let invoker = Arc::new(WorkerInvoker::new(&ai).with_interpreter("/bin/sh"));
    let scheduler = Scheduler::new(
        Arc::clone(&invoker),
        Arc::clone(&artifacts),
        config.max_concurrent_limit,
    );
    let heartbeat = Arc::new(HeartbeatMonitor::new(config.heartbeat_timeout));
    let setup = Arc::new(SetupProbe::new(&ai));

    let state = AppState {
        scheduler,
        photos,
        artifacts,
        invoker,
        heartbeat,
        setup,
        config: Arc::new(config),
    };

    TestContext { dir, state }
}

/// Fake workers: shell scripts run through `/bin/sh`, named after the
/// real Python workers. Each copies its input to its output.
fn write_fake_workers(ai: &Path) {
    let copy_to_output = "cp \"$1\" \"$2\"\n";
    for name in [
        "crop.py",
        "clean_spots.py",
        "restore.py",
        "face_restore.py",
        "colorize.py",
        "colorize_ddcolor.py",
        "colorize_deoldify.py",
        "upscale.py",
        "restore_openai.py",
    ] {
        std::fs::write(ai.join(name), copy_to_output).unwrap();
    }
    std::fs::write(ai.join("inpaint.py"), "cp \"$1\" \"$3\"\n").unwrap();
    std::fs::write(
        ai.join("auto_crop.py"),
        "echo '{\"x\":0,\"y\":0,\"w\":100,\"h\":50}'\n",
    )
    .unwrap();
}

// ---------------------------------------------------------------------------
// Shared HTTP test helpers
// ---------------------------------------------------------------------------

/// Collect the response body into a `serde_json::Value`.
pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Send a JSON request with the given HTTP method.
pub async fn send_json(
    app: Router,
    method: Method,
    uri: &str,
    body: serde_json::Value,
) -> axum::response::Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// POST JSON to the given URI and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: serde_json::Value,
) -> axum::response::Response {
    send_json(app, Method::POST, uri, body).await
}

/// POST with an empty body.
pub async fn post_empty(app: Router, uri: &str) -> axum::response::Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// PUT JSON to the given URI and return the response.
pub async fn put_json(app: Router, uri: &str, body: serde_json::Value) -> axum::response::Response {
    send_json(app, Method::PUT, uri, body).await
}

/// GET from the given URI.
pub async fn get(app: Router, uri: &str) -> axum::response::Response {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

/// DELETE the given URI.
pub async fn delete(app: Router, uri: &str) -> axum::response::Response {
    let request = Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

// ---------------------------------------------------------------------------
// Multipart upload helpers
// ---------------------------------------------------------------------------

/// Build a `multipart/form-data` body with one `photos` field per file.
pub fn multipart_body(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (filename, bytes) in files {
        body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"photos\"; filename=\"{filename}\"\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body
}

/// POST files to `/photos` and return the raw response.
pub async fn upload(app: Router, files: &[(&str, &[u8])]) -> axum::response::Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/photos")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
        )
        .body(Body::from(multipart_body(files)))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Upload one photo and return its JSON record.
pub async fn upload_photo(ctx: &TestContext, filename: &str) -> serde_json::Value {
    let response = upload(ctx.app(), &[(filename, b"fake image bytes")]).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    json.as_array().unwrap()[0].clone()
}

// ---------------------------------------------------------------------------
// Job polling helpers
// ---------------------------------------------------------------------------

/// Poll `GET /jobs/{id}` until the job reports `status`, with a 5s cap.
pub async fn wait_for_job_status(
    ctx: &TestContext,
    job_id: &str,
    status: &str,
) -> serde_json::Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let response = get(ctx.app(), &format!("/jobs/{job_id}")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let job = body_json(response).await;
        if job["status"] == status {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {job_id} never reached '{status}'; last: {}",
            job["status"]
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
