use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use restora_api::config::ServerConfig;
use restora_api::router::build_app_router;
use restora_api::setup::SetupProbe;
use restora_api::state::AppState;
use restora_core::artifacts::ArtifactStore;
use restora_core::cleanup;
use restora_core::heartbeat::{self, HeartbeatMonitor};
use restora_core::scheduler::Scheduler;
use restora_core::store::PhotoStore;
use restora_core::worker::WorkerInvoker;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "restora_api=debug,restora_core=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Artifact directories ---
    let artifacts = Arc::new(
        ArtifactStore::open(&config.uploads_dir, &config.results_dir, &config.masks_dir)
            .expect("Failed to create artifact directories"),
    );
    tracing::info!(
        uploads = %config.uploads_dir.display(),
        results = %config.results_dir.display(),
        "Artifact store ready"
    );

    // --- Stores, invoker, scheduler ---
    let photos = Arc::new(PhotoStore::new());
    let invoker = Arc::new(WorkerInvoker::new(&config.ai_dir));
    let scheduler = Scheduler::new(
        Arc::clone(&invoker),
        Arc::clone(&artifacts),
        config.max_concurrent_limit,
    );
    tracing::info!(
        max_concurrent = config.max_concurrent_limit,
        "Scheduler started"
    );

    // --- Background tasks ---
    let heartbeat = Arc::new(HeartbeatMonitor::new(config.heartbeat_timeout));
    let shutdown = CancellationToken::new();

    let heartbeat_handle = tokio::spawn(heartbeat::run(
        Arc::clone(&heartbeat),
        scheduler.clone(),
        shutdown.clone(),
    ));
    let cleanup_handle = tokio::spawn(cleanup::run(
        Arc::clone(&artifacts),
        Arc::clone(&photos),
        scheduler.clone(),
        config.cleanup,
        shutdown.clone(),
    ));
    tracing::info!("Background tasks started (heartbeat monitor, cleanup sweeper)");

    // --- App state and router ---
    let setup = Arc::new(SetupProbe::new(&config.ai_dir));
    let state = AppState {
        scheduler: scheduler.clone(),
        photos,
        artifacts,
        invoker,
        heartbeat,
        setup,
        config: Arc::new(config.clone()),
    };
    let app = build_app_router(state);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // No client will come back for these; stop paying for workers.
    let cancelled = scheduler.cancel_all();
    if cancelled > 0 {
        tracing::info!(cancelled, "Cancelled in-flight jobs");
    }

    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), heartbeat_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), cleanup_handle).await;

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. the desktop shell that spawned it).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
