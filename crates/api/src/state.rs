use std::sync::Arc;

use restora_core::artifacts::ArtifactStore;
use restora_core::heartbeat::HeartbeatMonitor;
use restora_core::scheduler::Scheduler;
use restora_core::store::PhotoStore;
use restora_core::worker::WorkerInvoker;

use crate::config::ServerConfig;
use crate::setup::SetupProbe;

/// Shared application state available to all Axum handlers via
/// `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already
/// `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Job scheduler and pipeline executor.
    pub scheduler: Scheduler,
    /// Uploaded photo records.
    pub photos: Arc<PhotoStore>,
    /// Filesystem namespace for uploads, results, and masks.
    pub artifacts: Arc<ArtifactStore>,
    /// Subprocess invoker, also used directly by the synchronous photo
    /// operations (crop, auto-crop).
    pub invoker: Arc<WorkerInvoker>,
    /// Client liveness signal, refreshed by the job list endpoint.
    pub heartbeat: Arc<HeartbeatMonitor>,
    /// Worker environment probe backing `/status`.
    pub setup: Arc<SetupProbe>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}
