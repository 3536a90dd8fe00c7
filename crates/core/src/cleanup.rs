//! Cleanup sweeper: evicts aged artifacts and purges dangling records.
//!
//! Walks the uploads and results directories on an interval, deleting
//! files past the retention bound, then drops photo records whose backing
//! file vanished and job records whose result no longer resolves to a
//! file. Every per-file error is swallowed; a failed sweep is just retried
//! on the next tick.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;

use crate::artifacts::ArtifactStore;
use crate::scheduler::Scheduler;
use crate::store::PhotoStore;

/// Default sweep interval (2 hours).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2 * 60 * 60);

/// Default artifact retention (2 hours).
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(2 * 60 * 60);

/// Sweep configuration.
#[derive(Debug, Clone, Copy)]
pub struct CleanupConfig {
    pub interval: Duration,
    pub max_age: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            max_age: DEFAULT_MAX_AGE,
        }
    }
}

/// Outcome of one sweep, for logging.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub files_removed: usize,
    pub photos_dropped: usize,
    pub jobs_dropped: usize,
}

/// Delete aged artifacts and reconcile records against the filesystem.
pub async fn sweep_once(
    artifacts: &ArtifactStore,
    photos: &PhotoStore,
    scheduler: &Scheduler,
    max_age: Duration,
) -> SweepStats {
    let now = SystemTime::now();
    let mut stats = SweepStats::default();

    for dir in [artifacts.uploads_dir(), artifacts.results_dir()] {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(dir = %dir.display(), error = %e, "Cleanup cannot read directory");
                continue;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            // Marker files like .gitkeep are not artifacts.
            if name.to_string_lossy().starts_with('.') {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let Ok(mtime) = meta.modified() else {
                continue;
            };
            let aged_out = now
                .duration_since(mtime)
                .map(|age| age > max_age)
                .unwrap_or(false);
            if aged_out && tokio::fs::remove_file(entry.path()).await.is_ok() {
                stats.files_removed += 1;
            }
        }
    }

    stats.photos_dropped =
        photos.retain(|p| artifacts.uploads_dir().join(&p.file_name).is_file());
    stats.jobs_dropped = scheduler.retain_jobs(|j| match &j.result {
        Some(url) => artifacts
            .path_for_url(url)
            .map(|p| p.is_file())
            .unwrap_or(false),
        None => true,
    });

    stats
}

/// Sweeper loop. Runs until `cancel` fires.
pub async fn run(
    artifacts: Arc<ArtifactStore>,
    photos: Arc<PhotoStore>,
    scheduler: Scheduler,
    config: CleanupConfig,
    cancel: CancellationToken,
) {
    tracing::info!(
        interval_secs = config.interval.as_secs(),
        max_age_secs = config.max_age.as_secs(),
        "Cleanup sweeper started"
    );

    let mut interval = tokio::time::interval(config.interval);
    // The immediate first tick would sweep at startup; skip it.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Cleanup sweeper stopping");
                break;
            }
            _ = interval.tick() => {
                let stats = sweep_once(&artifacts, &photos, &scheduler, config.max_age).await;
                if stats != SweepStats::default() {
                    tracing::info!(
                        files = stats.files_removed,
                        photos = stats.photos_dropped,
                        jobs = stats.jobs_dropped,
                        "Cleanup sweep evicted aged artifacts"
                    );
                } else {
                    tracing::debug!("Cleanup sweep found nothing to evict");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Photo;
    use crate::worker::WorkerInvoker;
    use std::path::Path;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, Arc<ArtifactStore>, Arc<PhotoStore>, Scheduler) {
        let dir = TempDir::new().unwrap();
        let artifacts = Arc::new(
            ArtifactStore::open(
                dir.path().join("uploads"),
                dir.path().join("results"),
                dir.path().join("masks"),
            )
            .unwrap(),
        );
        let invoker = Arc::new(WorkerInvoker::new(dir.path().join("ai")));
        let scheduler = Scheduler::new(invoker, Arc::clone(&artifacts), 2);
        (dir, artifacts, Arc::new(PhotoStore::new()), scheduler)
    }

    fn touch(path: &Path) {
        std::fs::write(path, b"x").unwrap();
    }

    #[tokio::test]
    async fn fresh_files_survive_a_sweep() {
        let (_dir, artifacts, photos, scheduler) = fixture();
        let kept = artifacts.uploads_dir().join("fresh.png");
        touch(&kept);

        let stats = sweep_once(&artifacts, &photos, &scheduler, Duration::from_secs(3600)).await;
        assert_eq!(stats.files_removed, 0);
        assert!(kept.is_file());
    }

    #[tokio::test]
    async fn aged_files_are_removed() {
        let (_dir, artifacts, photos, scheduler) = fixture();
        let old = artifacts.results_dir().join("old.png");
        touch(&old);

        // max_age of zero ages out everything already on disk.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let stats = sweep_once(&artifacts, &photos, &scheduler, Duration::ZERO).await;
        assert_eq!(stats.files_removed, 1);
        assert!(!old.exists());
    }

    #[tokio::test]
    async fn marker_files_are_ignored() {
        let (_dir, artifacts, photos, scheduler) = fixture();
        let marker = artifacts.uploads_dir().join(".gitkeep");
        touch(&marker);

        tokio::time::sleep(Duration::from_millis(20)).await;
        sweep_once(&artifacts, &photos, &scheduler, Duration::ZERO).await;
        assert!(marker.is_file());
    }

    #[tokio::test]
    async fn dangling_photo_records_are_dropped() {
        let (_dir, artifacts, photos, scheduler) = fixture();

        let backed = Photo::new("backed.png".into(), "backed".into());
        touch(&artifacts.uploads_dir().join("backed.png"));
        photos.insert(backed.clone());
        photos.insert(Photo::new("gone.png".into(), "gone".into()));

        let stats =
            sweep_once(&artifacts, &photos, &scheduler, Duration::from_secs(3600)).await;
        assert_eq!(stats.photos_dropped, 1);
        assert!(photos.get(&backed.id).is_some());
    }
}
