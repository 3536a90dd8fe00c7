use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use restora_core::cleanup::CleanupConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `127.0.0.1`).
    pub host: String,
    /// Bind port (default: `3001`).
    pub port: u16,
    /// Directory for uploaded photos and mask files.
    pub uploads_dir: PathBuf,
    /// Directory for stage outputs.
    pub results_dir: PathBuf,
    /// Directory reserved for mask scratch space.
    pub masks_dir: PathBuf,
    /// Directory holding the worker scripts and their bootstrap files.
    pub ai_dir: PathBuf,
    /// Upper bound (and initial value) for concurrent worker processes.
    pub max_concurrent_limit: usize,
    /// How long the client may stop polling before active jobs are reaped.
    pub heartbeat_timeout: Duration,
    /// Cleanup sweeper interval and retention bound.
    pub cleanup: CleanupConfig,
    /// HTTP request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default        |
    /// |-----------------------------|----------------|
    /// | `HOST`                      | `127.0.0.1`    |
    /// | `PORT`                      | `3001`         |
    /// | `UPLOADS_DIR`               | `data/uploads` |
    /// | `RESULTS_DIR`               | `data/results` |
    /// | `MASKS_DIR`                 | `data/masks`   |
    /// | `AI_DIR`                    | `ai`           |
    /// | `MAX_CONCURRENT_JOBS`       | `2`            |
    /// | `HEARTBEAT_TIMEOUT_SECONDS` | `10`           |
    /// | `CLEANUP_INTERVAL_HOURS`    | `2`            |
    /// | `CLEANUP_MAX_AGE_HOURS`     | `2`            |
    /// | `REQUEST_TIMEOUT_SECS`      | `120`          |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".into());
        let port: u16 = env_parse("PORT", 3001);

        let uploads_dir = env_path("UPLOADS_DIR", "data/uploads");
        let results_dir = env_path("RESULTS_DIR", "data/results");
        let masks_dir = env_path("MASKS_DIR", "data/masks");
        let ai_dir = env_path("AI_DIR", "ai");

        // At least one slot, whatever the environment says.
        let max_concurrent_limit = env_parse::<usize>("MAX_CONCURRENT_JOBS", 2).max(1);

        let heartbeat_timeout =
            Duration::from_secs(env_parse::<u64>("HEARTBEAT_TIMEOUT_SECONDS", 10));

        let cleanup = CleanupConfig {
            interval: Duration::from_secs(env_parse::<u64>("CLEANUP_INTERVAL_HOURS", 2) * 3600),
            max_age: Duration::from_secs(env_parse::<u64>("CLEANUP_MAX_AGE_HOURS", 2) * 3600),
        };

        let request_timeout_secs = env_parse("REQUEST_TIMEOUT_SECS", 120);

        Self {
            host,
            port,
            uploads_dir,
            results_dir,
            masks_dir,
            ai_dir,
            max_concurrent_limit,
            heartbeat_timeout,
            cleanup,
            request_timeout_secs,
        }
    }
}

/// Parse an environment variable, falling back to `default` when the
/// variable is absent or unparseable.
fn env_parse<T: FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_path(var: &str, default: &str) -> PathBuf {
    std::env::var(var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}
