//! Worker environment probe backing `GET /status`.
//!
//! The one-time environment bootstrap is an external collaborator; it
//! leaves a pid file, a log, and an error file next to the worker
//! scripts. This probe only reads them.

use std::path::{Path, PathBuf};

use restora_core::worker::venv_python;
use serde::Serialize;

/// Snapshot of the worker environment, as served by `/status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupStatus {
    /// True once the bootstrap venv's interpreter exists.
    pub ai_ready: bool,
    /// Compute device advertised to the UI (`AI_DEVICE`, default `cpu`).
    pub device: String,
    pub setup_running: bool,
    /// Last line of the bootstrap log, if any.
    pub setup_status: Option<String>,
    pub setup_error: Option<String>,
}

/// Reads the bootstrap marker files under the worker scripts directory.
#[derive(Debug)]
pub struct SetupProbe {
    ai_dir: PathBuf,
}

impl SetupProbe {
    pub fn new(ai_dir: impl Into<PathBuf>) -> Self {
        Self {
            ai_dir: ai_dir.into(),
        }
    }

    /// Whether jobs may be created at all.
    pub fn ai_ready(&self) -> bool {
        venv_python(&self.ai_dir).is_file()
    }

    pub async fn status(&self) -> SetupStatus {
        SetupStatus {
            ai_ready: self.ai_ready(),
            device: std::env::var("AI_DEVICE").unwrap_or_else(|_| "cpu".into()),
            setup_running: self.ai_dir.join("setup.pid").is_file(),
            setup_status: last_line(&self.ai_dir.join("setup.log")).await,
            setup_error: last_line(&self.ai_dir.join("setup.error")).await,
        }
    }
}

/// Last non-empty line of a file, or `None` if unreadable or blank.
async fn last_line(path: &Path) -> Option<String> {
    let contents = tokio::fs::read_to_string(path).await.ok()?;
    contents
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn empty_directory_reports_not_ready() {
        let dir = TempDir::new().unwrap();
        let probe = SetupProbe::new(dir.path());
        let status = probe.status().await;

        assert!(!status.ai_ready);
        assert!(!status.setup_running);
        assert!(status.setup_status.is_none());
        assert!(status.setup_error.is_none());
    }

    #[tokio::test]
    async fn venv_interpreter_marks_ready() {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("venv").join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("python"), b"").unwrap();

        let probe = SetupProbe::new(dir.path());
        assert!(probe.ai_ready());
    }

    #[tokio::test]
    async fn bootstrap_files_are_surfaced() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("setup.pid"), b"12345").unwrap();
        std::fs::write(
            dir.path().join("setup.log"),
            "Installing torch\nInstalling opencv\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("setup.error"), "pip failed\n").unwrap();

        let probe = SetupProbe::new(dir.path());
        let status = probe.status().await;
        assert!(status.setup_running);
        assert_eq!(status.setup_status.as_deref(), Some("Installing opencv"));
        assert_eq!(status.setup_error.as_deref(), Some("pip failed"));
    }
}
