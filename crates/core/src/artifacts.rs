//! Artifact store: the filesystem namespace for uploads, stage outputs,
//! and user-painted masks.
//!
//! Owns three directories created at startup. All generated filenames are
//! opaque (UUID-based) except stage outputs, which embed a sanitized photo
//! name so users can recognize downloads.

use std::io;
use std::path::{Path, PathBuf};

use base64::Engine;
use uuid::Uuid;

use crate::error::CoreError;
use crate::sanitize::sanitize_stem;

/// URL prefix under which uploaded files are served.
pub const UPLOADS_URL_PREFIX: &str = "/uploads";

/// URL prefix under which stage outputs are served.
pub const RESULTS_URL_PREFIX: &str = "/results";

/// Stage outputs are always written as PNG.
const OUTPUT_EXT: &str = "png";

/// Filesystem namespace for all job artifacts.
#[derive(Debug)]
pub struct ArtifactStore {
    uploads: PathBuf,
    results: PathBuf,
    masks: PathBuf,
}

impl ArtifactStore {
    /// Open the store, creating the backing directories if missing.
    pub fn open(
        uploads: impl Into<PathBuf>,
        results: impl Into<PathBuf>,
        masks: impl Into<PathBuf>,
    ) -> io::Result<Self> {
        let store = Self {
            uploads: uploads.into(),
            results: results.into(),
            masks: masks.into(),
        };
        std::fs::create_dir_all(&store.uploads)?;
        std::fs::create_dir_all(&store.results)?;
        std::fs::create_dir_all(&store.masks)?;
        Ok(store)
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads
    }

    pub fn results_dir(&self) -> &Path {
        &self.results
    }

    /// Allocate a fresh opaque path under uploads for the given extension.
    pub fn upload_path(&self, ext: &str) -> PathBuf {
        self.uploads
            .join(format!("{}.{ext}", Uuid::new_v4().simple()))
    }

    /// Path for a stage output: `results/<sanitized-name>_<prefix>_<job6>.png`.
    ///
    /// `job_short` is the first 6 characters of the job id, enough to keep
    /// outputs of concurrent jobs on the same photo apart.
    pub fn stage_output_path(&self, photo_name: &str, prefix: &str, job_id: &str) -> PathBuf {
        let mut stem = sanitize_stem(photo_name);
        if stem.is_empty() {
            stem.push_str("photo");
        }
        let short: String = job_id.chars().take(6).collect();
        self.results
            .join(format!("{stem}_{prefix}_{short}.{OUTPUT_EXT}"))
    }

    /// Decode a `data:image/png;base64,...` mask and persist it under
    /// uploads as `mask_<8hex>.png`. Returns the on-disk path.
    pub async fn write_mask(&self, data_url: &str) -> Result<PathBuf, CoreError> {
        let (header, body) = data_url
            .split_once(',')
            .ok_or_else(|| CoreError::Validation("Mask must be a data URL".into()))?;
        if !header.starts_with("data:") || !header.contains(";base64") {
            return Err(CoreError::Validation(
                "Mask must be a base64-encoded data URL".into(),
            ));
        }

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(body.trim())
            .map_err(|e| CoreError::Validation(format!("Invalid mask encoding: {e}")))?;

        let tag: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
        let path = self.uploads.join(format!("mask_{tag}.png"));
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| CoreError::Internal(format!("Failed to write mask file: {e}")))?;
        Ok(path)
    }

    /// Public URL for a stage output path produced by
    /// [`Self::stage_output_path`].
    pub fn result_url(&self, path: &Path) -> String {
        match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => format!("{RESULTS_URL_PREFIX}/{name}"),
            None => String::new(),
        }
    }

    /// Map an artifact path back to its public URL, if it lives in a
    /// served directory.
    pub fn url_for(&self, path: &Path) -> Option<String> {
        let name = path.file_name()?.to_str()?;
        let parent = path.parent()?;
        if parent == self.uploads {
            Some(format!("{UPLOADS_URL_PREFIX}/{name}"))
        } else if parent == self.results {
            Some(format!("{RESULTS_URL_PREFIX}/{name}"))
        } else {
            None
        }
    }

    /// Map a `/uploads/...` or `/results/...` URL path back to disk.
    ///
    /// Rejects anything that is not a single plain filename component, so
    /// URL input can never traverse outside the artifact directories.
    pub fn path_for_url(&self, url: &str) -> Option<PathBuf> {
        let (dir, name) = if let Some(rest) = url.strip_prefix(UPLOADS_URL_PREFIX) {
            (&self.uploads, rest)
        } else if let Some(rest) = url.strip_prefix(RESULTS_URL_PREFIX) {
            (&self.results, rest)
        } else {
            return None;
        };

        let name = name.strip_prefix('/')?;
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
            return None;
        }
        Some(dir.join(name))
    }

    /// Delete an artifact file. Absence is not an error.
    pub async fn remove(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::debug!(path = %path.display(), error = %e, "Failed to remove artifact");
            }
        }
    }
}
