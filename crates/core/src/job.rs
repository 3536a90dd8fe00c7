//! Job and photo records.
//!
//! A [`Job`] is the unit of scheduling: an ordered pipeline of stages over
//! one photo, plus everything the scheduler needs to suspend, resume,
//! rewind, and retry it. All fields live in memory only; nothing survives a
//! restart by design.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stages::StageKey;
use crate::types::{Id, Timestamp};

// ---------------------------------------------------------------------------
// Photo
// ---------------------------------------------------------------------------

/// An uploaded image. The stored filename is opaque and globally unique;
/// the display name is whatever the user uploaded.
#[derive(Debug, Clone)]
pub struct Photo {
    pub id: Id,
    pub file_name: String,
    pub name: String,
    pub created_at: Timestamp,
}

impl Photo {
    pub fn new(file_name: String, name: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            file_name,
            name,
            created_at: chrono::Utc::now(),
        }
    }

    /// Wire representation, with the serving URL filled in by the caller.
    pub fn view(&self, url: String) -> PhotoView {
        PhotoView {
            id: self.id.clone(),
            name: self.name.clone(),
            url,
            created_at: self.created_at,
        }
    }
}

/// Public snapshot of a [`Photo`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoView {
    pub id: Id,
    pub name: String,
    pub url: String,
    pub created_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Job status
// ---------------------------------------------------------------------------

/// Job lifecycle states. `Completed`, `Failed`, and `Cancelled` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    WaitingInput,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Active jobs are the ones the heartbeat monitor reaps: they either
    /// hold a compute slot or are about to claim one.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::WaitingInput => "waiting_input",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One completed stage: which stage ran and where its output is served.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step: StageKey,
    pub output_url: String,
}

/// The unit of scheduling.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Id,
    pub photo_id: Id,
    /// Snapshot of the photo's display name; survives photo deletion.
    pub photo_name: String,
    pub original_path: PathBuf,
    /// Fixed at creation.
    pub steps: Vec<StageKey>,
    /// Per-stage model selection.
    pub options: HashMap<StageKey, String>,
    pub status: JobStatus,
    /// Integer percent in `[0, 100]`.
    pub progress: u8,
    pub current_step: Option<StageKey>,
    pub waiting_step: Option<StageKey>,
    /// URL of the image the human editor should see while we wait.
    pub waiting_image: Option<String>,
    /// Index into `steps` at which execution resumes.
    pub resume_from_step: usize,
    /// On-disk input for the next stage.
    pub current_input_path: PathBuf,
    pub step_results: Vec<StepResult>,
    /// User-supplied crop rectangle, consumed by the crop stage.
    pub crop_rect: Option<String>,
    /// User-painted mask file, consumed by the inpaint stage.
    pub mask_path: Option<PathBuf>,
    /// Tiebreaker among pending jobs; lower dispatches earlier.
    pub priority: u64,
    pub created_at: Timestamp,
    /// URL of the last stage's output once completed.
    pub result: Option<String>,
    pub error: Option<String>,
    pub failed_step: Option<StageKey>,
    pub failed_step_index: Option<usize>,
}

impl Job {
    pub fn new(
        photo_id: Id,
        photo_name: String,
        original_path: PathBuf,
        steps: Vec<StageKey>,
        options: HashMap<StageKey, String>,
        priority: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            photo_id,
            photo_name,
            current_input_path: original_path.clone(),
            original_path,
            steps,
            options,
            status: JobStatus::Pending,
            progress: 0,
            current_step: None,
            waiting_step: None,
            waiting_image: None,
            resume_from_step: 0,
            step_results: Vec::new(),
            crop_rect: None,
            mask_path: None,
            priority,
            created_at: chrono::Utc::now(),
            result: None,
            error: None,
            failed_step: None,
            failed_step_index: None,
        }
    }

    /// The stage at the resume index, or `None` past the end of the
    /// pipeline.
    pub fn next_stage(&self) -> Option<StageKey> {
        self.steps.get(self.resume_from_step).copied()
    }

    pub fn has_manual_steps(&self) -> bool {
        self.steps.iter().any(|s| s.manual())
    }

    /// True while some remaining stage is manual and its input has not
    /// been supplied yet. Such a job will claim the input focus before it
    /// can finish.
    pub fn has_unmet_manual_input(&self) -> bool {
        self.steps[self.resume_from_step.min(self.steps.len())..]
            .iter()
            .any(|s| s.manual() && s.needs_input(self))
    }

    /// True iff some stage before the resume point is manual, i.e. there
    /// is somewhere to rewind to.
    pub fn can_go_back(&self) -> bool {
        self.steps[..self.resume_from_step.min(self.steps.len())]
            .iter()
            .any(|s| s.manual())
    }

    /// Progress percent for step index `i` of this pipeline.
    pub fn progress_at(&self, i: usize) -> u8 {
        if self.steps.is_empty() {
            return 100;
        }
        ((100 * i) / self.steps.len()) as u8
    }

    pub fn view(&self) -> JobView {
        JobView {
            id: self.id.clone(),
            photo_id: self.photo_id.clone(),
            photo_name: self.photo_name.clone(),
            steps: self.steps.clone(),
            options: self.options.clone(),
            status: self.status,
            progress: self.progress,
            current_step: self.current_step,
            waiting_step: self.waiting_step,
            waiting_image: self.waiting_image.clone(),
            can_go_back: self.can_go_back(),
            step_results: self.step_results.clone(),
            priority: self.priority,
            created_at: self.created_at,
            result: self.result.clone(),
            error: self.error.clone(),
            failed_step: self.failed_step,
        }
    }
}

/// Public snapshot of a [`Job`], as served by the jobs endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: Id,
    pub photo_id: Id,
    pub photo_name: String,
    pub steps: Vec<StageKey>,
    pub options: HashMap<StageKey, String>,
    pub status: JobStatus,
    pub progress: u8,
    pub current_step: Option<StageKey>,
    pub waiting_step: Option<StageKey>,
    pub waiting_image: Option<String>,
    pub can_go_back: bool,
    pub step_results: Vec<StepResult>,
    pub priority: u64,
    pub created_at: Timestamp,
    pub result: Option<String>,
    pub error: Option<String>,
    pub failed_step: Option<StageKey>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(steps: Vec<StageKey>) -> Job {
        Job::new(
            "photo-1".into(),
            "Old photo".into(),
            PathBuf::from("/tmp/in.png"),
            steps,
            HashMap::new(),
            0,
        )
    }

    #[test]
    fn new_job_starts_pending() {
        let j = job(vec![StageKey::FaceRestore]);
        assert_eq!(j.status, JobStatus::Pending);
        assert_eq!(j.progress, 0);
        assert_eq!(j.resume_from_step, 0);
        assert_eq!(j.current_input_path, j.original_path);
    }

    #[test]
    fn can_go_back_needs_earlier_manual_stage() {
        let mut j = job(vec![StageKey::Crop, StageKey::Inpaint, StageKey::FaceRestore]);
        // Waiting on crop at index 0: nothing earlier.
        assert!(!j.can_go_back());
        // Waiting on inpaint at index 1: crop is earlier and manual.
        j.resume_from_step = 1;
        assert!(j.can_go_back());
        // Automatic stage before the cursor does not count.
        let mut j = job(vec![StageKey::FaceRestore, StageKey::Upscale]);
        j.resume_from_step = 1;
        assert!(!j.can_go_back());
    }

    #[test]
    fn progress_at_is_step_fraction() {
        let j = job(vec![
            StageKey::FaceRestore,
            StageKey::Colorize,
            StageKey::Upscale,
        ]);
        assert_eq!(j.progress_at(0), 0);
        assert_eq!(j.progress_at(1), 33);
        assert_eq!(j.progress_at(2), 66);
    }

    #[test]
    fn progress_of_empty_pipeline_is_full() {
        let j = job(vec![]);
        assert_eq!(j.progress_at(0), 100);
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(JobStatus::WaitingInput).unwrap(),
            serde_json::json!("waiting_input")
        );
    }

    #[test]
    fn view_uses_camel_case_keys() {
        let j = job(vec![StageKey::Crop]);
        let v = serde_json::to_value(j.view()).unwrap();
        assert!(v.get("photoId").is_some());
        assert!(v.get("canGoBack").is_some());
        assert!(v.get("stepResults").is_some());
        assert!(v.get("photo_id").is_none());
    }
}
