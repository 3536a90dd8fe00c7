//! The scheduler: admission, dispatch, and the per-job pipeline executor.
//!
//! All job mutations happen behind one mutex, held only between await
//! points, so the scheduler behaves as a single writer. Each in-flight job
//! runs on its own tokio task; tasks re-enter the scheduler through
//! [`Scheduler::dispatch`] at every state boundary.
//!
//! Admission juggles two resources: compute slots (`max_concurrent`) and
//! the single human-input focus. A pending job whose next stage will
//! immediately pause for input claims only the focus, never a slot, so
//! manual editing hands off between jobs without starving automatic work.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::artifacts::ArtifactStore;
use crate::error::CoreError;
use crate::job::{Job, JobStatus, StepResult};
use crate::stages::{Invocation, StageKey};
use crate::types::Id;
use crate::worker::WorkerInvoker;

// ---------------------------------------------------------------------------
// Creation input
// ---------------------------------------------------------------------------

/// Everything the scheduler needs to admit one job. The caller has already
/// resolved the photo and persisted any mask file.
#[derive(Debug)]
pub struct CreateJob {
    pub photo_id: Id,
    pub photo_name: String,
    pub original_path: PathBuf,
    pub steps: Vec<StageKey>,
    pub options: HashMap<StageKey, String>,
    pub crop_rect: Option<String>,
    pub mask_path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

struct JobTable {
    jobs: HashMap<Id, Job>,
    max_concurrent: usize,
    /// Monotonic priority counter; new jobs queue behind existing ones.
    next_priority: u64,
}

struct Inner {
    invoker: Arc<WorkerInvoker>,
    artifacts: Arc<ArtifactStore>,
    max_limit: usize,
    table: Mutex<JobTable>,
}

/// Admission and dispatch engine.
///
/// Cheaply cloneable; every clone shares the same job table. Pipeline
/// tasks hold a clone for the lifetime of their job.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

/// What the pipeline task should do next, decided under the lock.
enum StepPlan {
    /// Job vanished or was cancelled; stop silently.
    Gone,
    /// Pipeline exhausted; the job was marked completed.
    Done,
    /// Moved to `waiting_input`; the task releases its thread.
    Paused,
    /// The job was marked failed while planning (argument build error).
    Failed,
    /// Run one worker.
    Run {
        stage: StageKey,
        index: usize,
        output: PathBuf,
        invocation: Invocation,
    },
}

/// Result of recording a finished worker invocation.
enum StepOutcome {
    /// Stage recorded; keep looping. `release` is a consumed input file
    /// to delete outside the lock.
    Continue { release: Option<PathBuf> },
    /// Terminal for this task (failed, cancelled, or job gone).
    Stop,
}

impl Scheduler {
    /// `max_concurrent_limit` is clamped to at least 1 and doubles as the
    /// initial `max_concurrent`.
    pub fn new(
        invoker: Arc<WorkerInvoker>,
        artifacts: Arc<ArtifactStore>,
        max_concurrent_limit: usize,
    ) -> Self {
        let limit = max_concurrent_limit.max(1);
        Self {
            inner: Arc::new(Inner {
                invoker,
                artifacts,
                max_limit: limit,
                table: Mutex::new(JobTable {
                    jobs: HashMap::new(),
                    max_concurrent: limit,
                    next_priority: 0,
                }),
            }),
        }
    }

    fn table(&self) -> std::sync::MutexGuard<'_, JobTable> {
        self.inner.table.lock().unwrap()
    }

    pub fn max_concurrent(&self) -> usize {
        self.table().max_concurrent
    }

    pub fn max_concurrent_limit(&self) -> usize {
        self.inner.max_limit
    }

    /// Change the concurrency ceiling. Out-of-range values are silently
    /// ignored; a successful change triggers a redispatch.
    pub fn set_max_concurrent(&self, value: usize) -> usize {
        let changed = {
            let mut table = self.table();
            if (1..=self.inner.max_limit).contains(&value) {
                table.max_concurrent = value;
                true
            } else {
                false
            }
        };
        if changed {
            self.dispatch();
        }
        self.max_concurrent()
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn job(&self, id: &str) -> Option<Job> {
        self.table().jobs.get(id).cloned()
    }

    /// Snapshot of every job, in presentation order: waiting_input first,
    /// then processing, then pending by priority, then terminal jobs
    /// newest-first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.table().jobs.values().cloned().collect();
        jobs.sort_by(|a, b| {
            let rank = |j: &Job| match j.status {
                JobStatus::WaitingInput => 0u8,
                JobStatus::Processing => 1,
                JobStatus::Pending => 2,
                _ => 3,
            };
            rank(a).cmp(&rank(b)).then_with(|| match a.status {
                JobStatus::Pending => a.priority.cmp(&b.priority),
                s if s.is_terminal() => b.created_at.cmp(&a.created_at),
                _ => a.created_at.cmp(&b.created_at),
            })
        });
        jobs
    }

    pub fn count_with_status(&self, status: JobStatus) -> usize {
        self.table()
            .jobs
            .values()
            .filter(|j| j.status == status)
            .count()
    }

    // -----------------------------------------------------------------------
    // Admission
    // -----------------------------------------------------------------------

    /// Admit a batch of jobs and redispatch. Returns the created records.
    pub fn create_jobs(&self, inputs: Vec<CreateJob>) -> Vec<Job> {
        let mut created = Vec::with_capacity(inputs.len());
        {
            let mut table = self.table();
            for input in inputs {
                let priority = table.next_priority;
                table.next_priority += 1;

                let mut job = Job::new(
                    input.photo_id,
                    input.photo_name,
                    input.original_path,
                    input.steps,
                    input.options,
                    priority,
                );
                job.crop_rect = input.crop_rect;
                job.mask_path = input.mask_path;

                tracing::info!(
                    job_id = %job.id,
                    photo = %job.photo_name,
                    steps = job.steps.len(),
                    "Job enqueued"
                );
                table.jobs.insert(job.id.clone(), job.clone());
                created.push(job);
            }
        }
        self.dispatch();
        created
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Re-evaluate admission. Invoked on every state change.
    ///
    /// Pending jobs are walked by priority. A job that would immediately
    /// pause on a manual stage claims the input focus synchronously (so
    /// two manual jobs can never race for it) and costs no compute slot;
    /// anything else starts only while slots remain.
    ///
    /// The focus counts as busy while any job is waiting for input, and
    /// also while a processing job still has an unmet manual input ahead
    /// of it: that job will come back for the focus, and admitting a
    /// second manual job meanwhile would leave two of them paused.
    pub fn dispatch(&self) {
        let mut to_spawn: Vec<Id> = Vec::new();
        {
            let mut table = self.table();
            let max = table.max_concurrent;
            let running = table
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Processing)
                .count();
            let mut focus_busy = table.jobs.values().any(|j| match j.status {
                JobStatus::WaitingInput => true,
                JobStatus::Processing => j.has_unmet_manual_input(),
                _ => false,
            });

            let mut pending: Vec<(u64, Id)> = table
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Pending)
                .map(|j| (j.priority, j.id.clone()))
                .collect();
            pending.sort();

            let mut slots_used = 0usize;
            for (_, id) in pending {
                let Some(job) = table.jobs.get_mut(&id) else {
                    continue;
                };
                // While the focus is spoken for, hold back anything that
                // could also ask for it.
                if focus_busy && job.has_manual_steps() {
                    continue;
                }

                let will_pause = job
                    .next_stage()
                    .is_some_and(|s| s.manual() && s.needs_input(job));

                if will_pause {
                    // Claim the input focus without consuming a slot.
                    let stage = job.next_stage().expect("next stage checked above");
                    let index = job.resume_from_step;
                    job.status = JobStatus::WaitingInput;
                    job.waiting_step = Some(stage);
                    job.waiting_image = self.inner.artifacts.url_for(&job.current_input_path);
                    job.current_step = None;
                    job.progress = job.progress_at(index);
                    focus_busy = true;
                    tracing::info!(job_id = %id, stage = stage.key(), "Job waiting for user input");
                } else if running + slots_used < max {
                    // A manual job admitted here claims the focus too: its
                    // supplied input may be consumed by a later stage.
                    job.status = JobStatus::Processing;
                    focus_busy = focus_busy || job.has_unmet_manual_input();
                    slots_used += 1;
                    to_spawn.push(id);
                }
            }
        }
        for id in to_spawn {
            self.spawn_pipeline(id);
        }
    }

    fn spawn_pipeline(&self, id: Id) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_pipeline(id).await;
        });
    }

    // -----------------------------------------------------------------------
    // Pipeline execution
    // -----------------------------------------------------------------------

    async fn run_pipeline(&self, id: Id) {
        loop {
            match self.plan_next_step(&id) {
                StepPlan::Gone => return,
                StepPlan::Done | StepPlan::Paused | StepPlan::Failed => {
                    self.dispatch();
                    return;
                }
                StepPlan::Run {
                    stage,
                    index,
                    output,
                    invocation,
                } => {
                    tracing::info!(job_id = %id, stage = stage.key(), "Running stage");
                    let result = self
                        .inner
                        .invoker
                        .invoke(invocation.script, &invocation.argv, &id)
                        .await;

                    match self.record_step(&id, stage, index, &output, result) {
                        StepOutcome::Stop => {
                            self.dispatch();
                            return;
                        }
                        StepOutcome::Continue { release } => {
                            if let Some(path) = release {
                                self.inner.artifacts.remove(&path).await;
                            }
                            // Let a queued manual job claim the input focus
                            // while this one grinds through automatic work.
                            self.dispatch();
                        }
                    }
                }
            }
        }
    }

    /// Decide the next step for a processing job, mutating it under the
    /// lock: pause on a manual stage that still needs input, complete an
    /// exhausted pipeline, or prepare one worker invocation.
    fn plan_next_step(&self, id: &str) -> StepPlan {
        let mut table = self.table();
        let Some(job) = table.jobs.get_mut(id) else {
            return StepPlan::Gone;
        };
        // Cancellation checkpoint before committing to a worker.
        if job.status != JobStatus::Processing {
            return StepPlan::Gone;
        }

        let index = job.resume_from_step;
        let Some(stage) = job.next_stage() else {
            complete(job);
            tracing::info!(job_id = %id, "Job completed");
            return StepPlan::Done;
        };

        if stage.manual() && stage.needs_input(job) {
            job.status = JobStatus::WaitingInput;
            job.waiting_step = Some(stage);
            job.waiting_image = self.inner.artifacts.url_for(&job.current_input_path);
            job.current_step = None;
            job.progress = job.progress_at(index);
            tracing::info!(job_id = %id, stage = stage.key(), "Job waiting for user input");
            return StepPlan::Paused;
        }

        job.current_step = Some(stage);
        job.progress = job.progress_at(index);

        let output = self.inner.artifacts.stage_output_path(
            &job.photo_name,
            stage.output_prefix(),
            &job.id,
        );
        let model = job
            .options
            .get(&stage)
            .cloned()
            .or_else(|| stage.default_model().map(str::to_string));

        match stage.build_args(&job.current_input_path, &output, job, model.as_deref()) {
            Ok(invocation) => StepPlan::Run {
                stage,
                index,
                output,
                invocation,
            },
            Err(e) => {
                tracing::error!(
                    job_id = %id,
                    stage = stage.key(),
                    error = %e,
                    "Cannot build worker arguments"
                );
                fail(job, stage, index, e.to_string());
                StepPlan::Failed
            }
        }
    }

    /// Record a finished invocation. Cancellation observed here discards
    /// the stage output instead of failing the job.
    fn record_step(
        &self,
        id: &str,
        stage: StageKey,
        index: usize,
        output: &std::path::Path,
        result: Result<String, crate::worker::WorkerError>,
    ) -> StepOutcome {
        let mut table = self.table();
        let Some(job) = table.jobs.get_mut(id) else {
            return StepOutcome::Stop;
        };
        // Cancellation checkpoint after the worker exits.
        if job.status != JobStatus::Processing {
            return StepOutcome::Stop;
        }

        match result {
            Err(e) => {
                tracing::warn!(job_id = %id, stage = stage.key(), error = %e, "Stage failed");
                fail(job, stage, index, e.to_string());
                StepOutcome::Stop
            }
            Ok(_) => {
                let release = stage.on_complete(job);
                job.step_results.push(StepResult {
                    step: stage,
                    output_url: self.inner.artifacts.result_url(output),
                });
                job.current_input_path = output.to_path_buf();
                job.resume_from_step = index + 1;
                StepOutcome::Continue { release }
            }
        }
    }

    // -----------------------------------------------------------------------
    // User operations on a waiting job
    // -----------------------------------------------------------------------

    /// Store the supplied input on a waiting job and resume it.
    pub fn submit_input(
        &self,
        id: &str,
        crop_rect: Option<String>,
        mask_path: Option<PathBuf>,
    ) -> Result<(), CoreError> {
        {
            let mut table = self.table();
            let job = get_job_mut(&mut table, id)?;
            require_status(job, JobStatus::WaitingInput, "submit input for")?;

            match job.waiting_step {
                Some(StageKey::Crop) => {
                    if let Some(rect) = crop_rect {
                        job.crop_rect = Some(rect);
                    }
                }
                Some(StageKey::Inpaint) => {
                    if let Some(mask) = mask_path {
                        job.mask_path = Some(mask);
                    }
                }
                _ => {}
            }
            resume(job);
        }
        self.spawn_pipeline(id.to_string());
        self.dispatch();
        Ok(())
    }

    /// Skip the manual stage a job is waiting on.
    pub fn skip_step(&self, id: &str) -> Result<(), CoreError> {
        {
            let mut table = self.table();
            let job = get_job_mut(&mut table, id)?;
            require_status(job, JobStatus::WaitingInput, "skip a step of")?;
            job.resume_from_step += 1;
            resume(job);
        }
        self.spawn_pipeline(id.to_string());
        self.dispatch();
        Ok(())
    }

    /// Rewind a waiting job to its closest earlier manual stage, dropping
    /// every result from that point on.
    pub async fn rewind(&self, id: &str) -> Result<(), CoreError> {
        let mut to_delete: Vec<PathBuf> = Vec::new();
        {
            let mut table = self.table();
            let job = get_job_mut(&mut table, id)?;
            require_status(job, JobStatus::WaitingInput, "rewind")?;

            let target = job.steps[..job.resume_from_step]
                .iter()
                .rposition(|s| s.manual())
                .ok_or(CoreError::NoPreviousManualStep)?;

            // Release every input consumed at or after the target so the
            // replayed stages ask for fresh ones.
            let replayed: Vec<StageKey> = job.steps[target..].to_vec();
            for stage in replayed {
                match stage {
                    StageKey::Crop => job.crop_rect = None,
                    StageKey::Inpaint => {
                        if let Some(mask) = job.mask_path.take() {
                            to_delete.push(mask);
                        }
                    }
                    _ => {}
                }
            }

            job.step_results.truncate(target);
            job.current_input_path = job
                .step_results
                .last()
                .and_then(|r| self.inner.artifacts.path_for_url(&r.output_url))
                .unwrap_or_else(|| job.original_path.clone());
            job.resume_from_step = target;
            job.progress = job.progress_at(target);
            resume(job);
            tracing::info!(job_id = %id, target, "Job rewound to earlier manual stage");
        }
        for path in to_delete {
            self.inner.artifacts.remove(&path).await;
        }
        self.spawn_pipeline(id.to_string());
        self.dispatch();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Failure recovery
    // -----------------------------------------------------------------------

    /// Re-run the failed stage, optionally with a different model.
    pub fn retry(&self, id: &str, model: Option<String>) -> Result<(), CoreError> {
        {
            let mut table = self.table();
            let job = get_job_mut(&mut table, id)?;
            require_status(job, JobStatus::Failed, "retry")?;

            let index = job.failed_step_index.ok_or_else(|| {
                CoreError::Internal("Failed job is missing its failed step index".into())
            })?;

            if let (Some(model), Some(stage)) = (model, job.failed_step) {
                if !stage.models().iter().any(|m| m.key == model) {
                    return Err(CoreError::Validation(format!(
                        "Unknown model '{model}' for stage '{}'",
                        stage.key()
                    )));
                }
                job.options.insert(stage, model);
            }

            job.resume_from_step = index;
            clear_failure(job);
            resume(job);
        }
        self.spawn_pipeline(id.to_string());
        self.dispatch();
        Ok(())
    }

    /// Give up on the failed stage and continue with the rest of the
    /// pipeline (or complete if it was the last one).
    pub fn skip_failed(&self, id: &str) -> Result<(), CoreError> {
        let resume_pipeline = {
            let mut table = self.table();
            let job = get_job_mut(&mut table, id)?;
            require_status(job, JobStatus::Failed, "skip the failed step of")?;

            let next = job
                .failed_step_index
                .ok_or_else(|| {
                    CoreError::Internal("Failed job is missing its failed step index".into())
                })?
                + 1;
            clear_failure(job);

            if next >= job.steps.len() {
                complete(job);
                false
            } else {
                job.resume_from_step = next;
                resume(job);
                true
            }
        };
        if resume_pipeline {
            self.spawn_pipeline(id.to_string());
        }
        self.dispatch();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    /// Cancel one non-terminal job, killing its worker if one is live.
    pub fn cancel(&self, id: &str) -> Result<(), CoreError> {
        {
            let mut table = self.table();
            let job = get_job_mut(&mut table, id)?;
            if job.status.is_terminal() {
                return Err(CoreError::InvalidTransition {
                    action: "cancel",
                    status: job.status,
                });
            }
            mark_cancelled(job);
        }
        self.inner.invoker.cancel(id);
        tracing::info!(job_id = %id, "Job cancelled");
        self.dispatch();
        Ok(())
    }

    /// Cancel every pending, processing, or waiting job. Returns the
    /// number cancelled.
    pub fn cancel_all(&self) -> usize {
        self.cancel_where(|status| !status.is_terminal())
    }

    /// Cancel pending and processing jobs only; waiting jobs hold no
    /// worker and survive a lost heartbeat.
    pub fn cancel_active(&self) -> usize {
        self.cancel_where(JobStatus::is_active)
    }

    fn cancel_where(&self, predicate: impl Fn(JobStatus) -> bool) -> usize {
        let cancelled: Vec<Id> = {
            let mut table = self.table();
            let mut ids = Vec::new();
            for job in table.jobs.values_mut() {
                if predicate(job.status) {
                    mark_cancelled(job);
                    ids.push(job.id.clone());
                }
            }
            ids
        };
        for id in &cancelled {
            self.inner.invoker.cancel(id);
        }
        if !cancelled.is_empty() {
            self.dispatch();
        }
        cancelled.len()
    }

    // -----------------------------------------------------------------------
    // Queue management
    // -----------------------------------------------------------------------

    /// Reassign pending priorities from an ordered id list. Unknown or
    /// non-pending ids are ignored; they may have advanced since the
    /// client rendered its queue.
    pub fn reorder(&self, ordered_ids: &[Id]) {
        {
            let mut table = self.table();
            for (position, id) in ordered_ids.iter().enumerate() {
                if let Some(job) = table.jobs.get_mut(id) {
                    if job.status == JobStatus::Pending {
                        job.priority = position as u64;
                    }
                }
            }
        }
        self.dispatch();
    }

    /// Keep only jobs for which `keep` returns true. Used by the cleanup
    /// sweeper to drop records whose artifacts are gone.
    pub fn retain_jobs(&self, keep: impl Fn(&Job) -> bool) -> usize {
        let mut table = self.table();
        let before = table.jobs.len();
        table.jobs.retain(|_, j| keep(j));
        before - table.jobs.len()
    }
}

// ---------------------------------------------------------------------------
// Record transitions
// ---------------------------------------------------------------------------

fn get_job_mut<'t>(table: &'t mut JobTable, id: &str) -> Result<&'t mut Job, CoreError> {
    table.jobs.get_mut(id).ok_or(CoreError::NotFound {
        entity: "Job",
        id: id.to_string(),
    })
}

fn require_status(job: &Job, expected: JobStatus, action: &'static str) -> Result<(), CoreError> {
    if job.status == expected {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            action,
            status: job.status,
        })
    }
}

/// Put a job back on a processing footing after user input, a skip, a
/// rewind, or a retry. The caller spawns the pipeline task.
fn resume(job: &mut Job) {
    job.status = JobStatus::Processing;
    job.waiting_step = None;
    job.waiting_image = None;
}

fn complete(job: &mut Job) {
    job.status = JobStatus::Completed;
    job.progress = 100;
    job.current_step = None;
    job.waiting_step = None;
    job.waiting_image = None;
    job.result = job.step_results.last().map(|r| r.output_url.clone());
}

fn fail(job: &mut Job, stage: StageKey, index: usize, error: String) {
    job.status = JobStatus::Failed;
    job.error = Some(error);
    job.failed_step = Some(stage);
    job.failed_step_index = Some(index);
    job.current_step = None;
}

fn clear_failure(job: &mut Job) {
    job.error = None;
    job.failed_step = None;
    job.failed_step_index = None;
}

fn mark_cancelled(job: &mut Job) {
    job.status = JobStatus::Cancelled;
    job.current_step = None;
    job.waiting_step = None;
    job.waiting_image = None;
}
