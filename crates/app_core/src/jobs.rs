//! Job orchestration
//!
//! The [`JobManager`] owns every [`Job`] record. Engines never touch records
//! directly: a driver task per job polls the engine and folds each report into
//! the table under one lock, which is what keeps the invariants simple:
//!
//! - at most one pending/processing job per (kind, subject)
//! - progress never decreases and stays within 0..=100
//! - a terminal job is never modified again
//!
//! Jobs live in memory only. A restart forgets them.

use crate::config::JobsConfig;
use crate::engine::{EngineHandle, EngineState, JobParams, WorkEngine, WorkRequest};
use crate::error::AppError;
use api_proto::{FieldError, Job, JobKind, JobStatus, JobView};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Result of a cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The engine acknowledged; the job is now cancelled
    Cancelled,
    /// The job had already reached a terminal status; nothing changed
    AlreadyFinished,
    /// The engine did not acknowledge in time; the job may still finish
    Requested,
}

/// Broadcast whenever a job changes status
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub job: Job,
}

type SubjectKey = (JobKind, String);

struct JobEntry {
    job: Job,
    handle: Option<EngineHandle>,
    /// Set once a caller asked for cancellation; an engine-side cancel
    /// after this point is the caller's
    cancel_requested: bool,
}

#[derive(Default)]
struct JobTable {
    jobs: HashMap<String, JobEntry>,
    /// (kind, subject) -> id of its single active job
    active: HashMap<SubjectKey, String>,
    /// Finished job ids per (kind, subject), oldest first
    finished: HashMap<SubjectKey, VecDeque<String>>,
    /// Finished job ids across all subjects, oldest first
    finish_order: VecDeque<String>,
}

/// Retention limits for finished jobs
#[derive(Clone, Copy)]
struct Retention {
    per_subject: usize,
    total: usize,
}

/// How a job ended
enum Finish {
    Completed {
        output_path: Option<String>,
        items_found: Option<u64>,
    },
    Failed(String),
    Cancelled(Option<String>),
}

impl JobTable {
    /// Move an active job to a terminal status. `None` when the job is
    /// unknown or already terminal.
    fn finish(&mut self, job_id: &str, outcome: Finish, retain: Retention) -> Option<Job> {
        let entry = self.jobs.get_mut(job_id)?;
        if entry.job.status.is_terminal() {
            return None;
        }

        let job = &mut entry.job;
        job.finished_at = Some(Utc::now());
        match outcome {
            Finish::Completed {
                output_path,
                items_found,
            } => {
                job.status = JobStatus::Completed;
                job.progress = 100;
                job.output_path = output_path;
                job.items_found = items_found;
            }
            Finish::Failed(error) => {
                job.status = JobStatus::Failed;
                job.error = Some(error);
            }
            Finish::Cancelled(reason) => {
                job.status = JobStatus::Cancelled;
                job.error = reason;
            }
        }
        let snapshot = job.clone();

        let key = (snapshot.kind, snapshot.subject_id.clone());
        if self.active.get(&key).map(String::as_str) == Some(job_id) {
            self.active.remove(&key);
        }

        let history = self.finished.entry(key).or_default();
        history.push_back(snapshot.job_id.clone());
        while history.len() > retain.per_subject.max(1) {
            if let Some(old) = history.pop_front() {
                self.jobs.remove(&old);
            }
        }

        // Ids evicted per subject above stay here until they age out
        self.finish_order.push_back(snapshot.job_id.clone());
        while self.finish_order.len() > retain.total.max(1) {
            if let Some(old) = self.finish_order.pop_front() {
                self.evict(&old);
            }
        }

        Some(snapshot)
    }

    /// Drop a finished job, and its subject's history once that is empty
    fn evict(&mut self, job_id: &str) {
        let Some(entry) = self.jobs.get(job_id) else {
            return;
        };
        if !entry.job.status.is_terminal() {
            return;
        }
        let key = (entry.job.kind, entry.job.subject_id.clone());
        self.jobs.remove(job_id);

        if let Some(history) = self.finished.get_mut(&key) {
            history.retain(|id| id != job_id);
            if history.is_empty() {
                self.finished.remove(&key);
            }
        }
    }
}

struct Inner {
    table: Mutex<JobTable>,
    engines: HashMap<JobKind, Arc<dyn WorkEngine>>,
    config: JobsConfig,
    events: broadcast::Sender<JobEvent>,
    runtime: Handle,
}

/// Builder for [`JobManager`]
pub struct JobManagerBuilder {
    config: JobsConfig,
    engines: HashMap<JobKind, Arc<dyn WorkEngine>>,
    runtime: Option<Handle>,
}

impl JobManagerBuilder {
    /// Route jobs of `kind` to `engine`
    pub fn engine(mut self, kind: JobKind, engine: Arc<dyn WorkEngine>) -> Self {
        self.engines.insert(kind, engine);
        self
    }

    pub fn config(mut self, config: JobsConfig) -> Self {
        self.config = config;
        self
    }

    /// Runtime that driver tasks are spawned on; the current one by default
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<JobManager, AppError> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current()
                .map_err(|e| AppError::Init(format!("job manager needs a tokio runtime: {}", e)))?,
        };
        let (events, _) = broadcast::channel(self.config.event_capacity.max(1));

        Ok(JobManager {
            inner: Arc::new(Inner {
                table: Mutex::new(JobTable::default()),
                engines: self.engines,
                config: self.config,
                events,
                runtime,
            }),
        })
    }
}

/// Starts, tracks and cancels long-running jobs
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

impl JobManager {
    pub fn builder() -> JobManagerBuilder {
        JobManagerBuilder {
            config: JobsConfig::default(),
            engines: HashMap::new(),
            runtime: None,
        }
    }

    /// Runtime the manager spawns on
    pub fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    /// Status-change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Start a job for `subject_id`
    ///
    /// Fails with `Conflict` while another job of the same kind is active for
    /// the subject. The check and the insert happen under one lock, so two
    /// concurrent starts cannot both succeed.
    pub fn start(&self, kind: JobKind, subject_id: &str, params: JobParams) -> Result<Job, AppError> {
        let mut errors: Vec<FieldError> = Vec::new();
        if subject_id.trim().is_empty() {
            errors.push(FieldError::new("subjectId", "must not be empty"));
        }
        if params.kind() != kind {
            errors.push(FieldError::new(
                "params",
                format!("{} parameters cannot start a {} job", params.kind(), kind),
            ));
        }
        errors.extend(params.validate());
        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }

        let engine = self
            .inner
            .engines
            .get(&kind)
            .cloned()
            .ok_or_else(|| AppError::Engine(format!("no work engine registered for {} jobs", kind)))?;

        let job = {
            let mut table = self.inner.table.lock();
            let key = (kind, subject_id.to_string());
            if let Some(existing) = table.active.get(&key) {
                return Err(AppError::Conflict(format!(
                    "a {} job is already active for {} (job {})",
                    kind, subject_id, existing
                )));
            }

            let job = Job {
                job_id: Uuid::new_v4().to_string(),
                kind,
                subject_id: subject_id.to_string(),
                status: JobStatus::Pending,
                progress: 0,
                started_at: Utc::now(),
                finished_at: None,
                output_path: None,
                error: None,
                items_found: None,
            };
            table.active.insert(key, job.job_id.clone());
            table.jobs.insert(
                job.job_id.clone(),
                JobEntry {
                    job: job.clone(),
                    handle: None,
                    cancel_requested: false,
                },
            );
            job
        };

        tracing::info!(
            job_id = %job.job_id,
            kind = %kind,
            subject = %subject_id,
            engine = engine.name(),
            "Job started"
        );
        self.emit(job.clone());

        let request = WorkRequest {
            job_id: job.job_id.clone(),
            subject_id: job.subject_id.clone(),
            params,
        };
        let manager = self.clone();
        self.inner
            .runtime
            .spawn(async move { manager.drive(engine, request).await });

        Ok(job)
    }

    /// Current snapshot of a job
    pub fn query(&self, job_id: &str) -> Result<Job, AppError> {
        self.inner
            .table
            .lock()
            .jobs
            .get(job_id)
            .map(|entry| entry.job.clone())
            .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))
    }

    /// Snapshot plus remaining-time estimate
    pub fn view(&self, job_id: &str) -> Result<JobView, AppError> {
        let job = self.query(job_id)?;
        let estimated_remaining_secs = estimate_remaining(&job, Utc::now()).map(|d| d.as_secs());
        Ok(JobView {
            job,
            estimated_remaining_secs,
        })
    }

    /// All retained jobs, oldest first
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .inner
            .table
            .lock()
            .jobs
            .values()
            .map(|entry| entry.job.clone())
            .collect();
        jobs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        jobs
    }

    /// Retained jobs for one subject, oldest first
    pub fn list_for_subject(&self, subject_id: &str) -> Vec<Job> {
        let mut jobs = self.list();
        jobs.retain(|job| job.subject_id == subject_id);
        jobs
    }

    /// The active job of `kind` for a subject, if any
    pub fn active_for(&self, kind: JobKind, subject_id: &str) -> Option<Job> {
        let table = self.inner.table.lock();
        let job_id = table.active.get(&(kind, subject_id.to_string()))?;
        table.jobs.get(job_id).map(|entry| entry.job.clone())
    }

    /// Does any kind of job run for this subject?
    pub fn has_active_subject(&self, subject_id: &str) -> bool {
        self.inner
            .table
            .lock()
            .active
            .keys()
            .any(|(_, subject)| subject == subject_id)
    }

    /// Request cancellation
    ///
    /// Best effort: when the engine does not acknowledge within the cancel
    /// timeout the job keeps its status and the outcome is
    /// [`CancelOutcome::Requested`].
    pub async fn cancel(&self, job_id: &str) -> Result<CancelOutcome, AppError> {
        let (kind, handle) = {
            let mut table = self.inner.table.lock();
            let entry = table
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))?;

            if entry.job.status.is_terminal() {
                return Ok(CancelOutcome::AlreadyFinished);
            }

            match entry.handle.clone() {
                Some(handle) => {
                    entry.cancel_requested = true;
                    (entry.job.kind, handle)
                }
                None => {
                    // Not yet accepted by the engine; the driver stops it on arrival
                    let job = table.finish(job_id, Finish::Cancelled(None), self.retention());
                    drop(table);
                    if let Some(job) = job {
                        tracing::info!(job_id = %job_id, "Pending job cancelled");
                        self.emit(job);
                    }
                    return Ok(CancelOutcome::Cancelled);
                }
            }
        };

        let engine = self
            .inner
            .engines
            .get(&kind)
            .cloned()
            .ok_or_else(|| AppError::Engine(format!("no work engine registered for {} jobs", kind)))?;

        let timeout = Duration::from_millis(self.inner.config.cancel_timeout_ms);
        match tokio::time::timeout(timeout, engine.stop(&handle)).await {
            Ok(Ok(true)) => {
                // The driver may have seen the engine's cancelled report first
                if self.finish(job_id, Finish::Cancelled(None)).is_some()
                    || self.cancelled_on_request(job_id)
                {
                    tracing::info!(job_id = %job_id, "Job cancelled");
                    Ok(CancelOutcome::Cancelled)
                } else {
                    Ok(CancelOutcome::AlreadyFinished)
                }
            }
            Ok(Ok(false)) => {
                tracing::warn!(job_id = %job_id, "Engine did not accept cancellation");
                Ok(CancelOutcome::Requested)
            }
            Ok(Err(e)) => {
                tracing::error!(job_id = %job_id, "Engine failed to stop job: {}", e);
                Err(AppError::Engine(format!("failed to stop job {}: {}", job_id, e)))
            }
            Err(_) => {
                tracing::warn!(
                    job_id = %job_id,
                    timeout_ms = self.inner.config.cancel_timeout_ms,
                    "Engine did not acknowledge cancellation in time"
                );
                Ok(CancelOutcome::Requested)
            }
        }
    }

    /// Remaining-time estimate for a processing job
    pub fn estimate_remaining(&self, job: &Job) -> Option<Duration> {
        estimate_remaining(job, Utc::now())
    }

    fn emit(&self, job: Job) {
        // No subscribers is fine
        let _ = self.inner.events.send(JobEvent { job });
    }

    fn retention(&self) -> Retention {
        Retention {
            per_subject: self.inner.config.retain_per_subject,
            total: self.inner.config.retain_total,
        }
    }

    fn finish(&self, job_id: &str, outcome: Finish) -> Option<Job> {
        let job = self
            .inner
            .table
            .lock()
            .finish(job_id, outcome, self.retention())?;
        self.emit(job.clone());
        Some(job)
    }

    /// Engine reported cancelled on its own: attribute it to a pending
    /// cancel request if there is one
    fn finish_engine_cancelled(&self, job_id: &str) -> Option<Job> {
        let job = {
            let mut table = self.inner.table.lock();
            let requested = table
                .jobs
                .get(job_id)
                .is_some_and(|entry| entry.cancel_requested);
            let reason = (!requested).then(|| "cancelled by engine".to_string());
            table.finish(job_id, Finish::Cancelled(reason), self.retention())?
        };
        self.emit(job.clone());
        Some(job)
    }

    /// Did the job end cancelled after a caller asked for it?
    fn cancelled_on_request(&self, job_id: &str) -> bool {
        self.inner
            .table
            .lock()
            .jobs
            .get(job_id)
            .is_some_and(|entry| {
                entry.cancel_requested && entry.job.status == JobStatus::Cancelled
            })
    }

    /// Apply a progress report; ignored unless the job is processing
    fn record_progress(&self, job_id: &str, progress: u8) {
        let mut table = self.inner.table.lock();
        if let Some(entry) = table.jobs.get_mut(job_id) {
            if entry.job.status == JobStatus::Processing {
                let progress = progress.min(100);
                if progress > entry.job.progress {
                    entry.job.progress = progress;
                }
            }
        }
    }

    fn is_terminal(&self, job_id: &str) -> bool {
        self.inner
            .table
            .lock()
            .jobs
            .get(job_id)
            .map(|entry| entry.job.status.is_terminal())
            .unwrap_or(true)
    }

    /// Per-job task: begin, then poll until the work or the job ends
    async fn drive(self, engine: Arc<dyn WorkEngine>, request: WorkRequest) {
        let job_id = request.job_id.clone();

        let handle = match engine.begin(&request).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(job_id = %job_id, "Job failed to start: {}", e);
                self.finish(&job_id, Finish::Failed(e.to_string()));
                return;
            }
        };

        let processing = {
            let mut table = self.inner.table.lock();
            match table.jobs.get_mut(&job_id) {
                Some(entry) if entry.job.status == JobStatus::Pending => {
                    entry.handle = Some(handle.clone());
                    entry.job.status = JobStatus::Processing;
                    Some(entry.job.clone())
                }
                _ => None,
            }
        };

        let Some(processing) = processing else {
            // Cancelled while the engine was accepting the work
            let timeout = Duration::from_millis(self.inner.config.cancel_timeout_ms);
            if let Ok(Err(e)) = tokio::time::timeout(timeout, engine.stop(&handle)).await {
                tracing::warn!(job_id = %job_id, "Failed to stop work of cancelled job: {}", e);
            }
            return;
        };
        self.emit(processing);

        let mut ticker = tokio::time::interval(Duration::from_millis(
            self.inner.config.poll_interval_ms.max(1),
        ));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if self.is_terminal(&job_id) {
                return;
            }

            let report = match engine.poll(&handle).await {
                Ok(report) => report,
                Err(e) => {
                    if !self.is_terminal(&job_id) {
                        tracing::warn!(job_id = %job_id, "Lost track of job: {}", e);
                        self.finish(&job_id, Finish::Failed(format!("engine poll failed: {}", e)));
                    }
                    return;
                }
            };

            match report.state {
                EngineState::Running => self.record_progress(&job_id, report.progress),
                EngineState::Completed => {
                    if let Some(job) = self.finish(
                        &job_id,
                        Finish::Completed {
                            output_path: report.output_path,
                            items_found: report.items_found,
                        },
                    ) {
                        tracing::info!(job_id = %job.job_id, kind = %job.kind, "Job completed");
                    }
                    return;
                }
                EngineState::Failed => {
                    self.record_progress(&job_id, report.progress);
                    let error = report
                        .error
                        .unwrap_or_else(|| "engine reported failure without detail".to_string());
                    tracing::warn!(job_id = %job_id, "Job failed: {}", error);
                    self.finish(&job_id, Finish::Failed(error));
                    return;
                }
                EngineState::Cancelled => {
                    self.finish_engine_cancelled(&job_id);
                    return;
                }
            }
        }
    }
}

/// Linear extrapolation from elapsed time and progress
///
/// `None` unless the job is processing with progress above zero. Never
/// negative: a clock that went backwards counts as no time elapsed.
pub fn estimate_remaining(job: &Job, now: DateTime<Utc>) -> Option<Duration> {
    if job.status != JobStatus::Processing || job.progress == 0 {
        return None;
    }

    let progress = u128::from(job.progress.min(100));
    let elapsed = (now - job.started_at).to_std().unwrap_or(Duration::ZERO);
    let remaining_ms = elapsed.as_millis() * (100 - progress) / progress;

    Some(Duration::from_millis(
        u64::try_from(remaining_ms).unwrap_or(u64::MAX),
    ))
}
