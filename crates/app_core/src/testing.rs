//! Test doubles for the job layer

use crate::engine::{EngineError, EngineHandle, EngineReport, WorkEngine, WorkRequest};
use crate::jobs::JobManager;
use api_proto::{Job, JobStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Engine whose reports are set by the test; handles are job ids
#[derive(Default)]
pub struct ManualEngine {
    reports: Mutex<HashMap<String, EngineReport>>,
    begin_error: Mutex<Option<EngineError>>,
    ignore_stop: AtomicBool,
    ack_delay: Mutex<Option<Duration>>,
}

impl ManualEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_progress(&self, job_id: &str, progress: u8) {
        self.reports
            .lock()
            .insert(job_id.to_string(), EngineReport::running(progress));
    }

    pub fn complete(&self, job_id: &str, items_found: Option<u64>) {
        let mut report = EngineReport::completed();
        report.items_found = items_found;
        self.reports.lock().insert(job_id.to_string(), report);
    }

    pub fn fail(&self, job_id: &str, error: &str) {
        self.reports
            .lock()
            .insert(job_id.to_string(), EngineReport::failed(0, error));
    }

    pub fn fail_next_begin(&self, error: EngineError) {
        *self.begin_error.lock() = Some(error);
    }

    /// Stop requests are never acknowledged
    pub fn ignore_stop(&self) {
        self.ignore_stop.store(true, Ordering::Relaxed);
    }

    /// Stop marks the work cancelled at once but acknowledges after `delay`
    pub fn delay_stop_ack(&self, delay: Duration) {
        *self.ack_delay.lock() = Some(delay);
    }
}

#[async_trait]
impl WorkEngine for ManualEngine {
    fn name(&self) -> &str {
        "manual"
    }

    async fn begin(&self, request: &WorkRequest) -> Result<EngineHandle, EngineError> {
        if let Some(error) = self.begin_error.lock().take() {
            return Err(error);
        }
        self.set_progress(&request.job_id, 0);
        Ok(EngineHandle(request.job_id.clone()))
    }

    async fn poll(&self, handle: &EngineHandle) -> Result<EngineReport, EngineError> {
        self.reports
            .lock()
            .get(&handle.0)
            .cloned()
            .ok_or_else(|| EngineError::UnknownHandle(handle.0.clone()))
    }

    async fn stop(&self, handle: &EngineHandle) -> Result<bool, EngineError> {
        if self.ignore_stop.load(Ordering::Relaxed) {
            // Outlives any cancel timeout used in tests
            tokio::time::sleep(Duration::from_secs(5)).await;
            return Ok(false);
        }
        {
            let mut reports = self.reports.lock();
            let progress = reports.get(&handle.0).map(|r| r.progress).unwrap_or(0);
            reports.insert(handle.0.clone(), EngineReport::cancelled(progress));
        }
        let delay = *self.ack_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(true)
    }
}

/// Poll the manager until the job reaches `status`
pub async fn wait_for_status(manager: &JobManager, job_id: &str, status: JobStatus) -> Job {
    for _ in 0..400 {
        if let Ok(job) = manager.query(job_id) {
            if job.status == status {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {job_id} never reached {status}");
}
