//! Batch coordinator.
//!
//! Jobs run concurrently up to `max_concurrent_jobs`. Each job owns its
//! output and scratch directories and its `JobResult`; the only state shared
//! between jobs is the permit pool, the cancellation flags and the progress
//! channel.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{error, info, warn};

use sfc_models::{BatchSummary, JobId, JobRequest, JobResult, JobState, Manifest, StageTimings};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::manifest::{write_batch_manifest, write_manifest};
use crate::metrics;
use crate::pipeline::JobPipeline;
use crate::progress::{ProgressReporter, ProgressUpdate};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cancellation flags: one global flag plus one per running job.
///
/// The global receiver is meant for the FFmpeg runner so that in-flight
/// processes are killed; per-job receivers stop scheduling for that job.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    global: Arc<watch::Sender<bool>>,
    jobs: Arc<Mutex<HashMap<JobId, watch::Sender<bool>>>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (global, _) = watch::channel(false);
        Self {
            global: Arc::new(global),
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Receiver that flips when everything is cancelled.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.global.subscribe()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.global.borrow()
    }

    /// Cancel every job, running or queued, and any job registered later.
    pub fn cancel_all(&self) {
        self.global.send_replace(true);
        for tx in lock(&self.jobs).values() {
            tx.send_replace(true);
        }
    }

    /// Cancel one job. Returns false when it is not running or queued.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        match lock(&self.jobs).get(job_id) {
            Some(tx) => {
                tx.send_replace(true);
                true
            }
            None => false,
        }
    }

    fn register(&self, job_id: &JobId) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(self.is_cancelled());
        lock(&self.jobs).insert(job_id.clone(), tx);
        rx
    }

    fn unregister(&self, job_id: &JobId) {
        lock(&self.jobs).remove(job_id);
    }
}

/// Runs jobs on a bounded pool and aggregates their results.
#[derive(Clone)]
pub struct BatchCoordinator {
    pipeline: Arc<JobPipeline>,
    job_permits: Arc<Semaphore>,
    cancel: CancelHandle,
    progress_tx: Option<mpsc::UnboundedSender<ProgressUpdate>>,
}

impl BatchCoordinator {
    pub fn new(pipeline: JobPipeline, config: &WorkerConfig) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            job_permits: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            cancel: CancelHandle::new(),
            progress_tx: None,
        }
    }

    /// Share cancellation with other components, e.g. the FFmpeg runner.
    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// Stream progress updates for every job to `tx`.
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<ProgressUpdate>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    fn reporter(&self, job_id: &JobId) -> ProgressReporter {
        ProgressReporter::new(job_id.clone(), self.progress_tx.clone())
    }

    /// Run a single job once a worker slot is free.
    pub async fn run_job(&self, request: JobRequest, out_root: &Path) -> JobResult {
        let reporter = self.reporter(&request.id);
        self.run_queued(request, out_root.to_path_buf(), &reporter).await
    }

    /// Run every request concurrently and write `batch_manifest.json`.
    ///
    /// Results keep submission order. A job that crashes its worker task is
    /// reported as failed; the other jobs are unaffected.
    pub async fn run_batch(&self, requests: Vec<JobRequest>, out_root: &Path) -> WorkerResult<BatchSummary> {
        info!(
            jobs = requests.len(),
            max_concurrent = self.job_permits.available_permits(),
            "Starting batch"
        );

        let mut jobs = Vec::with_capacity(requests.len());
        let mut handles = Vec::with_capacity(requests.len());
        for request in requests {
            let reporter = Arc::new(self.reporter(&request.id));
            let this = self.clone();
            let task_request = request.clone();
            let task_reporter = reporter.clone();
            let task_out = out_root.to_path_buf();
            handles.push(tokio::spawn(async move {
                this.run_queued(task_request, task_out, &task_reporter).await
            }));
            jobs.push((request, reporter));
        }

        let mut results = Vec::with_capacity(jobs.len());
        for ((request, reporter), joined) in jobs.into_iter().zip(join_all(handles).await) {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    self.cancel.unregister(&request.id);
                    error!(job_id = %request.id, error = %e, "Worker crashed");
                    let message = format!("coordinator: worker crashed: {}", e);
                    finish_failed(&request, &reporter, out_root, &message).await
                }
            };
            results.push(result);
        }

        let summary = BatchSummary::from_results(results);
        let path = write_batch_manifest(out_root, &summary).await?;
        info!(
            total = summary.total,
            completed = summary.completed,
            failed = summary.failed,
            manifest = %path.display(),
            "Batch finished"
        );
        Ok(summary)
    }

    /// Run a failed job again under the same id.
    pub async fn retry(
        &self,
        request: &JobRequest,
        mut previous: JobResult,
        out_root: &Path,
    ) -> WorkerResult<JobResult> {
        if previous.job_id != request.id {
            return Err(WorkerError::batch_input(format!(
                "result for {} does not belong to job {}",
                previous.job_id, request.id
            )));
        }
        previous.reset_for_retry()?;
        info!(job_id = %request.id, "Retrying job");
        Ok(self.run_job(request.clone(), out_root).await)
    }

    async fn run_queued(&self, request: JobRequest, out_root: PathBuf, reporter: &ProgressReporter) -> JobResult {
        let cancel_rx = self.cancel.register(&request.id);
        reporter.report(JobState::Pending, 0, "queued");

        let permit = self.job_permits.clone().acquire_owned().await;
        let cancelled_while_queued = *cancel_rx.borrow();
        let result = match permit {
            Ok(_permit) if cancelled_while_queued => {
                info!(job_id = %request.id, "Cancelled before start");
                finish_failed(&request, reporter, &out_root, "cancelled").await
            }
            Ok(_permit) => {
                let started = Instant::now();
                metrics::record_job_started();
                let result = self
                    .pipeline
                    .run(&request, &out_root, reporter, cancel_rx)
                    .await;
                metrics::record_job_finished(&result, started.elapsed().as_secs_f64());
                result
            }
            Err(_) => {
                error!(job_id = %request.id, "Worker pool closed");
                finish_failed(&request, reporter, &out_root, "coordinator: worker pool closed").await
            }
        };

        self.cancel.unregister(&request.id);
        result
    }
}

/// Fail a job the pipeline never ran to its end: terminal progress update
/// plus a best-effort manifest in the job directory.
async fn finish_failed(
    request: &JobRequest,
    reporter: &ProgressReporter,
    out_root: &Path,
    message: &str,
) -> JobResult {
    let mut result = JobResult::new(request.id.clone());
    result.set_progress(reporter.current());
    if let Err(e) = result.fail(message) {
        warn!(error = %e, "Unexpected job state");
    }

    let manifest = Manifest::new(request, Vec::new(), &result, StageTimings::new());
    if let Err(e) = write_manifest(&out_root.join(request.id.as_str()), &manifest).await {
        warn!(job_id = %request.id, error = %e, "Failed to write manifest for failed job");
    }
    reporter.report(JobState::Failed, reporter.current(), message);
    result
}
