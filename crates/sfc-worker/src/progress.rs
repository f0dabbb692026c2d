//! Job progress reporting.
//!
//! Progress is derived from completed stage units: probing is worth 5%,
//! alignment 15%, compositing 30% and the exports share the remaining 50%.
//! Updates travel over an unbounded channel so synchronous callbacks (such as
//! the exporter's) can report without awaiting.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

use sfc_models::{JobId, JobState};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validate,
    Probe,
    Normalize,
    Align,
    Composite,
    Segment,
    Export,
    Manifest,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Probe => "probe",
            Stage::Normalize => "normalize",
            Stage::Align => "align",
            Stage::Composite => "composite",
            Stage::Segment => "segment",
            Stage::Export => "export",
            Stage::Manifest => "manifest",
        }
    }

    /// Cumulative progress once this stage has finished.
    pub fn progress_after(&self) -> u8 {
        match self {
            Stage::Validate => 0,
            Stage::Probe => 5,
            Stage::Normalize => 5,
            Stage::Align => 20,
            Stage::Composite | Stage::Segment => 50,
            Stage::Export | Stage::Manifest => 100,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress during export: 50% plus the finished share of renders. Stays
/// below 100 until the job itself completes.
pub fn export_progress(done: usize, total: usize) -> u8 {
    let base = Stage::Segment.progress_after() as usize;
    if total == 0 {
        return base as u8;
    }
    let span = 100 - base;
    (base + span * done.min(total) / total).min(99) as u8
}

/// One progress event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub job_id: JobId,
    pub status: JobState,
    pub progress: u8,
    pub message: String,
}

/// Per-job sender that never reports a lower percentage than before.
#[derive(Debug)]
pub struct ProgressReporter {
    job_id: JobId,
    tx: Option<mpsc::UnboundedSender<ProgressUpdate>>,
    last: AtomicU8,
}

impl ProgressReporter {
    pub fn new(job_id: JobId, tx: Option<mpsc::UnboundedSender<ProgressUpdate>>) -> Self {
        Self {
            job_id,
            tx,
            last: AtomicU8::new(0),
        }
    }

    /// Reporter that drops every update.
    pub fn disabled(job_id: JobId) -> Self {
        Self::new(job_id, None)
    }

    pub fn current(&self) -> u8 {
        self.last.load(Ordering::SeqCst)
    }

    /// Send an update; the percentage is raised to the highest seen so far.
    pub fn report(&self, status: JobState, progress: u8, message: impl Into<String>) {
        let progress = self.last.fetch_max(progress.min(100), Ordering::SeqCst).max(progress.min(100));
        let update = ProgressUpdate {
            job_id: self.job_id.clone(),
            status,
            progress,
            message: message.into(),
        };
        trace!(job_id = %update.job_id, progress, "Progress");
        if let Some(ref tx) = self.tx {
            // Receiver gone means nobody is listening
            let _ = tx.send(update);
        }
    }

    pub fn stage_done(&self, stage: Stage) {
        self.report(
            JobState::Processing,
            stage.progress_after(),
            format!("{} done", stage),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_progress_fills_remaining_half() {
        assert_eq!(export_progress(0, 12), 50);
        assert_eq!(export_progress(6, 12), 75);
        assert_eq!(export_progress(12, 12), 99);
        assert_eq!(export_progress(0, 0), 50);
    }

    #[test]
    fn test_reporter_is_monotonic() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter::new(JobId::from_string("job-1"), Some(tx));

        reporter.stage_done(Stage::Align);
        reporter.stage_done(Stage::Probe);
        reporter.report(JobState::Processing, 60, "exports");

        let seen: Vec<u8> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|u| u.progress)
            .collect();
        assert_eq!(seen, vec![20, 20, 60]);
        assert_eq!(reporter.current(), 60);
    }

    #[test]
    fn test_stage_order() {
        assert!(Stage::Probe < Stage::Align);
        assert!(Stage::Composite < Stage::Export);
        assert_eq!(Stage::Composite.to_string(), "composite");
    }
}
