//! Job metrics.
//!
//! Recorded through the `metrics` facade; without an installed recorder these
//! calls are no-ops.

use metrics::{counter, gauge, histogram};

use sfc_models::{JobResult, JobState};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_STARTED_TOTAL: &str = "sfc_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "sfc_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "sfc_jobs_failed_total";
    pub const JOBS_IN_FLIGHT: &str = "sfc_jobs_in_flight";
    pub const JOB_DURATION_SECONDS: &str = "sfc_job_duration_seconds";
    pub const CLIPS_EXPORTED_TOTAL: &str = "sfc_clips_exported_total";
    pub const JOB_WARNINGS_TOTAL: &str = "sfc_job_warnings_total";
}

pub fn record_job_started() {
    counter!(names::JOBS_STARTED_TOTAL).increment(1);
    gauge!(names::JOBS_IN_FLIGHT).increment(1.0);
}

/// Record a job that reached a terminal state.
pub fn record_job_finished(result: &JobResult, duration_secs: f64) {
    gauge!(names::JOBS_IN_FLIGHT).decrement(1.0);

    let status = [("status", result.status.as_str().to_string())];
    histogram!(names::JOB_DURATION_SECONDS, &status).record(duration_secs);

    match result.status {
        JobState::Completed => counter!(names::JOBS_COMPLETED_TOTAL).increment(1),
        JobState::Failed => counter!(names::JOBS_FAILED_TOTAL).increment(1),
        _ => {}
    }
    counter!(names::CLIPS_EXPORTED_TOTAL).increment(result.clips.len() as u64);
    counter!(names::JOB_WARNINGS_TOTAL).increment(result.warnings.len() as u64);
}
