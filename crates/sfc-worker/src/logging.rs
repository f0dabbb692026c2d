//! Structured job logging and subscriber setup.

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sfc_models::{JobId, JobRequest, JobResult};

use crate::progress::Stage;

/// Default filter directive when `RUST_LOG` does not say otherwise.
pub const DEFAULT_DIRECTIVE: &str = "sfc=info";

/// Install the global subscriber: JSON lines when `LOG_FORMAT=json`, coloured
/// text otherwise. `verbose` raises the crate level to debug.
pub fn init_tracing(verbose: bool) {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let directive = if verbose { "sfc=debug" } else { DEFAULT_DIRECTIVE };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Lifecycle events for one clip job, tagged with its id and label.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
    label: String,
}

impl JobLogger {
    /// The label is the request's own, or the base video's file name.
    pub fn new(request: &JobRequest) -> Self {
        let label = request.label.clone().unwrap_or_else(|| {
            request
                .inputs
                .base_video
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        });
        Self {
            job_id: request.id.clone(),
            label,
        }
    }

    pub fn started(&self, request: &JobRequest) {
        info!(
            job_id = %self.job_id,
            label = %self.label,
            base = %request.inputs.base_video.display(),
            overlay_video = %request.inputs.overlay_video.display(),
            overlay_audio = %request.inputs.overlay_audio.display(),
            "Job started"
        );
    }

    pub fn stage_finished(&self, stage: Stage, elapsed_secs: f64) {
        info!(job_id = %self.job_id, stage = %stage, elapsed_secs, "Stage finished");
    }

    pub fn warning(&self, message: &str) {
        warn!(job_id = %self.job_id, label = %self.label, "Job warning: {}", message);
    }

    pub fn failed(&self, message: &str) {
        error!(job_id = %self.job_id, label = %self.label, "Job failed: {}", message);
    }

    pub fn completed(&self, result: &JobResult) {
        info!(
            job_id = %self.job_id,
            label = %self.label,
            segments = result.segments.len(),
            clips = result.clips.len(),
            warnings = result.warnings.len(),
            "Job completed"
        );
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Span for everything done on behalf of this job.
    pub fn span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id, label = %self.label)
    }
}
