//! Persisted job and batch manifests.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    AlignmentResult, Clip, JobConfig, JobId, JobInputs, JobRequest, JobResult, JobState,
    MediaAsset, Segment,
};

/// Wall-clock seconds spent per pipeline stage, keyed by stage name.
pub type StageTimings = BTreeMap<String, f64>;

/// Ground-truth record of one job, written beside its clips.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Manifest {
    pub session_id: JobId,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub inputs: JobInputs,
    /// Probed inputs, in the same order as `inputs`
    pub assets: Vec<MediaAsset>,
    pub config: JobConfig,
    pub status: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alignment: Option<AlignmentResult>,
    pub segments: Vec<Segment>,
    pub clips: Vec<Clip>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub processing: StageTimings,
}

impl Manifest {
    pub fn new(
        request: &JobRequest,
        assets: Vec<MediaAsset>,
        result: &JobResult,
        processing: StageTimings,
    ) -> Self {
        Self {
            session_id: request.id.clone(),
            created_at: Utc::now(),
            label: request.label.clone(),
            inputs: request.inputs.clone(),
            assets,
            config: request.config.clone(),
            status: result.status,
            alignment: result.alignment,
            segments: result.segments.clone(),
            clips: result.clips.clone(),
            warnings: result.warnings.clone(),
            error_message: result.error_message.clone(),
            processing,
        }
    }

    pub fn total_clip_seconds(&self) -> f64 {
        self.clips.iter().map(|c| c.duration).sum()
    }
}

/// Aggregate over every job in a batch.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BatchSummary {
    pub created_at: DateTime<Utc>,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub results: Vec<JobResult>,
}

impl BatchSummary {
    /// Summarise results; ordering is preserved.
    pub fn from_results(results: Vec<JobResult>) -> Self {
        let completed = results
            .iter()
            .filter(|r| r.status == JobState::Completed)
            .count();
        let failed = results.iter().filter(|r| r.is_failed()).count();

        Self {
            created_at: Utc::now(),
            total: results.len(),
            completed,
            failed,
            results,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.completed == self.total
    }
}
