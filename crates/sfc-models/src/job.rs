//! Job requests, states and results.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{AlignmentResult, Clip, JobConfig, Segment};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle state.
///
/// `pending -> processing -> {completed | failed}`. The only backward edge is
/// an explicit retry, `failed -> pending`. Input errors fail a job straight
/// from `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Failed, Pending)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid job transition from {from} to {to}")]
pub struct TransitionError {
    pub from: JobState,
    pub to: JobState,
}

/// The three input files of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobInputs {
    pub base_video: PathBuf,
    pub overlay_video: PathBuf,
    pub overlay_audio: PathBuf,
}

impl JobInputs {
    pub fn new(
        base_video: impl Into<PathBuf>,
        overlay_video: impl Into<PathBuf>,
        overlay_audio: impl Into<PathBuf>,
    ) -> Self {
        Self {
            base_video: base_video.into(),
            overlay_video: overlay_video.into(),
            overlay_audio: overlay_audio.into(),
        }
    }

    /// Inputs paired with their role names, in pipeline order.
    pub fn labelled(&self) -> [(&'static str, &PathBuf); 3] {
        [
            ("base_video", &self.base_video),
            ("overlay_video", &self.overlay_video),
            ("overlay_audio", &self.overlay_audio),
        ]
    }
}

/// A unit of work submitted to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobRequest {
    pub id: JobId,
    pub inputs: JobInputs,
    pub config: JobConfig,
    /// Human-readable label (e.g. the CSV row or base file stem)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl JobRequest {
    pub fn new(inputs: JobInputs, config: JobConfig) -> Self {
        Self {
            id: JobId::new(),
            inputs,
            config,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Outcome and live state of a job.
///
/// `status` is `failed` exactly when `error_message` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobResult {
    pub job_id: JobId,
    pub status: JobState,
    /// Percentage complete, 0-100, never decreasing
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alignment: Option<AlignmentResult>,
    pub segments: Vec<Segment>,
    pub clips: Vec<Clip>,
    /// Non-fatal problems (fallback alignment, failed export targets)
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobResult {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            status: JobState::Pending,
            progress: 0,
            alignment: None,
            segments: Vec::new(),
            clips: Vec::new(),
            warnings: Vec::new(),
            error_message: None,
            started_at: None,
            finished_at: None,
        }
    }

    fn transition(&mut self, next: JobState) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Move to `processing`.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(JobState::Processing)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Raise progress. Lower values are ignored.
    pub fn set_progress(&mut self, progress: u8) {
        self.progress = self.progress.max(progress.min(100));
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Move to `completed` at 100%.
    pub fn complete(&mut self) -> Result<(), TransitionError> {
        self.transition(JobState::Completed)?;
        self.progress = 100;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Move to `failed` with a message. Progress is left where it stopped.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(JobState::Failed)?;
        self.error_message = Some(message.into());
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Reset a failed job for another attempt.
    pub fn reset_for_retry(&mut self) -> Result<(), TransitionError> {
        self.transition(JobState::Pending)?;
        let job_id = self.job_id.clone();
        *self = Self::new(job_id);
        Ok(())
    }

    pub fn is_failed(&self) -> bool {
        self.status == JobState::Failed
    }
}
