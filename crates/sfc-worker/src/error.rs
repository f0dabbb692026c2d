//! Worker error types.

use thiserror::Error;

use sfc_media::MediaError;
use sfc_models::{ConfigError, TransitionError};

use crate::progress::Stage;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("{stage}: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: MediaError,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Batch input error: {0}")]
    BatchInput(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Worker crashed: {0}")]
    Crashed(String),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn stage(stage: Stage, source: MediaError) -> Self {
        match source {
            MediaError::Cancelled => Self::Cancelled,
            source => Self::Stage { stage, source },
        }
    }

    pub fn batch_input(msg: impl Into<String>) -> Self {
        Self::BatchInput(msg.into())
    }

    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::Manifest(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            WorkerError::Cancelled => true,
            WorkerError::Media(e) => e.is_cancelled(),
            _ => false,
        }
    }

    /// Text for `JobResult::error_message`: `"{stage}: {cause}"`, with FFmpeg
    /// stderr included when it was captured.
    pub fn job_message(&self) -> String {
        match self {
            WorkerError::Stage { stage, source } => format!("{}: {}", stage, source.detail()),
            WorkerError::Cancelled => "cancelled".to_string(),
            WorkerError::Config(e) => format!("{}: {}", Stage::Validate, e),
            WorkerError::Manifest(msg) => format!("{}: {}", Stage::Manifest, msg),
            WorkerError::Media(e) => e.detail(),
            other => other.to_string(),
        }
    }
}

/// Attach a pipeline stage to media errors.
pub trait StageContext<T> {
    fn stage(self, stage: Stage) -> WorkerResult<T>;
}

impl<T> StageContext<T> for Result<T, MediaError> {
    fn stage(self, stage: Stage) -> WorkerResult<T> {
        self.map_err(|e| WorkerError::stage(stage, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_message_names_stage() {
        let err = WorkerError::stage(Stage::Align, MediaError::empty_audio("base audio is silent"));
        assert_eq!(err.job_message(), "align: Empty audio: base audio is silent");
    }

    #[test]
    fn test_cancellation_is_not_wrapped() {
        let result: Result<(), MediaError> = Err(MediaError::Cancelled);
        let err = result.stage(Stage::Export).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.job_message(), "cancelled");
    }
}
