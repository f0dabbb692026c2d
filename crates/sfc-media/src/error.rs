//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Unreadable media {path}: {reason}")]
    UnreadableMedia { path: PathBuf, reason: String },

    #[error("Missing {kind} stream in {path}")]
    MissingStream { path: PathBuf, kind: String },

    #[error("Empty audio: {0}")]
    EmptyAudio(String),

    #[error("Incompatible streams: {0}")]
    IncompatibleStream(String),

    #[error("Overlay has no alpha channel and none can be injected: {0}")]
    AlphaChannelMissing(String),

    #[error("Export of {target} for {segment} failed: {message}")]
    ExportEncode {
        target: String,
        segment: String,
        message: String,
    },

    #[error("Invalid segment: {0}")]
    InvalidSegment(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn unreadable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::UnreadableMedia {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn missing_stream(path: impl Into<PathBuf>, kind: impl ToString) -> Self {
        Self::MissingStream {
            path: path.into(),
            kind: kind.to_string(),
        }
    }

    pub fn empty_audio(message: impl Into<String>) -> Self {
        Self::EmptyAudio(message.into())
    }

    pub fn incompatible(message: impl Into<String>) -> Self {
        Self::IncompatibleStream(message.into())
    }

    pub fn export_encode(
        target: impl Into<String>,
        segment: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ExportEncode {
            target: target.into(),
            segment: segment.into(),
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether this error should abort the job rather than be recorded
    /// as a warning.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, MediaError::ExportEncode { .. })
    }

    /// Whether another attempt might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MediaError::ExportEncode { .. } | MediaError::Timeout(_) | MediaError::FfmpegFailed { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, MediaError::Cancelled)
    }

    /// Short description including captured stderr, for job error messages.
    pub fn detail(&self) -> String {
        match self {
            MediaError::FfmpegFailed {
                stderr: Some(stderr),
                ..
            }
            | MediaError::FfprobeFailed {
                stderr: Some(stderr),
                ..
            } if !stderr.trim().is_empty() => {
                format!("{} ({})", self, stderr.trim())
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_errors_are_not_fatal() {
        let err = MediaError::export_encode("9:16/social", "clip_0_20", "encoder crashed");
        assert!(!err.is_fatal());
        assert!(err.is_retryable());

        assert!(MediaError::empty_audio("base").is_fatal());
        assert!(!MediaError::Cancelled.is_retryable());
    }

    #[test]
    fn test_detail_includes_stderr() {
        let err = MediaError::ffmpeg_failed("exit 1", Some("Invalid data found\n".into()), Some(1));
        assert_eq!(err.detail(), "FFmpeg command failed: exit 1 (Invalid data found)");
    }
}
