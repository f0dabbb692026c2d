//! Rendered clips.

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{ExportTarget, Segment};

/// A finished output file. Terminal; never mutated once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Clip {
    /// Position of the source segment in the job's segment list
    pub index: usize,
    pub path: PathBuf,
    pub segment: Segment,
    pub target: ExportTarget,
    /// Duration in seconds
    pub duration: f64,
    /// Caption file burned into this clip, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captions: Option<PathBuf>,
}

impl Clip {
    pub fn new(index: usize, path: impl Into<PathBuf>, segment: Segment, target: ExportTarget) -> Self {
        let duration = segment.duration();
        Self {
            index,
            path: path.into(),
            segment,
            target,
            duration,
            captions: None,
        }
    }

    pub fn with_captions(mut self, captions: impl Into<PathBuf>) -> Self {
        self.captions = Some(captions.into());
        self
    }

    /// File name of the rendered clip.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}
