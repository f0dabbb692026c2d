//! Time-range proposals for output clips.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which segmentation pass proposed a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SegmentSource {
    FixedWindow,
    SceneBoundary,
    HookBiased,
}

impl SegmentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentSource::FixedWindow => "fixed_window",
            SegmentSource::SceneBoundary => "scene_boundary",
            SegmentSource::HookBiased => "hook_biased",
        }
    }
}

impl fmt::Display for SegmentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A time range of the master that becomes one clip per export target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Segment {
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub source: SegmentSource,
    /// Ranking score, when the proposing pass produced one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Segment {
    pub fn new(start_seconds: f64, end_seconds: f64, source: SegmentSource) -> Self {
        Self {
            start_seconds,
            end_seconds,
            source,
            score: None,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn duration(&self) -> f64 {
        self.end_seconds - self.start_seconds
    }

    /// Whether the range is non-empty and lies within `[0, master_duration]`.
    pub fn is_within(&self, master_duration: f64) -> bool {
        self.start_seconds >= 0.0
            && self.start_seconds < self.end_seconds
            && self.end_seconds <= master_duration + 1e-6
    }

    /// Filename stem encoding the time range, e.g. `clip_000018000_000038000`.
    ///
    /// Milliseconds, zero-padded so lexical order matches start order.
    pub fn file_stem(&self) -> String {
        format!(
            "clip_{:09}_{:09}",
            to_millis(self.start_seconds),
            to_millis(self.end_seconds)
        )
    }
}

fn to_millis(seconds: f64) -> u64 {
    (seconds.max(0.0) * 1000.0).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stem_encodes_range() {
        let seg = Segment::new(18.0, 38.0, SegmentSource::FixedWindow);
        assert_eq!(seg.file_stem(), "clip_000018000_000038000");

        let seg = Segment::new(3.2506, 23.25, SegmentSource::HookBiased);
        assert_eq!(seg.file_stem(), "clip_000003251_000023250");
    }

    #[test]
    fn test_bounds() {
        let seg = Segment::new(100.0, 120.0, SegmentSource::FixedWindow);
        assert!(seg.is_within(120.0));
        assert!(!seg.is_within(119.0));
        assert!(!Segment::new(5.0, 5.0, SegmentSource::FixedWindow).is_within(10.0));
    }
}
