//! Alignment results.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How an alignment offset was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentMethod {
    /// Offset taken from the cross-correlation peak
    CrossCorrelation,
    /// Confidence was too low; offset forced to zero
    FallbackZero,
}

impl AlignmentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlignmentMethod::CrossCorrelation => "cross_correlation",
            AlignmentMethod::FallbackZero => "fallback_zero",
        }
    }
}

impl fmt::Display for AlignmentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Offset to apply to the overlay audio so it lines up with the base audio.
///
/// Positive offsets delay the overlay audio; negative offsets trim its head.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AlignmentResult {
    /// Applied offset in seconds
    pub offset_seconds: f64,
    /// Normalized peak correlation in [0, 1]
    pub confidence: f64,
    pub method: AlignmentMethod,
    /// Offset at the correlation peak, kept even when it was rejected
    pub measured_offset_seconds: f64,
}

impl AlignmentResult {
    /// Accept a measured offset.
    pub fn accepted(offset_seconds: f64, confidence: f64) -> Self {
        Self {
            offset_seconds,
            confidence: confidence.clamp(0.0, 1.0),
            method: AlignmentMethod::CrossCorrelation,
            measured_offset_seconds: offset_seconds,
        }
    }

    /// Discard a measured offset and align at zero.
    pub fn fallback(measured_offset_seconds: f64, confidence: f64) -> Self {
        Self {
            offset_seconds: 0.0,
            confidence: confidence.clamp(0.0, 1.0),
            method: AlignmentMethod::FallbackZero,
            measured_offset_seconds,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.method == AlignmentMethod::FallbackZero
    }

    /// Offset in whole milliseconds, rounded.
    pub fn offset_ms(&self) -> i64 {
        (self.offset_seconds * 1000.0).round() as i64
    }
}
