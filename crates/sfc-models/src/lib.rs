//! Shared data models for the shortform clip factory.
//!
//! This crate provides Serde-serializable types for:
//! - Probed media assets
//! - Alignment results and overlay placement
//! - Segments, export targets and the quality ladder
//! - Jobs, job results and manifests
//! - Typed, validated job configuration

pub mod alignment;
pub mod asset;
pub mod clip;
pub mod config;
pub mod export;
pub mod job;
pub mod manifest;
pub mod overlay;
pub mod segment;

// Re-export common types
pub use alignment::{AlignmentMethod, AlignmentResult};
pub use asset::{MediaAsset, Resolution, StreamKind};
pub use clip::Clip;
pub use config::{
    AudioConfig, CaptionConfig, ConfigError, ExportConfig, JobConfig, SlicingConfig, MIN_STRIDE,
};
pub use export::{AspectRatio, AspectRatioParseError, ExportTarget, QualityProfile};
pub use job::{JobId, JobInputs, JobRequest, JobResult, JobState, TransitionError};
pub use manifest::{BatchSummary, Manifest, StageTimings};
pub use overlay::{OverlayPosition, OverlayPositionParseError, OverlaySpec};
pub use segment::{Segment, SegmentSource};
