#![deny(unreachable_patterns)]
//! Media processing for the shortform clip factory.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building and a cancellable runner
//! - Probing of input media through FFprobe
//! - The [`MediaEngine`] and [`EnvelopeAnalyzer`] capability traits
//! - Onset-envelope alignment of overlay audio against the base track
//! - Master compositing (audio replacement, overlay blending)
//! - Segment planning (fixed windows, scene boundaries, hook bias)
//! - Clip export across aspect ratios and a quality ladder

pub mod alignment;
pub mod captions;
pub mod command;
pub mod compositor;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod exporter;
pub mod filters;
pub mod fs_utils;
pub mod probe;
pub mod progress;
pub mod retry;
pub mod segmenter;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use alignment::{AlignmentConfig, AlignmentEngine};
pub use captions::{extract_snippet, load_srt, parse_srt, SrtCue};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use compositor::{CompositeRequest, Compositor};
pub use engine::{
    AudioTranscode, CaptionBurn, FfmpegEngine, MediaEngine, OverlayPlacement, RenderPlan,
    TimeShift, INTERMEDIATE_SAMPLE_RATE,
};
pub use envelope::{EnergyFluxAnalyzer, EnvelopeAnalyzer, SpectralFluxAnalyzer};
pub use error::{MediaError, MediaResult};
pub use exporter::{CaptionSource, ExportFailure, ExportReport, ExportRequest, Exporter};
pub use probe::{probe_keyframes, probe_media, MediaProbe};
pub use progress::FfmpegProgress;
pub use retry::{retry_async, RetryConfig, RetryResult};
pub use segmenter::{HookCurve, Segmenter};
