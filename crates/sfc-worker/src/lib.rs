//! Clip factory worker.
//!
//! This crate provides:
//! - Per-job pipeline (probe, align, composite, segment, export)
//! - Batch coordinator with bounded concurrency and cancellation
//! - Progress reporting and structured job logging
//! - Manifest persistence and batch input loading

pub mod batch_input;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod metrics;
pub mod pipeline;
pub mod progress;

pub use batch_input::{from_csv, from_folder, BatchInput};
pub use config::WorkerConfig;
pub use coordinator::{BatchCoordinator, CancelHandle};
pub use error::{WorkerError, WorkerResult};
pub use logging::{init_tracing, JobLogger};
pub use manifest::{read_manifest, write_batch_manifest, write_manifest};
pub use pipeline::{DryRunReport, JobPipeline};
pub use progress::{ProgressReporter, ProgressUpdate, Stage};
