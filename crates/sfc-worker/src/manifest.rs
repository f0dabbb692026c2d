//! Manifest persistence.

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use sfc_models::{BatchSummary, Manifest};

use crate::error::{WorkerError, WorkerResult};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const BATCH_MANIFEST_FILE: &str = "batch_manifest.json";

/// Write `<job_dir>/manifest.json`.
pub async fn write_manifest(job_dir: &Path, manifest: &Manifest) -> WorkerResult<PathBuf> {
    write_json(&job_dir.join(MANIFEST_FILE), manifest).await
}

/// Write `<out_root>/batch_manifest.json`.
pub async fn write_batch_manifest(out_root: &Path, summary: &BatchSummary) -> WorkerResult<PathBuf> {
    write_json(&out_root.join(BATCH_MANIFEST_FILE), summary).await
}

pub async fn read_manifest(path: &Path) -> WorkerResult<Manifest> {
    read_json(path).await
}

/// Serialize to a temporary sibling, then rename over the target so readers
/// never observe a half-written file.
async fn write_json<T: Serialize>(path: &Path, value: &T) -> WorkerResult<PathBuf> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| WorkerError::manifest(format!("serialize {}: {}", path.display(), e)))?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;

    debug!(path = %path.display(), "Manifest written");
    Ok(path.to_path_buf())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> WorkerResult<T> {
    let bytes = tokio::fs::read(path).await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| WorkerError::manifest(format!("parse {}: {}", path.display(), e)))
}
