//! Filesystem helpers for publishing outputs.
//!
//! Encoders write to a `.partial` sibling of the final path; only a
//! successful encode is renamed into place, so a crash or cancellation never
//! leaves a truncated file under a final name.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Marker inserted before the extension of in-progress outputs.
pub const PARTIAL_MARKER: &str = "partial";

/// `clip.mp4` -> `clip.partial.mp4`. The container extension is kept so
/// FFmpeg still infers the muxer.
pub fn partial_path(final_path: &Path) -> PathBuf {
    let stem = final_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = match final_path.extension() {
        Some(ext) => format!("{}.{}.{}", stem, PARTIAL_MARKER, ext.to_string_lossy()),
        None => format!("{}.{}", stem, PARTIAL_MARKER),
    };
    final_path.with_file_name(name)
}

pub fn is_partial(path: &Path) -> bool {
    path.file_name()
        .map(|n| {
            n.to_string_lossy()
                .split('.')
                .any(|part| part == PARTIAL_MARKER)
        })
        .unwrap_or(false)
}

/// Move `src` to `dst`, falling back to copy+delete across filesystems.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            debug!(
                src = %src.display(),
                dst = %dst.display(),
                "Cross-device rename, copying instead"
            );
            copy_and_delete(src, dst).await
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// Rename a finished partial file to its final name.
pub async fn finalize(partial: &Path, final_path: &Path) -> MediaResult<()> {
    if !partial.exists() {
        return Err(MediaError::FileNotFound(partial.to_path_buf()));
    }
    move_file(partial, final_path).await
}

/// Best-effort removal; a missing file is not an error.
pub async fn remove_if_exists(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "Failed to remove file: {}", e),
    }
}

fn is_cross_device_error(e: &std::io::Error) -> bool {
    // EXDEV
    e.raw_os_error() == Some(18)
}

async fn copy_and_delete(src: &Path, dst: &Path) -> MediaResult<()> {
    // Copy next to dst so the final rename stays on one filesystem
    let tmp_dst = dst.with_extension("tmp");

    fs::copy(src, &tmp_dst).await?;
    if let Err(e) = fs::rename(&tmp_dst, dst).await {
        remove_if_exists(&tmp_dst).await;
        return Err(e.into());
    }

    remove_if_exists(src).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_path_keeps_extension() {
        let p = partial_path(Path::new("/out/clip_000000000_000020000_social.mp4"));
        assert_eq!(
            p,
            PathBuf::from("/out/clip_000000000_000020000_social.partial.mp4")
        );
        assert!(is_partial(&p));
        assert!(!is_partial(Path::new("/out/clip_social.mp4")));
    }

    #[tokio::test]
    async fn test_finalize_moves_into_new_directory() {
        let dir = TempDir::new().unwrap();
        let final_path = dir.path().join("exports").join("9x16").join("clip.mp4");
        let partial = dir.path().join("clip.partial.mp4");
        fs::write(&partial, b"encoded").await.unwrap();

        finalize(&partial, &final_path).await.unwrap();

        assert!(!partial.exists());
        assert_eq!(fs::read(&final_path).await.unwrap(), b"encoded");
    }

    #[tokio::test]
    async fn test_finalize_requires_partial() {
        let dir = TempDir::new().unwrap();
        let result = finalize(&dir.path().join("missing.partial.mp4"), &dir.path().join("x.mp4")).await;
        assert!(matches!(result, Err(MediaError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_move_file_overwrites_destination() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("source.txt");
        let dst = dir.path().join("dest.txt");

        fs::write(&src, b"new content").await.unwrap();
        fs::write(&dst, b"old content").await.unwrap();

        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read_to_string(&dst).await.unwrap(), "new content");
    }

    #[tokio::test]
    async fn test_remove_missing_file_is_quiet() {
        let dir = TempDir::new().unwrap();
        remove_if_exists(&dir.path().join("nope")).await;
    }

    #[test]
    fn test_is_cross_device_error() {
        assert!(is_cross_device_error(&std::io::Error::from_raw_os_error(18)));
        assert!(!is_cross_device_error(&std::io::Error::from_raw_os_error(2)));
    }
}
