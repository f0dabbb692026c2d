//! Master assembly: swap in the aligned overlay audio, then draw the overlay
//! video over the base picture.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use sfc_models::{AlignmentResult, MediaAsset, OverlaySpec, StreamKind};

use crate::engine::{AudioTranscode, MediaEngine, OverlayPlacement, TimeShift};
use crate::error::{MediaError, MediaResult};

/// Inputs for one [`Compositor::compose`] call.
#[derive(Debug, Clone)]
pub struct CompositeRequest<'a> {
    /// Probed base video; only its picture is kept
    pub base: &'a MediaAsset,
    pub overlay_video: &'a MediaAsset,
    /// Overlay audio as it should sound, before any time shift
    pub overlay_audio: &'a Path,
    pub alignment: &'a AlignmentResult,
    pub overlay: &'a OverlaySpec,
    /// Scratch directory exclusive to the job
    pub work_dir: &'a Path,
    pub output: &'a Path,
}

#[derive(Clone)]
pub struct Compositor {
    engine: Arc<dyn MediaEngine>,
}

impl Compositor {
    pub fn new(engine: Arc<dyn MediaEngine>) -> Self {
        Self { engine }
    }

    /// Produce the master and return its probed asset.
    pub async fn compose(&self, request: &CompositeRequest<'_>) -> MediaResult<MediaAsset> {
        let placement = self.placement(request)?;

        let shift = TimeShift::from_offset(request.alignment.offset_seconds);
        let shifted_audio = request.work_dir.join("overlay_audio_shifted.wav");
        self.engine
            .transcode_audio(
                request.overlay_audio,
                &shifted_audio,
                &AudioTranscode {
                    loudness: None,
                    shift,
                },
            )
            .await?;

        let with_audio = intermediate(request.work_dir, request.base, "base_with_audio");
        self.engine
            .replace_audio(&request.base.path, &shifted_audio, &with_audio)
            .await?;

        info!(
            x = placement.x,
            y = placement.y,
            opacity = placement.opacity,
            shift = ?shift,
            "Compositing overlay"
        );
        self.engine
            .composite(&with_audio, &request.overlay_video.path, &placement, request.output)
            .await
            .map_err(|e| match e {
                MediaError::FfmpegFailed { .. } => MediaError::incompatible(e.detail()),
                other => other,
            })?;

        let master = self.engine.probe(request.output).await?;
        if !master.has_stream(StreamKind::Video) {
            return Err(MediaError::incompatible("composite output has no video stream"));
        }
        if !master.has_stream(StreamKind::Audio) {
            warn!(path = %master.path.display(), "Master has no audio stream");
        }
        Ok(master)
    }

    /// Resolve the overlay position and check the streams can be blended.
    fn placement(&self, request: &CompositeRequest<'_>) -> MediaResult<OverlayPlacement> {
        let (Some(base_res), Some(overlay_res)) =
            (request.base.resolution, request.overlay_video.resolution)
        else {
            return Err(MediaError::incompatible(format!(
                "both {} and {} need a video stream",
                request.base.display_name(),
                request.overlay_video.display_name()
            )));
        };

        if overlay_res.width > base_res.width || overlay_res.height > base_res.height {
            return Err(MediaError::incompatible(format!(
                "overlay {} does not fit inside base {}",
                overlay_res, base_res
            )));
        }

        if request.overlay.is_translucent()
            && !request.overlay_video.has_alpha()
            && !self.engine.can_inject_alpha()
        {
            return Err(MediaError::AlphaChannelMissing(
                request.overlay_video.display_name(),
            ));
        }

        let (x, y) = request
            .overlay
            .position
            .resolve(base_res, overlay_res, request.overlay.margin_px);

        Ok(OverlayPlacement {
            x,
            y,
            opacity: request.overlay.opacity,
        })
    }
}

fn intermediate(work_dir: &Path, base: &MediaAsset, stem: &str) -> PathBuf {
    let ext = base
        .path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "mp4".to_string());
    work_dir.join(format!("{}.{}", stem, ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, FakeEngine};
    use sfc_models::{OverlayPosition, Resolution};
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        engine: Arc<FakeEngine>,
        base: MediaAsset,
        overlay: MediaAsset,
    }

    fn fixture(engine: FakeEngine) -> Fixture {
        let dir = TempDir::new().unwrap();
        let base = MediaAsset::new(dir.path().join("base.mp4"), 120.0)
            .with_video(Resolution::new(1920, 1080), 30.0)
            .with_audio(48_000, 2);
        let overlay = MediaAsset::new(dir.path().join("cam.mov"), 120.0)
            .with_video(Resolution::new(320, 180), 30.0);
        let engine = Arc::new(engine);
        engine.register(base.clone());
        engine.register(overlay.clone());
        engine.register(MediaAsset::new(dir.path().join("voice.wav"), 118.0).with_audio(48_000, 1));
        Fixture {
            dir,
            engine,
            base,
            overlay,
        }
    }

    async fn compose(f: &Fixture, alignment: AlignmentResult, spec: &OverlaySpec) -> MediaResult<MediaAsset> {
        let overlay_audio = f.dir.path().join("voice.wav");
        let output = f.dir.path().join("master.mp4");
        let request = CompositeRequest {
            base: &f.base,
            overlay_video: &f.overlay,
            overlay_audio: &overlay_audio,
            alignment: &alignment,
            overlay: spec,
            work_dir: f.dir.path(),
            output: &output,
        };
        let result = Compositor::new(f.engine.clone()).compose(&request).await;
        result
    }

    #[tokio::test]
    async fn test_compose_runs_stages_in_order() {
        let f = fixture(FakeEngine::new());
        let master = compose(&f, AlignmentResult::accepted(2.0, 0.9), &OverlaySpec::default())
            .await
            .unwrap();

        assert_eq!(master.path, f.dir.path().join("master.mp4"));
        assert_eq!(master.resolution, Some(Resolution::new(1920, 1080)));

        let calls = f.engine.calls();
        assert!(matches!(
            calls[0],
            Call::TranscodeAudio { shift: TimeShift::Delay(s), .. } if (s - 2.0).abs() < 1e-9
        ));
        assert!(matches!(calls[1], Call::ReplaceAudio { .. }));
        match &calls[2] {
            Call::Composite { placement, .. } => {
                // top-right with 24px margin
                assert_eq!((placement.x, placement.y), (1920 - 320 - 24, 24));
                assert!((placement.opacity - 0.9).abs() < 1e-9);
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fallback_alignment_applies_no_shift() {
        let f = fixture(FakeEngine::new());
        compose(&f, AlignmentResult::fallback(3.1, 0.05), &OverlaySpec::default())
            .await
            .unwrap();

        assert!(matches!(
            f.engine.calls()[0],
            Call::TranscodeAudio { shift: TimeShift::None, .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_alpha_rejected_when_engine_cannot_inject() {
        let f = fixture(FakeEngine::new().without_alpha_injection());
        let result = compose(&f, AlignmentResult::accepted(0.0, 1.0), &OverlaySpec::default()).await;
        assert!(matches!(result, Err(MediaError::AlphaChannelMissing(_))));
        assert!(f.engine.calls().is_empty());

        // Fully opaque overlays never need alpha
        let opaque = OverlaySpec {
            opacity: 1.0,
            ..OverlaySpec::default()
        };
        assert!(compose(&f, AlignmentResult::accepted(0.0, 1.0), &opaque).await.is_ok());
    }

    #[tokio::test]
    async fn test_oversized_overlay_is_incompatible() {
        let mut f = fixture(FakeEngine::new());
        f.overlay = f.overlay.clone().with_video(Resolution::new(3840, 2160), 30.0);

        let spec = OverlaySpec {
            position: OverlayPosition::Center,
            ..OverlaySpec::default()
        };
        let result = compose(&f, AlignmentResult::accepted(0.0, 1.0), &spec).await;
        assert!(matches!(result, Err(MediaError::IncompatibleStream(_))));
    }

    #[tokio::test]
    async fn test_composite_failure_maps_to_incompatible() {
        let f = fixture(FakeEngine::new().failing_composite());
        let result = compose(&f, AlignmentResult::accepted(0.0, 1.0), &OverlaySpec::default()).await;
        assert!(matches!(result, Err(MediaError::IncompatibleStream(_))));
    }
}
