//! Segment planning for a composed master.
//!
//! Planning runs in three passes over the master duration:
//! 1. fixed windows of `clip_len` every `stride` seconds
//! 2. optional hook bias, nudging each window toward engaging audio
//! 3. optional scene augmentation, adding boundary-aligned segments
//!
//! The result is capped at `max_clips` and sorted by start. Planning is a
//! pure function of its inputs.

pub mod hook;
pub mod scenes;
pub mod window;

use std::cmp::Ordering;

use tracing::{debug, warn};

use sfc_models::{MediaAsset, Segment, SegmentSource, SlicingConfig, MIN_STRIDE};

use crate::engine::{MediaEngine, INTERMEDIATE_SAMPLE_RATE};
use crate::error::{MediaError, MediaResult};

pub use hook::{bias_starts, HookCurve, HOOK_HOP};
pub use scenes::{boundary_segments, detect_boundaries, filter_boundaries};
pub use window::{fixed_windows, window_count};

#[derive(Debug, Clone)]
pub struct Segmenter {
    config: SlicingConfig,
}

impl Segmenter {
    pub fn new(config: SlicingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SlicingConfig {
        &self.config
    }

    /// Gather scene boundaries and the hook curve as configured, then plan.
    pub async fn segment(
        &self,
        engine: &dyn MediaEngine,
        master: &MediaAsset,
    ) -> MediaResult<Vec<Segment>> {
        let boundaries = if self.config.scene_detect {
            Some(
                detect_boundaries(
                    engine,
                    &master.path,
                    master.duration,
                    self.config.min_scene_len,
                )
                .await?,
            )
        } else {
            None
        };

        let curve = if self.config.hook_detect {
            match engine
                .extract_pcm(&master.path, INTERMEDIATE_SAMPLE_RATE)
                .await
            {
                Ok(samples) => Some(HookCurve::from_samples(
                    &samples,
                    INTERMEDIATE_SAMPLE_RATE,
                    HOOK_HOP,
                )),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Hook scoring skipped, master audio unavailable");
                    None
                }
            }
        } else {
            None
        };

        self.plan(master.duration, boundaries.as_deref(), curve.as_ref())
    }

    /// Plan segments for a master of `duration` seconds.
    pub fn plan(
        &self,
        duration: f64,
        boundaries: Option<&[f64]>,
        curve: Option<&HookCurve>,
    ) -> MediaResult<Vec<Segment>> {
        let SlicingConfig {
            clip_len, stride, ..
        } = self.config;
        if !(clip_len > 0.0 && stride >= MIN_STRIDE) {
            return Err(MediaError::InvalidSegment(format!(
                "clip_len {} must be positive and stride {} at least {}",
                clip_len, stride, MIN_STRIDE
            )));
        }
        if !(duration.is_finite() && duration > 0.0) {
            return Err(MediaError::InvalidSegment(format!(
                "master duration {} is not positive",
                duration
            )));
        }

        let mut windows = fixed_windows(duration, clip_len, stride);
        if clip_len > duration {
            warn!(clip_len, duration, "Master shorter than one clip, no fixed windows");
        }

        if self.config.hook_detect {
            if let Some(curve) = curve.filter(|c| !c.is_empty()) {
                windows = bias_starts(windows, curve, stride, self.config.hook_radius, duration);
            }
        }

        let mut extra = match boundaries {
            Some(boundaries) if self.config.scene_detect => {
                boundary_segments(&windows, boundaries, clip_len, duration)
            }
            _ => Vec::new(),
        };
        if let Some(curve) = curve.filter(|_| self.config.hook_detect) {
            for segment in extra.iter_mut() {
                segment.score = Some(curve.value_at(segment.start_seconds));
            }
        }

        let mut segments = cap(windows, extra, self.config.max_clips);
        segments.sort_by(|a, b| a.start_seconds.total_cmp(&b.start_seconds));

        debug!(
            segments = segments.len(),
            hook_biased = segments
                .iter()
                .filter(|s| s.source == SegmentSource::HookBiased)
                .count(),
            scene = segments
                .iter()
                .filter(|s| s.source == SegmentSource::SceneBoundary)
                .count(),
            "Segments planned"
        );
        Ok(segments)
    }
}

/// Keep at most `max` segments: windows before boundary segments, higher
/// scores before lower, earlier starts before later.
fn cap(windows: Vec<Segment>, extra: Vec<Segment>, max: Option<usize>) -> Vec<Segment> {
    let Some(max) = max else {
        return windows.into_iter().chain(extra).collect();
    };
    let mut windows = windows;
    let mut extra = extra;
    windows.sort_by(by_priority);
    extra.sort_by(by_priority);
    windows.into_iter().chain(extra).take(max).collect()
}

fn by_priority(a: &Segment, b: &Segment) -> Ordering {
    let score = |s: &Segment| s.score.unwrap_or(f64::NEG_INFINITY);
    score(b)
        .total_cmp(&score(a))
        .then(a.start_seconds.total_cmp(&b.start_seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;
    use std::path::PathBuf;

    fn config(scene_detect: bool, hook_detect: bool) -> SlicingConfig {
        SlicingConfig {
            scene_detect,
            hook_detect,
            ..SlicingConfig::default()
        }
    }

    fn starts(segments: &[Segment]) -> Vec<f64> {
        segments.iter().map(|s| s.start_seconds).collect()
    }

    #[test]
    fn test_plan_fixed_windows_only() {
        let segments = Segmenter::new(config(false, false))
            .plan(120.0, Some(&[50.0]), None)
            .unwrap();
        assert_eq!(starts(&segments), vec![0.0, 18.0, 36.0, 54.0, 72.0, 90.0]);
        assert!(segments.iter().all(|s| s.source == SegmentSource::FixedWindow));
    }

    #[test]
    fn test_plan_merges_scene_boundaries_in_order() {
        let mut cfg = config(true, false);
        cfg.stride = 30.0;
        let segments = Segmenter::new(cfg)
            .plan(120.0, Some(&[45.0, 52.0, 100.0]), None)
            .unwrap();
        // 52 is within 10 s of the accepted 45 and the fixed 60
        assert_eq!(starts(&segments), vec![0.0, 30.0, 45.0, 60.0, 90.0, 100.0]);
        assert_eq!(segments[2].source, SegmentSource::SceneBoundary);
        assert_eq!(segments[5].end_seconds, 120.0);
    }

    #[test]
    fn test_default_stride_leaves_room_only_at_the_tail() {
        let segments = Segmenter::new(config(true, false))
            .plan(120.0, Some(&[45.0, 104.0]), None)
            .unwrap();
        assert_eq!(
            starts(&segments),
            vec![0.0, 18.0, 36.0, 54.0, 72.0, 90.0, 104.0]
        );
    }

    #[test]
    fn test_cap_prefers_fixed_windows() {
        let mut cfg = config(true, false);
        cfg.stride = 30.0;
        cfg.max_clips = Some(5);
        let segments = Segmenter::new(cfg.clone())
            .plan(120.0, Some(&[45.0, 100.0]), None)
            .unwrap();
        assert_eq!(starts(&segments), vec![0.0, 30.0, 45.0, 60.0, 90.0]);

        cfg.max_clips = Some(3);
        let segments = Segmenter::new(cfg).plan(120.0, Some(&[45.0]), None).unwrap();
        assert_eq!(starts(&segments), vec![0.0, 30.0, 60.0]);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let curve = HookCurve::from_values((0..1300).map(|i| ((i * 37) % 101) as f64).collect(), 0.1);
        let segmenter = Segmenter::new(config(true, true));
        let first = segmenter.plan(120.0, Some(&[7.0, 45.0]), Some(&curve)).unwrap();
        let second = segmenter.plan(120.0, Some(&[7.0, 45.0]), Some(&curve)).unwrap();
        assert_eq!(first, second);
        for pair in first.windows(2) {
            assert!(pair[0].start_seconds <= pair[1].start_seconds);
        }
        assert!(first.iter().all(|s| s.is_within(120.0)));
    }

    #[test]
    fn test_invalid_parameters() {
        let mut cfg = config(false, false);
        cfg.stride = 0.0;
        assert!(matches!(
            Segmenter::new(cfg.clone()).plan(120.0, None, None),
            Err(MediaError::InvalidSegment(_))
        ));

        // A vanishing stride would plan billions of windows on a long master
        cfg.stride = 1e-6;
        assert!(matches!(
            Segmenter::new(cfg).plan(3600.0, None, None),
            Err(MediaError::InvalidSegment(_))
        ));
        assert!(Segmenter::new(config(false, false)).plan(f64::NAN, None, None).is_err());
    }

    #[test]
    fn test_short_master_yields_no_segments() {
        let segments = Segmenter::new(config(false, false)).plan(12.0, None, None).unwrap();
        assert!(segments.is_empty());
    }

    #[tokio::test]
    async fn test_segment_without_audio_skips_hook() {
        let engine = FakeEngine::new().with_keyframes(vec![45.0, 104.0]);
        let master = MediaAsset::new(PathBuf::from("master.mp4"), 120.0);

        let segments = Segmenter::new(config(true, true))
            .segment(&engine, &master)
            .await
            .unwrap();
        assert_eq!(segments.len(), 7);
        assert!(segments.iter().all(|s| s.source != SegmentSource::HookBiased));
    }
}
