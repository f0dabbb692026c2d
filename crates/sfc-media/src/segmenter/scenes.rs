//! Scene-boundary augmentation.
//!
//! Boundaries come from the master's keyframe timestamps. A boundary becomes
//! an extra segment start when it is far enough from every start already
//! accepted.

use std::path::Path;

use tracing::debug;

use sfc_models::{Segment, SegmentSource};

use crate::engine::MediaEngine;
use crate::error::MediaResult;

/// Minimum distance between a boundary start and any accepted start, as a
/// fraction of the clip length.
pub const MIN_GAP_FACTOR: f64 = 0.5;

/// Boundary segments shorter than this fraction of the clip length are dropped.
pub const MIN_TAIL_FACTOR: f64 = 0.5;

/// Read keyframe timestamps from the master and keep usable boundaries.
pub async fn detect_boundaries(
    engine: &dyn MediaEngine,
    master: &Path,
    duration: f64,
    min_scene_len: f64,
) -> MediaResult<Vec<f64>> {
    let keyframes = engine.keyframes(master).await?;
    let boundaries = filter_boundaries(&keyframes, duration, min_scene_len);
    debug!(
        keyframes = keyframes.len(),
        boundaries = boundaries.len(),
        "Scene boundaries detected"
    );
    Ok(boundaries)
}

/// Drop boundaries outside `(0, duration)` and any closer than
/// `min_scene_len` to the previously kept one (the master start counts as
/// kept).
pub fn filter_boundaries(timestamps: &[f64], duration: f64, min_scene_len: f64) -> Vec<f64> {
    let mut sorted: Vec<f64> = timestamps
        .iter()
        .copied()
        .filter(|t| t.is_finite() && *t > 0.0 && *t < duration)
        .collect();
    sorted.sort_by(f64::total_cmp);

    let mut kept = Vec::with_capacity(sorted.len());
    let mut last = 0.0;
    for t in sorted {
        if t - last >= min_scene_len {
            kept.push(t);
            last = t;
        }
    }
    kept
}

/// Segments for boundaries that keep `MIN_GAP_FACTOR * clip_len` from every
/// start in `existing` and from each other.
pub fn boundary_segments(
    existing: &[Segment],
    boundaries: &[f64],
    clip_len: f64,
    duration: f64,
) -> Vec<Segment> {
    let min_gap = MIN_GAP_FACTOR * clip_len;
    let mut accepted: Vec<f64> = existing.iter().map(|s| s.start_seconds).collect();
    let mut segments = Vec::new();

    for &start in boundaries {
        if accepted.iter().any(|a| (start - a).abs() < min_gap) {
            continue;
        }
        let end = (start + clip_len).min(duration);
        if end - start < MIN_TAIL_FACTOR * clip_len {
            continue;
        }
        segments.push(Segment::new(start, end, SegmentSource::SceneBoundary));
        accepted.push(start);
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmenter::window::fixed_windows;
    use crate::testing::FakeEngine;

    #[test]
    fn test_filter_respects_min_scene_len() {
        let kept = filter_boundaries(&[0.0, 1.0, 2.5, 3.0, 7.0, 7.5, 130.0], 120.0, 2.0);
        assert_eq!(kept, vec![2.5, 7.0]);
    }

    #[test]
    fn test_boundaries_near_fixed_starts_are_discarded() {
        let fixed = fixed_windows(120.0, 20.0, 18.0);
        // 9 is exactly halfway between 0 and 18 (gap 9 < 10); 100 is 10 from 90
        let extra = boundary_segments(&fixed, &[9.0, 100.0, 115.0], 20.0, 120.0);

        assert_eq!(extra.len(), 1);
        assert_eq!(extra[0].start_seconds, 100.0);
        assert_eq!(extra[0].end_seconds, 120.0);
        assert_eq!(extra[0].source, SegmentSource::SceneBoundary);
    }

    #[test]
    fn test_short_tail_is_skipped() {
        // 112 + 20 clamps to 120: 8 s < 10 s
        assert!(boundary_segments(&[], &[112.0], 20.0, 120.0).is_empty());
        let kept = boundary_segments(&[], &[105.0], 20.0, 120.0);
        assert_eq!(kept[0].duration(), 15.0);
    }

    #[test]
    fn test_accepted_boundaries_space_each_other() {
        let extra = boundary_segments(&[], &[10.0, 15.0, 21.0], 20.0, 120.0);
        let starts: Vec<f64> = extra.iter().map(|s| s.start_seconds).collect();
        assert_eq!(starts, vec![10.0, 21.0]);
    }

    #[tokio::test]
    async fn test_detect_boundaries_uses_keyframes() {
        let engine = FakeEngine::new().with_keyframes(vec![0.0, 4.0, 5.0, 44.0]);
        let boundaries = detect_boundaries(&engine, Path::new("master.mp4"), 120.0, 2.0)
            .await
            .unwrap();
        assert_eq!(boundaries, vec![4.0, 44.0]);
    }
}
