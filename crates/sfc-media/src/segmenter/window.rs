//! Fixed-window slicing.

use sfc_models::{Segment, SegmentSource};

/// Tolerance for `start + clip_len <= duration` on float inputs.
const EPSILON: f64 = 1e-9;

/// Number of windows of `clip_len` seconds, `stride` apart, that fit in
/// `duration`. Zero when a single window does not fit.
pub fn window_count(duration: f64, clip_len: f64, stride: f64) -> usize {
    if clip_len <= 0.0 || stride <= 0.0 || clip_len > duration + EPSILON {
        return 0;
    }
    ((duration - clip_len) / stride + EPSILON).floor() as usize + 1
}

/// Windows `[i * stride, i * stride + clip_len]` for every `i` that fits.
pub fn fixed_windows(duration: f64, clip_len: f64, stride: f64) -> Vec<Segment> {
    (0..window_count(duration, clip_len, stride))
        .map(|i| {
            let start = i as f64 * stride;
            Segment::new(start, start + clip_len, SegmentSource::FixedWindow)
        })
        .collect()
}
