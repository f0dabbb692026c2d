//! Hook scoring: nudging window starts toward engaging audio.
//!
//! The score curve has one value per hop. Each frame combines four features,
//! each min-max normalised over the whole track:
//!
//! ```text
//! hook  = 0.4 energy + 0.3 dynamics + 0.2 voice + 0.1 brightness
//! voice = 0.3 zcr + 0.7 rms
//! ```
//!
//! `energy` and `dynamics` are the mean and standard deviation of the
//! normalised RMS over a one-second neighbourhood. `brightness` is the ratio of
//! first-difference magnitude to signal magnitude, a cheap stand-in for the
//! spectral centroid.

use sfc_models::{Segment, SegmentSource};

const ENERGY_WEIGHT: f64 = 0.4;
const DYNAMICS_WEIGHT: f64 = 0.3;
const VOICE_WEIGHT: f64 = 0.2;
const BRIGHTNESS_WEIGHT: f64 = 0.1;

const VOICE_ZCR_WEIGHT: f64 = 0.3;
const VOICE_RMS_WEIGHT: f64 = 0.7;

/// Neighbourhood for the energy and dynamics features.
const CONTEXT_SECONDS: f64 = 1.0;

/// Default frame hop in samples.
pub const HOOK_HOP: usize = 512;

/// Hook score sampled on a fixed frame grid.
#[derive(Debug, Clone, PartialEq)]
pub struct HookCurve {
    values: Vec<f64>,
    frame_seconds: f64,
}

impl HookCurve {
    pub fn from_values(values: Vec<f64>, frame_seconds: f64) -> Self {
        Self {
            values,
            frame_seconds,
        }
    }

    /// Score mono PCM in frames of `hop` samples.
    pub fn from_samples(samples: &[f32], sample_rate: u32, hop: usize) -> Self {
        let frame_seconds = if sample_rate == 0 {
            0.0
        } else {
            hop as f64 / sample_rate as f64
        };
        if samples.is_empty() || hop == 0 || frame_seconds <= 0.0 {
            return Self::from_values(Vec::new(), frame_seconds.max(0.0));
        }

        let mut rms = Vec::new();
        let mut zcr = Vec::new();
        let mut brightness = Vec::new();
        for chunk in samples.chunks(hop) {
            rms.push(chunk_rms(chunk));
            zcr.push(zero_crossing_rate(chunk));
            brightness.push(brightness_proxy(chunk));
        }
        let rms = min_max(&rms);
        let zcr = min_max(&zcr);
        let brightness = min_max(&brightness);

        let radius = ((CONTEXT_SECONDS / frame_seconds) / 2.0).round().max(1.0) as usize;
        let (energy, spread) = moving_stats(&rms, radius);
        let dynamics = min_max(&spread);

        let values = (0..rms.len())
            .map(|i| {
                let voice = VOICE_ZCR_WEIGHT * zcr[i] + VOICE_RMS_WEIGHT * rms[i];
                ENERGY_WEIGHT * energy[i]
                    + DYNAMICS_WEIGHT * dynamics[i]
                    + VOICE_WEIGHT * voice
                    + BRIGHTNESS_WEIGHT * brightness[i]
            })
            .collect();

        Self::from_values(values, frame_seconds)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn frame_seconds(&self) -> f64 {
        self.frame_seconds
    }

    /// Score of the frame nearest to `t`; zero outside the curve.
    pub fn value_at(&self, t: f64) -> f64 {
        if self.frame_seconds <= 0.0 || t < 0.0 {
            return 0.0;
        }
        let index = (t / self.frame_seconds).round() as usize;
        self.values.get(index).copied().unwrap_or(0.0)
    }

    /// First frame in `[lo, hi]` holding the maximum score, as `(seconds, score)`.
    pub fn peak_in(&self, lo: f64, hi: f64) -> Option<(f64, f64)> {
        if self.is_empty() || self.frame_seconds <= 0.0 || hi < lo {
            return None;
        }
        let first = (lo / self.frame_seconds - 1e-9).ceil().max(0.0) as usize;
        let last = ((hi / self.frame_seconds + 1e-9).floor().max(0.0) as usize).min(self.len() - 1);
        if first > last {
            return None;
        }

        let mut best: Option<(usize, f64)> = None;
        for (i, &value) in self.values.iter().enumerate().take(last + 1).skip(first) {
            if best.map_or(true, |(_, b)| value > b) {
                best = Some((i, value));
            }
        }
        best.map(|(i, value)| ((i as f64 * self.frame_seconds).clamp(lo, hi), value))
    }
}

/// Move every fixed window toward the strongest hook within `radius` seconds.
///
/// A window never leaves its own territory: with non-overlapping strides it
/// may use half the gap to each neighbour, with overlapping strides half the
/// stride. Starts stay strictly increasing and inside `[0, duration - clip_len]`.
/// Every returned segment carries its hook score.
pub fn bias_starts(
    windows: Vec<Segment>,
    curve: &HookCurve,
    stride: f64,
    radius: f64,
    duration: f64,
) -> Vec<Segment> {
    windows
        .into_iter()
        .map(|window| {
            let clip_len = window.duration();
            let territory = if stride >= clip_len {
                (stride - clip_len) / 2.0
            } else {
                stride / 2.0 - curve.frame_seconds()
            };
            let reach = radius.min(territory).max(0.0);

            let start = window.start_seconds;
            let current = curve.value_at(start);
            let lo = (start - reach).max(0.0);
            let hi = (start + reach).min(duration - clip_len);

            match curve.peak_in(lo, hi) {
                Some((t, score)) if score > current && (t - start).abs() > 1e-9 => {
                    Segment::new(t, t + clip_len, SegmentSource::HookBiased).with_score(score)
                }
                _ => window.with_score(current),
            }
        })
        .collect()
}

fn chunk_rms(chunk: &[f32]) -> f64 {
    let sum: f64 = chunk.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / chunk.len() as f64).sqrt()
}

fn zero_crossing_rate(chunk: &[f32]) -> f64 {
    if chunk.len() < 2 {
        return 0.0;
    }
    let crossings = chunk
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f64 / (chunk.len() - 1) as f64
}

fn brightness_proxy(chunk: &[f32]) -> f64 {
    let magnitude: f64 = chunk.iter().map(|s| s.abs() as f64).sum();
    if magnitude < 1e-9 || chunk.len() < 2 {
        return 0.0;
    }
    let change: f64 = chunk.windows(2).map(|w| (w[1] - w[0]).abs() as f64).sum();
    change / magnitude
}

fn min_max(values: &[f64]) -> Vec<f64> {
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = hi - lo;
    if !range.is_finite() || range < 1e-12 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - lo) / range).collect()
}

/// Centred moving mean and standard deviation over `2 * radius + 1` frames.
fn moving_stats(values: &[f64], radius: usize) -> (Vec<f64>, Vec<f64>) {
    let mut sum = vec![0.0; values.len() + 1];
    let mut sum_sq = vec![0.0; values.len() + 1];
    for (i, v) in values.iter().enumerate() {
        sum[i + 1] = sum[i] + v;
        sum_sq[i + 1] = sum_sq[i] + v * v;
    }

    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius + 1).min(values.len());
            let n = (hi - lo) as f64;
            let mean = (sum[hi] - sum[lo]) / n;
            let variance = ((sum_sq[hi] - sum_sq[lo]) / n - mean * mean).max(0.0);
            (mean, variance.sqrt())
        })
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmenter::window::fixed_windows;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn spike_curve(duration: f64, frame_seconds: f64, at: f64) -> HookCurve {
        let frames = (duration / frame_seconds) as usize + 1;
        let mut values = vec![0.1; frames];
        values[(at / frame_seconds).round() as usize] = 1.0;
        HookCurve::from_values(values, frame_seconds)
    }

    #[test]
    fn test_loud_passage_scores_highest() {
        let sample_rate = 8_000;
        let mut rng = StdRng::seed_from_u64(7);
        let mut samples: Vec<f32> = (0..sample_rate * 20)
            .map(|_| (rng.random::<f32>() - 0.5) * 0.02)
            .collect();
        // Loud burst from 12 s to 14 s
        for s in samples.iter_mut().skip(12 * sample_rate).take(2 * sample_rate) {
            *s *= 40.0;
        }

        let curve = HookCurve::from_samples(&samples, sample_rate as u32, HOOK_HOP);
        let (t, score) = curve.peak_in(0.0, 20.0).unwrap();
        assert!((11.0..=15.0).contains(&t), "peak at {}", t);
        assert!(score > curve.value_at(4.0));
    }

    #[test]
    fn test_peak_prefers_first_maximum() {
        let curve = HookCurve::from_values(vec![0.0, 0.5, 0.9, 0.9, 0.1], 1.0);
        assert_eq!(curve.peak_in(0.0, 4.0), Some((2.0, 0.9)));
        assert_eq!(curve.peak_in(3.0, 3.0), Some((3.0, 0.9)));
        assert_eq!(curve.peak_in(4.5, 9.0), None);
    }

    #[test]
    fn test_window_moves_toward_hook() {
        let curve = spike_curve(60.0, 0.5, 20.0);
        let biased = bias_starts(fixed_windows(60.0, 20.0, 18.0), &curve, 18.0, 5.0, 60.0);

        assert_eq!(biased[0].start_seconds, 0.0);
        assert_eq!(biased[0].source, SegmentSource::FixedWindow);
        assert_eq!(biased[1].start_seconds, 20.0);
        assert_eq!(biased[1].end_seconds, 40.0);
        assert_eq!(biased[1].source, SegmentSource::HookBiased);
        assert_eq!(biased[1].score, Some(1.0));
        assert_eq!(biased[2].start_seconds, 36.0);
    }

    #[test]
    fn test_hook_outside_radius_is_ignored() {
        let curve = spike_curve(60.0, 0.5, 26.0);
        let biased = bias_starts(fixed_windows(60.0, 20.0, 18.0), &curve, 18.0, 5.0, 60.0);
        assert!(biased.iter().all(|s| s.source == SegmentSource::FixedWindow));
    }

    #[test]
    fn test_contiguous_windows_never_move() {
        let curve = spike_curve(60.0, 0.5, 21.0);
        let biased = bias_starts(fixed_windows(60.0, 20.0, 20.0), &curve, 20.0, 5.0, 60.0);
        let starts: Vec<f64> = biased.iter().map(|s| s.start_seconds).collect();
        assert_eq!(starts, vec![0.0, 20.0, 40.0]);
    }

    #[test]
    fn test_gapped_windows_stay_disjoint() {
        let mut rng = StdRng::seed_from_u64(42);
        let values: Vec<f64> = (0..2_000).map(|_| rng.random::<f64>()).collect();
        let curve = HookCurve::from_values(values, 0.1);

        let biased = bias_starts(fixed_windows(200.0, 10.0, 16.0), &curve, 16.0, 5.0, 200.0);
        for pair in biased.windows(2) {
            assert!(pair[0].end_seconds <= pair[1].start_seconds + 1e-9);
        }
        assert!(biased.iter().all(|s| s.is_within(200.0)));
    }

    #[test]
    fn test_overlapping_windows_keep_order() {
        let mut rng = StdRng::seed_from_u64(3);
        let values: Vec<f64> = (0..1_300).map(|_| rng.random::<f64>()).collect();
        let curve = HookCurve::from_values(values, 0.1);

        let biased = bias_starts(fixed_windows(120.0, 20.0, 18.0), &curve, 18.0, 5.0, 120.0);
        assert_eq!(biased.len(), 6);
        for pair in biased.windows(2) {
            assert!(pair[0].start_seconds < pair[1].start_seconds);
        }
        assert!(biased.iter().all(|s| s.is_within(120.0) && s.score.is_some()));
    }

    #[test]
    fn test_silence_gives_flat_curve() {
        let curve = HookCurve::from_samples(&vec![0.0; 48_000], 48_000, HOOK_HOP);
        assert_eq!(curve.len(), 94);
        assert!(curve.peak_in(0.0, 1.0).map_or(false, |(t, v)| t == 0.0 && v == 0.0));
    }
}
