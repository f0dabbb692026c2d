//! Offset detection between the base audio and the overlay audio.
//!
//! Both tracks are reduced to onset envelopes, z-scored, and cross-correlated
//! over every lag at which they overlap. With
//! `c(L) = Σ base[n] · overlay[n - L]`, the peak lag `L` is how far the overlay
//! must be delayed to line up with the base; a negative value means its head
//! must be trimmed instead.

use std::path::Path;
use std::sync::Arc;

use rustfft::{num_complex::Complex, FftPlanner};
use tracing::{info, warn};

use sfc_models::config::DEFAULT_MIN_CONF;
use sfc_models::AlignmentResult;

use crate::engine::MediaEngine;
use crate::envelope::{rms, EnvelopeAnalyzer, SpectralFluxAnalyzer};
use crate::error::{MediaError, MediaResult};

/// Standard deviations below this make an envelope useless for correlation.
const FLAT_ENVELOPE_STD: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignmentConfig {
    /// Rate both tracks are decoded at for analysis
    pub sample_rate: u32,
    /// Envelope hop in samples
    pub hop: usize,
    /// Confidence below which the measured offset is discarded
    pub min_conf: f64,
    /// RMS below which a track counts as silent
    pub silence_rms: f64,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            hop: 512,
            min_conf: DEFAULT_MIN_CONF,
            silence_rms: 1e-4,
        }
    }
}

impl AlignmentConfig {
    pub fn with_min_conf(mut self, min_conf: f64) -> Self {
        self.min_conf = min_conf;
        self
    }

    fn frames_to_seconds(&self, frames: i64) -> f64 {
        frames as f64 * self.hop as f64 / self.sample_rate as f64
    }
}

/// Computes an [`AlignmentResult`] for one base/overlay audio pair.
#[derive(Clone)]
pub struct AlignmentEngine {
    analyzer: Arc<dyn EnvelopeAnalyzer>,
    config: AlignmentConfig,
}

impl AlignmentEngine {
    pub fn new(analyzer: Arc<dyn EnvelopeAnalyzer>, config: AlignmentConfig) -> Self {
        Self { analyzer, config }
    }

    /// Spectral-flux envelopes with default analysis settings.
    pub fn spectral(min_conf: f64) -> Self {
        Self::new(
            Arc::new(SpectralFluxAnalyzer::new()),
            AlignmentConfig::default().with_min_conf(min_conf),
        )
    }

    pub fn config(&self) -> &AlignmentConfig {
        &self.config
    }

    /// Decode both tracks through `engine` and align them.
    pub async fn align(
        &self,
        engine: &dyn MediaEngine,
        base_audio: &Path,
        overlay_audio: &Path,
    ) -> MediaResult<AlignmentResult> {
        let base = engine.extract_pcm(base_audio, self.config.sample_rate).await?;
        let overlay = engine
            .extract_pcm(overlay_audio, self.config.sample_rate)
            .await?;

        let check = |samples: &[f32], path: &Path| {
            if rms(samples) < self.config.silence_rms {
                return Err(MediaError::empty_audio(format!(
                    "{} has no audible signal",
                    path.display()
                )));
            }
            Ok(())
        };
        check(&base, base_audio)?;
        check(&overlay, overlay_audio)?;

        Ok(self.align_checked(&base, &overlay))
    }

    /// Align two PCM buffers decoded at the configured sample rate.
    ///
    /// Fails with `EmptyAudio` when either buffer is effectively silent.
    pub fn align_samples(&self, base: &[f32], overlay: &[f32]) -> MediaResult<AlignmentResult> {
        for (name, samples) in [("base", base), ("overlay", overlay)] {
            if rms(samples) < self.config.silence_rms {
                return Err(MediaError::empty_audio(format!("{} audio is silent", name)));
            }
        }
        Ok(self.align_checked(base, overlay))
    }

    fn align_checked(&self, base: &[f32], overlay: &[f32]) -> AlignmentResult {
        let hop = self.config.hop;
        let sr = self.config.sample_rate;
        let base_env = self.analyzer.onset_envelope(base, sr, hop);
        let overlay_env = self.analyzer.onset_envelope(overlay, sr, hop);
        self.align_envelopes(&base_env, &overlay_env)
    }

    /// Correlate two onset envelopes and apply the confidence policy.
    pub fn align_envelopes(&self, base: &[f32], overlay: &[f32]) -> AlignmentResult {
        // An overlay longer than the base can only match within the base's span
        let overlay = &overlay[..overlay.len().min(base.len())];
        let (Some(base), Some(overlay)) = (z_score(base), z_score(overlay)) else {
            warn!("Onset envelope is flat or empty, using zero offset");
            return AlignmentResult::fallback(0.0, 0.0);
        };

        let (lag, peak) = peak_lag(&base, &overlay);
        let norm = l2(&base) * l2(&overlay);
        let confidence = if norm > 0.0 { peak / norm } else { 0.0 };
        let offset = self.config.frames_to_seconds(lag);

        if confidence < self.config.min_conf {
            warn!(
                measured_offset = offset,
                confidence,
                min_conf = self.config.min_conf,
                "Low alignment confidence, using zero offset"
            );
            AlignmentResult::fallback(offset, confidence)
        } else {
            info!(offset, confidence, "Aligned overlay audio");
            AlignmentResult::accepted(offset, confidence)
        }
    }
}

fn z_score(envelope: &[f32]) -> Option<Vec<f64>> {
    if envelope.is_empty() {
        return None;
    }
    let n = envelope.len() as f64;
    let mean = envelope.iter().map(|&v| v as f64).sum::<f64>() / n;
    let variance = envelope
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    let std = variance.sqrt();
    if !std.is_finite() || std < FLAT_ENVELOPE_STD {
        return None;
    }
    Some(envelope.iter().map(|&v| (v as f64 - mean) / std).collect())
}

fn l2(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// Lag in frames maximising `Σ base[n] · overlay[n - L]`, with the peak value.
///
/// Lags run from `-(overlay.len() - 1)` to `overlay.len() - 1` (and never past
/// the end of the base), so the offset stays within the overlay's duration.
/// Ties go to the earliest lag.
fn peak_lag(base: &[f64], overlay: &[f64]) -> (i64, f64) {
    let n = base.len();
    let m = overlay.len();
    let fft_len = (n + m - 1).next_power_of_two();

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(fft_len);
    let ifft = planner.plan_fft_inverse(fft_len);

    let pad = |values: &[f64]| {
        let mut buf: Vec<Complex<f64>> = values.iter().map(|&v| Complex::new(v, 0.0)).collect();
        buf.resize(fft_len, Complex::new(0.0, 0.0));
        buf
    };
    let mut base_fft = pad(base);
    let mut overlay_fft = pad(overlay);
    fft.process(&mut base_fft);
    fft.process(&mut overlay_fft);

    let mut product: Vec<Complex<f64>> = base_fft
        .iter()
        .zip(overlay_fft.iter())
        .map(|(b, o)| b * o.conj())
        .collect();
    ifft.process(&mut product);

    // Index k holds lag k; negative lags wrap to the end of the buffer
    let scale = 1.0 / fft_len as f64;
    let value_at = |lag: i64| {
        let idx = if lag >= 0 {
            lag as usize
        } else {
            (fft_len as i64 + lag) as usize
        };
        product[idx].re * scale
    };

    let mut best = (0i64, f64::NEG_INFINITY);
    let max_lag = (n as i64 - 1).min(m as i64 - 1);
    for lag in -(m as i64 - 1)..=max_lag {
        let value = value_at(lag);
        if value > best.1 {
            best = (lag, value);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{EnergyFluxAnalyzer, MockEnvelopeAnalyzer};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use sfc_models::AlignmentMethod;

    fn engine_with(analyzer: impl EnvelopeAnalyzer + 'static) -> AlignmentEngine {
        AlignmentEngine::new(Arc::new(analyzer), AlignmentConfig::default())
    }

    fn random_envelope(rng: &mut StdRng, len: usize) -> Vec<f32> {
        (0..len).map(|_| rng.random::<f32>()).collect()
    }

    fn direct_correlation(base: &[f64], overlay: &[f64], lag: i64) -> f64 {
        (0..base.len() as i64)
            .filter_map(|n| {
                let j = n - lag;
                (j >= 0 && (j as usize) < overlay.len())
                    .then(|| base[n as usize] * overlay[j as usize])
            })
            .sum()
    }

    #[test]
    fn test_peak_lag_matches_direct_sum() {
        let base = [1.0, -2.0, 3.0, 0.5, -1.0];
        let overlay = [0.5, 2.0, -1.0];

        let (lag, peak) = peak_lag(&base, &overlay);
        let mut best = (0, f64::NEG_INFINITY);
        for l in -2..=2 {
            let v = direct_correlation(&base, &overlay, l);
            if v > best.1 {
                best = (l, v);
            }
        }
        assert_eq!(lag, best.0);
        assert!((peak - best.1).abs() < 1e-9);
    }

    #[test]
    fn test_recovers_delay() {
        let mut rng = StdRng::seed_from_u64(7);
        let base = random_envelope(&mut rng, 3000);
        // Overlay starts 2.0 s into the base: 2.0 * 48000 / 512 = 187.5 frames
        let overlay: Vec<f32> = base[188..2188].to_vec();

        let result = engine_with(EnergyFluxAnalyzer).align_envelopes(&base, &overlay);
        assert_eq!(result.method, AlignmentMethod::CrossCorrelation);
        assert!((result.offset_seconds - 2.0).abs() < 0.05, "{:?}", result);
        assert!(result.confidence > 0.5);
    }

    #[test]
    fn test_recovers_advance() {
        let mut rng = StdRng::seed_from_u64(11);
        let base = random_envelope(&mut rng, 2000);
        // Overlay has 1.0 s (~94 frames) of extra material before the base starts
        let mut overlay = random_envelope(&mut rng, 94);
        overlay.extend_from_slice(&base[..1500]);

        let result = engine_with(EnergyFluxAnalyzer).align_envelopes(&base, &overlay);
        assert_eq!(result.method, AlignmentMethod::CrossCorrelation);
        assert!((result.offset_seconds + 1.0).abs() < 0.05, "{:?}", result);
    }

    #[test]
    fn test_uncorrelated_falls_back() {
        let mut rng = StdRng::seed_from_u64(3);
        let base = random_envelope(&mut rng, 3000);
        let overlay = random_envelope(&mut rng, 3000);

        let result = engine_with(EnergyFluxAnalyzer).align_envelopes(&base, &overlay);
        assert_eq!(result.method, AlignmentMethod::FallbackZero);
        assert_eq!(result.offset_seconds, 0.0);
        assert!(result.confidence < 0.15);
    }

    #[test]
    fn test_flat_envelope_falls_back_with_zero_confidence() {
        let result =
            engine_with(EnergyFluxAnalyzer).align_envelopes(&[1.0; 100], &[0.2, 0.9, 0.1]);
        assert!(result.is_fallback());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_silent_audio_is_fatal() {
        let engine = engine_with(EnergyFluxAnalyzer);
        let result = engine.align_samples(&vec![0.0; 48_000], &vec![0.3; 48_000]);
        assert!(matches!(result, Err(MediaError::EmptyAudio(_))));
    }

    #[test]
    fn test_samples_go_through_analyzer() {
        let mut analyzer = MockEnvelopeAnalyzer::new();
        analyzer
            .expect_onset_envelope()
            .withf(|_, sr, hop| *sr == 48_000 && *hop == 512)
            .times(2)
            .returning(|samples, _, _| samples.iter().map(|s| s.abs()).collect());

        let mut rng = StdRng::seed_from_u64(5);
        let pcm: Vec<f32> = (0..4000).map(|_| rng.random_range(-1.0..1.0)).collect();

        let result = engine_with(analyzer).align_samples(&pcm, &pcm).unwrap();
        assert_eq!(result.offset_seconds, 0.0);
        assert!((result.confidence - 1.0).abs() < 1e-6);
    }
}
