//! Onset-strength envelopes.
//!
//! An envelope has one value per hop of `hop` samples; frame `i` describes the
//! audio around `i * hop / sample_rate` seconds. Values are non-negative and
//! large where the signal changes abruptly.

use std::f32::consts::PI;

use rustfft::{num_complex::Complex, FftPlanner};

/// Turns a mono PCM buffer into an onset envelope.
#[cfg_attr(test, mockall::automock)]
pub trait EnvelopeAnalyzer: Send + Sync {
    fn onset_envelope(&self, samples: &[f32], sample_rate: u32, hop: usize) -> Vec<f32>;
}

/// Spectral flux over a Hann-windowed STFT.
///
/// Frames are centred (the signal is zero-padded by half a window at both
/// ends) so frame `i` is centred on sample `i * hop`. Magnitudes are
/// log-compressed before differencing; only increases count.
#[derive(Debug, Clone)]
pub struct SpectralFluxAnalyzer {
    n_fft: usize,
}

impl SpectralFluxAnalyzer {
    pub const DEFAULT_N_FFT: usize = 2048;

    pub fn new() -> Self {
        Self::with_window(Self::DEFAULT_N_FFT)
    }

    pub fn with_window(n_fft: usize) -> Self {
        Self { n_fft: n_fft.max(16) }
    }

    fn hann_window(&self) -> Vec<f32> {
        let n = self.n_fft as f32;
        (0..self.n_fft)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n).cos()))
            .collect()
    }
}

impl Default for SpectralFluxAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeAnalyzer for SpectralFluxAnalyzer {
    fn onset_envelope(&self, samples: &[f32], _sample_rate: u32, hop: usize) -> Vec<f32> {
        if samples.is_empty() || hop == 0 {
            return Vec::new();
        }

        let half = self.n_fft / 2;
        let num_frames = 1 + samples.len() / hop;
        let num_bins = half + 1;
        let window = self.hann_window();

        let mut padded = vec![0.0f32; samples.len() + self.n_fft];
        padded[half..half + samples.len()].copy_from_slice(samples);

        let fft = FftPlanner::<f32>::new().plan_fft_forward(self.n_fft);
        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.n_fft];
        let mut previous = vec![0.0f32; num_bins];
        let mut current = vec![0.0f32; num_bins];
        let mut envelope = Vec::with_capacity(num_frames);

        for frame in 0..num_frames {
            let start = frame * hop;
            for (slot, (&s, &w)) in buffer
                .iter_mut()
                .zip(padded[start..start + self.n_fft].iter().zip(window.iter()))
            {
                *slot = Complex::new(s * w, 0.0);
            }
            fft.process(&mut buffer);

            for (bin, value) in current.iter_mut().enumerate() {
                *value = buffer[bin].norm().ln_1p();
            }

            let flux = if frame == 0 {
                0.0
            } else {
                current
                    .iter()
                    .zip(previous.iter())
                    .map(|(c, p)| (c - p).max(0.0))
                    .sum::<f32>()
            };
            envelope.push(flux);
            std::mem::swap(&mut previous, &mut current);
        }

        envelope
    }
}

/// Rectified first difference of per-hop RMS energy.
///
/// Much cheaper than [`SpectralFluxAnalyzer`]; good enough for material with
/// clear transients.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnergyFluxAnalyzer;

impl EnvelopeAnalyzer for EnergyFluxAnalyzer {
    fn onset_envelope(&self, samples: &[f32], _sample_rate: u32, hop: usize) -> Vec<f32> {
        if samples.is_empty() || hop == 0 {
            return Vec::new();
        }

        let rms: Vec<f32> = samples
            .chunks(hop)
            .map(|chunk| (chunk.iter().map(|s| s * s).sum::<f32>() / chunk.len() as f32).sqrt())
            .collect();

        let mut envelope = Vec::with_capacity(rms.len());
        envelope.push(0.0);
        envelope.extend(rms.windows(2).map(|w| (w[1] - w[0]).max(0.0)));
        envelope
    }
}

/// Root-mean-square level of a PCM buffer.
pub fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clicks(len: usize, at: &[usize]) -> Vec<f32> {
        let mut samples = vec![0.0f32; len];
        for &pos in at {
            for s in samples.iter_mut().skip(pos).take(64) {
                *s = 0.8;
            }
        }
        samples
    }

    #[test]
    fn test_spectral_flux_frame_count() {
        let analyzer = SpectralFluxAnalyzer::with_window(256);
        let envelope = analyzer.onset_envelope(&vec![0.1; 1000], 8000, 100);
        assert_eq!(envelope.len(), 11);
        assert!(envelope.iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn test_spectral_flux_peaks_at_onset() {
        let analyzer = SpectralFluxAnalyzer::with_window(256);
        let samples = clicks(8000, &[4000]);
        let envelope = analyzer.onset_envelope(&samples, 8000, 128);

        let peak = envelope
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        // 4000 / 128 = 31.25; the rise shows up within a window of the click
        assert!((29..=33).contains(&peak), "peak at frame {}", peak);
    }

    #[test]
    fn test_energy_flux_is_rectified() {
        let samples = clicks(1024, &[512]);
        let envelope = EnergyFluxAnalyzer.onset_envelope(&samples, 8000, 128);

        assert_eq!(envelope.len(), 8);
        assert!(envelope[4] > 0.0);
        // Energy drop after the click is not an onset
        assert_eq!(envelope[5], 0.0);
    }

    #[test]
    fn test_empty_input() {
        assert!(SpectralFluxAnalyzer::new().onset_envelope(&[], 48_000, 512).is_empty());
        assert!(EnergyFluxAnalyzer.onset_envelope(&[0.5], 48_000, 0).is_empty());
    }

    #[test]
    fn test_rms() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-9);
    }
}
