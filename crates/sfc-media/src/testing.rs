//! In-memory [`MediaEngine`] for tests.
//!
//! Assets and PCM are registered up front; every operation records a
//! [`Call`], writes a small placeholder file and registers the derived asset
//! so later stages can probe it.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use sfc_models::MediaAsset;

use crate::engine::{
    AudioTranscode, MediaEngine, OverlayPlacement, RenderPlan, TimeShift,
    INTERMEDIATE_SAMPLE_RATE,
};
use crate::error::{MediaError, MediaResult};

/// One recorded engine invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    TranscodeAudio {
        input: PathBuf,
        output: PathBuf,
        shift: TimeShift,
        loudness: Option<f64>,
    },
    ReplaceAudio {
        video: PathBuf,
        audio: PathBuf,
        output: PathBuf,
    },
    Composite {
        base: PathBuf,
        overlay: PathBuf,
        placement: OverlayPlacement,
        output: PathBuf,
    },
    Cut {
        start: f64,
        end: f64,
        output: PathBuf,
    },
    Render {
        target: String,
        captions: bool,
        output: PathBuf,
    },
}

#[derive(Debug, Default)]
pub struct FakeEngine {
    assets: Mutex<HashMap<PathBuf, MediaAsset>>,
    pcm: Mutex<HashMap<PathBuf, Vec<f32>>>,
    keyframes: Mutex<Vec<f64>>,
    failing_targets: HashSet<String>,
    flaky_targets: Mutex<HashMap<String, u32>>,
    no_alpha_injection: bool,
    composite_fails: bool,
    probe_panics: bool,
    render_delay: Option<Duration>,
    calls: Mutex<Vec<Call>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every render for the target label (e.g. `9:16/archive`) fails.
    pub fn failing_target(mut self, label: impl Into<String>) -> Self {
        self.failing_targets.insert(label.into());
        self
    }

    /// The first `failures` renders for the target label fail.
    pub fn flaky_target(self, label: impl Into<String>, failures: u32) -> Self {
        lock(&self.flaky_targets).insert(label.into(), failures);
        self
    }

    pub fn without_alpha_injection(mut self) -> Self {
        self.no_alpha_injection = true;
        self
    }

    pub fn failing_composite(mut self) -> Self {
        self.composite_fails = true;
        self
    }

    /// `probe` panics, like a worker task crashing mid-job.
    pub fn panicking_probe(mut self) -> Self {
        self.probe_panics = true;
        self
    }

    pub fn with_render_delay(mut self, delay: Duration) -> Self {
        self.render_delay = Some(delay);
        self
    }

    pub fn with_keyframes(self, keyframes: Vec<f64>) -> Self {
        *lock(&self.keyframes) = keyframes;
        self
    }

    pub fn register(&self, asset: MediaAsset) {
        lock(&self.assets).insert(asset.path.clone(), asset);
    }

    /// Mono PCM at [`INTERMEDIATE_SAMPLE_RATE`] for `path`.
    pub fn register_pcm(&self, path: impl Into<PathBuf>, samples: Vec<f32>) {
        lock(&self.pcm).insert(path.into(), samples);
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    pub fn renders(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Render { .. }))
            .collect()
    }

    fn record(&self, call: Call) {
        lock(&self.calls).push(call);
    }

    fn asset(&self, path: &Path) -> MediaResult<MediaAsset> {
        lock(&self.assets)
            .get(path)
            .cloned()
            .ok_or_else(|| MediaError::FileNotFound(path.to_path_buf()))
    }

    fn derive(&self, from: &Path, to: &Path, edit: impl FnOnce(&mut MediaAsset)) -> MediaResult<()> {
        let mut asset = self.asset(from)?;
        asset.path = to.to_path_buf();
        edit(&mut asset);
        self.register(asset);
        Ok(())
    }

    fn pcm_of(&self, path: &Path) -> Option<Vec<f32>> {
        lock(&self.pcm).get(path).cloned()
    }

    async fn touch(path: &Path, contents: &str) -> MediaResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await?;
        Ok(())
    }

    fn should_fail_render(&self, label: &str) -> bool {
        if self.failing_targets.contains(label) {
            return true;
        }
        let mut flaky = lock(&self.flaky_targets);
        match flaky.get_mut(label) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

fn seconds_to_samples(seconds: f64) -> usize {
    (seconds * INTERMEDIATE_SAMPLE_RATE as f64).round().max(0.0) as usize
}

#[async_trait]
impl MediaEngine for FakeEngine {
    async fn probe(&self, path: &Path) -> MediaResult<MediaAsset> {
        if self.probe_panics {
            panic!("probe crashed on {}", path.display());
        }
        if let Ok(asset) = self.asset(path) {
            return Ok(asset);
        }
        if path.exists() {
            return Err(MediaError::FfprobeFailed {
                message: format!("unrecognised file {}", path.display()),
                stderr: Some("Invalid data found when processing input".to_string()),
            });
        }
        Err(MediaError::FileNotFound(path.to_path_buf()))
    }

    async fn keyframes(&self, _path: &Path) -> MediaResult<Vec<f64>> {
        Ok(lock(&self.keyframes).clone())
    }

    async fn extract_pcm(&self, path: &Path, _sample_rate: u32) -> MediaResult<Vec<f32>> {
        self.pcm_of(path)
            .ok_or_else(|| MediaError::ffmpeg_failed("no audio stream", None, Some(1)))
    }

    async fn transcode_audio(
        &self,
        input: &Path,
        output: &Path,
        spec: &AudioTranscode,
    ) -> MediaResult<()> {
        self.record(Call::TranscodeAudio {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            shift: spec.shift,
            loudness: spec.loudness,
        });

        let (pad, trim) = match spec.shift {
            TimeShift::None => (0.0, 0.0),
            TimeShift::Delay(s) => (s, 0.0),
            TimeShift::Trim(s) => (0.0, s),
        };
        self.derive(input, output, |a| {
            a.duration = (a.duration + pad - trim).max(0.0);
            a.resolution = None;
            a.frame_rate = None;
        })?;
        if let Some(samples) = self.pcm_of(input) {
            let mut shifted = vec![0.0f32; seconds_to_samples(pad)];
            shifted.extend(samples.into_iter().skip(seconds_to_samples(trim)));
            self.register_pcm(output, shifted);
        }
        Self::touch(output, "wav").await
    }

    async fn replace_audio(&self, video: &Path, audio: &Path, output: &Path) -> MediaResult<()> {
        self.record(Call::ReplaceAudio {
            video: video.to_path_buf(),
            audio: audio.to_path_buf(),
            output: output.to_path_buf(),
        });

        let audio_asset = self.asset(audio)?;
        self.derive(video, output, |a| {
            a.duration = a.duration.min(audio_asset.duration);
            a.sample_rate = audio_asset.sample_rate;
            a.channels = audio_asset.channels;
        })?;
        if let Some(mut samples) = self.pcm_of(audio) {
            let duration = self.asset(output)?.duration;
            samples.truncate(seconds_to_samples(duration));
            self.register_pcm(output, samples);
        }
        Self::touch(output, "muxed").await
    }

    async fn composite(
        &self,
        base: &Path,
        overlay: &Path,
        placement: &OverlayPlacement,
        output: &Path,
    ) -> MediaResult<()> {
        self.record(Call::Composite {
            base: base.to_path_buf(),
            overlay: overlay.to_path_buf(),
            placement: *placement,
            output: output.to_path_buf(),
        });
        if self.composite_fails {
            return Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                Some("Invalid pixel format".to_string()),
                Some(1),
            ));
        }

        self.derive(base, output, |_| {})?;
        if let Some(samples) = self.pcm_of(base) {
            self.register_pcm(output, samples);
        }
        Self::touch(output, "master").await
    }

    fn can_inject_alpha(&self) -> bool {
        !self.no_alpha_injection
    }

    async fn cut(&self, _input: &Path, start: f64, end: f64, output: &Path) -> MediaResult<()> {
        self.record(Call::Cut {
            start,
            end,
            output: output.to_path_buf(),
        });
        Self::touch(output, &format!("cut {:.3}-{:.3}", start, end)).await
    }

    async fn render(&self, _input: &Path, plan: &RenderPlan, output: &Path) -> MediaResult<()> {
        let label = plan.target.label();
        self.record(Call::Render {
            target: label.clone(),
            captions: plan.captions.is_some(),
            output: output.to_path_buf(),
        });

        if let Some(delay) = self.render_delay {
            tokio::time::sleep(delay).await;
        }
        if self.should_fail_render(&label) {
            // Leave a truncated file behind like a crashed encoder would
            Self::touch(output, "truncated").await?;
            return Err(MediaError::ffmpeg_failed(
                format!("encoder failed for {}", label),
                None,
                Some(1),
            ));
        }
        Self::touch(output, &format!("rendered {}", label)).await
    }
}
