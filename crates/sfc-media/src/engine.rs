//! Media capability boundary.
//!
//! Everything that touches encoded media goes through [`MediaEngine`]. The
//! production implementation shells out to FFmpeg; tests substitute an
//! in-memory fake.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use sfc_models::{CaptionConfig, ExportTarget, MediaAsset, Resolution};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::filters;
use crate::probe;

/// Sample rate of every intermediate WAV.
pub const INTERMEDIATE_SAMPLE_RATE: u32 = 48_000;

/// Offsets smaller than this are applied as no shift.
pub const SHIFT_EPSILON_SECONDS: f64 = 0.001;

/// How an audio track is moved on the timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeShift {
    None,
    /// Prepend this many seconds of silence.
    Delay(f64),
    /// Drop this many seconds from the head.
    Trim(f64),
}

impl TimeShift {
    /// Positive offsets delay the track, negative offsets trim its head.
    pub fn from_offset(offset_seconds: f64) -> Self {
        if !offset_seconds.is_finite() || offset_seconds.abs() < SHIFT_EPSILON_SECONDS {
            TimeShift::None
        } else if offset_seconds > 0.0 {
            TimeShift::Delay(offset_seconds)
        } else {
            TimeShift::Trim(-offset_seconds)
        }
    }
}

/// Audio preparation applied while transcoding to WAV.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioTranscode {
    /// Integrated loudness target in LUFS, if normalising.
    pub loudness: Option<f64>,
    pub shift: TimeShift,
}

impl AudioTranscode {
    pub fn plain() -> Self {
        Self {
            loudness: None,
            shift: TimeShift::None,
        }
    }

    /// `-af` chain, or `None` when the audio passes through untouched.
    pub fn filter_chain(&self) -> Option<String> {
        let mut chain = Vec::new();
        if let Some(lufs) = self.loudness {
            chain.push(filters::loudnorm_filter(lufs));
        }
        if let TimeShift::Delay(seconds) = self.shift {
            chain.push(filters::delay_filter(seconds));
        }
        (!chain.is_empty()).then(|| chain.join(","))
    }
}

/// Where and how the overlay is drawn on the base picture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayPlacement {
    pub x: i64,
    pub y: i64,
    pub opacity: f64,
}

/// Captions to burn into a render.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionBurn {
    pub srt_path: PathBuf,
    pub style: CaptionConfig,
}

/// One export render: reframe a cut to the target ratio and encode it.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPlan {
    /// Picture size of the input cut
    pub source: Resolution,
    pub target: ExportTarget,
    pub captions: Option<CaptionBurn>,
}

impl RenderPlan {
    pub fn video_filter(&self) -> String {
        let mut vf = filters::fill_filter(self.source, self.target.ratio.dimensions());
        if let Some(ref burn) = self.captions {
            vf.push(',');
            vf.push_str(&filters::subtitles_filter(&burn.srt_path, &burn.style));
        }
        vf
    }
}

/// Media operations the pipeline depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Inspect a file without validating it for any purpose.
    async fn probe(&self, path: &Path) -> MediaResult<MediaAsset>;

    /// Keyframe timestamps of the first video stream, ascending.
    async fn keyframes(&self, path: &Path) -> MediaResult<Vec<f64>>;

    /// Decode the first audio stream to mono f32 at `sample_rate`.
    async fn extract_pcm(&self, path: &Path, sample_rate: u32) -> MediaResult<Vec<f32>>;

    /// Re-encode audio to 48 kHz PCM WAV, optionally normalised and shifted.
    async fn transcode_audio(
        &self,
        input: &Path,
        output: &Path,
        spec: &AudioTranscode,
    ) -> MediaResult<()>;

    /// Keep the video of `video`, take all audio from `audio`.
    async fn replace_audio(&self, video: &Path, audio: &Path, output: &Path) -> MediaResult<()>;

    /// Draw `overlay` over `base`, keeping the base audio.
    async fn composite(
        &self,
        base: &Path,
        overlay: &Path,
        placement: &OverlayPlacement,
        output: &Path,
    ) -> MediaResult<()>;

    /// Whether [`composite`](Self::composite) can synthesise an alpha plane
    /// for overlays that have none.
    fn can_inject_alpha(&self) -> bool;

    /// Stream-copy `[start, end)` of `input`.
    async fn cut(&self, input: &Path, start: f64, end: f64, output: &Path) -> MediaResult<()>;

    /// Reframe and encode `input` per `plan`.
    async fn render(&self, input: &Path, plan: &RenderPlan, output: &Path) -> MediaResult<()>;
}

/// [`MediaEngine`] backed by the `ffmpeg` and `ffprobe` binaries.
#[derive(Debug, Clone, Default)]
pub struct FfmpegEngine {
    runner: FfmpegRunner,
}

impl FfmpegEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a runner carrying a timeout and/or cancellation signal.
    pub fn with_runner(runner: FfmpegRunner) -> Self {
        Self { runner }
    }

    async fn run(&self, cmd: &FfmpegCommand, label: &'static str, total_seconds: f64) -> MediaResult<()> {
        let output = cmd.output_path().display().to_string();
        self.runner
            .run_with_progress(cmd, move |progress| {
                debug!(
                    operation = label,
                    output = %output,
                    fraction = progress.fraction_of(total_seconds),
                    speed = progress.speed,
                    "FFmpeg progress"
                );
            })
            .await
    }
}

#[async_trait]
impl MediaEngine for FfmpegEngine {
    async fn probe(&self, path: &Path) -> MediaResult<MediaAsset> {
        probe::probe_media(path).await
    }

    async fn keyframes(&self, path: &Path) -> MediaResult<Vec<f64>> {
        probe::probe_keyframes(path).await
    }

    async fn extract_pcm(&self, path: &Path, sample_rate: u32) -> MediaResult<Vec<f32>> {
        let scratch = tempfile::Builder::new()
            .prefix("sfc-pcm-")
            .suffix(".f32")
            .tempfile()?;

        let cmd = FfmpegCommand::new(path, scratch.path())
            .no_video()
            .audio_format(sample_rate, 1)
            .output_args(["-f", "f32le"]);
        self.run(&cmd, "extract_pcm", 0.0).await?;

        let bytes = tokio::fs::read(scratch.path()).await?;
        let samples: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        debug!(
            path = %path.display(),
            samples = samples.len(),
            sample_rate,
            "Decoded PCM"
        );
        Ok(samples)
    }

    async fn transcode_audio(
        &self,
        input: &Path,
        output: &Path,
        spec: &AudioTranscode,
    ) -> MediaResult<()> {
        let mut cmd = FfmpegCommand::new(input, output);
        if let TimeShift::Trim(seconds) = spec.shift {
            cmd = cmd.seek(seconds);
        }
        if let Some(chain) = spec.filter_chain() {
            cmd = cmd.audio_filter(chain);
        }
        let cmd = cmd
            .no_video()
            .audio_codec("pcm_s16le")
            .output_args(["-ar".to_string(), INTERMEDIATE_SAMPLE_RATE.to_string()]);

        info!(
            input = %input.display(),
            shift = ?spec.shift,
            loudness = ?spec.loudness,
            "Transcoding audio"
        );
        self.run(&cmd, "transcode_audio", 0.0).await
    }

    async fn replace_audio(&self, video: &Path, audio: &Path, output: &Path) -> MediaResult<()> {
        let cmd = FfmpegCommand::new(video, output)
            .add_input(audio)
            .map("0:v:0")
            .map("1:a:0")
            .video_codec("copy")
            .audio_codec(sfc_models::export::DEFAULT_AUDIO_CODEC)
            .audio_bitrate(sfc_models::export::DEFAULT_AUDIO_BITRATE)
            .shortest();
        self.run(&cmd, "replace_audio", 0.0).await
    }

    async fn composite(
        &self,
        base: &Path,
        overlay: &Path,
        placement: &OverlayPlacement,
        output: &Path,
    ) -> MediaResult<()> {
        let graph = filters::overlay_filter_complex(placement.x, placement.y, placement.opacity);
        let cmd = FfmpegCommand::new(base, output)
            .add_input(overlay)
            .filter_complex(graph)
            .map("[v]")
            .map("0:a?")
            .video_codec(sfc_models::export::DEFAULT_VIDEO_CODEC)
            .preset(sfc_models::export::DEFAULT_PRESET)
            .crf(sfc_models::export::DEFAULT_CRF)
            .output_args(["-pix_fmt", "yuv420p", "-movflags", "+faststart"])
            .audio_codec("copy");
        self.run(&cmd, "composite", 0.0).await
    }

    fn can_inject_alpha(&self) -> bool {
        // format=rgba in the overlay graph adds an opaque alpha plane
        true
    }

    async fn cut(&self, input: &Path, start: f64, end: f64, output: &Path) -> MediaResult<()> {
        if !(start >= 0.0 && end > start) {
            return Err(MediaError::InvalidSegment(format!(
                "[{:.3}, {:.3})",
                start, end
            )));
        }
        let cmd = FfmpegCommand::new(input, output)
            .seek(start)
            .duration(end - start)
            .codec_copy()
            .output_args(["-avoid_negative_ts", "make_zero"]);
        self.run(&cmd, "cut", end - start).await
    }

    async fn render(&self, input: &Path, plan: &RenderPlan, output: &Path) -> MediaResult<()> {
        let cmd = FfmpegCommand::new(input, output)
            .video_filter(plan.video_filter())
            .output_args(plan.target.quality.to_ffmpeg_args());
        self.run(&cmd, "render", 0.0).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfc_models::{AspectRatio, QualityProfile};

    #[test]
    fn test_time_shift_from_offset() {
        assert_eq!(TimeShift::from_offset(2.0), TimeShift::Delay(2.0));
        assert_eq!(TimeShift::from_offset(-1.5), TimeShift::Trim(1.5));
        assert_eq!(TimeShift::from_offset(0.0004), TimeShift::None);
        assert_eq!(TimeShift::from_offset(-0.0009), TimeShift::None);
        assert_eq!(TimeShift::from_offset(f64::NAN), TimeShift::None);
    }

    #[test]
    fn test_audio_filter_chain() {
        assert_eq!(AudioTranscode::plain().filter_chain(), None);

        let spec = AudioTranscode {
            loudness: Some(-14.0),
            shift: TimeShift::Delay(1.25),
        };
        assert_eq!(
            spec.filter_chain().as_deref(),
            Some("loudnorm=I=-14.0:TP=-1.5:LRA=11,adelay=1250:all=1")
        );

        // Trims are applied as an input seek, not a filter
        let trim = AudioTranscode {
            loudness: None,
            shift: TimeShift::Trim(3.0),
        };
        assert_eq!(trim.filter_chain(), None);
    }

    #[test]
    fn test_render_plan_filter() {
        let plan = RenderPlan {
            source: Resolution::new(1920, 1080),
            target: ExportTarget::new(AspectRatio::Square, QualityProfile::social()),
            captions: Some(CaptionBurn {
                srt_path: PathBuf::from("/work/c.srt"),
                style: CaptionConfig::default(),
            }),
        };
        let vf = plan.video_filter();
        assert!(vf.starts_with("scale=-2:1080,crop=1080:1080,setsar=1,subtitles="));
    }

    #[tokio::test]
    async fn test_cut_rejects_empty_range() {
        let engine = FfmpegEngine::new();
        let result = engine
            .cut(Path::new("in.mp4"), 5.0, 5.0, Path::new("out.mp4"))
            .await;
        assert!(matches!(result, Err(MediaError::InvalidSegment(_))));
    }
}
