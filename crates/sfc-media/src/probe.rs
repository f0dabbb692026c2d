//! Media inspection.
//!
//! [`probe_media`] and [`probe_keyframes`] wrap `ffprobe`. [`MediaProbe`] adds
//! the usability checks a job needs before any processing starts.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use sfc_models::{MediaAsset, Resolution, StreamKind};

use crate::command::check_ffprobe;
use crate::engine::MediaEngine;
use crate::error::{MediaError, MediaResult};

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pix_fmt: Option<String>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u32>,
    duration: Option<String>,
    #[serde(default)]
    disposition: FfprobeDisposition,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeDisposition {
    #[serde(default)]
    attached_pic: u8,
}

#[derive(Debug, Deserialize)]
struct FfprobePackets {
    #[serde(default)]
    packets: Vec<FfprobePacket>,
}

#[derive(Debug, Deserialize)]
struct FfprobePacket {
    pts_time: Option<String>,
    flags: Option<String>,
}

async fn run_ffprobe(args: &[&str], path: &Path) -> MediaResult<Vec<u8>> {
    check_ffprobe()?;

    let output = Command::new("ffprobe")
        .args(args)
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("FFprobe failed on {}", path.display()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    Ok(output.stdout)
}

/// Probe a media file with ffprobe.
pub async fn probe_media(path: impl AsRef<Path>) -> MediaResult<MediaAsset> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let stdout = run_ffprobe(
        &[
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ],
        path,
    )
    .await?;

    parse_probe_output(path, &stdout)
}

/// Build a [`MediaAsset`] from ffprobe's JSON.
fn parse_probe_output(path: &Path, stdout: &[u8]) -> MediaResult<MediaAsset> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    // Cover art shows up as a video stream; it is not real video
    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video" && s.disposition.attached_pic == 0);
    let audio = probe.streams.iter().find(|s| s.codec_type == "audio");

    let stream_duration = || {
        video
            .or(audio)
            .and_then(|s| s.duration.as_ref())
            .and_then(|d| d.parse::<f64>().ok())
    };
    let duration = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_ref())
        .and_then(|d| d.parse::<f64>().ok())
        .or_else(stream_duration)
        .unwrap_or(0.0);

    let mut asset = MediaAsset::new(path, duration);
    asset.size_bytes = probe
        .format
        .as_ref()
        .and_then(|f| f.size.as_ref())
        .and_then(|s| s.parse().ok());

    if let Some(v) = video {
        if let (Some(width), Some(height)) = (v.width, v.height) {
            let fps = v
                .avg_frame_rate
                .as_deref()
                .and_then(parse_frame_rate)
                .or_else(|| v.r_frame_rate.as_deref().and_then(parse_frame_rate))
                .unwrap_or(30.0);
            asset = asset.with_video(Resolution::new(width, height), fps);
            asset.video_codec = v.codec_name.clone();
            asset.pixel_format = v.pix_fmt.clone();
        }
    }

    if let Some(a) = audio {
        let sample_rate = a
            .sample_rate
            .as_ref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        if sample_rate > 0 {
            asset = asset.with_audio(sample_rate, a.channels.unwrap_or(1));
            asset.audio_codec = a.codec_name.clone();
        }
    }

    Ok(asset)
}

/// Keyframe timestamps of the first video stream, ascending.
pub async fn probe_keyframes(path: impl AsRef<Path>) -> MediaResult<Vec<f64>> {
    let path = path.as_ref();

    let stdout = run_ffprobe(
        &[
            "-v",
            "quiet",
            "-select_streams",
            "v:0",
            "-show_entries",
            "packet=pts_time,flags",
            "-of",
            "json",
        ],
        path,
    )
    .await?;

    let keyframes = parse_keyframes(&stdout)?;
    debug!(path = %path.display(), count = keyframes.len(), "Probed keyframes");
    Ok(keyframes)
}

fn parse_keyframes(stdout: &[u8]) -> MediaResult<Vec<f64>> {
    let packets: FfprobePackets = serde_json::from_slice(stdout)?;

    let mut times: Vec<f64> = packets
        .packets
        .iter()
        .filter(|p| p.flags.as_deref().is_some_and(|f| f.contains('K')))
        .filter_map(|p| p.pts_time.as_ref()?.parse::<f64>().ok())
        .filter(|t| t.is_finite())
        .collect();

    times.sort_by(|a, b| a.total_cmp(b));
    times.dedup_by(|a, b| (*a - *b).abs() < 1e-6);
    Ok(times)
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 && num > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse().ok().filter(|fps: &f64| *fps > 0.0)
}

/// Validating front end over the engine's probe capability.
#[derive(Clone)]
pub struct MediaProbe {
    engine: Arc<dyn MediaEngine>,
}

impl MediaProbe {
    pub fn new(engine: Arc<dyn MediaEngine>) -> Self {
        Self { engine }
    }

    /// Probe `path` and check it carries a decodable `required` stream.
    ///
    /// Fails with `UnreadableMedia` when the file cannot be opened or has no
    /// usable stream or duration, and with `MissingStream` when it is
    /// readable but lacks the required stream.
    pub async fn probe(&self, path: &Path, required: StreamKind) -> MediaResult<MediaAsset> {
        let asset = match self.engine.probe(path).await {
            Ok(asset) => asset,
            Err(MediaError::FileNotFound(p)) => {
                return Err(MediaError::unreadable(p, "file does not exist"))
            }
            Err(e @ (MediaError::FfprobeFailed { .. } | MediaError::JsonParse(_))) => {
                return Err(MediaError::unreadable(path, e.detail()))
            }
            Err(e) => return Err(e),
        };

        if !asset.has_video() && !asset.has_audio() {
            return Err(MediaError::unreadable(path, "no decodable audio or video stream"));
        }
        if !asset.has_stream(required) {
            return Err(MediaError::missing_stream(path, required));
        }
        if !(asset.duration.is_finite() && asset.duration > 0.0) {
            return Err(MediaError::unreadable(path, "unknown or zero duration"));
        }

        debug!(
            path = %path.display(),
            duration = asset.duration,
            resolution = ?asset.resolution,
            sample_rate = ?asset.sample_rate,
            "Probed media"
        );
        Ok(asset)
    }
}
