//! Probed media assets.

use std::fmt;
use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Pixel dimensions of a video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width divided by height. Zero-height resolutions report 0.
    pub fn aspect(&self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f64 / self.height as f64
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Kind of elementary stream an input is required to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pixel formats that carry an alpha plane.
const ALPHA_PIXEL_FORMATS: &[&str] = &[
    "rgba", "bgra", "argb", "abgr", "ya8", "ya16", "gbrap", "pal8",
];

/// An inspected input or intermediate file.
///
/// Created once by the probe and never mutated afterwards. Stream-specific
/// fields are `None` when the file has no stream of that kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MediaAsset {
    /// File location
    pub path: PathBuf,
    /// Container duration in seconds
    pub duration: f64,
    /// Audio sample rate in Hz
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    /// Audio channel count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u32>,
    /// Video frame rate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<f64>,
    /// Video resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
    /// Video pixel format (e.g. "yuv420p", "yuva420p")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pixel_format: Option<String>,
    /// File size in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

impl MediaAsset {
    /// Asset with only a path and duration; stream fields unset.
    pub fn new(path: impl Into<PathBuf>, duration: f64) -> Self {
        Self {
            path: path.into(),
            duration,
            sample_rate: None,
            channels: None,
            frame_rate: None,
            resolution: None,
            video_codec: None,
            audio_codec: None,
            pixel_format: None,
            size_bytes: None,
        }
    }

    /// Attach video stream properties.
    pub fn with_video(mut self, resolution: Resolution, frame_rate: f64) -> Self {
        self.resolution = Some(resolution);
        self.frame_rate = Some(frame_rate);
        self
    }

    /// Attach audio stream properties.
    pub fn with_audio(mut self, sample_rate: u32, channels: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self.channels = Some(channels);
        self
    }

    pub fn with_pixel_format(mut self, pixel_format: impl Into<String>) -> Self {
        self.pixel_format = Some(pixel_format.into());
        self
    }

    pub fn has_video(&self) -> bool {
        self.resolution.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.sample_rate.is_some()
    }

    /// Whether the asset carries a stream of the given kind.
    pub fn has_stream(&self, kind: StreamKind) -> bool {
        match kind {
            StreamKind::Video => self.has_video(),
            StreamKind::Audio => self.has_audio(),
        }
    }

    /// Whether the video stream's pixel format has an alpha plane.
    pub fn has_alpha(&self) -> bool {
        match self.pixel_format.as_deref() {
            Some(fmt) => {
                let fmt = fmt.to_ascii_lowercase();
                fmt.starts_with("yuva") || ALPHA_PIXEL_FORMATS.iter().any(|a| fmt.starts_with(a))
            }
            None => false,
        }
    }

    /// File name for logs.
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_presence() {
        let video = MediaAsset::new("base.mp4", 120.0)
            .with_video(Resolution::new(1920, 1080), 30.0)
            .with_audio(48_000, 2);
        assert!(video.has_stream(StreamKind::Video));
        assert!(video.has_stream(StreamKind::Audio));

        let audio = MediaAsset::new("voice.wav", 60.0).with_audio(44_100, 1);
        assert!(!audio.has_stream(StreamKind::Video));
    }

    #[test]
    fn test_alpha_detection() {
        let asset = MediaAsset::new("cam.mov", 10.0).with_pixel_format("yuva444p10le");
        assert!(asset.has_alpha());

        let asset = MediaAsset::new("cam.mp4", 10.0).with_pixel_format("yuv420p");
        assert!(!asset.has_alpha());

        assert!(!MediaAsset::new("cam.mp4", 10.0).has_alpha());
    }

    #[test]
    fn test_resolution_aspect() {
        assert!((Resolution::new(1920, 1080).aspect() - 16.0 / 9.0).abs() < 1e-9);
        assert_eq!(Resolution::new(10, 0).aspect(), 0.0);
        assert_eq!(Resolution::new(1080, 1920).to_string(), "1080x1920");
    }
}
