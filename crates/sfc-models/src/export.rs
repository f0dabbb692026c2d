//! Export targets: aspect ratios and the quality ladder.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

use crate::Resolution;

/// Default social codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default social preset
pub const DEFAULT_PRESET: &str = "veryfast";
/// Default social CRF
pub const DEFAULT_CRF: u8 = 20;
/// Default audio codec for MP4 outputs
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default audio bitrate for MP4 outputs
pub const DEFAULT_AUDIO_BITRATE: &str = "192k";
/// ProRes 422 HQ
pub const DEFAULT_PRORES_PROFILE: u8 = 3;

/// Output aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
pub enum AspectRatio {
    /// 9:16 vertical (1080x1920)
    #[default]
    #[serde(rename = "9:16")]
    Portrait,
    /// 1:1 square (1080x1080)
    #[serde(rename = "1:1")]
    Square,
    /// 16:9 landscape (1920x1080)
    #[serde(rename = "16:9")]
    Landscape,
}

impl AspectRatio {
    pub const ALL: &'static [AspectRatio] = &[
        AspectRatio::Portrait,
        AspectRatio::Square,
        AspectRatio::Landscape,
    ];

    /// Rendered frame size. The long edge is always 1920 or 1080 for square.
    pub fn dimensions(&self) -> Resolution {
        match self {
            AspectRatio::Portrait => Resolution::new(1080, 1920),
            AspectRatio::Square => Resolution::new(1080, 1080),
            AspectRatio::Landscape => Resolution::new(1920, 1080),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Portrait => "9:16",
            AspectRatio::Square => "1:1",
            AspectRatio::Landscape => "16:9",
        }
    }

    /// Directory label for grouped outputs, e.g. `9x16`.
    pub fn dir_label(&self) -> &'static str {
        match self {
            AspectRatio::Portrait => "9x16",
            AspectRatio::Square => "1x1",
            AspectRatio::Landscape => "16x9",
        }
    }

    /// Width divided by height.
    pub fn as_f64(&self) -> f64 {
        self.dimensions().aspect()
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = AspectRatioParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('x', ":");
        match normalized.as_str() {
            "9:16" | "portrait" | "vertical" => Ok(AspectRatio::Portrait),
            "1:1" | "square" => Ok(AspectRatio::Square),
            "16:9" | "landscape" | "horizontal" => Ok(AspectRatio::Landscape),
            _ if normalized.contains(':') => Err(AspectRatioParseError::Unsupported(s.to_string())),
            _ => Err(AspectRatioParseError::InvalidFormat(s.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AspectRatioParseError {
    #[error("Invalid aspect ratio format: {0}, expected 'W:H'")]
    InvalidFormat(String),
    #[error("Unsupported aspect ratio: {0}, expected 9:16, 1:1 or 16:9")]
    Unsupported(String),
}

/// One rung of the quality ladder.
///
/// Every rung is rendered independently from the same cut; rungs are
/// siblings, not successive passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(deny_unknown_fields)]
pub struct QualityProfile {
    /// Label used in output file names (e.g. "social", "archive")
    #[validate(length(min = 1, max = 32))]
    pub name: String,

    /// Video codec (e.g. "libx264", "prores_ks")
    #[serde(default = "default_video_codec")]
    #[validate(length(min = 1))]
    pub codec: String,

    /// Constant Rate Factor for CRF-based encoders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(max = 63))]
    pub crf: Option<u8>,

    /// Encoder speed preset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,

    /// Encoder profile number (ProRes: 0 proxy .. 5 4444XQ)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<u8>,

    /// Audio codec; defaults per container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,

    /// Audio bitrate for lossy audio codecs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_bitrate: Option<String>,

    /// Additional FFmpeg output arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
}

fn default_video_codec() -> String {
    DEFAULT_VIDEO_CODEC.to_string()
}

impl QualityProfile {
    /// H.264 social-media rung.
    pub fn social() -> Self {
        Self {
            name: "social".to_string(),
            codec: DEFAULT_VIDEO_CODEC.to_string(),
            crf: Some(DEFAULT_CRF),
            preset: Some(DEFAULT_PRESET.to_string()),
            profile: None,
            audio_codec: None,
            audio_bitrate: None,
            extra_args: Vec::new(),
        }
    }

    /// ProRes archive rung.
    pub fn archive() -> Self {
        Self {
            name: "archive".to_string(),
            codec: "prores_ks".to_string(),
            crf: None,
            preset: None,
            profile: Some(DEFAULT_PRORES_PROFILE),
            audio_codec: None,
            audio_bitrate: None,
            extra_args: Vec::new(),
        }
    }

    pub fn is_prores(&self) -> bool {
        self.codec.starts_with("prores")
    }

    /// Container extension matching the codec.
    pub fn container_ext(&self) -> &'static str {
        if self.is_prores() {
            "mov"
        } else {
            "mp4"
        }
    }

    /// Audio codec, defaulting to PCM inside MOV and AAC inside MP4.
    pub fn effective_audio_codec(&self) -> &str {
        match self.audio_codec.as_deref() {
            Some(codec) => codec,
            None if self.is_prores() => "pcm_s16le",
            None => DEFAULT_AUDIO_CODEC,
        }
    }

    /// Convert to FFmpeg output arguments (codec flags only, no filters).
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        let mut args = vec!["-c:v".to_string(), self.codec.clone()];

        if let Some(ref preset) = self.preset {
            args.extend_from_slice(&["-preset".to_string(), preset.clone()]);
        }
        if let Some(crf) = self.crf {
            args.extend_from_slice(&["-crf".to_string(), crf.to_string()]);
        }
        if let Some(profile) = self.profile {
            args.extend_from_slice(&["-profile:v".to_string(), profile.to_string()]);
        }
        if !self.is_prores() {
            // Widest player compatibility for H.264/H.265 in MP4
            args.extend_from_slice(&[
                "-pix_fmt".to_string(),
                "yuv420p".to_string(),
                "-movflags".to_string(),
                "+faststart".to_string(),
            ]);
        }

        let audio_codec = self.effective_audio_codec().to_string();
        let lossless_audio = audio_codec.starts_with("pcm_");
        args.extend_from_slice(&["-c:a".to_string(), audio_codec]);
        if !lossless_audio {
            let bitrate = self
                .audio_bitrate
                .clone()
                .unwrap_or_else(|| DEFAULT_AUDIO_BITRATE.to_string());
            args.extend_from_slice(&["-b:a".to_string(), bitrate]);
        }

        args.extend(self.extra_args.clone());
        args
    }
}

/// An aspect ratio paired with one quality rung.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExportTarget {
    pub ratio: AspectRatio,
    pub quality: QualityProfile,
}

impl ExportTarget {
    pub fn new(ratio: AspectRatio, quality: QualityProfile) -> Self {
        Self { ratio, quality }
    }

    /// Short label for logs and warnings, e.g. `9:16/social`.
    pub fn label(&self) -> String {
        format!("{}/{}", self.ratio, self.quality.name)
    }
}
