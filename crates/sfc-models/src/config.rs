//! Typed job configuration.
//!
//! Every recognised option is a field here. Unknown keys are rejected at
//! load time and ranges are checked with `validator` before a job is
//! accepted, so a malformed preset never reaches the pipeline.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{AspectRatio, ExportTarget, OverlaySpec, QualityProfile};

/// Default clip length in seconds
pub const DEFAULT_CLIP_LEN: f64 = 20.0;
/// Default distance between window starts in seconds
pub const DEFAULT_STRIDE: f64 = 18.0;
/// Smallest accepted stride in seconds; keeps the window count bounded
pub const MIN_STRIDE: f64 = 0.1;
/// Default minimum alignment confidence
pub const DEFAULT_MIN_CONF: f64 = 0.15;
/// Default minimum distance between scene cuts in seconds
pub const DEFAULT_MIN_SCENE_LEN: f64 = 2.0;
/// Default hook search radius in seconds
pub const DEFAULT_HOOK_RADIUS: f64 = 5.0;
/// Default loudness target in LUFS
pub const DEFAULT_TARGET_LUFS: f64 = -14.0;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config from {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] ValidationErrors),

    #[error("Invalid configuration: {0}")]
    Malformed(String),
}

impl ConfigError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

/// Time-window slicing and optional scene/hook passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct SlicingConfig {
    /// Clip length in seconds
    #[validate(range(exclusive_min = 0.0))]
    pub clip_len: f64,
    /// Distance between consecutive window starts in seconds, at least
    /// [`MIN_STRIDE`]
    #[validate(range(min = 0.1))]
    pub stride: f64,
    /// Alignment confidence below which the offset falls back to zero
    #[validate(range(min = 0.0, max = 1.0))]
    pub min_conf: f64,
    /// Merge scene boundaries into the window starts
    pub scene_detect: bool,
    /// Nudge window starts toward audio energy peaks
    pub hook_detect: bool,
    /// Scene cuts closer than this to the previous cut are ignored
    #[validate(range(min = 0.0))]
    pub min_scene_len: f64,
    /// Cap on the number of segments
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1))]
    pub max_clips: Option<usize>,
    /// How far a hook may pull a window start, in seconds
    #[validate(range(min = 0.0))]
    pub hook_radius: f64,
}

impl Default for SlicingConfig {
    fn default() -> Self {
        Self {
            clip_len: DEFAULT_CLIP_LEN,
            stride: DEFAULT_STRIDE,
            min_conf: DEFAULT_MIN_CONF,
            scene_detect: false,
            hook_detect: false,
            min_scene_len: DEFAULT_MIN_SCENE_LEN,
            max_clips: None,
            hook_radius: DEFAULT_HOOK_RADIUS,
        }
    }
}

/// Aspect ratios and the quality ladder to render for each segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default, deny_unknown_fields)]
#[validate(schema(function = "validate_ladder_names"))]
pub struct ExportConfig {
    #[validate(length(min = 1))]
    pub ratios: Vec<AspectRatio>,
    #[validate(length(min = 1), nested)]
    pub quality_ladder: Vec<QualityProfile>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            ratios: vec![AspectRatio::Portrait],
            quality_ladder: vec![QualityProfile::social(), QualityProfile::archive()],
        }
    }
}

impl ExportConfig {
    /// Every ratio crossed with every ladder rung, ratio-major.
    pub fn targets(&self) -> Vec<ExportTarget> {
        self.ratios
            .iter()
            .flat_map(|ratio| {
                self.quality_ladder
                    .iter()
                    .map(move |q| ExportTarget::new(*ratio, q.clone()))
            })
            .collect()
    }
}

fn validate_ladder_names(export: &ExportConfig) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for profile in &export.quality_ladder {
        if !seen.insert(profile.name.as_str()) {
            return Err(ValidationError::new("duplicate_quality_name"));
        }
    }
    let mut ratios = HashSet::new();
    for ratio in &export.ratios {
        if !ratios.insert(*ratio) {
            return Err(ValidationError::new("duplicate_ratio"));
        }
    }
    Ok(())
}

/// Caption burn-in from an existing SRT file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default, deny_unknown_fields)]
#[validate(schema(function = "validate_captions"))]
pub struct CaptionConfig {
    pub enabled: bool,
    /// Subtitle file timed against the master
    #[serde(skip_serializing_if = "Option::is_none")]
    pub srt_path: Option<PathBuf>,
    pub font_name: String,
    #[validate(range(min = 8, max = 200))]
    pub font_size: u32,
    /// `#RRGGBB`
    pub primary_colour: String,
    /// `#RRGGBB`
    pub outline_colour: String,
    pub outline_width: u32,
    /// Distance from the bottom edge in pixels
    pub margin_v: u32,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            srt_path: None,
            font_name: "Arial-Bold".to_string(),
            font_size: 48,
            primary_colour: "#FFFFFF".to_string(),
            outline_colour: "#000000".to_string(),
            outline_width: 2,
            margin_v: 80,
        }
    }
}

fn validate_captions(captions: &CaptionConfig) -> Result<(), ValidationError> {
    if captions.enabled && captions.srt_path.is_none() {
        return Err(ValidationError::new("captions_enabled_without_srt_path"));
    }
    for colour in [&captions.primary_colour, &captions.outline_colour] {
        let hex = colour.strip_prefix('#').unwrap_or(colour);
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ValidationError::new("invalid_caption_colour"));
        }
    }
    Ok(())
}

/// Overlay audio preparation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct AudioConfig {
    /// Loudness-normalise the overlay audio before alignment
    pub normalize: bool,
    /// Integrated loudness target in LUFS
    #[validate(range(min = -70.0, max = -5.0))]
    pub target_lufs: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            normalize: true,
            target_lufs: DEFAULT_TARGET_LUFS,
        }
    }
}

/// Full per-job configuration.
///
/// Passed explicitly into each job; there is no process-wide config store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct JobConfig {
    #[validate(nested)]
    pub overlay: OverlaySpec,
    #[validate(nested)]
    pub slicing: SlicingConfig,
    #[validate(nested)]
    pub export: ExportConfig,
    #[validate(nested)]
    pub captions: CaptionConfig,
    #[validate(nested)]
    pub audio: AudioConfig,
}

impl JobConfig {
    /// Load a preset file (YAML, TOML or JSON by extension) and validate it.
    ///
    /// Missing keys take their defaults; unknown keys are an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let load_err = |source| ConfigError::Load {
            path: path.to_path_buf(),
            source,
        };

        let config: JobConfig = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(load_err)?
            .try_deserialize()
            .map_err(load_err)?;

        config.validated()
    }

    /// Parse a JSON document and validate it.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: JobConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::malformed(e.to_string()))?;
        config.validated()
    }

    /// Run field validation, returning the config on success.
    pub fn validated(self) -> Result<Self, ConfigError> {
        self.validate()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OverlayPosition;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_defaults_are_valid() {
        let config = JobConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.slicing.clip_len, 20.0);
        assert_eq!(config.slicing.stride, 18.0);
        assert_eq!(config.slicing.min_conf, 0.15);
        assert_eq!(config.overlay.position, OverlayPosition::TopRight);
        assert_eq!(config.export.targets().len(), 2);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let json = r#"{"slicing": {"clip_len": 15, "clip_length": 30}}"#;
        assert!(matches!(
            JobConfig::from_json(json),
            Err(ConfigError::Malformed(_))
        ));

        let json = r#"{"watermark": {}}"#;
        assert!(JobConfig::from_json(json).is_err());
    }

    #[test]
    fn test_range_validation() {
        let json = r#"{"slicing": {"stride": 0}}"#;
        assert!(matches!(JobConfig::from_json(json), Err(ConfigError::Invalid(_))));

        let json = r#"{"slicing": {"stride": 0.000001}}"#;
        assert!(matches!(JobConfig::from_json(json), Err(ConfigError::Invalid(_))));

        let json = format!(r#"{{"slicing": {{"stride": {}}}}}"#, MIN_STRIDE);
        assert!(JobConfig::from_json(&json).is_ok());

        let json = r#"{"slicing": {"min_conf": 1.5}}"#;
        assert!(JobConfig::from_json(json).is_err());

        let json = r#"{"export": {"quality_ladder": []}}"#;
        assert!(JobConfig::from_json(json).is_err());
    }

    #[test]
    fn test_captions_require_srt() {
        let json = r#"{"captions": {"enabled": true}}"#;
        assert!(JobConfig::from_json(json).is_err());

        let json = r#"{"captions": {"enabled": true, "srt_path": "subs.srt", "primary_colour": "red"}}"#;
        assert!(JobConfig::from_json(json).is_err());
    }

    #[test]
    fn test_duplicate_ladder_names_rejected() {
        let json = r#"{"export": {"quality_ladder": [{"name": "a"}, {"name": "a", "crf": 30}]}}"#;
        assert!(JobConfig::from_json(json).is_err());
    }

    #[test]
    fn test_targets_cross_product() {
        let json = r#"{"export": {"ratios": ["9:16", "1:1", "16:9"], "quality_ladder": [{"name": "social"}]}}"#;
        let config = JobConfig::from_json(json).unwrap();
        let targets = config.export.targets();
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[1].ratio, AspectRatio::Square);
        assert_eq!(targets[0].quality.codec, "libx264");
    }

    #[test]
    fn test_load_yaml_preset() {
        let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "overlay:\n  position: bottom-left\n  opacity: 1.0\nslicing:\n  clip_len: 30\n  stride: 30\n  scene_detect: true\n"
        )
        .unwrap();

        let config = JobConfig::from_file(file.path()).unwrap();
        assert_eq!(config.overlay.position, OverlayPosition::BottomLeft);
        assert_eq!(config.slicing.clip_len, 30.0);
        assert!(config.slicing.scene_detect);
        assert_eq!(config.overlay.margin_px, 24);
    }

    #[test]
    fn test_load_preset_rejects_unknown_key() {
        let mut file = Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"slicing": {{"clip_len": 10, "bogus": 1}}}}"#).unwrap();
        assert!(matches!(
            JobConfig::from_file(file.path()),
            Err(ConfigError::Load { .. })
        ));
    }
}
