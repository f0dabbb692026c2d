//! Overlay placement.

use std::fmt;
use std::str::FromStr;

use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

use crate::Resolution;

/// Where the overlay video sits on the base frame.
///
/// Serialized as `top-left`, `top-right`, `bottom-left`, `bottom-right`,
/// `center`, or an explicit `"x,y"` pixel pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OverlayPosition {
    TopLeft,
    #[default]
    TopRight,
    BottomLeft,
    BottomRight,
    Center,
    Explicit { x: i64, y: i64 },
}

impl OverlayPosition {
    /// Resolve to the overlay's top-left pixel on the base frame.
    ///
    /// Corner positions keep `margin` pixels from the touching edges.
    /// Results may be negative when the overlay is larger than the base.
    pub fn resolve(&self, base: Resolution, overlay: Resolution, margin: u32) -> (i64, i64) {
        let (bw, bh) = (base.width as i64, base.height as i64);
        let (ow, oh) = (overlay.width as i64, overlay.height as i64);
        let m = margin as i64;

        match *self {
            OverlayPosition::TopLeft => (m, m),
            OverlayPosition::TopRight => (bw - ow - m, m),
            OverlayPosition::BottomLeft => (m, bh - oh - m),
            OverlayPosition::BottomRight => (bw - ow - m, bh - oh - m),
            OverlayPosition::Center => ((bw - ow) / 2, (bh - oh) / 2),
            OverlayPosition::Explicit { x, y } => (x, y),
        }
    }
}

impl fmt::Display for OverlayPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlayPosition::TopLeft => f.write_str("top-left"),
            OverlayPosition::TopRight => f.write_str("top-right"),
            OverlayPosition::BottomLeft => f.write_str("bottom-left"),
            OverlayPosition::BottomRight => f.write_str("bottom-right"),
            OverlayPosition::Center => f.write_str("center"),
            OverlayPosition::Explicit { x, y } => write!(f, "{},{}", x, y),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown overlay position: {0}")]
pub struct OverlayPositionParseError(String);

impl FromStr for OverlayPosition {
    type Err = OverlayPositionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        match normalized.as_str() {
            "top-left" => Ok(OverlayPosition::TopLeft),
            "top-right" => Ok(OverlayPosition::TopRight),
            "bottom-left" => Ok(OverlayPosition::BottomLeft),
            "bottom-right" => Ok(OverlayPosition::BottomRight),
            "center" | "centre" => Ok(OverlayPosition::Center),
            other => {
                let (x, y) = other
                    .split_once(',')
                    .ok_or_else(|| OverlayPositionParseError(s.to_string()))?;
                let x = x.trim().parse().map_err(|_| OverlayPositionParseError(s.to_string()))?;
                let y = y.trim().parse().map_err(|_| OverlayPositionParseError(s.to_string()))?;
                Ok(OverlayPosition::Explicit { x, y })
            }
        }
    }
}

impl TryFrom<String> for OverlayPosition {
    type Error = OverlayPositionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OverlayPosition> for String {
    fn from(value: OverlayPosition) -> Self {
        value.to_string()
    }
}

impl JsonSchema for OverlayPosition {
    fn schema_name() -> String {
        "OverlayPosition".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        String::json_schema(gen)
    }
}

/// Overlay video placement and blending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct OverlaySpec {
    pub position: OverlayPosition,
    /// Alpha multiplier in (0, 1]
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub opacity: f64,
    /// Distance from the touching edges for corner positions
    pub margin_px: u32,
}

impl Default for OverlaySpec {
    fn default() -> Self {
        Self {
            position: OverlayPosition::TopRight,
            opacity: 0.9,
            margin_px: 24,
        }
    }
}

impl OverlaySpec {
    /// Whether blending needs a per-pixel alpha multiplier.
    pub fn is_translucent(&self) -> bool {
        self.opacity < 1.0
    }
}
