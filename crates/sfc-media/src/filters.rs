//! FFmpeg filter expressions.

use std::path::Path;

use sfc_models::{CaptionConfig, Resolution};

/// Aspect ratios closer than this are treated as equal.
const ASPECT_EPSILON: f64 = 0.01;

/// Scale-and-crop that fills `target` exactly with no letterboxing.
///
/// The source is scaled until it covers the target on both axes, then the
/// overflow on the longer axis is cropped from the centre.
pub fn fill_filter(source: Resolution, target: Resolution) -> String {
    let (w, h) = (target.width, target.height);
    let scaled = if (source.aspect() - target.aspect()).abs() < ASPECT_EPSILON {
        format!("scale={}:{}", w, h)
    } else if source.aspect() > target.aspect() {
        // Wider than the target: match height, trim the sides
        format!("scale=-2:{h},crop={w}:{h}")
    } else {
        format!("scale={w}:-2,crop={w}:{h}")
    };
    format!("{},setsar=1", scaled)
}

/// Filter graph blending input 1 over input 0, output label `[v]`.
///
/// The overlay is forced to RGBA so a missing alpha plane is synthesised as
/// fully opaque before the opacity multiplier is applied.
pub fn overlay_filter_complex(x: i64, y: i64, opacity: f64) -> String {
    let alpha = if opacity < 1.0 {
        format!(",colorchannelmixer=aa={:.3}", opacity.clamp(0.0, 1.0))
    } else {
        String::new()
    };
    format!(
        "[1:v]format=rgba{alpha}[ovl];[0:v][ovl]overlay=x={x}:y={y}:eof_action=pass:format=auto[v]"
    )
}

/// EBU R128 loudness normalisation.
pub fn loudnorm_filter(target_lufs: f64) -> String {
    format!("loudnorm=I={:.1}:TP=-1.5:LRA=11", target_lufs)
}

/// Prepend `seconds` of silence to every channel.
pub fn delay_filter(seconds: f64) -> String {
    format!("adelay={}:all=1", (seconds * 1000.0).round() as i64)
}

/// Escape a path for use inside a quoted filter option.
pub fn escape_filter_path(path: &Path) -> String {
    let normalized = path.to_string_lossy().replace('\\', "/");
    let mut escaped = String::with_capacity(normalized.len() + 8);
    for ch in normalized.chars() {
        match ch {
            ':' | '\'' | ',' | ';' | '[' | ']' => {
                escaped.push('\\');
                escaped.push(ch);
            }
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// `#RRGGBB` to libass `&HAABBGGRR` with opaque alpha.
pub fn ass_colour(hex: &str) -> Option<String> {
    let hex = hex.strip_prefix('#').unwrap_or(hex);
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let (r, g, b) = (&hex[0..2], &hex[2..4], &hex[4..6]);
    Some(format!("&H00{}{}{}", b, g, r).to_uppercase())
}

/// `force_style` value for burned-in captions.
pub fn caption_style(config: &CaptionConfig) -> String {
    let mut parts = vec![
        format!("FontName={}", config.font_name),
        format!("FontSize={}", config.font_size),
    ];
    if let Some(colour) = ass_colour(&config.primary_colour) {
        parts.push(format!("PrimaryColour={}", colour));
    }
    if let Some(colour) = ass_colour(&config.outline_colour) {
        parts.push(format!("OutlineColour={}", colour));
    }
    parts.push("BorderStyle=1".to_string());
    parts.push(format!("Outline={}", config.outline_width));
    parts.push("Alignment=2".to_string());
    parts.push(format!("MarginV={}", config.margin_v));
    parts.join(",")
}

/// Burn an SRT file into the picture.
pub fn subtitles_filter(srt: &Path, config: &CaptionConfig) -> String {
    format!(
        "subtitles=filename='{}':charenc=UTF-8:force_style='{}'",
        escape_filter_path(srt),
        caption_style(config)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: Resolution = Resolution::new(1920, 1080);

    #[test]
    fn test_fill_portrait_from_landscape() {
        assert_eq!(
            fill_filter(SOURCE, Resolution::new(1080, 1920)),
            "scale=-2:1920,crop=1080:1920,setsar=1"
        );
    }

    #[test]
    fn test_fill_square_from_landscape() {
        assert_eq!(
            fill_filter(SOURCE, Resolution::new(1080, 1080)),
            "scale=-2:1080,crop=1080:1080,setsar=1"
        );
    }

    #[test]
    fn test_fill_same_aspect_only_scales() {
        assert_eq!(
            fill_filter(SOURCE, Resolution::new(1920, 1080)),
            "scale=1920:1080,setsar=1"
        );
        assert_eq!(
            fill_filter(Resolution::new(1280, 720), Resolution::new(1920, 1080)),
            "scale=1920:1080,setsar=1"
        );
    }

    #[test]
    fn test_fill_landscape_from_portrait() {
        assert_eq!(
            fill_filter(Resolution::new(1080, 1920), Resolution::new(1920, 1080)),
            "scale=1920:-2,crop=1920:1080,setsar=1"
        );
    }

    #[test]
    fn test_overlay_filter() {
        let f = overlay_filter_complex(1496, 24, 0.9);
        assert!(f.starts_with("[1:v]format=rgba,colorchannelmixer=aa=0.900[ovl]"));
        assert!(f.contains("overlay=x=1496:y=24:eof_action=pass"));
        assert!(f.ends_with("[v]"));

        assert!(!overlay_filter_complex(0, 0, 1.0).contains("colorchannelmixer"));
    }

    #[test]
    fn test_audio_filters() {
        assert_eq!(loudnorm_filter(-14.0), "loudnorm=I=-14.0:TP=-1.5:LRA=11");
        assert_eq!(delay_filter(2.0), "adelay=2000:all=1");
        assert_eq!(delay_filter(0.25), "adelay=250:all=1");
    }

    #[test]
    fn test_escape_filter_path() {
        assert_eq!(
            escape_filter_path(Path::new("C:\\clips\\it's,[1].srt")),
            "C\\:/clips/it\\'s\\,\\[1\\].srt"
        );
    }

    #[test]
    fn test_ass_colour() {
        assert_eq!(ass_colour("#FFCC00").as_deref(), Some("&H0000CCFF"));
        assert_eq!(ass_colour("000000").as_deref(), Some("&H00000000"));
        assert!(ass_colour("#FFF").is_none());
    }

    #[test]
    fn test_subtitles_filter() {
        let config = CaptionConfig::default();
        let f = subtitles_filter(Path::new("/work/clip.srt"), &config);
        assert!(f.starts_with("subtitles=filename='/work/clip.srt'"));
        assert!(f.contains("FontSize=48"));
        assert!(f.contains("PrimaryColour=&H00FFFFFF"));
        assert!(f.contains("MarginV=80"));
    }
}
