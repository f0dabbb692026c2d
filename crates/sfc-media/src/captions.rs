//! SRT caption snippets for individual clips.

use std::path::{Path, PathBuf};

use regex::Regex;

use sfc_models::Segment;

use crate::error::{MediaError, MediaResult};

/// One subtitle cue, times in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct SrtCue {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

const TIMING_PATTERN: &str =
    r"^(\d{1,2}):(\d{2}):(\d{2})[,.](\d{1,3})\s*-->\s*(\d{1,2}):(\d{2}):(\d{2})[,.](\d{1,3})";

/// Parse SRT text. Blocks without a timing line are skipped.
pub fn parse_srt(content: &str) -> MediaResult<Vec<SrtCue>> {
    let timing = Regex::new(TIMING_PATTERN).map_err(|e| MediaError::internal(e.to_string()))?;
    let content = content.trim_start_matches('\u{feff}').replace("\r\n", "\n");

    let mut cues = Vec::new();
    for block in content.split("\n\n") {
        let lines: Vec<&str> = block.lines().map(str::trim_end).collect();
        let Some(pos) = lines.iter().position(|l| timing.is_match(l.trim())) else {
            continue;
        };
        let Some(caps) = timing.captures(lines[pos].trim()) else {
            continue;
        };
        let field = |i: usize| caps[i].parse::<f64>().unwrap_or(0.0);
        let millis = |i: usize| {
            let digits = &caps[i];
            field(i) / 10f64.powi(digits.len() as i32)
        };
        let start = field(1) * 3600.0 + field(2) * 60.0 + field(3) + millis(4);
        let end = field(5) * 3600.0 + field(6) * 60.0 + field(7) + millis(8);

        let text = lines[pos + 1..].join("\n").trim().to_string();
        if text.is_empty() || end <= start {
            continue;
        }
        cues.push(SrtCue {
            index: cues.len() + 1,
            start,
            end,
            text,
        });
    }
    Ok(cues)
}

/// `HH:MM:SS,mmm`
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let (hours, rest) = (total_ms / 3_600_000, total_ms % 3_600_000);
    let (minutes, rest) = (rest / 60_000, rest % 60_000);
    let (secs, ms) = (rest / 1000, rest % 1000);
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, ms)
}

pub fn format_srt(cues: &[SrtCue]) -> String {
    cues.iter()
        .map(|cue| {
            format!(
                "{}\n{} --> {}\n{}\n",
                cue.index,
                format_timestamp(cue.start),
                format_timestamp(cue.end),
                cue.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Cues overlapping `[start, end]`, clamped to the range, shifted to start
/// at zero and renumbered from 1.
pub fn extract_snippet(cues: &[SrtCue], start: f64, end: f64) -> Vec<SrtCue> {
    cues.iter()
        .filter(|cue| cue.end > start && cue.start < end)
        .enumerate()
        .map(|(i, cue)| SrtCue {
            index: i + 1,
            start: (cue.start - start).max(0.0),
            end: cue.end.min(end) - start,
            text: cue.text.clone(),
        })
        .collect()
}

pub async fn load_srt(path: &Path) -> MediaResult<Vec<SrtCue>> {
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }
    let content = tokio::fs::read_to_string(path).await?;
    parse_srt(&content)
}

/// Write the captions for `segment` to `dir/<segment stem>.srt`.
///
/// Returns `None` when no cue overlaps the segment.
pub async fn write_snippet(
    cues: &[SrtCue],
    segment: &Segment,
    dir: &Path,
) -> MediaResult<Option<PathBuf>> {
    let snippet = extract_snippet(cues, segment.start_seconds, segment.end_seconds);
    if snippet.is_empty() {
        return Ok(None);
    }
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}.srt", segment.file_stem()));
    tokio::fs::write(&path, format_srt(&snippet)).await?;
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfc_models::SegmentSource;
    use tempfile::TempDir;

    const SAMPLE: &str = "\u{feff}1\r\n00:00:01,000 --> 00:00:04,500\r\nHello there\r\n\r\n\
2\n00:00:19,000 --> 00:00:22,000\nAcross the cut\nsecond line\n\n\
garbage block\n\n\
3\n00:01:05,250 --> 00:01:07,000\nLater\n";

    #[test]
    fn test_parse_srt() {
        let cues = parse_srt(SAMPLE).unwrap();
        assert_eq!(cues.len(), 3);
        assert_eq!(cues[0].start, 1.0);
        assert_eq!(cues[0].end, 4.5);
        assert_eq!(cues[1].text, "Across the cut\nsecond line");
        assert_eq!(cues[2].start, 65.25);
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0.0), "00:00:00,000");
        assert_eq!(format_timestamp(3723.456), "01:02:03,456");
    }

    #[test]
    fn test_snippet_is_shifted_and_renumbered() {
        let cues = parse_srt(SAMPLE).unwrap();
        let snippet = extract_snippet(&cues, 18.0, 38.0);

        assert_eq!(snippet.len(), 1);
        assert_eq!(snippet[0].index, 1);
        assert_eq!(snippet[0].start, 1.0);
        assert_eq!(snippet[0].end, 4.0);

        // A cue straddling the clip start is clamped to zero
        let snippet = extract_snippet(&cues, 20.0, 40.0);
        assert_eq!(snippet[0].start, 0.0);
        assert_eq!(snippet[0].end, 2.0);
    }

    #[test]
    fn test_format_srt() {
        let cues = vec![
            SrtCue { index: 1, start: 0.0, end: 1.5, text: "a".into() },
            SrtCue { index: 2, start: 2.0, end: 3.0, text: "b".into() },
        ];
        assert_eq!(
            format_srt(&cues),
            "1\n00:00:00,000 --> 00:00:01,500\na\n\n2\n00:00:02,000 --> 00:00:03,000\nb\n"
        );
    }

    #[tokio::test]
    async fn test_write_snippet() {
        let dir = TempDir::new().unwrap();
        let cues = parse_srt(SAMPLE).unwrap();

        let segment = Segment::new(0.0, 20.0, SegmentSource::FixedWindow);
        let path = write_snippet(&cues, &segment, dir.path()).await.unwrap().unwrap();
        assert_eq!(path.file_name().unwrap(), "clip_000000000_000020000.srt");
        let written = load_srt(&path).await.unwrap();
        assert_eq!(written.len(), 2);

        let quiet = Segment::new(30.0, 50.0, SegmentSource::FixedWindow);
        assert!(write_snippet(&cues, &quiet, dir.path()).await.unwrap().is_none());
    }
}
