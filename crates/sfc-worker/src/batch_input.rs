//! Batch job sources: a CSV listing or a folder scan.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use sfc_models::{JobConfig, JobInputs, JobRequest};

use crate::error::{WorkerError, WorkerResult};

/// Extensions recognised as base videos during a folder scan.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm"];
/// Extensions tried for `<stem>_overlay_audio`.
pub const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "m4a"];

const OVERLAY_SUFFIX: &str = "_overlay";
const OVERLAY_AUDIO_SUFFIX: &str = "_overlay_audio";

const REQUIRED_COLUMNS: [&str; 3] = ["base_video", "overlay_video", "overlay_audio"];

/// Jobs loaded from a batch source, plus entries that could not become jobs.
#[derive(Debug, Default)]
pub struct BatchInput {
    pub requests: Vec<JobRequest>,
    pub skipped: Vec<String>,
}

/// Load jobs from a CSV with header `base_video,overlay_video,overlay_audio[,preset]`.
///
/// Relative paths resolve against the CSV's directory. Rows with an empty
/// preset use `default_config`; presets are loaded and validated per row.
pub async fn from_csv(path: &Path, default_config: &JobConfig) -> WorkerResult<BatchInput> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| WorkerError::batch_input(format!("read {}: {}", path.display(), e)))?;
    let root = path.parent().unwrap_or_else(|| Path::new("."));
    parse_csv(&content, root, default_config)
}

pub fn parse_csv(content: &str, root: &Path, default_config: &JobConfig) -> WorkerResult<BatchInput> {
    let mut lines = content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let Some((_, header)) = lines.next() else {
        return Err(WorkerError::batch_input("CSV is empty"));
    };
    let columns: HashMap<String, usize> = split_row(header)
        .into_iter()
        .enumerate()
        .map(|(i, name)| (name.to_ascii_lowercase(), i))
        .collect();
    for required in REQUIRED_COLUMNS {
        if !columns.contains_key(required) {
            return Err(WorkerError::batch_input(format!("CSV header lacks column '{}'", required)));
        }
    }

    let mut presets: HashMap<PathBuf, JobConfig> = HashMap::new();
    let mut input = BatchInput::default();

    for (line_no, line) in lines {
        let row = split_row(line);
        let field = |name: &str| {
            columns
                .get(name)
                .and_then(|&i| row.get(i))
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
        };

        let (Some(base), Some(overlay), Some(audio)) =
            (field("base_video"), field("overlay_video"), field("overlay_audio"))
        else {
            input
                .skipped
                .push(format!("line {}: missing input column", line_no + 1));
            continue;
        };

        let config = match field("preset") {
            Some(preset) => {
                let preset = resolve(root, preset);
                match presets.get(&preset) {
                    Some(config) => config.clone(),
                    None => {
                        let config = JobConfig::from_file(&preset)?;
                        presets.insert(preset, config.clone());
                        config
                    }
                }
            }
            None => default_config.clone(),
        };

        let inputs = JobInputs::new(resolve(root, base), resolve(root, overlay), resolve(root, audio));
        let label = format!("row {}", line_no + 1);
        input.requests.push(JobRequest::new(inputs, config).with_label(label));
    }

    info!(
        jobs = input.requests.len(),
        skipped = input.skipped.len(),
        "Loaded batch from CSV"
    );
    Ok(input)
}

/// Scan `dir` for base videos and pair each with its overlay files.
///
/// `<stem>.mp4` pairs with `<stem>_overlay.<video ext>` and
/// `<stem>_overlay_audio.<audio ext>`. A shared overlay video or audio, when
/// given, replaces the per-stem lookup for every job.
pub async fn from_folder(
    dir: &Path,
    config: &JobConfig,
    shared_overlay_video: Option<&Path>,
    shared_overlay_audio: Option<&Path>,
) -> WorkerResult<BatchInput> {
    if !dir.is_dir() {
        return Err(WorkerError::batch_input(format!("{} is not a directory", dir.display())));
    }

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    let mut input = BatchInput::default();
    for base in files.iter().filter(|p| is_base_video(p)) {
        let stem = file_stem(base);

        let overlay_video = shared_overlay_video
            .map(Path::to_path_buf)
            .or_else(|| find_sibling(&files, &format!("{}{}", stem, OVERLAY_SUFFIX), VIDEO_EXTENSIONS));
        let overlay_audio = shared_overlay_audio
            .map(Path::to_path_buf)
            .or_else(|| {
                find_sibling(&files, &format!("{}{}", stem, OVERLAY_AUDIO_SUFFIX), AUDIO_EXTENSIONS)
            });

        match (overlay_video, overlay_audio) {
            (Some(video), Some(audio)) => {
                let inputs = JobInputs::new(base.clone(), video, audio);
                input
                    .requests
                    .push(JobRequest::new(inputs, config.clone()).with_label(stem));
            }
            (video, _) => {
                let missing = if video.is_none() { "overlay video" } else { "overlay audio" };
                warn!(base = %base.display(), missing, "Skipping unpaired base video");
                input.skipped.push(format!("{}: no {}", base.display(), missing));
            }
        }
    }

    info!(
        folder = %dir.display(),
        jobs = input.requests.len(),
        skipped = input.skipped.len(),
        "Loaded batch from folder"
    );
    Ok(input)
}

fn is_base_video(path: &Path) -> bool {
    let stem = file_stem(path);
    has_extension(path, VIDEO_EXTENSIONS)
        && !stem.ends_with(OVERLAY_SUFFIX)
        && !stem.ends_with(OVERLAY_AUDIO_SUFFIX)
}

fn find_sibling(files: &[PathBuf], stem: &str, extensions: &[&str]) -> Option<PathBuf> {
    extensions.iter().find_map(|ext| {
        files
            .iter()
            .find(|p| file_stem(p) == stem && has_extension(p, &[ext]))
            .cloned()
    })
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .map_or(false, |e| extensions.contains(&e.as_str()))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn resolve(root: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}

/// Split one CSV row. Double-quoted fields may contain commas; `""` inside
/// quotes is a literal quote.
fn split_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.trim_end_matches('\r').chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    fields.push(current);
    fields.into_iter().map(|f| f.trim().to_string()).collect()
}
