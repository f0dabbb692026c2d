//! `sfc` command-line entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use sfc_media::{check_ffmpeg, check_ffprobe, FfmpegEngine, FfmpegRunner, SpectralFluxAnalyzer};
use sfc_models::{AspectRatio, BatchSummary, JobConfig, JobInputs, JobRequest, OverlayPosition};
use sfc_worker::{
    from_csv, from_folder, init_tracing, BatchCoordinator, CancelHandle, JobPipeline,
    ProgressUpdate, WorkerConfig,
};

#[derive(Debug, Parser)]
#[command(name = "sfc", version, about = "Turn a long recording into short-form clips")]
struct Cli {
    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Process one base video with its overlay
    Run(RunArgs),
    /// Process every job listed in a CSV or found in a folder
    Batch(BatchArgs),
    /// Print the job configuration JSON schema
    Schema,
    /// Check that ffmpeg and ffprobe are available
    Selfcheck,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long)]
    base: PathBuf,
    #[arg(long)]
    overlay_video: PathBuf,
    #[arg(long)]
    overlay_audio: PathBuf,
    /// Output root; the job writes into `<out>/<job_id>`
    #[arg(long)]
    out: PathBuf,
    #[command(flatten)]
    config: ConfigArgs,
    /// Probe and plan only
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct BatchArgs {
    #[arg(long)]
    out: PathBuf,
    /// CSV with base_video,overlay_video,overlay_audio[,preset]
    #[arg(long, conflicts_with = "folder", required_unless_present = "folder")]
    csv: Option<PathBuf>,
    /// Folder of base videos with `<stem>_overlay` companions
    #[arg(long)]
    folder: Option<PathBuf>,
    /// Overlay video shared by every job of a folder scan
    #[arg(long, requires = "folder")]
    overlay_video: Option<PathBuf>,
    /// Overlay audio shared by every job of a folder scan
    #[arg(long, requires = "folder")]
    overlay_audio: Option<PathBuf>,
    #[command(flatten)]
    config: ConfigArgs,
    #[arg(long)]
    dry_run: bool,
}

/// Preset file plus command-line overrides.
#[derive(Debug, Args)]
struct ConfigArgs {
    /// YAML, TOML or JSON preset
    #[arg(long)]
    preset: Option<PathBuf>,
    #[arg(long)]
    clip_len: Option<f64>,
    #[arg(long)]
    stride: Option<f64>,
    #[arg(long)]
    min_conf: Option<f64>,
    #[arg(long, overrides_with = "no_scene_detect")]
    scene_detect: bool,
    /// Turn scene detection off even if the preset enables it
    #[arg(long, overrides_with = "scene_detect")]
    no_scene_detect: bool,
    #[arg(long, overrides_with = "no_hook_detect")]
    hook_detect: bool,
    #[arg(long, overrides_with = "hook_detect")]
    no_hook_detect: bool,
    #[arg(long)]
    max_clips: Option<usize>,
    /// Output ratio, repeatable: 9:16, 1:1, 16:9
    #[arg(long = "ratio")]
    ratios: Vec<AspectRatio>,
    #[arg(long)]
    position: Option<OverlayPosition>,
    #[arg(long)]
    opacity: Option<f64>,
    /// Burn captions from this SRT file
    #[arg(long)]
    srt: Option<PathBuf>,
    /// Skip overlay loudness normalisation
    #[arg(long)]
    no_normalize: bool,
}

impl ConfigArgs {
    fn resolve(&self) -> Result<JobConfig> {
        let mut config = match &self.preset {
            Some(path) => JobConfig::from_file(path)
                .with_context(|| format!("loading preset {}", path.display()))?,
            None => JobConfig::default(),
        };

        let slicing = &mut config.slicing;
        if let Some(v) = self.clip_len {
            slicing.clip_len = v;
        }
        if let Some(v) = self.stride {
            slicing.stride = v;
        }
        if let Some(v) = self.min_conf {
            slicing.min_conf = v;
        }
        if self.max_clips.is_some() {
            slicing.max_clips = self.max_clips;
        }
        if let Some(v) = toggle(self.scene_detect, self.no_scene_detect) {
            slicing.scene_detect = v;
        }
        if let Some(v) = toggle(self.hook_detect, self.no_hook_detect) {
            slicing.hook_detect = v;
        }

        if !self.ratios.is_empty() {
            config.export.ratios = self.ratios.clone();
        }
        if let Some(position) = self.position {
            config.overlay.position = position;
        }
        if let Some(opacity) = self.opacity {
            config.overlay.opacity = opacity;
        }
        if let Some(srt) = &self.srt {
            config.captions.enabled = true;
            config.captions.srt_path = Some(srt.clone());
        }
        if self.no_normalize {
            config.audio.normalize = false;
        }

        Ok(config.validated()?)
    }
}

/// `--x` / `--no-x` pair; `None` keeps the preset value.
fn toggle(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Schema => {
            let schema = schemars::schema_for!(JobConfig);
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
        Command::Selfcheck => selfcheck(),
        Command::Run(args) => run(args).await,
        Command::Batch(args) => batch(args).await,
    }
}

fn selfcheck() -> Result<()> {
    let ffmpeg = check_ffmpeg().context("ffmpeg is required")?;
    let ffprobe = check_ffprobe().context("ffprobe is required")?;
    println!("ffmpeg:  {}", ffmpeg.display());
    println!("ffprobe: {}", ffprobe.display());
    Ok(())
}

/// Pipeline on the FFmpeg engine, killed through `cancel`.
fn pipeline(config: &WorkerConfig, cancel: &CancelHandle) -> JobPipeline {
    let runner = FfmpegRunner::new()
        .with_timeout(config.ffmpeg_timeout.as_secs())
        .with_cancel(cancel.subscribe());
    JobPipeline::new(
        Arc::new(FfmpegEngine::with_runner(runner)),
        Arc::new(SpectralFluxAnalyzer::new()),
        config,
    )
}

async fn run(args: RunArgs) -> Result<()> {
    let config = args.config.resolve()?;
    let request = JobRequest::new(
        JobInputs::new(args.base, args.overlay_video, args.overlay_audio),
        config,
    );
    execute(vec![request], &args.out, args.dry_run).await
}

async fn batch(args: BatchArgs) -> Result<()> {
    let config = args.config.resolve()?;
    let input = match (&args.csv, &args.folder) {
        (Some(csv), _) => from_csv(csv, &config).await?,
        (None, Some(folder)) => {
            from_folder(
                folder,
                &config,
                args.overlay_video.as_deref(),
                args.overlay_audio.as_deref(),
            )
            .await?
        }
        (None, None) => bail!("either --csv or --folder is required"),
    };

    for skipped in &input.skipped {
        warn!("Skipped batch entry: {}", skipped);
    }
    if input.requests.is_empty() {
        bail!("no jobs found");
    }
    execute(input.requests, &args.out, args.dry_run).await
}

async fn execute(requests: Vec<JobRequest>, out: &std::path::Path, dry_run: bool) -> Result<()> {
    let config = WorkerConfig::from_env();
    info!(?config, jobs = requests.len(), "Worker config");
    let cancel = CancelHandle::new();

    if dry_run {
        let pipeline = pipeline(&config, &cancel);
        for request in &requests {
            let report = pipeline
                .dry_run(request, out)
                .await
                .map_err(|e| anyhow::anyhow!(e.job_message()))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        return Ok(());
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(log_progress(rx));

    let coordinator = BatchCoordinator::new(pipeline(&config, &cancel), &config)
        .with_cancel_handle(cancel.clone())
        .with_progress(tx);

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling jobs");
            interrupt.cancel_all();
        }
    });

    let summary = coordinator.run_batch(requests, out).await?;
    drop(coordinator);
    printer.await.ok();

    report(&summary)
}

async fn log_progress(mut rx: mpsc::UnboundedReceiver<ProgressUpdate>) {
    while let Some(update) = rx.recv().await {
        info!(
            job_id = %update.job_id,
            status = %update.status,
            progress = update.progress,
            "{}", update.message
        );
    }
}

fn report(summary: &BatchSummary) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    if summary.failed > 0 {
        bail!("{} of {} jobs failed", summary.failed, summary.total);
    }
    Ok(())
}
