//! Single-job pipeline: validate, probe, normalise, align, composite,
//! segment, export and write the manifest.
//!
//! Stages run strictly in order. Fatal errors stop the job and become its
//! `error_message`; per-render export failures only add warnings.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, warn, Instrument};

use sfc_media::exporter::clip_path;
use sfc_media::{
    load_srt, AlignmentConfig, AlignmentEngine, AudioTranscode, CaptionSource, CompositeRequest,
    Compositor, EnvelopeAnalyzer, ExportRequest, Exporter, MediaEngine, MediaError, MediaProbe,
    RetryConfig, Segmenter, TimeShift,
};
use sfc_models::{
    JobConfig, JobId, JobRequest, JobResult, JobState, Manifest, MediaAsset, Segment,
    StageTimings, StreamKind,
};

use crate::config::WorkerConfig;
use crate::error::{StageContext, WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::manifest::write_manifest;
use crate::progress::{export_progress, ProgressReporter, Stage};

const NORMALIZED_AUDIO: &str = "overlay_audio_norm.wav";

/// What a job would produce, without rendering anything.
#[derive(Debug, Clone, Serialize)]
pub struct DryRunReport {
    pub job_id: JobId,
    pub assets: Vec<MediaAsset>,
    pub segments: Vec<Segment>,
    pub planned_clips: Vec<PathBuf>,
}

/// Probed inputs of one job.
struct Inputs {
    base: MediaAsset,
    overlay_video: MediaAsset,
    overlay_audio: MediaAsset,
}

impl Inputs {
    fn into_assets(self) -> Vec<MediaAsset> {
        vec![self.base, self.overlay_video, self.overlay_audio]
    }
}

/// Mutable state of one run, owned by the task executing the job.
struct JobRun {
    result: JobResult,
    assets: Vec<MediaAsset>,
    timings: StageTimings,
}

impl JobRun {
    fn finish_stage(&mut self, stage: Stage, started: Instant, logger: &JobLogger) {
        let elapsed = started.elapsed().as_secs_f64();
        self.timings.insert(stage.as_str().to_string(), elapsed);
        logger.stage_finished(stage, elapsed);
    }
}

/// Runs jobs against a media engine. Shared by every job of a coordinator.
pub struct JobPipeline {
    engine: Arc<dyn MediaEngine>,
    analyzer: Arc<dyn EnvelopeAnalyzer>,
    export_permits: Arc<Semaphore>,
    retry: RetryConfig,
    work_root: PathBuf,
    keep_work_dir: bool,
}

impl JobPipeline {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        analyzer: Arc<dyn EnvelopeAnalyzer>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            engine,
            analyzer,
            export_permits: Arc::new(Semaphore::new(config.max_parallel_exports.max(1))),
            retry: RetryConfig::new("export_render")
                .with_max_retries(config.export_retries)
                .with_base_delay(config.export_retry_delay),
            work_root: config.work_dir.clone(),
            keep_work_dir: config.keep_work_dir,
        }
    }

    /// Run one job to a terminal state.
    ///
    /// Never returns an error: fatal failures are captured in the result.
    pub async fn run(
        &self,
        request: &JobRequest,
        out_root: &Path,
        reporter: &ProgressReporter,
        cancel: watch::Receiver<bool>,
    ) -> JobResult {
        let logger = JobLogger::new(request);
        let span = logger.span();
        self.run_logged(request, out_root, reporter, cancel, &logger)
            .instrument(span)
            .await
    }

    async fn run_logged(
        &self,
        request: &JobRequest,
        out_root: &Path,
        reporter: &ProgressReporter,
        cancel: watch::Receiver<bool>,
        logger: &JobLogger,
    ) -> JobResult {
        logger.started(request);

        let job_dir = out_root.join(request.id.as_str());
        let work_dir = self.work_root.join(request.id.as_str());
        let mut run = JobRun {
            result: JobResult::new(request.id.clone()),
            assets: Vec::new(),
            timings: StageTimings::new(),
        };

        let outcome = self
            .execute(request, &job_dir, &work_dir, reporter, &cancel, logger, &mut run)
            .await;

        if let Err(e) = outcome {
            let message = e.job_message();
            logger.failed(&message);
            run.result.set_progress(reporter.current());
            if let Err(transition) = run.result.fail(message.clone()) {
                warn!(error = %transition, "Job already terminal");
            }
            let manifest = Manifest::new(request, run.assets.clone(), &run.result, run.timings.clone());
            if let Err(write_err) = write_manifest(&job_dir, &manifest).await {
                warn!(error = %write_err, "Failed to write manifest for failed job");
            }
            reporter.report(JobState::Failed, reporter.current(), message);
        }

        self.cleanup(&work_dir).await;
        run.result
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        request: &JobRequest,
        job_dir: &Path,
        work_dir: &Path,
        reporter: &ProgressReporter,
        cancel: &watch::Receiver<bool>,
        logger: &JobLogger,
        run: &mut JobRun,
    ) -> WorkerResult<()> {
        let started = Instant::now();
        let config = validate(request).await?;
        run.finish_stage(Stage::Validate, started, logger);
        check_cancel(cancel)?;

        let started = Instant::now();
        let inputs = self.probe_inputs(request).await?;
        run.assets = vec![
            inputs.base.clone(),
            inputs.overlay_video.clone(),
            inputs.overlay_audio.clone(),
        ];
        run.result.start()?;
        run.finish_stage(Stage::Probe, started, logger);
        reporter.stage_done(Stage::Probe);
        check_cancel(cancel)?;

        tokio::fs::create_dir_all(work_dir).await?;
        tokio::fs::create_dir_all(job_dir).await?;

        // Overlay audio as it will be aligned and muxed
        let started = Instant::now();
        let overlay_audio = if config.audio.normalize {
            let normalized = work_dir.join(NORMALIZED_AUDIO);
            self.engine
                .transcode_audio(
                    &inputs.overlay_audio.path,
                    &normalized,
                    &AudioTranscode {
                        loudness: Some(config.audio.target_lufs),
                        shift: TimeShift::None,
                    },
                )
                .await
                .stage(Stage::Normalize)?;
            run.finish_stage(Stage::Normalize, started, logger);
            normalized
        } else {
            inputs.overlay_audio.path.clone()
        };
        check_cancel(cancel)?;

        let started = Instant::now();
        let aligner = AlignmentEngine::new(
            self.analyzer.clone(),
            AlignmentConfig::default().with_min_conf(config.slicing.min_conf),
        );
        let alignment = aligner
            .align(self.engine.as_ref(), &inputs.base.path, &overlay_audio)
            .await
            .stage(Stage::Align)?;
        if alignment.is_fallback() {
            let warning = format!(
                "alignment: confidence {:.3} below min_conf {:.3}, measured offset {:+.3}s ignored",
                alignment.confidence, config.slicing.min_conf, alignment.measured_offset_seconds
            );
            logger.warning(&warning);
            run.result.add_warning(warning);
        }
        run.result.alignment = Some(alignment);
        run.finish_stage(Stage::Align, started, logger);
        reporter.stage_done(Stage::Align);
        check_cancel(cancel)?;

        let started = Instant::now();
        let master_path = job_dir.join(format!("master.{}", extension_of(&inputs.base.path)));
        let master = Compositor::new(self.engine.clone())
            .compose(&CompositeRequest {
                base: &inputs.base,
                overlay_video: &inputs.overlay_video,
                overlay_audio: &overlay_audio,
                alignment: &alignment,
                overlay: &config.overlay,
                work_dir,
                output: &master_path,
            })
            .await
            .stage(Stage::Composite)?;
        run.finish_stage(Stage::Composite, started, logger);
        reporter.stage_done(Stage::Composite);
        check_cancel(cancel)?;

        let started = Instant::now();
        let segments = Segmenter::new(config.slicing.clone())
            .segment(self.engine.as_ref(), &master)
            .await
            .stage(Stage::Segment)?;
        if segments.is_empty() {
            let warning = format!(
                "segment: master is {:.2}s, shorter than clip_len {:.2}s",
                master.duration, config.slicing.clip_len
            );
            logger.warning(&warning);
            run.result.add_warning(warning);
        }
        run.result.segments = segments.clone();
        run.finish_stage(Stage::Segment, started, logger);
        reporter.stage_done(Stage::Segment);
        check_cancel(cancel)?;

        let started = Instant::now();
        let captions = match (config.captions.enabled, config.captions.srt_path.as_ref()) {
            (true, Some(srt)) => Some(CaptionSource {
                cues: load_srt(srt).await.stage(Stage::Export)?,
                style: config.captions.clone(),
            }),
            _ => None,
        };
        let targets = config.export.targets();
        let exporter = Exporter::new(self.engine.clone(), self.export_permits.clone())
            .with_retry(self.retry.clone())
            .with_cancel(cancel.clone());
        let report = exporter
            .export(
                &ExportRequest {
                    master: &master,
                    segments: &segments,
                    targets: &targets,
                    output_dir: job_dir,
                    work_dir,
                    captions: captions.as_ref(),
                },
                |done, total| {
                    reporter.report(
                        JobState::Processing,
                        export_progress(done, total),
                        format!("exported {}/{}", done, total),
                    )
                },
            )
            .await
            .stage(Stage::Export)?;
        for warning in report.warnings() {
            logger.warning(&warning);
            run.result.add_warning(warning);
        }
        run.result.clips = report.clips;
        run.finish_stage(Stage::Export, started, logger);

        // Completed only once the manifest is on disk
        let started = Instant::now();
        let mut finished = run.result.clone();
        finished.complete()?;
        run.timings.insert(Stage::Manifest.as_str().to_string(), 0.0);
        let manifest = Manifest::new(request, run.assets.clone(), &finished, run.timings.clone());
        let path = write_manifest(job_dir, &manifest)
            .await
            .map_err(|e| WorkerError::manifest(e.to_string()))?;
        run.result = finished;
        run.finish_stage(Stage::Manifest, started, logger);
        debug!(path = %path.display(), "Manifest written");

        logger.completed(&run.result);
        reporter.report(JobState::Completed, 100, "completed");
        Ok(())
    }

    /// Probe inputs and plan segments from the base duration, rendering
    /// nothing. Scene and hook detection are skipped.
    pub async fn dry_run(&self, request: &JobRequest, out_root: &Path) -> WorkerResult<DryRunReport> {
        let config = validate(request).await?;
        let inputs = self.probe_inputs(request).await?;
        let segments = Segmenter::new(config.slicing.clone())
            .plan(inputs.base.duration, None, None)
            .stage(Stage::Segment)?;

        let job_dir = out_root.join(request.id.as_str());
        let targets = config.export.targets();
        let planned_clips = segments
            .iter()
            .flat_map(|segment| {
                targets
                    .iter()
                    .map(|target| clip_path(&job_dir, segment, target))
            })
            .collect();

        Ok(DryRunReport {
            job_id: request.id.clone(),
            assets: inputs.into_assets(),
            segments,
            planned_clips,
        })
    }

    async fn probe_inputs(&self, request: &JobRequest) -> WorkerResult<Inputs> {
        let probe = MediaProbe::new(self.engine.clone());
        let base = probe
            .probe(&request.inputs.base_video, StreamKind::Video)
            .await
            .stage(Stage::Probe)?;
        if !base.has_audio() {
            // Alignment needs the base's own audio as its reference
            return Err(WorkerError::stage(
                Stage::Probe,
                MediaError::missing_stream(&base.path, StreamKind::Audio),
            ));
        }
        let overlay_video = probe
            .probe(&request.inputs.overlay_video, StreamKind::Video)
            .await
            .stage(Stage::Probe)?;
        let overlay_audio = probe
            .probe(&request.inputs.overlay_audio, StreamKind::Audio)
            .await
            .stage(Stage::Probe)?;

        Ok(Inputs {
            base,
            overlay_video,
            overlay_audio,
        })
    }

    async fn cleanup(&self, work_dir: &Path) {
        if self.keep_work_dir {
            debug!(path = %work_dir.display(), "Keeping work directory");
            return;
        }
        match tokio::fs::remove_dir_all(work_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %work_dir.display(), error = %e, "Failed to remove work directory"),
        }
    }
}

/// Check the config and that every input exists.
async fn validate(request: &JobRequest) -> WorkerResult<JobConfig> {
    let config = request.config.clone().validated()?;

    let mut required: Vec<&PathBuf> = request
        .inputs
        .labelled()
        .into_iter()
        .map(|(_, path)| path)
        .collect();
    if config.captions.enabled {
        required.extend(config.captions.srt_path.iter());
    }
    for path in required {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(WorkerError::stage(
                Stage::Validate,
                MediaError::unreadable(path.clone(), "file does not exist"),
            ));
        }
    }
    Ok(config)
}

fn check_cancel(cancel: &watch::Receiver<bool>) -> WorkerResult<()> {
    if *cancel.borrow() {
        return Err(WorkerError::Cancelled);
    }
    Ok(())
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "mp4".to_string())
}
