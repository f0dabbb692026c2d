//! Clip export: cut each segment from the master once, then render it for
//! every export target.
//!
//! Renders for different segments and targets are independent and run in
//! parallel, bounded by a shared semaphore. A failed render is retried and,
//! if it still fails, recorded as an [`ExportFailure`]; it never aborts the
//! other renders.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

use sfc_models::{CaptionConfig, Clip, ExportTarget, MediaAsset, Segment};

use crate::captions::{write_snippet, SrtCue};
use crate::engine::{CaptionBurn, MediaEngine, RenderPlan};
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::{finalize, partial_path, remove_if_exists};
use crate::retry::{retry_async, RetryConfig, RetryResult};

/// Subdirectory of the job output holding the ratio directories.
pub const EXPORTS_DIR: &str = "exports";
/// Subdirectory of the job output holding per-clip caption files.
pub const CAPTIONS_DIR: &str = "captions";

/// Parsed captions and the style to burn them with.
#[derive(Debug, Clone)]
pub struct CaptionSource {
    pub cues: Vec<SrtCue>,
    pub style: CaptionConfig,
}

/// Inputs for one [`Exporter::export`] call.
#[derive(Debug, Clone)]
pub struct ExportRequest<'a> {
    pub master: &'a MediaAsset,
    pub segments: &'a [Segment],
    pub targets: &'a [ExportTarget],
    /// Job output directory; clips land under `exports/<ratio>/`
    pub output_dir: &'a Path,
    /// Scratch directory for cuts
    pub work_dir: &'a Path,
    pub captions: Option<&'a CaptionSource>,
}

/// A segment × target render that did not produce a clip.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportFailure {
    pub segment: Segment,
    pub target: String,
    pub attempts: u32,
    pub message: String,
}

impl ExportFailure {
    pub fn warning(&self) -> String {
        format!(
            "export {} of {} failed after {} attempt(s): {}",
            self.target,
            self.segment.file_stem(),
            self.attempts,
            self.message
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExportReport {
    /// In segment order, then target order
    pub clips: Vec<Clip>,
    pub failures: Vec<ExportFailure>,
    /// Non-fatal problems that did not cost a clip
    pub notes: Vec<String>,
}

impl ExportReport {
    pub fn warnings(&self) -> Vec<String> {
        self.notes
            .iter()
            .cloned()
            .chain(self.failures.iter().map(ExportFailure::warning))
            .collect()
    }
}

/// Final location of a clip: `<output>/exports/<9x16>/<stem>_<profile>.<ext>`.
pub fn clip_path(output_dir: &Path, segment: &Segment, target: &ExportTarget) -> PathBuf {
    output_dir
        .join(EXPORTS_DIR)
        .join(target.ratio.dir_label())
        .join(format!(
            "{}_{}.{}",
            segment.file_stem(),
            target.quality.name,
            target.quality.container_ext()
        ))
}

#[derive(Clone)]
pub struct Exporter {
    engine: Arc<dyn MediaEngine>,
    permits: Arc<Semaphore>,
    retry: RetryConfig,
    cancel: Option<watch::Receiver<bool>>,
}

enum SegmentOutcome {
    Clip(Clip),
    Failed(ExportFailure),
}

impl Exporter {
    /// `permits` bounds concurrent engine calls and may be shared between jobs.
    pub fn new(engine: Arc<dyn MediaEngine>, permits: Arc<Semaphore>) -> Self {
        Self {
            engine,
            permits,
            retry: RetryConfig::new("export"),
            cancel: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Stop scheduling new cuts and renders once the flag turns true.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().map_or(false, |rx| *rx.borrow())
    }

    /// Render every segment for every target.
    ///
    /// `on_progress(done, total)` is called after each render settles.
    /// Fails only for problems that affect every render (no video in the
    /// master) or when cancelled.
    pub async fn export<P>(&self, request: &ExportRequest<'_>, on_progress: P) -> MediaResult<ExportReport>
    where
        P: Fn(usize, usize) + Send + Sync,
    {
        let Some(source) = request.master.resolution else {
            return Err(MediaError::incompatible(format!(
                "master {} has no video stream",
                request.master.display_name()
            )));
        };

        let total = request.segments.len() * request.targets.len();
        let done = AtomicUsize::new(0);
        let tick = || {
            let completed = done.fetch_add(1, Ordering::SeqCst) + 1;
            on_progress(completed, total);
        };

        info!(
            segments = request.segments.len(),
            targets = request.targets.len(),
            renders = total,
            "Starting export"
        );

        let per_segment = join_all(
            request
                .segments
                .iter()
                .enumerate()
                .map(|(index, segment)| self.export_segment(request, source, index, segment, &tick)),
        )
        .await;

        let mut report = ExportReport::default();
        for (outcomes, note) in per_segment {
            report.notes.extend(note);
            for outcome in outcomes {
                match outcome {
                    SegmentOutcome::Clip(clip) => report.clips.push(clip),
                    SegmentOutcome::Failed(failure) => report.failures.push(failure),
                }
            }
        }

        if self.cancelled() {
            return Err(MediaError::Cancelled);
        }

        info!(
            clips = report.clips.len(),
            failures = report.failures.len(),
            "Export finished"
        );
        Ok(report)
    }

    async fn export_segment(
        &self,
        request: &ExportRequest<'_>,
        source: sfc_models::Resolution,
        index: usize,
        segment: &Segment,
        tick: &(dyn Fn() + Send + Sync),
    ) -> (Vec<SegmentOutcome>, Option<String>) {
        if self.cancelled() {
            return (Vec::new(), None);
        }

        let stem = segment.file_stem();
        let mut note = None;
        let captions = match request.captions {
            Some(captions) => {
                let dir = request.output_dir.join(CAPTIONS_DIR);
                match write_snippet(&captions.cues, segment, &dir).await {
                    Ok(path) => path.map(|srt_path| CaptionBurn {
                        srt_path,
                        style: captions.style.clone(),
                    }),
                    Err(e) => {
                        warn!(segment = %stem, error = %e, "Caption snippet failed, exporting without captions");
                        note = Some(format!("captions for {} skipped: {}", stem, e));
                        None
                    }
                }
            }
            None => None,
        };

        let cut = request
            .work_dir
            .join("cuts")
            .join(format!("{}.{}", stem, container_of(&request.master.path)));
        if let Err(e) = self.cut(request.master, segment, &cut).await {
            remove_if_exists(&cut).await;
            if e.is_cancelled() {
                return (Vec::new(), note);
            }
            warn!(segment = %stem, error = %e, "Cut failed");
            let outcomes = request
                .targets
                .iter()
                .map(|target| {
                    tick();
                    SegmentOutcome::Failed(ExportFailure {
                        segment: segment.clone(),
                        target: target.label(),
                        attempts: 1,
                        message: format!("cut failed: {}", e.detail()),
                    })
                })
                .collect();
            return (outcomes, note);
        }

        let cut_ref = &cut;
        let renders = request.targets.iter().map(|target| {
            let plan = RenderPlan {
                source,
                target: target.clone(),
                captions: captions.clone(),
            };
            async move {
                let outcome = self.render(request, index, segment, cut_ref, plan).await;
                if outcome.is_some() {
                    tick();
                }
                outcome
            }
        });
        let outcomes = join_all(renders).await.into_iter().flatten().collect();

        remove_if_exists(&cut).await;
        (outcomes, note)
    }

    async fn cut(&self, master: &MediaAsset, segment: &Segment, output: &Path) -> MediaResult<()> {
        if self.cancelled() {
            return Err(MediaError::Cancelled);
        }
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let _permit = self.acquire().await?;
        if self.cancelled() {
            return Err(MediaError::Cancelled);
        }
        self.engine
            .cut(&master.path, segment.start_seconds, segment.end_seconds, output)
            .await
    }

    /// Returns `None` when cancelled before producing anything.
    async fn render(
        &self,
        request: &ExportRequest<'_>,
        index: usize,
        segment: &Segment,
        cut: &Path,
        plan: RenderPlan,
    ) -> Option<SegmentOutcome> {
        let label = plan.target.label();
        let stem = segment.file_stem();
        let final_path = clip_path(request.output_dir, segment, &plan.target);
        let partial = partial_path(&final_path);

        if let Some(parent) = final_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Some(SegmentOutcome::Failed(ExportFailure {
                    segment: segment.clone(),
                    target: label,
                    attempts: 0,
                    message: e.to_string(),
                }));
            }
        }

        let plan_ref = &plan;
        let partial_ref = partial.as_path();
        let (label_ref, stem_ref) = (label.as_str(), stem.as_str());
        let result = retry_async(
            &self.retry,
            |e: &MediaError| e.is_retryable(),
            move |attempt| async move {
                if self.cancelled() {
                    return Err(MediaError::Cancelled);
                }
                let _permit = self.acquire().await?;
                // Cancellation may have arrived while waiting for a permit
                if self.cancelled() {
                    return Err(MediaError::Cancelled);
                }
                debug!(segment = %stem_ref, target = %label_ref, attempt, "Rendering");
                self.engine
                    .render(cut, plan_ref, partial_ref)
                    .await
                    .map_err(|e| match e {
                        MediaError::Cancelled => e,
                        other => MediaError::export_encode(label_ref, stem_ref, other.detail()),
                    })
            },
        )
        .await;

        let attempts = result.attempts();
        let outcome = match result {
            RetryResult::Success { .. } => finalize(&partial, &final_path).await,
            RetryResult::Failed { error, .. } => Err(error),
        };

        match outcome {
            Ok(()) => {
                let mut clip = Clip::new(index, &final_path, segment.clone(), plan.target.clone());
                if let Some(ref burn) = plan.captions {
                    clip = clip.with_captions(&burn.srt_path);
                }
                debug!(path = %final_path.display(), attempts, "Clip exported");
                Some(SegmentOutcome::Clip(clip))
            }
            Err(e) => {
                remove_if_exists(&partial).await;
                if e.is_cancelled() {
                    return None;
                }
                warn!(segment = %stem, target = %label, attempts, error = %e, "Export failed");
                Some(SegmentOutcome::Failed(ExportFailure {
                    segment: segment.clone(),
                    target: label,
                    attempts,
                    message: e.to_string(),
                }))
            }
        }
    }

    async fn acquire(&self) -> MediaResult<tokio::sync::SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|_| MediaError::internal("export semaphore closed"))
    }
}

fn container_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "mp4".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captions::parse_srt;
    use crate::fs_utils::is_partial;
    use crate::testing::{Call, FakeEngine};
    use sfc_models::{AspectRatio, QualityProfile, Resolution, SegmentSource};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    fn master(dir: &Path) -> MediaAsset {
        MediaAsset::new(dir.join("master.mp4"), 120.0)
            .with_video(Resolution::new(1920, 1080), 30.0)
            .with_audio(48_000, 2)
    }

    fn segments() -> Vec<Segment> {
        vec![
            Segment::new(0.0, 20.0, SegmentSource::FixedWindow),
            Segment::new(18.0, 38.0, SegmentSource::FixedWindow),
        ]
    }

    fn exporter(engine: Arc<FakeEngine>) -> Exporter {
        Exporter::new(engine, Arc::new(Semaphore::new(4)))
            .with_retry(RetryConfig::new("export").with_base_delay(Duration::from_millis(1)))
    }

    fn files_under(dir: &Path) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let mut stack = vec![dir.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    found.push(path);
                }
            }
        }
        found
    }

    async fn run(
        exporter: &Exporter,
        dir: &TempDir,
        targets: &[ExportTarget],
        captions: Option<&CaptionSource>,
    ) -> MediaResult<ExportReport> {
        let master = master(dir.path());
        let segments = segments();
        let out = dir.path().join("out");
        let work = dir.path().join("work");
        let request = ExportRequest {
            master: &master,
            segments: &segments,
            targets,
            output_dir: &out,
            work_dir: &work,
            captions,
        };
        let result = exporter.export(&request, |_, _| {}).await;
        result
    }

    #[tokio::test]
    async fn test_exports_every_segment_and_target() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(FakeEngine::new());
        let targets = vec![
            ExportTarget::new(AspectRatio::Portrait, QualityProfile::social()),
            ExportTarget::new(AspectRatio::Square, QualityProfile::social()),
        ];

        let master = master(dir.path());
        let segments = segments();
        let out = dir.path().join("out");
        let work = dir.path().join("work");
        let request = ExportRequest {
            master: &master,
            segments: &segments,
            targets: &targets,
            output_dir: &out,
            work_dir: &work,
            captions: None,
        };
        let progress = Mutex::new(Vec::new());
        let report = exporter(engine.clone())
            .export(&request, |done, total| progress.lock().unwrap().push((done, total)))
            .await
            .unwrap();

        assert_eq!(report.clips.len(), 4);
        assert!(report.failures.is_empty());
        assert_eq!(
            report.clips[0].path,
            out.join("exports/9x16/clip_000000000_000020000_social.mp4")
        );
        assert_eq!(
            report.clips[3].path,
            out.join("exports/1x1/clip_000018000_000038000_social.mp4")
        );
        assert_eq!(report.clips[3].index, 1);
        assert!(report.clips.iter().all(|c| c.path.exists()));

        // One cut per segment, removed afterwards
        let cuts = engine
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Cut { .. }))
            .count();
        assert_eq!(cuts, 2);
        assert!(files_under(&work).is_empty());

        let progress = progress.into_inner().unwrap();
        assert_eq!(progress.len(), 4);
        assert_eq!(progress.last(), Some(&(4, 4)));
    }

    #[tokio::test]
    async fn test_failed_target_is_isolated() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(FakeEngine::new().failing_target("9:16/archive"));
        let targets = vec![
            ExportTarget::new(AspectRatio::Portrait, QualityProfile::social()),
            ExportTarget::new(AspectRatio::Portrait, QualityProfile::archive()),
        ];

        let report = run(&exporter(engine.clone()), &dir, &targets, None).await.unwrap();

        assert_eq!(report.clips.len(), 2);
        assert!(report.clips.iter().all(|c| c.target.quality.name == "social"));
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].attempts, 3);
        assert!(report.warnings()[0].contains("9:16/archive"));

        // Initial attempt plus two retries for each failing render
        assert_eq!(engine.renders().len(), 2 + 2 * 3);
        let leftovers = files_under(&dir.path().join("out"));
        assert!(leftovers.iter().all(|p| !is_partial(p)));
        assert!(leftovers
            .iter()
            .all(|p| !p.to_string_lossy().contains("archive")));
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(FakeEngine::new().flaky_target("9:16/social", 1));
        let targets = vec![ExportTarget::new(AspectRatio::Portrait, QualityProfile::social())];

        let report = run(&exporter(engine.clone()), &dir, &targets, None).await.unwrap();
        assert_eq!(report.clips.len(), 2);
        assert!(report.failures.is_empty());
        assert_eq!(engine.renders().len(), 3);
    }

    #[tokio::test]
    async fn test_cancel_mid_export_starts_no_new_render() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(FakeEngine::new().with_render_delay(Duration::from_millis(50)));
        let (tx, rx) = watch::channel(false);
        let targets = vec![
            ExportTarget::new(AspectRatio::Portrait, QualityProfile::social()),
            ExportTarget::new(AspectRatio::Square, QualityProfile::social()),
        ];

        // One permit: the first render holds it while the cancel lands
        let exporter = Exporter::new(engine.clone(), Arc::new(Semaphore::new(1)))
            .with_retry(RetryConfig::new("export").with_base_delay(Duration::from_millis(1)))
            .with_cancel(rx);

        let watcher = engine.clone();
        let canceller = tokio::spawn(async move {
            while watcher.renders().is_empty() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            tx.send_replace(true);
            watcher.renders().len()
        });

        let result = run(&exporter, &dir, &targets, None).await;
        let started_before_cancel = canceller.await.unwrap();

        assert!(matches!(result, Err(MediaError::Cancelled)));
        assert_eq!(started_before_cancel, 1);
        assert_eq!(engine.renders().len(), started_before_cancel);
        assert!(files_under(dir.path()).iter().all(|p| !is_partial(p)));
    }

    #[tokio::test]
    async fn test_cancelled_export_schedules_nothing() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(FakeEngine::new());
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let targets = vec![ExportTarget::new(AspectRatio::Portrait, QualityProfile::social())];

        let result = run(&exporter(engine.clone()).with_cancel(rx), &dir, &targets, None).await;
        assert!(matches!(result, Err(MediaError::Cancelled)));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_captions_are_burned_where_cues_overlap() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(FakeEngine::new());
        let captions = CaptionSource {
            cues: parse_srt("1\n00:00:02,000 --> 00:00:05,000\nHi\n").unwrap(),
            style: CaptionConfig::default(),
        };
        let targets = vec![ExportTarget::new(AspectRatio::Portrait, QualityProfile::social())];

        let report = run(&exporter(engine.clone()), &dir, &targets, Some(&captions))
            .await
            .unwrap();

        assert_eq!(
            report.clips[0].captions.as_deref(),
            Some(dir.path().join("out/captions/clip_000000000_000020000.srt").as_path())
        );
        assert!(report.clips[1].captions.is_none());
        let burned: Vec<bool> = engine
            .renders()
            .into_iter()
            .map(|c| matches!(c, Call::Render { captions: true, .. }))
            .collect();
        assert_eq!(burned.iter().filter(|b| **b).count(), 1);
    }

    #[tokio::test]
    async fn test_master_without_video_is_rejected() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(FakeEngine::new());
        let master = MediaAsset::new(dir.path().join("master.mp4"), 120.0).with_audio(48_000, 2);
        let segments = segments();
        let targets = vec![ExportTarget::new(AspectRatio::Portrait, QualityProfile::social())];
        let request = ExportRequest {
            master: &master,
            segments: &segments,
            targets: &targets,
            output_dir: dir.path(),
            work_dir: dir.path(),
            captions: None,
        };
        let result = exporter(engine).export(&request, |_, _| {}).await;
        assert!(matches!(result, Err(MediaError::IncompatibleStream(_))));
    }
}
