//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Process-wide settings for the coordinator and pipeline.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Maximum concurrent cut/render calls, shared by all jobs
    pub max_parallel_exports: usize,
    /// Kill an FFmpeg process after this long
    pub ffmpeg_timeout: Duration,
    /// Root for per-job scratch directories
    pub work_dir: PathBuf,
    /// Retries for a failing export render
    pub export_retries: u32,
    /// Delay before the first export retry; doubles each attempt
    pub export_retry_delay: Duration,
    /// Leave scratch directories behind for debugging
    pub keep_work_dir: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            max_parallel_exports: 4,
            ffmpeg_timeout: Duration::from_secs(3600), // 1 hour
            work_dir: std::env::temp_dir().join("sfc"),
            export_retries: 2,
            export_retry_delay: Duration::from_millis(500),
            keep_work_dir: false,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: env_or("SFC_MAX_JOBS", defaults.max_concurrent_jobs).max(1),
            max_parallel_exports: env_or("SFC_MAX_EXPORTS", defaults.max_parallel_exports).max(1),
            ffmpeg_timeout: Duration::from_secs(env_or(
                "SFC_FFMPEG_TIMEOUT",
                defaults.ffmpeg_timeout.as_secs(),
            )),
            work_dir: std::env::var("SFC_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            export_retries: env_or("SFC_EXPORT_RETRIES", defaults.export_retries),
            export_retry_delay: Duration::from_millis(env_or(
                "SFC_EXPORT_RETRY_DELAY_MS",
                defaults.export_retry_delay.as_millis() as u64,
            )),
            keep_work_dir: env_or("SFC_KEEP_WORK_DIR", defaults.keep_work_dir),
        }
    }

    pub fn with_max_concurrent_jobs(mut self, jobs: usize) -> Self {
        self.max_concurrent_jobs = jobs.max(1);
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }
}
