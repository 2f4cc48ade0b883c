//! Run configuration shared by the controller, worker pool and binary.

use std::path::PathBuf;
use std::time::Duration;

use chronicle_core::{defaults, RunFilter, RunPlan};

/// Configuration for enrichment runs.
#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    /// Candidates pulled per batch.
    pub batch_size: usize,
    /// Concurrent workers per batch.
    pub workers: usize,
    /// Pause between batches in milliseconds.
    pub batch_delay_ms: u64,
    /// Per-candidate timeout in seconds.
    pub task_timeout_secs: u64,
    /// Global submission rate; 0 disables the throttle.
    pub submissions_per_sec: u32,
    /// Same-offset retries after a failed batch read.
    pub read_retries: u32,
    /// Fixed wait between batch read retries in milliseconds.
    pub read_retry_wait_ms: u64,
    /// Checkpoint file. `None` keeps the checkpoint in the database.
    pub checkpoint_path: Option<PathBuf>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::BATCH_SIZE,
            workers: defaults::WORKERS,
            batch_delay_ms: defaults::BATCH_DELAY_MS,
            task_timeout_secs: defaults::TASK_TIMEOUT_SECS,
            submissions_per_sec: defaults::SUBMISSIONS_PER_SEC,
            read_retries: defaults::STORE_READ_RETRIES,
            read_retry_wait_ms: defaults::STORE_READ_RETRY_WAIT_MS,
            checkpoint_path: None,
        }
    }
}

impl EnrichmentConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `ENRICH_BATCH_SIZE` | `50` | Candidates per batch |
    /// | `ENRICH_WORKERS` | `5` | Concurrent workers |
    /// | `ENRICH_BATCH_DELAY_MS` | `1000` | Pause between batches |
    /// | `ENRICH_TASK_TIMEOUT_SECS` | `30` | Per-candidate timeout |
    /// | `ENRICH_SUBMISSIONS_PER_SEC` | `2` | Submission rate (0 disables) |
    /// | `ENRICH_READ_RETRIES` | `3` | Batch read retries |
    /// | `ENRICH_READ_RETRY_WAIT_MS` | `5000` | Wait between read retries |
    /// | `ENRICH_CHECKPOINT_PATH` | unset | Checkpoint file (database when unset) |
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            batch_size: env_parse("ENRICH_BATCH_SIZE", d.batch_size).max(1),
            workers: env_parse("ENRICH_WORKERS", d.workers).max(1),
            batch_delay_ms: env_parse("ENRICH_BATCH_DELAY_MS", d.batch_delay_ms),
            task_timeout_secs: env_parse("ENRICH_TASK_TIMEOUT_SECS", d.task_timeout_secs).max(1),
            submissions_per_sec: env_parse("ENRICH_SUBMISSIONS_PER_SEC", d.submissions_per_sec),
            read_retries: env_parse("ENRICH_READ_RETRIES", d.read_retries),
            read_retry_wait_ms: env_parse("ENRICH_READ_RETRY_WAIT_MS", d.read_retry_wait_ms),
            checkpoint_path: std::env::var("ENRICH_CHECKPOINT_PATH")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_batch_delay_ms(mut self, ms: u64) -> Self {
        self.batch_delay_ms = ms;
        self
    }

    pub fn with_task_timeout_secs(mut self, secs: u64) -> Self {
        self.task_timeout_secs = secs.max(1);
        self
    }

    pub fn with_submissions_per_sec(mut self, rate: u32) -> Self {
        self.submissions_per_sec = rate;
        self
    }

    pub fn with_read_retries(mut self, retries: u32, wait_ms: u64) -> Self {
        self.read_retries = retries;
        self.read_retry_wait_ms = wait_ms;
        self
    }

    pub fn with_checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn read_retry_wait(&self) -> Duration {
        Duration::from_millis(self.read_retry_wait_ms)
    }

    /// Run plan for `filter` with this config's pacing.
    pub fn plan(&self, filter: RunFilter) -> RunPlan {
        RunPlan::new(filter)
            .with_batch_size(self.batch_size)
            .with_workers(self.workers)
            .with_batch_delay_ms(self.batch_delay_ms)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
