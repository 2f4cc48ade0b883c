//! Run progress accounting and durable checkpoints.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defaults;
use crate::models::{EnrichmentResult, EnrichmentStatus, RunFilter};

/// Lifecycle phase of the run controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    #[default]
    Idle,
    Counting,
    Resuming,
    Running,
    Stopping,
}

impl RunPhase {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Counting => write!(f, "counting"),
            Self::Resuming => write!(f, "resuming"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

/// Parameters of one run. Persisted with the checkpoint so a resume replays
/// the same selection and pacing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunPlan {
    pub filter: RunFilter,
    pub batch_size: usize,
    pub workers: usize,
    pub batch_delay_ms: u64,
}

impl RunPlan {
    pub fn new(filter: RunFilter) -> Self {
        Self {
            filter,
            batch_size: defaults::BATCH_SIZE,
            workers: defaults::WORKERS,
            batch_delay_ms: defaults::BATCH_DELAY_MS,
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
}

/// A recent per-entity failure surfaced to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentError {
    pub stable_id: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Live counters for the current (or last) run.
///
/// `processed == succeeded + failed` holds after every [`RunProgress::fold`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    pub run_id: Option<Uuid>,
    pub phase: RunPhase,
    pub running: bool,
    pub total: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Offset of the batch being read or processed.
    pub current_offset: u64,
    /// Offset just past the last fully processed batch.
    pub last_completed_offset: u64,
    pub failure_breakdown: BTreeMap<EnrichmentStatus, u64>,
    pub recent_errors: VecDeque<RecentError>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RunProgress {
    /// Fresh counters for a new run.
    pub fn starting(run_id: Uuid, total: u64, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Some(run_id),
            phase: RunPhase::Running,
            running: true,
            total,
            started_at: Some(started_at),
            updated_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Restore counters from a checkpoint. The total is re-counted by the
    /// caller because the store may have changed since the save.
    pub fn resumed(checkpoint: &Checkpoint, total: u64) -> Self {
        Self {
            run_id: Some(checkpoint.run_id),
            phase: RunPhase::Running,
            running: true,
            total,
            processed: checkpoint.processed,
            succeeded: checkpoint.succeeded,
            failed: checkpoint.failed,
            current_offset: checkpoint.last_completed_offset,
            last_completed_offset: checkpoint.last_completed_offset,
            failure_breakdown: checkpoint.failure_breakdown.clone(),
            recent_errors: VecDeque::new(),
            started_at: Some(checkpoint.started_at),
            updated_at: Some(Utc::now()),
        }
    }

    /// Fold one batch of results into the counters.
    pub fn fold(&mut self, results: &[EnrichmentResult]) {
        let now = Utc::now();
        for result in results {
            self.processed += 1;
            if result.status.is_success() {
                self.succeeded += 1;
                continue;
            }
            self.failed += 1;
            *self.failure_breakdown.entry(result.status).or_insert(0) += 1;
            if result.status == EnrichmentStatus::Error {
                self.push_error(RecentError {
                    stable_id: result.stable_id.clone(),
                    message: result
                        .error_detail
                        .clone()
                        .unwrap_or_else(|| result.status.to_string()),
                    at: now,
                });
            }
        }
        self.updated_at = Some(now);
    }

    fn push_error(&mut self, err: RecentError) {
        if self.recent_errors.len() == defaults::RECENT_ERRORS_CAPACITY {
            self.recent_errors.pop_front();
        }
        self.recent_errors.push_back(err);
    }

    /// Percent of `total` processed, clamped to 100.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.processed as f64 / self.total as f64 * 100.0).min(100.0)
    }

    /// Durable snapshot of this run.
    pub fn to_checkpoint(&self, plan: &RunPlan) -> Option<Checkpoint> {
        Some(Checkpoint {
            run_id: self.run_id?,
            plan: plan.clone(),
            started_at: self.started_at?,
            last_completed_offset: self.last_completed_offset,
            processed: self.processed,
            succeeded: self.succeeded,
            failed: self.failed,
            failure_breakdown: self.failure_breakdown.clone(),
            saved_at: Utc::now(),
        })
    }
}

/// Durable resume point. Written only after a whole batch completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: Uuid,
    pub plan: RunPlan,
    pub started_at: DateTime<Utc>,
    pub last_completed_offset: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    #[serde(default)]
    pub failure_breakdown: BTreeMap<EnrichmentStatus, u64>,
    pub saved_at: DateTime<Utc>,
}
