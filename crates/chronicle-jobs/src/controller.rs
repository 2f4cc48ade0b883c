//! Run controller: drives batches from the candidate source through the
//! worker pool and checkpoints after each one.
//!
//! ```text
//! Idle --start--> Counting --> Running --(stop)--> Stopping --> Idle
//! Idle --resume-> Resuming --> Running --(done)--> Idle
//! ```
//!
//! One background task owns the run. Operator calls only touch the shared
//! [`RunProgress`] (behind one mutex) and the cooperative stop flag, which
//! the run loop checks between batches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use chronicle_core::{
    CandidateSource, Checkpoint, CheckpointStore, EnrichmentCandidate, EntityKind, Error,
    EventBus, EventEnvelope, Result, RunEvent, RunFilter, RunPhase, RunPlan, RunProgress,
};

use crate::config::EnrichmentConfig;
use crate::pool::WorkerPool;

/// Controller settings that are not part of a run plan.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Same-offset retries after a failed batch read.
    pub read_retries: u32,
    /// Fixed wait between read retries.
    pub read_retry_wait: Duration,
    /// Plan used by `resume` when no checkpoint exists.
    pub fallback_plan: RunPlan,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from(&EnrichmentConfig::default())
    }
}

impl From<&EnrichmentConfig> for ControllerConfig {
    fn from(config: &EnrichmentConfig) -> Self {
        Self {
            read_retries: config.read_retries,
            read_retry_wait: config.read_retry_wait(),
            fallback_plan: config.plan(RunFilter::default_for(EntityKind::Person)),
        }
    }
}

impl ControllerConfig {
    pub fn with_fallback_plan(mut self, plan: RunPlan) -> Self {
        self.fallback_plan = plan;
        self
    }

    pub fn with_read_retries(mut self, retries: u32, wait: Duration) -> Self {
        self.read_retries = retries;
        self.read_retry_wait = wait;
        self
    }
}

enum RunStart {
    Fresh(RunPlan),
    Resume,
}

/// Owns the enrichment run and its background task.
///
/// `start` and `resume` are single-flight: while a run is active they return
/// the current progress unchanged instead of starting a second run.
pub struct RunController {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    source: Arc<dyn CandidateSource>,
    pool: WorkerPool,
    checkpoints: Arc<dyn CheckpointStore>,
    config: ControllerConfig,
    progress: Mutex<RunProgress>,
    stop: AtomicBool,
    wake: Notify,
    events: EventBus,
}

impl RunController {
    pub fn new(
        source: Arc<dyn CandidateSource>,
        pool: WorkerPool,
        checkpoints: Arc<dyn CheckpointStore>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                pool,
                checkpoints,
                config,
                progress: Mutex::new(RunProgress::default()),
                stop: AtomicBool::new(false),
                wake: Notify::new(),
                events: EventBus::default(),
            }),
            task: Mutex::new(None),
        }
    }

    /// Start a fresh run from offset 0.
    pub async fn start(&self, plan: RunPlan) -> Result<RunProgress> {
        self.launch(RunPhase::Counting, RunStart::Fresh(plan)).await
    }

    /// Continue from the stored checkpoint, or from offset 0 with the
    /// fallback plan when there is none.
    pub async fn resume(&self) -> Result<RunProgress> {
        self.launch(RunPhase::Resuming, RunStart::Resume).await
    }

    async fn launch(&self, phase: RunPhase, start: RunStart) -> Result<RunProgress> {
        let mut task = self.task.lock().await;
        let snapshot = {
            let mut progress = self.inner.progress.lock().await;
            if !progress.phase.is_idle() {
                info!(
                    subsystem = "jobs",
                    component = "controller",
                    phase = %progress.phase,
                    "Run already active, ignoring request"
                );
                return Ok(progress.clone());
            }
            progress.phase = phase;
            progress.clone()
        };

        self.inner.stop.store(false, Ordering::SeqCst);
        // A stop that found no pending batch delay left a permit behind;
        // consume it so it cannot cut this run's first delay short.
        let _ = self.inner.wake.notified().now_or_never();
        let inner = self.inner.clone();
        *task = Some(tokio::spawn(async move { inner.run(start).await }));
        Ok(snapshot)
    }

    /// Ask the active run to stop after its in-flight batch.
    pub async fn stop(&self) -> RunProgress {
        let mut progress = self.inner.progress.lock().await;
        if !progress.phase.is_idle() {
            info!(
                subsystem = "jobs",
                component = "controller",
                offset = progress.current_offset,
                "Stop requested"
            );
            self.inner.stop.store(true, Ordering::SeqCst);
            self.inner.wake.notify_one();
            progress.phase = RunPhase::Stopping;
        }
        progress.clone()
    }

    /// Wait for the background task of the last run to finish.
    pub async fn wait(&self) -> Result<()> {
        let handle = self.task.lock().await.take();
        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| Error::Internal(format!("run task failed: {}", e))),
            None => Ok(()),
        }
    }

    /// Latest progress snapshot.
    pub async fn progress(&self) -> RunProgress {
        self.inner.progress.lock().await.clone()
    }

    pub async fn phase(&self) -> RunPhase {
        self.inner.progress.lock().await.phase
    }

    /// Zero the counters and drop the checkpoint. Only allowed while idle.
    pub async fn reset(&self) -> Result<()> {
        let mut progress = self.inner.progress.lock().await;
        if !progress.phase.is_idle() {
            return Err(Error::RunActive(format!(
                "cannot reset while {}",
                progress.phase
            )));
        }
        self.inner.checkpoints.clear().await?;
        *progress = RunProgress::default();
        info!(subsystem = "jobs", component = "controller", "Run state reset");
        Ok(())
    }

    pub fn events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.inner.events.subscribe()
    }
}

impl Inner {
    async fn run(self: Arc<Self>, start: RunStart) {
        let prepared = match start {
            RunStart::Fresh(plan) => self.prepare_fresh(plan).await,
            RunStart::Resume => self.prepare_resume().await,
        };
        match prepared {
            Ok(plan) => self.drive(plan).await,
            Err(e) => {
                error!(
                    subsystem = "jobs",
                    component = "controller",
                    error = %e,
                    "Could not start run"
                );
                self.progress.lock().await.phase = RunPhase::Idle;
                self.events.emit(RunEvent::Aborted {
                    run_id: None,
                    offset: 0,
                    error: e.to_string(),
                });
            }
        }
    }

    /// Count candidates and initialise progress. Progress is only replaced
    /// once the count succeeded.
    async fn prepare_fresh(&self, mut plan: RunPlan) -> Result<RunPlan> {
        let run_id = Uuid::now_v7();
        let started_at = Utc::now();
        // Entities this run writes back keep matching, so offsets stay put.
        plan.filter = plan.filter.pinned(started_at);

        let total = self.source.count(&plan.filter).await?;
        let progress = RunProgress::starting(run_id, total, started_at);

        // An initial checkpoint makes a stop before the first batch
        // resumable as this run rather than a previous one.
        if let Some(checkpoint) = progress.to_checkpoint(&plan) {
            self.save_checkpoint(&checkpoint).await;
        }
        self.install(progress).await;

        info!(
            subsystem = "jobs",
            component = "controller",
            %run_id,
            kind = %plan.filter.kind,
            criterion = %plan.filter.criterion,
            total,
            batch_size = plan.batch_size,
            workers = plan.workers,
            "Run started"
        );
        self.events.emit(RunEvent::Started {
            run_id,
            kind: plan.filter.kind,
            total,
            resumed_from: None,
        });
        Ok(plan)
    }

    async fn prepare_resume(&self) -> Result<RunPlan> {
        let checkpoint = match self.checkpoints.load().await {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "controller",
                    error = %e,
                    "Checkpoint unreadable, starting fresh"
                );
                None
            }
        };
        let Some(checkpoint) = checkpoint else {
            info!(
                subsystem = "jobs",
                component = "controller",
                "No checkpoint, starting fresh at offset 0"
            );
            return self.prepare_fresh(self.config.fallback_plan.clone()).await;
        };

        self.resume_from(checkpoint).await
    }

    async fn resume_from(&self, checkpoint: Checkpoint) -> Result<RunPlan> {
        let plan = checkpoint.plan.clone();
        let total = self.source.count(&plan.filter).await?;
        self.install(RunProgress::resumed(&checkpoint, total)).await;

        info!(
            subsystem = "jobs",
            component = "controller",
            run_id = %checkpoint.run_id,
            offset = checkpoint.last_completed_offset,
            processed = checkpoint.processed,
            total,
            "Run resumed"
        );
        self.events.emit(RunEvent::Started {
            run_id: checkpoint.run_id,
            kind: plan.filter.kind,
            total,
            resumed_from: Some(checkpoint.last_completed_offset),
        });
        Ok(plan)
    }

    #[instrument(skip(self, plan), fields(subsystem = "jobs", component = "controller", kind = %plan.filter.kind))]
    async fn drive(&self, plan: RunPlan) {
        let started = Instant::now();
        let (run_id, mut offset) = {
            let progress = self.progress.lock().await;
            (
                progress.run_id.unwrap_or_else(Uuid::now_v7),
                progress.last_completed_offset,
            )
        };

        loop {
            if self.stop.load(Ordering::SeqCst) {
                self.finish().await;
                info!(%run_id, offset, "Run stopped");
                self.events.emit(RunEvent::Stopped { run_id, offset });
                return;
            }

            self.progress.lock().await.current_offset = offset;
            let batch = match self.read_batch(run_id, &plan, offset).await {
                Ok(batch) => batch,
                Err(e) => {
                    self.finish().await;
                    error!(
                        %run_id,
                        offset,
                        error = %e,
                        "Candidate reads kept failing, run aborted; checkpoint kept for resume"
                    );
                    self.events.emit(RunEvent::Aborted {
                        run_id: Some(run_id),
                        offset,
                        error: e.to_string(),
                    });
                    return;
                }
            };

            if batch.is_empty() {
                break;
            }
            let size = batch.len();
            let results = self.pool.run_batch(batch, plan.workers).await;
            offset += size as u64;

            let (checkpoint, processed, succeeded, failed) = {
                let mut progress = self.progress.lock().await;
                progress.fold(&results);
                progress.last_completed_offset = offset;
                progress.current_offset = offset;
                (
                    progress.to_checkpoint(&plan),
                    progress.processed,
                    progress.succeeded,
                    progress.failed,
                )
            };
            if let Some(checkpoint) = checkpoint {
                if !self.save_checkpoint(&checkpoint).await {
                    self.events.emit(RunEvent::CheckpointFailed {
                        run_id,
                        offset,
                        error: "checkpoint write failed".into(),
                    });
                }
            }

            info!(
                %run_id,
                offset,
                size,
                processed,
                succeeded,
                failed,
                "Batch completed"
            );
            self.events.emit(RunEvent::BatchCompleted {
                run_id,
                offset,
                size,
                processed,
                succeeded,
                failed,
            });

            // A short page means the source is exhausted.
            if size < plan.batch_size {
                break;
            }
            if plan.batch_delay_ms > 0 && !self.stop.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(plan.batch_delay_ms)) => {}
                    _ = self.wake.notified() => {}
                }
            }
        }

        // Persist before going idle, so a reset or start that follows the
        // phase change never races this write.
        let checkpoint = self.progress.lock().await.to_checkpoint(&plan);
        if let Some(checkpoint) = checkpoint {
            self.save_checkpoint(&checkpoint).await;
        }
        let final_progress = self.finish().await;
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            %run_id,
            processed = final_progress.processed,
            succeeded = final_progress.succeeded,
            failed = final_progress.failed,
            duration_ms,
            "Run completed"
        );
        self.events.emit(RunEvent::Completed {
            run_id,
            processed: final_progress.processed,
            succeeded: final_progress.succeeded,
            failed: final_progress.failed,
            duration_ms,
        });
    }

    /// Read one page, retrying the same offset on failure.
    async fn read_batch(
        &self,
        run_id: Uuid,
        plan: &RunPlan,
        offset: u64,
    ) -> Result<Vec<EnrichmentCandidate>> {
        let mut attempt = 0;
        loop {
            match self
                .source
                .next_batch(&plan.filter, offset, plan.batch_size)
                .await
            {
                Ok(batch) => {
                    debug!(offset, size = batch.len(), "Batch read");
                    return Ok(batch);
                }
                Err(e) if attempt < self.config.read_retries => {
                    attempt += 1;
                    warn!(
                        %run_id,
                        offset,
                        attempt,
                        max_retries = self.config.read_retries,
                        error = %e,
                        "Batch read failed, retrying same offset"
                    );
                    self.events.emit(RunEvent::ReadRetry {
                        run_id,
                        offset,
                        attempt,
                        error: e.to_string(),
                    });
                    tokio::time::sleep(self.config.read_retry_wait).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Persist a checkpoint. A failed save is logged and the previous
    /// checkpoint stays in place.
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> bool {
        match self.checkpoints.save(checkpoint).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    subsystem = "jobs",
                    component = "controller",
                    offset = checkpoint.last_completed_offset,
                    error = %e,
                    "Checkpoint write failed; previous checkpoint kept"
                );
                false
            }
        }
    }

    /// Replace progress once a run is set up. A stop requested while
    /// counting stays visible.
    async fn install(&self, mut progress: RunProgress) {
        if self.stop.load(Ordering::SeqCst) {
            progress.phase = RunPhase::Stopping;
        }
        *self.progress.lock().await = progress;
    }

    /// Return to idle and hand back the final snapshot.
    async fn finish(&self) -> RunProgress {
        let mut progress = self.progress.lock().await;
        progress.phase = RunPhase::Idle;
        progress.running = false;
        progress.updated_at = Some(Utc::now());
        progress.clone()
    }
}
