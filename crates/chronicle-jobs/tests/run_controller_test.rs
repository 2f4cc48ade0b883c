//! Run controller integration tests against the in-memory graph.
//!
//! - Run-001: every candidate is processed exactly once for any batch size
//!   and worker count
//! - Run-002: resume starts reading at the checkpointed offset
//! - Run-003: stop after a batch, then resume, covers every candidate once
//! - Run-004: failed batch reads are retried at the same offset
//! - Run-005: exhausted read retries abort and keep the checkpoint
//! - Run-006: a failed checkpoint write leaves the previous checkpoint
//! - Run-007: start/resume are single-flight
//! - Run-008: reset is rejected while a run is active
//! - Run-009: a failed count returns to idle without touching progress
//! - Run-010: a reset issued once the run reports idle is not undone by
//!   the final checkpoint write
//! - Run-011: a stop with no pending batch delay does not shorten the
//!   next run's delays

mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use chronicle_core::{
    CandidateSource, Checkpoint, CheckpointStore, EnrichmentCandidate, EnrichmentStatus,
    EntityKind, Error, Result, RunEvent, RunFilter, RunPhase,
};
use chronicle_db::MemoryGraphStore;
use chronicle_jobs::{MemoryCheckpointStore, RunController, SubmissionThrottle, WorkerPool};
use uuid::Uuid;

use common::{controller, drain, fast_config, plan, seeded_store, wait_for, StubResolver};

#[tokio::test]
async fn test_every_candidate_processed_once() {
    for (n, batch, workers) in [(0, 10, 2), (1, 10, 1), (37, 10, 3), (50, 50, 5), (100, 7, 4)] {
        let store = seeded_store(EntityKind::Event, n);
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let ctl = controller(
            store.clone(),
            checkpoints.clone(),
            Arc::new(StubResolver::default()),
            fast_config(),
        );

        ctl.start(plan(EntityKind::Event, batch, workers))
            .await
            .unwrap();
        ctl.wait().await.unwrap();

        let progress = ctl.progress().await;
        assert_eq!(progress.processed, n as u64, "n={} batch={}", n, batch);
        assert_eq!(progress.succeeded + progress.failed, n as u64);
        assert_eq!(progress.total, n as u64);
        assert_eq!(progress.last_completed_offset, n as u64);
        assert_eq!(progress.phase, RunPhase::Idle);
        assert!(!progress.running);

        let upserted: HashSet<String> = store.upserts().into_iter().map(|(_, id, _)| id).collect();
        assert_eq!(store.upsert_count(), n);
        assert_eq!(upserted.len(), n);

        let checkpoint = checkpoints.current().await.unwrap();
        assert_eq!(checkpoint.last_completed_offset, n as u64);
    }
}

#[tokio::test]
async fn test_mixed_outcomes_are_tallied() {
    let store = seeded_store(EntityKind::Person, 8);
    store.insert_entity(EntityKind::Person, "0008", None);
    store.insert_entity(EntityKind::Person, "0009", Some("  "));
    store.fail_upserts_for("0003");

    let ctl = controller(
        store.clone(),
        Arc::new(MemoryCheckpointStore::new()),
        Arc::new(StubResolver::default()),
        fast_config(),
    );
    ctl.start(plan(EntityKind::Person, 4, 2)).await.unwrap();
    ctl.wait().await.unwrap();

    let progress = ctl.progress().await;
    assert_eq!(progress.processed, 10);
    assert_eq!(progress.succeeded, 7);
    assert_eq!(progress.failed, 3);
    assert_eq!(progress.failure_breakdown[&EnrichmentStatus::SkippedNoName], 2);
    assert_eq!(progress.failure_breakdown[&EnrichmentStatus::Error], 1);
    assert_eq!(progress.recent_errors.len(), 1);
    assert_eq!(progress.recent_errors[0].stable_id, "0003");
}

#[tokio::test]
async fn test_resume_starts_at_checkpoint_offset() {
    let store = seeded_store(EntityKind::Event, 150);
    let started_at = Utc::now() - ChronoDuration::minutes(5);
    let mut run_plan = plan(EntityKind::Event, 50, 5);
    run_plan.filter = run_plan.filter.pinned(started_at);
    let run_id = Uuid::now_v7();
    let checkpoints = Arc::new(MemoryCheckpointStore::with_checkpoint(Checkpoint {
        run_id,
        plan: run_plan,
        started_at,
        last_completed_offset: 100,
        processed: 100,
        succeeded: 100,
        failed: 0,
        failure_breakdown: Default::default(),
        saved_at: Utc::now(),
    }));

    let ctl = controller(
        store.clone(),
        checkpoints.clone(),
        Arc::new(StubResolver::default()),
        fast_config(),
    );
    let mut events = ctl.events();
    ctl.resume().await.unwrap();
    ctl.wait().await.unwrap();

    assert_eq!(store.batch_reads()[0], 100);
    assert_eq!(store.upsert_count(), 50);
    assert!(store.upserts().iter().all(|(_, id, _)| id.as_str() >= "0100"));

    let progress = ctl.progress().await;
    assert_eq!(progress.run_id, Some(run_id));
    assert_eq!(progress.processed, 150);
    assert_eq!(progress.last_completed_offset, 150);

    let started = drain(&mut events)
        .into_iter()
        .find(|e| matches!(e, RunEvent::Started { .. }))
        .unwrap();
    assert!(matches!(started, RunEvent::Started { resumed_from: Some(100), .. }));
}

#[tokio::test]
async fn test_stop_then_resume_covers_every_candidate_once() {
    let store = seeded_store(EntityKind::Event, 60);
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let ctl = controller(
        store.clone(),
        checkpoints.clone(),
        Arc::new(StubResolver::with_delay(20)),
        fast_config(),
    );

    let mut events = ctl.events();
    ctl.start(plan(EntityKind::Event, 10, 2)).await.unwrap();
    wait_for(&mut events, |e| matches!(e, RunEvent::BatchCompleted { .. })).await;
    let stopping = ctl.stop().await;
    assert_eq!(stopping.phase, RunPhase::Stopping);
    ctl.wait().await.unwrap();

    let stopped = ctl.progress().await;
    assert_eq!(stopped.phase, RunPhase::Idle);
    assert!(stopped.last_completed_offset < 60);
    assert_eq!(stopped.last_completed_offset % 10, 0);
    let saved = checkpoints.current().await.unwrap();
    assert_eq!(saved.last_completed_offset, stopped.last_completed_offset);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, RunEvent::Stopped { .. })));

    let reads_before = store.batch_reads().len();
    ctl.resume().await.unwrap();
    ctl.wait().await.unwrap();

    assert_eq!(
        store.batch_reads()[reads_before],
        stopped.last_completed_offset
    );
    let ids: Vec<String> = store.upserts().into_iter().map(|(_, id, _)| id).collect();
    let distinct: HashSet<&String> = ids.iter().collect();
    assert_eq!(ids.len(), 60);
    assert_eq!(distinct.len(), 60);
    assert_eq!(ctl.progress().await.processed, 60);
}

#[tokio::test]
async fn test_read_failure_retried_at_same_offset() {
    let store = seeded_store(EntityKind::Event, 25);
    store.script_reads([false, true, true, false]);
    let ctl = controller(
        store.clone(),
        Arc::new(MemoryCheckpointStore::new()),
        Arc::new(StubResolver::default()),
        fast_config(),
    );

    let mut events = ctl.events();
    ctl.start(plan(EntityKind::Event, 10, 2)).await.unwrap();
    ctl.wait().await.unwrap();

    assert_eq!(store.batch_reads(), vec![0, 10, 10, 10, 20]);
    assert_eq!(ctl.progress().await.processed, 25);
    let retries = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, RunEvent::ReadRetry { offset: 10, .. }))
        .count();
    assert_eq!(retries, 2);
}

#[tokio::test]
async fn test_exhausted_read_retries_abort_and_keep_checkpoint() {
    let store = seeded_store(EntityKind::Event, 30);
    store.script_reads([false, true, true, true, true]);
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let ctl = controller(
        store.clone(),
        checkpoints.clone(),
        Arc::new(StubResolver::default()),
        fast_config(),
    );

    let mut events = ctl.events();
    ctl.start(plan(EntityKind::Event, 10, 2)).await.unwrap();
    ctl.wait().await.unwrap();

    assert_eq!(store.batch_reads(), vec![0, 10, 10, 10, 10]);
    let progress = ctl.progress().await;
    assert_eq!(progress.phase, RunPhase::Idle);
    assert_eq!(progress.processed, 10);
    assert_eq!(
        checkpoints.current().await.unwrap().last_completed_offset,
        10
    );
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, RunEvent::Aborted { offset: 10, .. })));

    // The kept checkpoint resumes where the failed read was.
    ctl.resume().await.unwrap();
    ctl.wait().await.unwrap();
    assert_eq!(store.batch_reads()[5], 10);
    assert_eq!(ctl.progress().await.processed, 30);
}

#[tokio::test]
async fn test_failed_checkpoint_write_keeps_previous() {
    let store = seeded_store(EntityKind::Event, 30);
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let ctl = controller(
        store.clone(),
        checkpoints.clone(),
        Arc::new(StubResolver::with_delay(30)),
        fast_config(),
    );

    let mut events = ctl.events();
    ctl.start(plan(EntityKind::Event, 10, 2)).await.unwrap();
    wait_for(&mut events, |e| matches!(e, RunEvent::BatchCompleted { offset: 10, .. })).await;
    // Every later write fails, as if the process died before writing.
    checkpoints.fail_next_saves(u32::MAX);
    ctl.wait().await.unwrap();

    assert_eq!(ctl.progress().await.last_completed_offset, 30);
    let kept = checkpoints.current().await.unwrap();
    assert_eq!(kept.last_completed_offset, 10);
    assert_eq!(kept.processed, 10);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, RunEvent::CheckpointFailed { .. })));

    // Recovery replays from the intact checkpoint.
    checkpoints.fail_next_saves(0);
    let reads_before = store.batch_reads().len();
    ctl.resume().await.unwrap();
    ctl.wait().await.unwrap();
    assert_eq!(store.batch_reads()[reads_before], 10);
}

#[tokio::test]
async fn test_start_is_single_flight() {
    let store = seeded_store(EntityKind::Event, 20);
    let ctl = controller(
        store.clone(),
        Arc::new(MemoryCheckpointStore::new()),
        Arc::new(StubResolver::with_delay(10)),
        fast_config(),
    );

    let mut events = ctl.events();
    ctl.start(plan(EntityKind::Event, 5, 2)).await.unwrap();
    let again = ctl.start(plan(EntityKind::Event, 5, 2)).await.unwrap();
    assert!(!again.phase.is_idle());
    let resumed = ctl.resume().await.unwrap();
    assert!(!resumed.phase.is_idle());
    ctl.wait().await.unwrap();

    assert_eq!(store.upsert_count(), 20);
    let starts = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, RunEvent::Started { .. }))
        .count();
    assert_eq!(starts, 1);
}

#[tokio::test]
async fn test_reset_only_when_idle() {
    let store = seeded_store(EntityKind::Event, 20);
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let ctl = controller(
        store,
        checkpoints.clone(),
        Arc::new(StubResolver::with_delay(10)),
        fast_config(),
    );

    ctl.start(plan(EntityKind::Event, 5, 2)).await.unwrap();
    assert!(matches!(ctl.reset().await, Err(Error::RunActive(_))));
    ctl.wait().await.unwrap();
    assert!(checkpoints.current().await.is_some());

    ctl.reset().await.unwrap();
    assert!(checkpoints.current().await.is_none());
    let progress = ctl.progress().await;
    assert_eq!(progress.processed, 0);
    assert_eq!(progress.run_id, None);
}

/// Source whose count always fails.
struct UncountableSource;

#[async_trait]
impl CandidateSource for UncountableSource {
    async fn count(&self, _filter: &RunFilter) -> Result<u64> {
        Err(Error::StoreUnavailable("connection refused".into()))
    }

    async fn next_batch(
        &self,
        _filter: &RunFilter,
        _offset: u64,
        _size: usize,
    ) -> Result<Vec<EnrichmentCandidate>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_count_failure_returns_to_idle() {
    let store = Arc::new(MemoryGraphStore::new());
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let enricher = Arc::new(chronicle_jobs::EntityEnricher::new(
        store,
        Arc::new(StubResolver::default()),
    ));
    let ctl = RunController::new(
        Arc::new(UncountableSource),
        WorkerPool::new(enricher).with_throttle(SubmissionThrottle::disabled()),
        checkpoints.clone(),
        fast_config(),
    );

    let mut events = ctl.events();
    let snapshot = ctl.start(plan(EntityKind::Event, 5, 1)).await.unwrap();
    assert_eq!(snapshot.phase, RunPhase::Counting);
    ctl.wait().await.unwrap();

    let progress = ctl.progress().await;
    assert_eq!(progress.phase, RunPhase::Idle);
    assert_eq!(progress.run_id, None);
    assert_eq!(progress.total, 0);
    assert!(checkpoints.load().await.unwrap().is_none());
    let aborted = wait_for(&mut events, |e| e.is_terminal()).await;
    assert!(matches!(aborted, RunEvent::Aborted { run_id: None, .. }));
}

#[tokio::test]
async fn test_resume_without_checkpoint_uses_fallback_plan() {
    let store = seeded_store(EntityKind::Event, 5);
    let ctl = controller(
        store.clone(),
        Arc::new(MemoryCheckpointStore::new()),
        Arc::new(StubResolver::default()),
        fast_config().with_fallback_plan(plan(EntityKind::Event, 2, 1)),
    );

    ctl.resume().await.unwrap();
    ctl.wait().await.unwrap();

    assert_eq!(store.batch_reads()[0], 0);
    assert_eq!(ctl.progress().await.processed, 5);
}

/// Checkpoint store whose saves from the `slow_from`-th on take a while.
struct SlowSaveStore {
    inner: MemoryCheckpointStore,
    saves: AtomicUsize,
    slow_from: usize,
}

#[async_trait]
impl CheckpointStore for SlowSaveStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let n = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
        if n >= self.slow_from {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        self.inner.save(checkpoint).await
    }

    async fn load(&self) -> Result<Option<Checkpoint>> {
        self.inner.load().await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }
}

#[tokio::test]
async fn test_reset_after_idle_survives_final_checkpoint() {
    let store = seeded_store(EntityKind::Event, 5);
    // Saves: initial, after the only full batch, final.
    let checkpoints = Arc::new(SlowSaveStore {
        inner: MemoryCheckpointStore::new(),
        saves: AtomicUsize::new(0),
        slow_from: 3,
    });
    let enricher = Arc::new(chronicle_jobs::EntityEnricher::new(
        store.clone(),
        Arc::new(StubResolver::default()),
    ));
    let ctl = RunController::new(
        store,
        WorkerPool::new(enricher).with_throttle(SubmissionThrottle::disabled()),
        checkpoints.clone(),
        fast_config(),
    );

    ctl.start(plan(EntityKind::Event, 5, 2)).await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), async {
        while ctl.phase().await != RunPhase::Idle {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("run never went idle");

    ctl.reset().await.unwrap();
    assert!(checkpoints.load().await.unwrap().is_none());
    ctl.wait().await.unwrap();

    assert!(checkpoints.load().await.unwrap().is_none());
    assert_eq!(checkpoints.saves.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_stop_without_pending_delay_keeps_next_run_delays() {
    let store = seeded_store(EntityKind::Event, 4);
    let ctl = controller(
        store,
        Arc::new(MemoryCheckpointStore::new()),
        Arc::new(StubResolver::default()),
        fast_config(),
    );

    // Stopped while counting: nothing sleeps, so the wake-up has no waiter.
    ctl.start(plan(EntityKind::Event, 10, 1)).await.unwrap();
    ctl.stop().await;
    ctl.wait().await.unwrap();
    assert_eq!(ctl.progress().await.processed, 0);

    // Two full batches of two, each followed by a 300 ms delay.
    let started = Instant::now();
    ctl.start(plan(EntityKind::Event, 2, 1).with_batch_delay_ms(300))
        .await
        .unwrap();
    ctl.wait().await.unwrap();

    assert_eq!(ctl.progress().await.processed, 4);
    assert!(
        started.elapsed() >= Duration::from_millis(550),
        "run took {:?}",
        started.elapsed()
    );
}
