//! Shared fixtures for run controller tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chronicle_core::{
    AttributeBundle, Criterion, EntityKind, EventEnvelope, ExternalKey, ExternalResolver, Lookup,
    Result, RunEvent, RunFilter, RunPlan,
};
use chronicle_db::MemoryGraphStore;
use chronicle_jobs::{
    ControllerConfig, EntityEnricher, MemoryCheckpointStore, RunController, SubmissionThrottle,
    WorkerPool,
};
use tokio::sync::broadcast;

/// Resolves every name to one key derived from the name and returns a
/// description-only bundle.
#[derive(Default)]
pub struct StubResolver {
    pub delay: Duration,
    pub identity_calls: AtomicUsize,
}

impl StubResolver {
    pub fn with_delay(ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(ms),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ExternalResolver for StubResolver {
    async fn resolve_identity(
        &self,
        _kind: EntityKind,
        name: &str,
    ) -> Result<Lookup<Vec<ExternalKey>>> {
        self.identity_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let digits: String = name.chars().filter(|c| c.is_ascii_digit()).collect();
        let n: u64 = digits.parse().unwrap_or(0);
        Ok(Lookup::Found(vec![ExternalKey::parse(&format!("Q{}", 1000 + n))?]))
    }

    async fn fetch_attributes(
        &self,
        _kind: EntityKind,
        key: &ExternalKey,
    ) -> Result<Lookup<AttributeBundle>> {
        Ok(Lookup::Found(AttributeBundle::basic(
            Some(format!("entity {}", key)),
            None,
        )))
    }
}

/// Store holding `n` named entities with ids `0000`, `0001`, ...
pub fn seeded_store(kind: EntityKind, n: usize) -> Arc<MemoryGraphStore> {
    let store = Arc::new(MemoryGraphStore::new());
    for i in 0..n {
        store.insert_entity(kind, &format!("{:04}", i), Some(&format!("Entity {}", i)));
    }
    store
}

pub fn plan(kind: EntityKind, batch_size: usize, workers: usize) -> RunPlan {
    RunPlan::new(RunFilter::new(kind, Criterion::Unenriched))
        .with_batch_size(batch_size)
        .with_workers(workers)
        .with_batch_delay_ms(0)
}

pub fn fast_config() -> ControllerConfig {
    ControllerConfig::default().with_read_retries(3, Duration::from_millis(1))
}

pub fn controller(
    store: Arc<MemoryGraphStore>,
    checkpoints: Arc<MemoryCheckpointStore>,
    resolver: Arc<dyn ExternalResolver>,
    config: ControllerConfig,
) -> RunController {
    let enricher = Arc::new(EntityEnricher::new(store.clone(), resolver));
    let pool = WorkerPool::new(enricher).with_throttle(SubmissionThrottle::disabled());
    RunController::new(store, pool, checkpoints, config)
}

/// Receive events until one matches, failing the test after 10 seconds.
pub async fn wait_for(
    events: &mut broadcast::Receiver<EventEnvelope>,
    mut pred: impl FnMut(&RunEvent) -> bool,
) -> RunEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let envelope = events.recv().await.expect("event bus closed");
            if pred(&envelope.payload) {
                return envelope.payload;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Drain every event emitted so far.
pub fn drain(events: &mut broadcast::Receiver<EventEnvelope>) -> Vec<RunEvent> {
    let mut out = Vec::new();
    while let Ok(envelope) = events.try_recv() {
        out.push(envelope.payload);
    }
    out
}
