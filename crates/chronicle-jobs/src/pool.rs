//! Bounded worker pool executing one batch of candidates.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, instrument, warn};

use chronicle_core::{EnrichmentCandidate, EnrichmentResult};

use crate::config::EnrichmentConfig;
use crate::enricher::EntityEnricher;
use crate::throttle::SubmissionThrottle;

/// Runs the enricher over a batch with at most `workers` candidates in
/// flight.
///
/// Every candidate is submitted exactly once and yields exactly one result,
/// including candidates whose task timed out or panicked. Results come back
/// in completion order; correlate them by `stable_id`.
#[derive(Clone)]
pub struct WorkerPool {
    enricher: Arc<EntityEnricher>,
    throttle: SubmissionThrottle,
    task_timeout: Duration,
}

impl WorkerPool {
    pub fn new(enricher: Arc<EntityEnricher>) -> Self {
        Self {
            enricher,
            throttle: SubmissionThrottle::per_second(chronicle_core::defaults::SUBMISSIONS_PER_SEC),
            task_timeout: Duration::from_secs(chronicle_core::defaults::TASK_TIMEOUT_SECS),
        }
    }

    pub fn from_config(enricher: Arc<EntityEnricher>, config: &EnrichmentConfig) -> Self {
        Self::new(enricher)
            .with_throttle(SubmissionThrottle::per_second(config.submissions_per_sec))
            .with_task_timeout(config.task_timeout())
    }

    pub fn with_throttle(mut self, throttle: SubmissionThrottle) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn enricher(&self) -> &Arc<EntityEnricher> {
        &self.enricher
    }

    /// Enrich every candidate and wait for all of them.
    #[instrument(skip(self, candidates), fields(subsystem = "jobs", component = "pool", size = candidates.len()))]
    pub async fn run_batch(
        &self,
        candidates: Vec<EnrichmentCandidate>,
        workers: usize,
    ) -> Vec<EnrichmentResult> {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let mut tasks = JoinSet::new();
        let mut submitted: Vec<String> = Vec::with_capacity(candidates.len());
        let mut results: Vec<EnrichmentResult> = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            self.throttle.acquire().await;
            // The semaphore is never closed, so acquisition only fails if
            // that invariant is broken; record the candidate rather than
            // dropping it.
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    results.push(EnrichmentResult::error(&candidate.stable_id, e.to_string()));
                    continue;
                }
            };
            submitted.push(candidate.stable_id.clone());

            let enricher = self.enricher.clone();
            let timeout = self.task_timeout;
            tasks.spawn(async move {
                let _permit = permit;
                let work = AssertUnwindSafe(enricher.enrich(&candidate)).catch_unwind();
                match tokio::time::timeout(timeout, work).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(panic)) => {
                        let message = panic_message(panic.as_ref());
                        error!(stable_id = %candidate.stable_id, panic = %message, "Worker panicked");
                        EnrichmentResult::error(
                            &candidate.stable_id,
                            format!("worker panicked: {}", message),
                        )
                    }
                    Err(_) => {
                        warn!(
                            stable_id = %candidate.stable_id,
                            timeout_secs = timeout.as_secs(),
                            "Task exceeded timeout"
                        );
                        EnrichmentResult::error(
                            &candidate.stable_id,
                            format!("timed out after {}s", timeout.as_secs()),
                        )
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!(error = ?e, "Worker task failed to join"),
            }
        }

        // A task lost to a join error still owes its candidate a result.
        let seen: HashSet<&str> = results.iter().map(|r| r.stable_id.as_str()).collect();
        let missing: Vec<String> = submitted
            .into_iter()
            .filter(|id| !seen.contains(id.as_str()))
            .collect();
        for id in missing {
            results.push(EnrichmentResult::error(id, "worker task was cancelled"));
        }

        debug!(
            results = results.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Batch executed"
        );
        results
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
