//! Run lifecycle events and the broadcast bus that carries them.
//!
//! The run controller emits one [`RunEvent`] per state change. Consumers
//! (CLI progress output, log shippers, tests) subscribe independently and
//! slow receivers see `Lagged` instead of blocking the run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::EntityKind;

/// Enveloped event with an id and timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// UUIDv7, so ids sort by emission time.
    pub event_id: Uuid,
    /// Namespaced event type (e.g. `"run.batch_completed"`).
    pub event_type: &'static str,
    pub occurred_at: DateTime<Utc>,
    pub payload: RunEvent,
}

impl EventEnvelope {
    pub fn new(event: RunEvent) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type: event.event_type(),
            occurred_at: Utc::now(),
            payload: event,
        }
    }
}

/// State changes of an enrichment run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum RunEvent {
    /// Counting finished and the batch loop is starting.
    Started {
        run_id: Uuid,
        kind: EntityKind,
        total: u64,
        resumed_from: Option<u64>,
    },
    /// One batch was processed and checkpointed.
    BatchCompleted {
        run_id: Uuid,
        offset: u64,
        size: usize,
        processed: u64,
        succeeded: u64,
        failed: u64,
    },
    /// A batch read failed and will be retried at the same offset.
    ReadRetry {
        run_id: Uuid,
        offset: u64,
        attempt: u32,
        error: String,
    },
    /// The checkpoint could not be persisted; the previous one stands.
    CheckpointFailed { run_id: Uuid, offset: u64, error: String },
    /// Every candidate was processed.
    Completed {
        run_id: Uuid,
        processed: u64,
        succeeded: u64,
        failed: u64,
        duration_ms: u64,
    },
    /// The run stopped on operator request.
    Stopped { run_id: Uuid, offset: u64 },
    /// The run gave up; the last checkpoint is kept for a resume.
    Aborted { run_id: Option<Uuid>, offset: u64, error: String },
}

impl RunEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            RunEvent::Started { .. } => "run.started",
            RunEvent::BatchCompleted { .. } => "run.batch_completed",
            RunEvent::ReadRetry { .. } => "run.read_retry",
            RunEvent::CheckpointFailed { .. } => "run.checkpoint_failed",
            RunEvent::Completed { .. } => "run.completed",
            RunEvent::Stopped { .. } => "run.stopped",
            RunEvent::Aborted { .. } => "run.aborted",
        }
    }

    /// Whether this event ends the run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunEvent::Completed { .. } | RunEvent::Stopped { .. } | RunEvent::Aborted { .. }
        )
    }
}

/// Broadcast bus for run events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit to all subscribers. Dropped silently when nobody listens.
    pub fn emit(&self, event: RunEvent) {
        let envelope = EventEnvelope::new(event);
        tracing::debug!(
            event_type = envelope.event_type,
            event_id = %envelope.event_id,
            subscriber_count = self.tx.receiver_count(),
            "EventBus emit"
        );
        let _ = self.tx.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}
