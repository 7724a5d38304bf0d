//! Resolution progress events
//!
//! Events are broadcast via [`EventBus`] and are serializable so a caller can
//! forward them (the CLI prints them as JSON lines with `--events`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Coarse outcome of one reference, as reported in events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Resolved,
    Ambiguous,
    Unmatched,
    Failed,
    Cancelled,
}

/// CBRO event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResolveEvent {
    /// A batch of references was submitted
    BatchStarted {
        session_id: Uuid,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// Free-form progress status (`current` of `total` references finished)
    Progress {
        session_id: Uuid,
        current: usize,
        total: usize,
        status: String,
        timestamp: DateTime<Utc>,
    },

    /// One reference finished
    ReferenceFinished {
        session_id: Uuid,
        /// Position of the reference in its reading list
        position: usize,
        series_name: String,
        issue_number: String,
        outcome: OutcomeKind,
        /// Whether the answer came from the persistent cache
        from_cache: bool,
        timestamp: DateTime<Utc>,
    },

    /// The batch finished (or was cancelled)
    BatchCompleted {
        session_id: Uuid,
        resolved: usize,
        ambiguous: usize,
        unmatched: usize,
        failed: usize,
        cancelled: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Expired cache entries were removed
    CacheSwept {
        removed: u64,
        timestamp: DateTime<Utc>,
    },
}

impl ResolveEvent {
    /// Event timestamp
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ResolveEvent::BatchStarted { timestamp, .. }
            | ResolveEvent::Progress { timestamp, .. }
            | ResolveEvent::ReferenceFinished { timestamp, .. }
            | ResolveEvent::BatchCompleted { timestamp, .. }
            | ResolveEvent::CacheSwept { timestamp, .. } => *timestamp,
        }
    }
}

/// Central event distribution bus
///
/// Wraps a `tokio::broadcast` channel: publishing never blocks, slow
/// subscribers observe `Lagged` instead of stalling the workers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ResolveEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ResolveEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ResolveEvent,
    ) -> Result<usize, broadcast::error::SendError<ResolveEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ResolveEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
