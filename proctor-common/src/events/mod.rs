//! Event types for the proctor event system
//!
//! Provides the shared event definitions and the EventBus used by the
//! verification pipeline to publish progress to SSE clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Final verdict attached to a verification event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    TruePositive,
    FalsePositive,
    Inconclusive,
}

/// Proctor event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProctorEvent {
    /// Alert passed intake validation and was queued for verification
    AlertAccepted {
        alert_id: Uuid,
        alert_type: String,
        epoch: u64,
        timestamp: DateTime<Utc>,
    },

    /// Verification finished (any verdict)
    ///
    /// `face_count` is `None` for inconclusive verifications.
    AlertVerified {
        alert_id: Uuid,
        alert_type: String,
        epoch: u64,
        verdict: Verdict,
        face_count: Option<u32>,
        timestamp: DateTime<Utc>,
    },

    /// Edge heartbeat folded into the session counters
    HeartbeatReceived {
        device_id: String,
        frames_processed: u64,
        frames_discarded: u64,
        epoch: u64,
        timestamp: DateTime<Utc>,
    },

    /// Active session sealed; new traffic goes to `next_epoch`
    SessionSealed {
        epoch: u64,
        next_epoch: u64,
        pending_verifications: u64,
        timestamp: DateTime<Utc>,
    },

    /// Report produced and session state reset
    SessionClosed {
        epoch: u64,
        report_id: Uuid,
        true_positive_total: u64,
        false_positive_total: u64,
        inconclusive_total: u64,
        timestamp: DateTime<Utc>,
    },

    /// Session close attempt failed (drain timeout, render or persistence failure)
    SessionCloseFailed {
        epoch: u64,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl ProctorEvent {
    /// Event type name, used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            ProctorEvent::AlertAccepted { .. } => "AlertAccepted",
            ProctorEvent::AlertVerified { .. } => "AlertVerified",
            ProctorEvent::HeartbeatReceived { .. } => "HeartbeatReceived",
            ProctorEvent::SessionSealed { .. } => "SessionSealed",
            ProctorEvent::SessionClosed { .. } => "SessionClosed",
            ProctorEvent::SessionCloseFailed { .. } => "SessionCloseFailed",
        }
    }
}

/// Broadcast bus for pipeline events
///
/// Cloning shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ProctorEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ProctorEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ProctorEvent,
    ) -> Result<usize, broadcast::error::SendError<ProctorEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ProctorEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
