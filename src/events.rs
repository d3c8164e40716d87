//! UI-facing events emitted by the session and the playback pipeline
//!
//! Events flow over a bounded channel; emission never blocks pipeline
//! work. When the consumer falls behind, events are counted and dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

use crate::audio::MessageId;
use crate::session::SessionPhase;

/// One event with its emission timestamp
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SessionEvent,
}

/// Everything the UI layer can observe about this core
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionStateChanged {
        from: SessionPhase,
        to: SessionPhase,
    },
    RetryScheduled {
        attempt: u32,
        delay: Duration,
    },
    PlaybackStarted {
        message_id: MessageId,
        sequence: u64,
        bytes: usize,
    },
    PlaybackCompleted {
        message_id: MessageId,
        sequence: u64,
    },
    PlaybackFailed {
        message_id: MessageId,
        sequence: u64,
        reason: String,
    },
    FragmentDropped {
        message_id: MessageId,
        bytes: usize,
    },
}

/// Non-blocking sender half of the event channel
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<EventEnvelope>,
    dropped: Arc<AtomicU64>,
}

impl EventSink {
    /// Creates a sink and the receiver the UI layer drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EventEnvelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Emits an event, timestamping it now. Never blocks; a full or
    /// closed channel drops the event and bumps the drop counter.
    pub fn emit(&self, event: SessionEvent) {
        let envelope = EventEnvelope {
            at: Utc::now(),
            event,
        };
        if let Err(e) = self.tx.try_send(envelope) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("event dropped: {}", e);
        }
    }

    /// Events lost to a full or closed channel since creation.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
