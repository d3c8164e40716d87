//! Audio data model shared across the pipeline

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Identifies the logical message (conversational turn) audio belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One inbound unit of audio from the transport. Immutable once created.
#[derive(Debug, Clone)]
pub struct AudioFragment {
    /// Raw PCM bytes
    pub data: Bytes,

    /// Owning logical message
    pub message_id: MessageId,

    /// Arrival timestamp
    pub arrived_at: Instant,
}

impl AudioFragment {
    pub fn new(message_id: MessageId, data: Bytes) -> Self {
        Self {
            data,
            message_id,
            arrived_at: Instant::now(),
        }
    }

    /// Fragment with an explicit arrival time, for replays and tests
    pub fn with_arrival(message_id: MessageId, data: Bytes, arrived_at: Instant) -> Self {
        Self {
            data,
            message_id,
            arrived_at,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One playable unit built from one or more fragments
#[derive(Debug, Clone)]
pub struct ConsolidatedChunk {
    /// PCM bytes in fragment arrival order
    pub data: Bytes,

    /// Owning logical message
    pub message_id: MessageId,

    /// Estimated play time derived from the PCM byte rate
    pub estimated_duration: Duration,

    /// Monotonic index assigned at creation
    pub sequence: u64,

    /// Set while the scheduler is feeding this chunk to the player
    pub is_processing: bool,

    /// Set once playback finished
    pub is_complete: bool,

    /// Assigned when playback starts, not at creation
    pub started_at: Option<Instant>,
}

impl ConsolidatedChunk {
    pub fn new(
        message_id: MessageId,
        data: Bytes,
        sequence: u64,
        sample_rate: u32,
        channels: u16,
    ) -> Self {
        let estimated_duration = estimate_duration(data.len(), sample_rate, channels);
        Self {
            data,
            message_id,
            estimated_duration,
            sequence,
            is_processing: false,
            is_complete: false,
            started_at: None,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Play time of a PCM16 byte span at the given format
pub fn estimate_duration(bytes: usize, sample_rate: u32, channels: u16) -> Duration {
    let byte_rate = sample_rate as u64 * channels as u64 * 2;
    if byte_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(bytes as u64 * 1_000_000 / byte_rate)
}
