//! Per-message accumulation with adaptive flush policy
//!
//! One buffer is open at a time, for the message currently streaming in.
//! A flush happens on the first trigger to fire: accumulated size reached
//! the large-chunk threshold, the adaptive window since buffer open
//! elapsed, or the stream went idle. All three are gated by a minimum
//! inter-flush spacing; a forced flush (message switch, shutdown) is not.
//!
//! There are no per-buffer timers. The owner asks for `next_deadline` and
//! sleeps until it, which makes superseding a buffer or shutting down a
//! matter of recomputing one deadline.

use std::time::Duration;

use bytes::BytesMut;
use tokio::time::Instant;
use tracing::debug;

use crate::audio::chunk::{AudioFragment, ConsolidatedChunk, MessageId};
use crate::config::AudioConfig;

/// Accumulation state for one in-flight logical message
#[derive(Debug)]
struct BufferState {
    /// Owning logical message
    message_id: MessageId,

    /// Accumulated bytes in arrival order
    pending: BytesMut,

    /// When the first fragment opened this buffer
    opened_at: Instant,

    /// When the latest fragment arrived
    last_fragment_at: Instant,

    /// Adaptive window captured from the statistics at the last accumulate
    window: Duration,
}

/// Per-message byte accumulator with adaptive flush policy
#[derive(Debug)]
pub struct ConsolidationBuffer {
    state: Option<BufferState>,

    /// When the previous chunk was sealed, for the spacing gate
    last_flush_at: Option<Instant>,

    /// Shared by flushed and direct chunks so playback order is global
    next_sequence: u64,

    large_chunk_bytes: usize,
    min_flush_spacing: Duration,
    idle_flush: Duration,
    sample_rate: u32,
    channels: u16,
}

impl ConsolidationBuffer {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            state: None,
            last_flush_at: None,
            next_sequence: 0,
            large_chunk_bytes: config.large_chunk_bytes,
            min_flush_spacing: config.min_flush_spacing(),
            idle_flush: config.idle_flush(),
            sample_rate: config.sample_rate,
            channels: config.channels,
        }
    }

    /// Folds a fragment into the open buffer, opening one if absent.
    /// A fragment for a different message forces the old buffer out
    /// first; the flushed chunk is returned and must be dispatched.
    pub fn accumulate(
        &mut self,
        fragment: AudioFragment,
        window: Duration,
    ) -> Option<ConsolidatedChunk> {
        let mut flushed = None;
        if let Some(state) = self.state.as_ref() {
            if state.message_id != fragment.message_id {
                flushed = self.force_flush();
            }
        }

        let arrived = fragment.arrived_at;
        match self.state.as_mut() {
            Some(state) => {
                state.pending.extend_from_slice(&fragment.data);
                state.last_fragment_at = arrived;
                state.window = window;
            }
            None => {
                let mut pending = BytesMut::with_capacity(fragment.data.len().max(4096));
                pending.extend_from_slice(&fragment.data);
                self.state = Some(BufferState {
                    message_id: fragment.message_id,
                    pending,
                    opened_at: arrived,
                    last_fragment_at: arrived,
                    window,
                });
            }
        }
        flushed
    }

    /// Seals the buffer if a trigger fired and the spacing gate is open.
    pub fn maybe_flush(&mut self) -> Option<ConsolidatedChunk> {
        let now = Instant::now();
        let state = self.state.as_ref()?;

        if let Some(last) = self.last_flush_at {
            if now.saturating_duration_since(last) < self.min_flush_spacing {
                return None;
            }
        }

        let size_due = state.pending.len() >= self.large_chunk_bytes;
        let window_due = now.saturating_duration_since(state.opened_at) >= state.window;
        let idle_due = now.saturating_duration_since(state.last_fragment_at) >= self.idle_flush;
        if !(size_due || window_due || idle_due) {
            return None;
        }

        let trigger = if size_due {
            "size"
        } else if window_due {
            "window"
        } else {
            "idle"
        };
        let state = self.state.take()?;
        debug!(
            message_id = %state.message_id,
            bytes = state.pending.len(),
            trigger,
            "buffer flushed"
        );
        Some(self.seal(state, now))
    }

    /// Seals whatever is pending, ignoring triggers and the spacing gate.
    /// Used on message switch and shutdown so no byte is ever dropped.
    pub fn force_flush(&mut self) -> Option<ConsolidatedChunk> {
        let state = self.state.take()?;
        debug!(
            message_id = %state.message_id,
            bytes = state.pending.len(),
            "buffer force-flushed"
        );
        Some(self.seal(state, Instant::now()))
    }

    /// Wraps a bypassing fragment as its own chunk. Takes its sequence
    /// from the same counter as flushed chunks.
    pub fn direct(&mut self, fragment: AudioFragment) -> ConsolidatedChunk {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        ConsolidatedChunk::new(
            fragment.message_id,
            fragment.data,
            sequence,
            self.sample_rate,
            self.channels,
        )
    }

    /// Earliest instant at which `maybe_flush` could seal the buffer.
    /// None while no buffer is open.
    pub fn next_deadline(&self) -> Option<Instant> {
        let state = self.state.as_ref()?;
        let due = if state.pending.len() >= self.large_chunk_bytes {
            // Size trigger already satisfied, only the gate can hold it
            state.last_fragment_at
        } else {
            let window_expiry = state.opened_at + state.window;
            let idle_expiry = state.last_fragment_at + self.idle_flush;
            window_expiry.min(idle_expiry)
        };
        match self.last_flush_at {
            Some(last) => Some(due.max(last + self.min_flush_spacing)),
            None => Some(due),
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    /// Bytes accumulated in the open buffer
    pub fn pending_bytes(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.pending.len())
    }

    /// Message the open buffer belongs to
    pub fn open_message(&self) -> Option<&MessageId> {
        self.state.as_ref().map(|s| &s.message_id)
    }

    fn seal(&mut self, state: BufferState, now: Instant) -> ConsolidatedChunk {
        self.last_flush_at = Some(now);
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        ConsolidatedChunk::new(
            state.message_id,
            state.pending.freeze(),
            sequence,
            self.sample_rate,
            self.channels,
        )
    }
}
