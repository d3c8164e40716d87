//! Fragment routing: play immediately vs accumulate
//!
//! Large fragments already hold enough audio to play smoothly on their
//! own, and replays of finished messages must never be coalesced with
//! live data. Everything else accumulates.

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use tracing::trace;

use crate::audio::chunk::{AudioFragment, MessageId};
use crate::audio::stats::ChunkStatistics;
use crate::config::AudioConfig;

/// Where a fragment goes next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingDecision {
    /// Straight to the playback queue as its own chunk
    Direct,

    /// Fold into the consolidation buffer
    Consolidate,
}

/// Classifies each incoming fragment and tracks fragment cadence
#[derive(Debug)]
pub struct AudioRouter {
    stats: ChunkStatistics,

    /// Message ids whose playback fully completed at least once
    played: LruCache<MessageId, ()>,

    large_chunk_bytes: usize,
}

impl AudioRouter {
    pub fn new(config: &AudioConfig) -> Self {
        let capacity = NonZeroUsize::new(config.replay_registry_capacity.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            stats: ChunkStatistics::new(config),
            played: LruCache::new(capacity),
            large_chunk_bytes: config.large_chunk_bytes,
        }
    }

    /// Routes one fragment. Every fragment updates the cadence
    /// statistics, bypassing ones included.
    pub fn route(&mut self, fragment: &AudioFragment) -> RoutingDecision {
        self.stats.record(fragment.len(), fragment.arrived_at);

        if self.played.get(&fragment.message_id).is_some() {
            trace!(message_id = %fragment.message_id, "replay routed direct");
            return RoutingDecision::Direct;
        }
        if fragment.len() >= self.large_chunk_bytes {
            trace!(
                message_id = %fragment.message_id,
                bytes = fragment.len(),
                "large fragment routed direct"
            );
            return RoutingDecision::Direct;
        }
        RoutingDecision::Consolidate
    }

    /// Records a fully-played message for replay classification.
    pub fn mark_played(&mut self, message_id: MessageId) {
        self.played.put(message_id, ());
    }

    /// Current adaptive consolidation window
    pub fn window(&self) -> Duration {
        self.stats.window()
    }

    pub fn statistics(&self) -> &ChunkStatistics {
        &self.stats
    }
}
