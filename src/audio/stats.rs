//! Fragment cadence statistics driving the adaptive consolidation window
//!
//! A bounded sliding window over recent fragment sizes and inter-arrival
//! gaps. Runs of small fragments shrink the window toward its floor so
//! sparse streams flush with less latency; any larger fragment snaps it
//! back to the ceiling.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::AudioConfig;

/// One observed fragment
#[derive(Debug, Clone, Copy)]
pub struct FragmentSample {
    /// Payload size in bytes
    pub bytes: usize,

    /// Gap since the previous fragment, None for the first
    pub inter_arrival: Option<Duration>,
}

/// Bounded sliding window of recent fragment sizes and arrival times
#[derive(Debug)]
pub struct ChunkStatistics {
    /// Recent samples, newest last
    samples: VecDeque<FragmentSample>,

    /// Maximum retained samples
    capacity: usize,

    /// Fragments below this size count as small
    small_threshold: usize,

    /// Current run of consecutive small fragments
    consecutive_small: u32,

    /// Small fragments tolerated before the window shrinks
    small_run_tolerance: u32,

    /// Window bounds; floor <= ceiling always holds
    window_floor: Duration,
    window_ceiling: Duration,

    /// Current adaptive window, clamped to the bounds
    window: Duration,

    /// Multiplier applied per small-run step
    shrink_factor: f64,

    /// Previous arrival, for inter-arrival deltas
    last_arrival: Option<Instant>,

    /// Lifetime totals
    total_fragments: u64,
    total_bytes: u64,
}

impl ChunkStatistics {
    pub fn new(config: &AudioConfig) -> Self {
        let floor = config.window_floor();
        let ceiling = config.window_ceiling().max(floor);
        Self {
            samples: VecDeque::with_capacity(crate::constants::STATS_WINDOW_CAPACITY),
            capacity: crate::constants::STATS_WINDOW_CAPACITY,
            small_threshold: config.small_fragment_bytes,
            consecutive_small: 0,
            small_run_tolerance: crate::constants::SMALL_RUN_TOLERANCE,
            window_floor: floor,
            window_ceiling: ceiling,
            window: ceiling,
            shrink_factor: crate::constants::WINDOW_SHRINK_FACTOR,
            last_arrival: None,
            total_fragments: 0,
            total_bytes: 0,
        }
    }

    /// Records one routed fragment. Called for every fragment regardless
    /// of routing path, so cadence tracking also sees bypassed chunks.
    pub fn record(&mut self, bytes: usize, arrived_at: Instant) {
        let inter_arrival = self
            .last_arrival
            .map(|prev| arrived_at.saturating_duration_since(prev));
        self.last_arrival = Some(arrived_at);

        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(FragmentSample {
            bytes,
            inter_arrival,
        });
        self.total_fragments += 1;
        self.total_bytes += bytes as u64;

        if bytes < self.small_threshold {
            self.consecutive_small += 1;
            if self.consecutive_small > self.small_run_tolerance {
                self.shrink_window();
            }
        } else {
            self.consecutive_small = 0;
            self.window = self.window_ceiling;
        }
    }

    fn shrink_window(&mut self) {
        let shrunk = self.window.mul_f64(self.shrink_factor);
        self.window = shrunk.clamp(self.window_floor, self.window_ceiling);
    }

    /// Current adaptive window, always within [floor, ceiling]
    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn consecutive_small(&self) -> u32 {
        self.consecutive_small
    }

    /// Mean fragment size over the sliding window
    pub fn average_fragment_bytes(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: usize = self.samples.iter().map(|s| s.bytes).sum();
        sum as f64 / self.samples.len() as f64
    }

    /// Mean gap between fragments over the sliding window
    pub fn average_inter_arrival(&self) -> Option<Duration> {
        let gaps: Vec<Duration> = self
            .samples
            .iter()
            .filter_map(|s| s.inter_arrival)
            .collect();
        if gaps.is_empty() {
            return None;
        }
        let total: Duration = gaps.iter().sum();
        Some(total / gaps.len() as u32)
    }

    pub fn total_fragments(&self) -> u64 {
        self.total_fragments
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

/// Counters shared between the audio worker and its handle
#[derive(Debug, Default)]
pub struct PipelineCounters {
    /// Fragments that bypassed consolidation
    pub direct_routed: AtomicU64,

    /// Fragments folded into a buffer
    pub consolidated_routed: AtomicU64,

    /// Bytes that went through consolidation
    pub bytes_consolidated: AtomicU64,

    /// Chunks handed to the playback queue
    pub chunks_dispatched: AtomicU64,

    /// Fragments dropped at the full inbound queue
    pub fragments_dropped: AtomicU64,
}

impl PipelineCounters {
    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            direct_routed: self.direct_routed.load(Ordering::Relaxed),
            consolidated_routed: self.consolidated_routed.load(Ordering::Relaxed),
            bytes_consolidated: self.bytes_consolidated.load(Ordering::Relaxed),
            chunks_dispatched: self.chunks_dispatched.load(Ordering::Relaxed),
            fragments_dropped: self.fragments_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the pipeline counters
#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub direct_routed: u64,
    pub consolidated_routed: u64,
    pub bytes_consolidated: u64,
    pub chunks_dispatched: u64,
    pub fragments_dropped: u64,
}

impl PipelineStats {
    pub fn drop_rate(&self) -> f32 {
        let received = self.direct_routed + self.consolidated_routed + self.fragments_dropped;
        if received == 0 {
            0.0
        } else {
            self.fragments_dropped as f32 / received as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stats() -> ChunkStatistics {
        ChunkStatistics::new(&AudioConfig::default())
    }

    #[test]
    fn test_window_starts_at_ceiling() {
        let stats = stats();
        assert_eq!(stats.window(), Duration::from_millis(800));
    }

    #[test]
    fn test_small_run_shrinks_window_to_floor() {
        let mut stats = stats();
        let t0 = Instant::now();

        // The first three small fragments are tolerated
        for i in 0..3u64 {
            stats.record(1_024, t0 + Duration::from_millis(40 * i));
        }
        assert_eq!(stats.window(), Duration::from_millis(800));

        // Each further small fragment shrinks by the factor
        stats.record(1_024, t0 + Duration::from_millis(160));
        assert_eq!(stats.window(), Duration::from_millis(600));

        // A long run bottoms out at the floor and stays there
        for i in 5..40u64 {
            stats.record(1_024, t0 + Duration::from_millis(40 * i));
        }
        assert_eq!(stats.window(), Duration::from_millis(200));
    }

    #[test]
    fn test_large_fragment_resets_window() {
        let mut stats = stats();
        let t0 = Instant::now();
        for i in 0..10u64 {
            stats.record(1_024, t0 + Duration::from_millis(40 * i));
        }
        assert!(stats.window() < Duration::from_millis(800));
        assert!(stats.consecutive_small() > 0);

        stats.record(20 * 1024, t0 + Duration::from_millis(400));
        assert_eq!(stats.window(), Duration::from_millis(800));
        assert_eq!(stats.consecutive_small(), 0);
    }

    #[test]
    fn test_sliding_window_is_bounded() {
        let mut stats = stats();
        let t0 = Instant::now();
        for i in 0..200u64 {
            stats.record(2_048, t0 + Duration::from_millis(i));
        }
        assert_eq!(stats.total_fragments(), 200);
        assert_eq!(stats.average_fragment_bytes(), 2_048.0);
        // Averages cover only the retained samples
        assert_eq!(
            stats.average_inter_arrival(),
            Some(Duration::from_millis(1))
        );
    }

    #[test]
    fn test_drop_rate() {
        let counters = PipelineCounters::default();
        counters.direct_routed.store(3, Ordering::Relaxed);
        counters.consolidated_routed.store(6, Ordering::Relaxed);
        counters.fragments_dropped.store(1, Ordering::Relaxed);
        let snapshot = counters.snapshot();
        assert!((snapshot.drop_rate() - 0.1).abs() < 1e-6);
    }

    proptest! {
        #[test]
        fn prop_window_never_leaves_bounds(
            sizes in proptest::collection::vec(0usize..128 * 1024, 1..200)
        ) {
            let mut stats = stats();
            let t0 = Instant::now();
            for (i, bytes) in sizes.into_iter().enumerate() {
                stats.record(bytes, t0 + Duration::from_millis(i as u64 * 10));
                prop_assert!(stats.window() >= Duration::from_millis(200));
                prop_assert!(stats.window() <= Duration::from_millis(800));
            }
        }
    }
}
