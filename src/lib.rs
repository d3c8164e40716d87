//! # Voicelink
//!
//! Session core for a realtime conversational voice client: keeps the
//! stream to the AI backend alive across network failures and turns its
//! bursty audio fragments into smooth, gapless playback.
//!
//! ## Architecture Overview
//!
//! ```text
//!                    ┌────────────────────┐
//!   Transport ──────▶│   StreamSession    │────▶ SessionEvent channel
//!  (collaborator)    │   (receive loop,   │      (state changes, retries)
//!                    │    retry machine)  │
//!                    └─────────┬──────────┘
//!                              │ AudioFragment (bounded queue, cap 100)
//!                              ▼
//!                    ┌────────────────────┐
//!                    │    AudioRouter     │── Direct (replay / ≥ 64 KiB) ──┐
//!                    └─────────┬──────────┘                                │
//!                              │ Consolidate                               │
//!                              ▼                                           │
//!                    ┌────────────────────┐                                │
//!                    │ ConsolidationBuffer│                                │
//!                    │  (adaptive window, │                                │
//!                    │   idle + size      │                                │
//!                    │   flush triggers)  │                                │
//!                    └─────────┬──────────┘                                │
//!                              │ ConsolidatedChunk (flush)                 │
//!                              ▼                                           ▼
//!                    ┌─────────────────────────────────────────────────────┐
//!                    │                PlaybackScheduler                    │
//!                    │   single playback slot + one-step lookahead for     │
//!                    │   gapless same-message output                       │
//!                    └─────────────────────────┬───────────────────────────┘
//!                                              │ play(bytes, rate, channels)
//!                                              ▼
//!                                         PlayerSink
//!                                    (external player process)
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod player;
pub mod session;
pub mod transport;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Fragments at or above this size bypass consolidation entirely
    pub const LARGE_CHUNK_BYTES: usize = 64 * 1024;

    /// Fragments below this size count toward the consecutive-small run
    pub const SMALL_FRAGMENT_BYTES: usize = 10 * 1024;

    /// Minimum spacing between two flushes of the same buffer
    pub const MIN_FLUSH_SPACING_MS: u64 = 150;

    /// Lower bound of the adaptive consolidation window
    pub const WINDOW_FLOOR_MS: u64 = 200;

    /// Upper bound (and starting value) of the adaptive consolidation window
    pub const WINDOW_CEILING_MS: u64 = 800;

    /// Consecutive small fragments tolerated before the window shrinks
    pub const SMALL_RUN_TOLERANCE: u32 = 3;

    /// Multiplier applied to the window per small-run step
    pub const WINDOW_SHRINK_FACTOR: f64 = 0.75;

    /// Idle time after the last fragment before a buffer flushes anyway
    pub const IDLE_FLUSH_MS: u64 = 300;

    /// Bounded queue between the receive loop and the audio worker
    pub const FRAGMENT_QUEUE_CAPACITY: usize = 100;

    /// Bounded queue between the audio worker and the playback scheduler
    pub const PLAYBACK_QUEUE_CAPACITY: usize = 32;

    /// Fully-played message ids remembered for replay classification
    pub const REPLAY_REGISTRY_CAPACITY: usize = 64;

    /// Sliding-window length of the fragment-cadence statistics
    pub const STATS_WINDOW_CAPACITY: usize = 32;

    /// First reconnect backoff
    pub const INITIAL_BACKOFF_MS: u64 = 1_000;

    /// Growth factor applied to the backoff after each failure
    pub const BACKOFF_FACTOR: f64 = 1.8;

    /// Backoff never exceeds this cap
    pub const BACKOFF_CAP_MS: u64 = 30_000;

    /// Reconnect attempts before the session goes to terminal Error
    pub const MAX_RETRIES: u32 = 5;

    /// Jitter band applied to each retry delay (fraction of the delay)
    pub const JITTER_FRACTION: f64 = 0.2;

    /// Jittered delays never drop below this floor
    pub const MIN_RETRY_DELAY_MS: u64 = 50;

    /// Default transport connect timeout
    pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

    /// PCM sample rate of the realtime voice stream
    pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

    /// Channel count of the realtime voice stream (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;
}
