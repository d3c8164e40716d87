//! Runtime configuration for the session core
//!
//! All tunables live in a TOML-backed tree. Every field has a serde
//! default so a partial config file only overrides what it names.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{Error, Result};

/// Top-level configuration tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub audio: AudioConfig,
}

/// Stream lifecycle tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Transport connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Reconnect backoff tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Backoff before the first reconnect, in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Multiplier applied to the backoff after each failure
    #[serde(default = "default_backoff_factor")]
    pub factor: f64,

    /// Upper bound on the backoff, in milliseconds
    #[serde(default = "default_backoff_cap_ms")]
    pub cap_ms: u64,

    /// Attempts before the session gives up with a terminal error
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Jitter band as a fraction of the delay, in [0, 1)
    #[serde(default = "default_jitter_fraction")]
    pub jitter: f64,
}

/// Consolidation and playback tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Fragments at or above this size bypass consolidation
    #[serde(default = "default_large_chunk_bytes")]
    pub large_chunk_bytes: usize,

    /// Fragments below this size count as "small" for window adaptation
    #[serde(default = "default_small_fragment_bytes")]
    pub small_fragment_bytes: usize,

    /// Adaptive window lower bound in milliseconds
    #[serde(default = "default_window_floor_ms")]
    pub window_floor_ms: u64,

    /// Adaptive window upper bound in milliseconds
    #[serde(default = "default_window_ceiling_ms")]
    pub window_ceiling_ms: u64,

    /// Idle time after the last fragment before the buffer flushes anyway
    #[serde(default = "default_idle_flush_ms")]
    pub idle_flush_ms: u64,

    /// Minimum spacing between two flushes of the same buffer
    #[serde(default = "default_min_flush_spacing_ms")]
    pub min_flush_spacing_ms: u64,

    /// Capacity of the receive-loop to audio-worker queue
    #[serde(default = "default_fragment_queue_capacity")]
    pub fragment_queue_capacity: usize,

    /// Capacity of the audio-worker to playback queue
    #[serde(default = "default_playback_queue_capacity")]
    pub playback_queue_capacity: usize,

    /// Fully-played message ids remembered for replay routing
    #[serde(default = "default_replay_registry_capacity")]
    pub replay_registry_capacity: usize,

    /// PCM sample rate of the voice stream
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Channel count of the voice stream
    #[serde(default = "default_channels")]
    pub channels: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            factor: default_backoff_factor(),
            cap_ms: default_backoff_cap_ms(),
            max_retries: default_max_retries(),
            jitter: default_jitter_fraction(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            large_chunk_bytes: default_large_chunk_bytes(),
            small_fragment_bytes: default_small_fragment_bytes(),
            window_floor_ms: default_window_floor_ms(),
            window_ceiling_ms: default_window_ceiling_ms(),
            idle_flush_ms: default_idle_flush_ms(),
            min_flush_spacing_ms: default_min_flush_spacing_ms(),
            fragment_queue_capacity: default_fragment_queue_capacity(),
            playback_queue_capacity: default_playback_queue_capacity(),
            replay_registry_capacity: default_replay_registry_capacity(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
        }
    }
}

impl AppConfig {
    /// Loads `config.toml` from the platform config directory, falling back
    /// to defaults when the file is absent.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Loads and validates a specific TOML file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Platform config file location, e.g. `~/.config/voicelink/config.toml`.
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "voicelink")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Rejects values the pipeline cannot operate with.
    pub fn validate(&self) -> Result<()> {
        let audio = &self.audio;
        if audio.large_chunk_bytes == 0 {
            return Err(Error::Config("large_chunk_bytes must be positive".into()));
        }
        if audio.small_fragment_bytes > audio.large_chunk_bytes {
            return Err(Error::Config(
                "small_fragment_bytes must not exceed large_chunk_bytes".into(),
            ));
        }
        if audio.window_floor_ms > audio.window_ceiling_ms {
            return Err(Error::Config(format!(
                "window floor {}ms exceeds ceiling {}ms",
                audio.window_floor_ms, audio.window_ceiling_ms
            )));
        }
        if audio.fragment_queue_capacity == 0 || audio.playback_queue_capacity == 0 {
            return Err(Error::Config("queue capacities must be positive".into()));
        }
        if audio.replay_registry_capacity == 0 {
            return Err(Error::Config(
                "replay_registry_capacity must be positive".into(),
            ));
        }
        if audio.sample_rate == 0 || audio.channels == 0 {
            return Err(Error::Config("sample format must be positive".into()));
        }

        let retry = &self.session.retry;
        if retry.initial_backoff_ms == 0 {
            return Err(Error::Config("initial_backoff_ms must be positive".into()));
        }
        if retry.factor < 1.0 {
            return Err(Error::Config(format!(
                "backoff factor {} must be at least 1.0",
                retry.factor
            )));
        }
        if retry.cap_ms < retry.initial_backoff_ms {
            return Err(Error::Config(
                "cap_ms must be at least initial_backoff_ms".into(),
            ));
        }
        if !(0.0..1.0).contains(&retry.jitter) {
            return Err(Error::Config(format!(
                "jitter {} must be in [0, 1)",
                retry.jitter
            )));
        }
        Ok(())
    }
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn cap(&self) -> Duration {
        Duration::from_millis(self.cap_ms)
    }
}

impl AudioConfig {
    pub fn window_floor(&self) -> Duration {
        Duration::from_millis(self.window_floor_ms)
    }

    pub fn window_ceiling(&self) -> Duration {
        Duration::from_millis(self.window_ceiling_ms)
    }

    pub fn idle_flush(&self) -> Duration {
        Duration::from_millis(self.idle_flush_ms)
    }

    pub fn min_flush_spacing(&self) -> Duration {
        Duration::from_millis(self.min_flush_spacing_ms)
    }
}

fn default_connect_timeout_ms() -> u64 {
    constants::CONNECT_TIMEOUT_MS
}

fn default_initial_backoff_ms() -> u64 {
    constants::INITIAL_BACKOFF_MS
}

fn default_backoff_factor() -> f64 {
    constants::BACKOFF_FACTOR
}

fn default_backoff_cap_ms() -> u64 {
    constants::BACKOFF_CAP_MS
}

fn default_max_retries() -> u32 {
    constants::MAX_RETRIES
}

fn default_jitter_fraction() -> f64 {
    constants::JITTER_FRACTION
}

fn default_large_chunk_bytes() -> usize {
    constants::LARGE_CHUNK_BYTES
}

fn default_small_fragment_bytes() -> usize {
    constants::SMALL_FRAGMENT_BYTES
}

fn default_window_floor_ms() -> u64 {
    constants::WINDOW_FLOOR_MS
}

fn default_window_ceiling_ms() -> u64 {
    constants::WINDOW_CEILING_MS
}

fn default_idle_flush_ms() -> u64 {
    constants::IDLE_FLUSH_MS
}

fn default_min_flush_spacing_ms() -> u64 {
    constants::MIN_FLUSH_SPACING_MS
}

fn default_fragment_queue_capacity() -> usize {
    constants::FRAGMENT_QUEUE_CAPACITY
}

fn default_playback_queue_capacity() -> usize {
    constants::PLAYBACK_QUEUE_CAPACITY
}

fn default_replay_registry_capacity() -> usize {
    constants::REPLAY_REGISTRY_CAPACITY
}

fn default_sample_rate() -> u32 {
    constants::DEFAULT_SAMPLE_RATE
}

fn default_channels() -> u16 {
    constants::DEFAULT_CHANNELS
}
