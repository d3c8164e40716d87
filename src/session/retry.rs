//! Reconnect backoff policy
//!
//! Exponential growth with a cap and a ±jitter band. The jitter source
//! is owned by the policy value and seedable, so schedules are exactly
//! reproducible in tests while production gets entropy.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::config::RetryConfig;
use crate::constants;

/// Computes retry delays and the retry budget
#[derive(Debug)]
pub struct ReconnectPolicy {
    initial: Duration,
    factor: f64,
    cap: Duration,
    max_retries: u32,
    jitter: f64,
    rng: StdRng,
}

impl ReconnectPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Policy with a fixed jitter seed, for reproducible schedules
    pub fn seeded(config: &RetryConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &RetryConfig, rng: StdRng) -> Self {
        Self {
            initial: config.initial_backoff(),
            factor: config.factor,
            cap: config.cap(),
            max_retries: config.max_retries,
            jitter: config.jitter,
            rng,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn initial_backoff(&self) -> Duration {
        self.initial
    }

    /// Delay for this attempt plus the backoff to carry into the next
    /// failure. The delay is the current backoff (capped) with jitter
    /// applied; the next backoff grows by the factor and is capped.
    pub fn next_delay(&mut self, attempt: u32, current_backoff: Duration) -> (Duration, Duration) {
        let base = current_backoff.min(self.cap);
        let delay = self.jittered(base);
        let next_backoff = current_backoff.mul_f64(self.factor).min(self.cap);
        trace!(attempt, ?base, ?delay, ?next_backoff, "retry delay computed");
        (delay, next_backoff)
    }

    /// The nth delay ignoring jitter: min(initial * factor^(n-1), cap)
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let mut backoff = self.initial;
        for _ in 1..attempt {
            backoff = backoff.mul_f64(self.factor).min(self.cap);
        }
        backoff.min(self.cap)
    }

    fn jittered(&mut self, base: Duration) -> Duration {
        let floor = Duration::from_millis(constants::MIN_RETRY_DELAY_MS);
        if self.jitter <= 0.0 {
            return base.max(floor);
        }
        let scale = self.rng.gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        base.mul_f64(scale).max(floor)
    }
}
