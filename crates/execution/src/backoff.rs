//! Exponential retry backoff with seeded jitter.

use std::time::Duration;

use oi_strangle_core::BackoffConfig;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Delay schedule `base * 2^(retry - 1)`, capped at `max`, plus up to
/// `jitter_pct` percent of the capped delay.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter_pct: u32,
    rng: Mutex<ChaCha8Rng>,
}

impl Backoff {
    #[must_use]
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_delay_ms),
            max: Duration::from_millis(config.max_delay_ms),
            jitter_pct: config.jitter_pct.min(100),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(config.seed)),
        }
    }

    /// Deterministic part of the delay before retry number `retry` (1-based).
    #[must_use]
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Delay before retry number `retry`, jitter included.
    pub fn delay(&self, retry: u32) -> Duration {
        let delay = self.base_delay(retry);
        let max_jitter_ms = delay.as_millis() as u64 * u64::from(self.jitter_pct) / 100;
        if max_jitter_ms == 0 {
            return delay;
        }
        let jitter = self.rng.lock().gen_range(0..=max_jitter_ms);
        delay + Duration::from_millis(jitter)
    }
}
