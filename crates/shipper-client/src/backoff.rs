//! Stall-count driven backoff with jitter.
//!
//! The nominal delay doubles with each consecutive stall, starting at
//! `base` for the first stall and saturating at `ceiling`:
//!
//! | Stall count | Nominal delay (base=250ms, ceiling=30s) |
//! |-------------|-----------------------------------------|
//! | 0           | 0 (no stall, no delay)                  |
//! | 1           | 250ms                                   |
//! | 2           | 500ms                                   |
//! | 3           | 1s                                      |
//! | ...         | ...                                     |
//! | 9+          | 30s (capped)                            |
//!
//! Jitter adds up to `jitter_factor * nominal` on top, clamped so it never
//! reaches past the next stall's nominal delay or the ceiling. Delays are
//! therefore non-decreasing in the stall count for any random draw.

use crate::error::{ShipperError, ShipperResult};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay after the first stall, in milliseconds.
    pub base_ms: u64,
    /// Upper bound on any delay, in milliseconds.
    pub ceiling_ms: u64,
    /// Fraction of the nominal delay added as random jitter (0.0 to 1.0).
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 250,
            ceiling_ms: 30_000,
            jitter_factor: 0.2,
        }
    }
}

impl BackoffConfig {
    pub fn validate(&self, name: &str) -> ShipperResult<()> {
        if self.base_ms == 0 {
            return Err(ShipperError::Config(format!("{name}.base_ms must be positive")));
        }
        if self.ceiling_ms < self.base_ms {
            return Err(ShipperError::Config(format!(
                "{name}.ceiling_ms ({}) is below base_ms ({})",
                self.ceiling_ms, self.base_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ShipperError::Config(format!(
                "{name}.jitter_factor must be within 0.0..=1.0, got {}",
                self.jitter_factor
            )));
        }
        Ok(())
    }

    /// Delay before jitter for the given stall count.
    pub fn nominal_delay(&self, stall_count: u32) -> Duration {
        Duration::from_millis(self.nominal_ms(stall_count))
    }

    fn nominal_ms(&self, stall_count: u32) -> u64 {
        if stall_count == 0 {
            return 0;
        }
        let shift = stall_count - 1;
        let multiplier = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
        self.base_ms.saturating_mul(multiplier).min(self.ceiling_ms)
    }
}

/// Computes retry delays from consecutive stall counts.
///
/// Clones share one random source, so many reconcilers can draw jitter
/// from the same scheduler concurrently. Seed it for reproducible delays.
#[derive(Debug, Clone)]
pub struct BackoffScheduler {
    config: BackoffConfig,
    rng: Arc<Mutex<StdRng>>,
}

impl BackoffScheduler {
    /// Scheduler seeded from OS entropy.
    pub fn new(config: BackoffConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Scheduler with a fixed seed.
    pub fn with_seed(config: BackoffConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(config: BackoffConfig, rng: StdRng) -> Self {
        Self {
            config,
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Delay to wait after `stall_count` consecutive stalls.
    pub fn next_delay(&self, stall_count: u32) -> Duration {
        let low = self.config.nominal_ms(stall_count);
        let jitter_span = (low as f64 * self.config.jitter_factor) as u64;
        let high = low
            .saturating_add(jitter_span)
            .min(self.config.nominal_ms(stall_count.saturating_add(1)))
            .min(self.config.ceiling_ms);

        if high <= low {
            return Duration::from_millis(low);
        }
        let millis = self.rng.lock().gen_range(low..=high);
        Duration::from_millis(millis)
    }
}
