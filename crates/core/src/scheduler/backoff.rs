//! Retry policy: exponential backoff with bounded, deterministic jitter.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry bookkeeping for retryable delivery failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retryable failures allowed before a document is forced to ERROR.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay after the first failure (milliseconds).
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Upper bound for any delay (milliseconds).
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,

    /// Extra delay as a fraction of the exponential step, in [0, 1).
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

fn default_max_retries() -> u32 {
    10
}

fn default_backoff_base() -> u64 {
    30_000 // 30 seconds
}

fn default_backoff_max() -> u64 {
    3_600_000 // 1 hour
}

fn default_jitter_ratio() -> f64 {
    0.2
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

impl RetryPolicy {
    /// Whether `retries` failures exhaust the policy.
    pub fn is_exhausted(&self, retries: u32) -> bool {
        retries >= self.max_retries
    }

    /// Delay before the next attempt after the `retries`-th failure.
    ///
    /// The exponential step doubles per failure and the jitter never exceeds
    /// `jitter_ratio` of that step, so with a ratio below 1 the delay strictly
    /// increases with `retries` until it reaches `backoff_max_ms`, then stays
    /// there. The jitter is derived from `seed` so a replayed failure lands at
    /// the same point in time.
    pub fn delay(&self, retries: u32, seed: &str) -> Duration {
        let max = self.backoff_max_ms;
        let exponent = retries.saturating_sub(1).min(63);
        let step = self.backoff_base_ms.saturating_mul(1u64 << exponent).min(max);

        if step >= max {
            return Duration::from_millis(max);
        }

        let jitter = (step as f64 * self.jitter_ratio * jitter_unit(seed, retries)) as u64;
        Duration::from_millis(step.saturating_add(jitter).min(max))
    }
}

/// Pseudo-random value in [0, 1) that is stable for a given seed and attempt.
fn jitter_unit(seed: &str, retries: u32) -> f64 {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    retries.hash(&mut hasher);
    (hasher.finish() >> 11) as f64 / (1u64 << 53) as f64
}
