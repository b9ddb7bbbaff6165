//! Exponential backoff with bounded jitter.
//!
//! `delay = min(base * 2^attempt, max)`, scaled by a uniform factor in
//! `[1 - jitter, 1 + jitter]` and clamped to `max` again so the ceiling is
//! never exceeded.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::core::{
    DEFAULT_BACKOFF_JITTER, DEFAULT_RECONNECT_BASE_DELAY, DEFAULT_RECONNECT_MAX_DELAY,
    DEFAULT_RETRY_BASE_DELAY, DEFAULT_RETRY_MAX_DELAY,
};

/// Largest exponent applied; beyond this every delay is capped anyway.
const MAX_EXPONENT: u32 = 32;

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BackoffConfig {
    /// Delay for attempt 0.
    pub base_delay: Duration,
    /// Ceiling for any delay.
    pub max_delay: Duration,
    /// Jitter fraction in `[0, 1)`.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::reconnect()
    }
}

impl BackoffConfig {
    /// Reconnect defaults: 1s doubling to 30s, ±20%.
    pub fn reconnect() -> Self {
        Self {
            base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            max_delay: DEFAULT_RECONNECT_MAX_DELAY,
            jitter: DEFAULT_BACKOFF_JITTER,
        }
    }

    /// Write retry defaults: 1s, 2s, 4s, ±20%.
    pub fn retry() -> Self {
        Self {
            base_delay: DEFAULT_RETRY_BASE_DELAY,
            max_delay: DEFAULT_RETRY_MAX_DELAY,
            jitter: DEFAULT_BACKOFF_JITTER,
        }
    }

    /// Check the parameters are usable.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_delay.is_zero() {
            return Err("backoff base delay must be non-zero".into());
        }
        if self.max_delay < self.base_delay {
            return Err(format!(
                "backoff max delay {:?} is below base delay {:?}",
                self.max_delay, self.base_delay
            ));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(format!("backoff jitter {} must be in [0, 1)", self.jitter));
        }
        Ok(())
    }

    /// Delay for `attempt` before jitter.
    pub fn nominal(&self, attempt: u32) -> Duration {
        let factor = 2f64.powi(attempt.min(MAX_EXPONENT) as i32);
        let secs = self.base_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Jittered delay for `attempt`, never above `max_delay`.
    pub fn delay(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let nominal = self.nominal(attempt).as_secs_f64();
        let factor = rng.gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        Duration::from_secs_f64((nominal * factor).min(self.max_delay.as_secs_f64()))
    }
}

/// Stateful backoff: counts consecutive failures and draws jittered delays.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
    rng: StdRng,
}

impl ExponentialBackoff {
    /// Create a backoff seeded from OS entropy.
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempt: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Create a backoff with a fixed seed (deterministic jitter).
    pub fn with_seed(config: BackoffConfig, seed: u64) -> Self {
        Self {
            config,
            attempt: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Create from an optional seed.
    pub fn from_seed(config: BackoffConfig, seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::with_seed(config, seed),
            None => Self::new(config),
        }
    }

    /// Consecutive failures recorded so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Parameters.
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Record a failure and return how long to wait before the next try.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.config.delay(self.attempt, &mut self.rng);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Back to `base_delay` (after a success).
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
