//! Reconnection delays: exponential with randomized spread, capped.

use std::time::Duration;

use rand::Rng;

/// Reconnection policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Relative spread in `[0, 1]`; `0.5` means ±50%.
    pub jitter: f64,
    /// Consecutive failed attempts before giving up; `0` retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            jitter: 0.5,
            max_attempts: 0,
        }
    }
}

/// Tracks consecutive failures and yields the next delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    attempts: u32,
}

impl Backoff {
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts != 0 && self.attempts >= self.config.max_attempts {
            return None;
        }
        let exponent = self.attempts.min(16);
        self.attempts += 1;

        let base = self
            .config
            .initial_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.config.max_delay);
        let jitter = self.config.jitter.clamp(0.0, 1.0);
        if jitter.is_nan() || jitter <= 0.0 {
            return Some(base);
        }

        let mut rng = rand::rng();
        let deviation = base.mul_f64(rng.random::<f64>() * jitter);
        let delay = if rng.random_bool(0.5) {
            base.saturating_sub(deviation)
        } else {
            base.saturating_add(deviation)
        };
        Some(delay.min(self.config.max_delay))
    }

    /// Forget past failures after a successful connect.
    pub const fn reset(&mut self) {
        self.attempts = 0;
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }
}
