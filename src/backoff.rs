use std::time::Duration;

use rand::Rng;

use crate::config::RateLimitConfig;

/// Randomized exponential backoff: `initial * 2^attempt`, capped at `max`,
/// then jittered by up to `± jitter_factor` of the capped value.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    jitter_factor: f64,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, jitter_factor: f64) -> Self {
        let jitter_factor = if jitter_factor.is_finite() {
            jitter_factor.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            initial,
            max,
            jitter_factor,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.initial_backoff, config.max_backoff, config.jitter_factor)
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Delay before capping and jitter. Saturates instead of overflowing.
    pub fn capped(&self, attempt: u32) -> Duration {
        let factor = 2_f64.powi(attempt.min(63) as i32);
        let secs = self.initial.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let capped = self.capped(attempt).as_secs_f64();
        let spread = capped * self.jitter_factor;
        let jitter = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        Duration::from_secs_f64((capped + jitter).max(0.0))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}
