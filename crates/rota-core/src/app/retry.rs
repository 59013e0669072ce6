//! Retry policy: decides backoff delays for failed task runs.

use std::time::Duration;

use serde::Deserialize;

/// Retry policy for tasks whose body returned a non-fatal error.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    #[serde(rename = "base_delay_secs", with = "secs")]
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Consecutive failures after which the task is disabled.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next run, given the number of failures so far (1-indexed).
    ///
    /// # Design note
    /// delay = base_delay * multiplier^(failures - 1), so with base 60s and
    /// multiplier 2.0: 60s, 120s, 240s, ...
    /// `failures = 0` uses base_delay.
    pub fn next_delay(&self, failures: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = base_secs * self.multiplier.powi(exponent);
        if delay_secs.is_finite() && delay_secs >= 0.0 {
            Duration::from_secs_f64(delay_secs)
        } else {
            self.base_delay
        }
    }
}

mod secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
