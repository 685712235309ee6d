//! Back-off retries and deadlines.
//!
//! A failed background sync is rescheduled with growing delays, and every
//! lifetime extension is cut off after a bounded time.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::AgriError;

/// How often, and how patiently, to retry.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one. Never below 1.
    pub max_attempts: u32,
    /// Pause before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single pause.
    pub max_delay: Duration,
    /// Growth factor between consecutive pauses.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A single attempt.
    pub fn none() -> Self {
        Self::attempts(1)
    }

    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Pause to take after failed attempt number `failed` (1-based).
    pub fn pause_after(&self, failed: u32) -> Duration {
        let exponent = failed.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Run `operation` until it succeeds or `config.max_attempts` is used up.
/// The error of the final attempt is returned.
pub async fn retry_with_backoff<T, E, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Succeeded on retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if attempt == attempts {
            warn!(attempt, error = %error, "Out of attempts");
            return Err(error);
        }

        let pause = config.pause_after(attempt);
        warn!(attempt, attempts, error = %error, ?pause, "Attempt failed, retrying");
        sleep(pause).await;
        attempt += 1;
    }
}

/// Await `future`, giving up with [`AgriError::Timeout`] after `limit`.
pub async fn with_timeout<T>(limit: Duration, future: impl Future<Output = T>) -> crate::Result<T> {
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| AgriError::Timeout(limit))
}
