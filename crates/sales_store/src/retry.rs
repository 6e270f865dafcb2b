//! Exponential-backoff retry executor.
//!
//! Knows nothing about the operation it wraps beyond whether a failure is
//! worth another attempt.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use common::SourceError;
use tokio::time::sleep;
use tracing::{debug, warn};

pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Errors that can say whether retrying may help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for SourceError {
    fn is_retryable(&self) -> bool {
        SourceError::is_retryable(self)
    }
}

/// Delay before the attempt following `attempt` (1-based):
/// `base * multiplier^(attempt - 1)`, saturating at `Duration::MAX`.
pub fn backoff_delay(base: Duration, multiplier: f64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let secs = base.as_secs_f64() * multiplier.powi(exponent);
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        backoff_delay(self.base_delay, self.backoff_multiplier, attempt)
    }

    /// Run `operation` up to `max_retries + 1` times.
    ///
    /// Non-retryable errors are returned immediately; otherwise the last
    /// error is returned once attempts run out.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let max_attempts = self.max_retries.saturating_add(1);
        let mut attempt = 1;

        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                debug!("Attempt {} failed with non-retryable error: {}", attempt, err);
                return Err(err);
            }
            if attempt >= max_attempts {
                warn!("Giving up after {} attempts: {}", attempt, err);
                return Err(err);
            }

            let delay = self.delay_for(attempt);
            warn!(
                "Attempt {}/{} failed: {}. Retrying in {:?}",
                attempt, max_attempts, err, delay
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}

/// Standalone form of [`RetryPolicy::run`] with the default multiplier.
pub async fn with_retry<T, E, F, Fut>(
    operation: F,
    max_retries: u32,
    base_delay: Duration,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    RetryPolicy::new(max_retries, base_delay).run(operation).await
}
