//! Uniform retry/backoff policy wrapped around every external call.

use crate::types::{EnricherError, Result};
use backoff::backoff::Backoff;
use backoff::exponential::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Explicit retry policy: bounded attempts, exponential backoff with jitter.
/// Only transient failures (timeout, server error, rate limit) are retried;
/// authentication and validation failures surface immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that gives up after the first failure.
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn backoff(&self) -> ExponentialBackoff<backoff::SystemClock> {
        ExponentialBackoff {
            current_interval: self.initial_delay,
            initial_interval: self.initial_delay,
            max_interval: self.max_delay,
            multiplier: self.multiplier,
            // Jitter: each delay is drawn from +/-50% around the schedule.
            randomization_factor: 0.5,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Run `operation` up to `max_attempts` times. A non-retryable error or
    /// exhaustion returns the last error; the caller records it without
    /// aborting sibling work.
    pub async fn execute<T, F, Fut>(&self, op_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.backoff();
        let max_attempts = self.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => {
                    debug!(op = op_name, attempt, error = %e, "non-retryable failure");
                    return Err(e);
                }
                Err(e) if attempt == max_attempts => {
                    warn!(op = op_name, attempts = max_attempts, error = %e,
                          "retries exhausted");
                    return Err(e);
                }
                Err(e) => {
                    // A rate-limit hint from the remote side overrides the
                    // computed schedule.
                    let delay = match &e {
                        EnricherError::RateLimited {
                            retry_after_secs: Some(secs),
                        } => Duration::from_secs(*secs),
                        _ => backoff.next_backoff().unwrap_or(self.max_delay),
                    };
                    warn!(op = op_name, attempt, delay_ms = delay.as_millis() as u64,
                          error = %e, "transient failure, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }

        unreachable!("retry loop always returns within max_attempts")
    }
}
