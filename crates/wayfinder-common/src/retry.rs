//! Built-in retry policies.
//!
//! All three policies are stateless per call: the pool passes in the attempt
//! counter and elapsed time, so one policy value can safely serve many
//! concurrent `execute` calls.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::contracts::RetryPolicy;

/// Never grants a second attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRetry;

#[async_trait]
impl RetryPolicy for NeverRetry {
    async fn allow_retry(&self, _attempt: u32, _elapsed: Duration) -> bool {
        false
    }
}

/// Grants retries until a fixed number of total attempts has been made.
///
/// `MaxAttemptsRetry::new(3)` allows the original attempt plus two retries.
#[derive(Debug, Clone, Copy)]
pub struct MaxAttemptsRetry {
    max_attempts: u32,
}

impl MaxAttemptsRetry {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }
}

#[async_trait]
impl RetryPolicy for MaxAttemptsRetry {
    async fn allow_retry(&self, attempt: u32, _elapsed: Duration) -> bool {
        attempt < self.max_attempts
    }
}

/// Counted retries with exponential backoff between attempts.
///
/// Before granting attempt `n + 1` the policy sleeps for
/// `initial_backoff * multiplier^(n - 1)`, capped at `max_backoff`. The
/// sleep happens inside `allow_retry`, so the pool's retry loop pauses
/// without any extra plumbing.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoffRetry {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
}

impl ExponentialBackoffRetry {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
            multiplier: 2.0,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let backoff =
            self.initial_backoff.as_millis() as f64 * self.multiplier.powi(attempt as i32 - 1);
        Duration::from_millis((backoff as u64).min(self.max_backoff.as_millis() as u64))
    }
}

#[async_trait]
impl RetryPolicy for ExponentialBackoffRetry {
    async fn allow_retry(&self, attempt: u32, elapsed: Duration) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }

        let backoff = self.backoff_for(attempt);
        debug!(
            attempt,
            elapsed_ms = elapsed.as_millis() as u64,
            backoff_ms = backoff.as_millis() as u64,
            "backing off before retry"
        );
        tokio::time::sleep(backoff).await;
        true
    }
}
