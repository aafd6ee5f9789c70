//! Retry loop with exponential backoff.
//!
//! Attempt 1 runs immediately. After a retryable failure the n-th retry is
//! preceded by a suspension of `2^n` time units, so with the default unit of
//! one second the waits are 2s, 4s, 8s, ...
//!
//! `max_attempts` counts invocations, not retries: with `max_attempts = 3` the
//! operation runs at most three times and sleeps at most twice. The loop ends
//! on the first success, on the first non-retryable error, or when the attempt
//! counter reaches `max_attempts`, returning the last error.

use crate::config::RetryConfig;
use crate::error::{Classify, ErrorClass};
use async_trait::async_trait;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Where one invocation sits inside a retried call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryContext {
    /// 1-based
    pub attempt: u32,
    pub max_attempts: u32,
}

impl RetryContext {
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Suspends the calling task between attempts
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    unit: Duration,
    retry_malformed: bool,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("unit", &self.unit)
            .field("retry_malformed", &self.retry_malformed)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// `max_attempts` of 0 is treated as 1.
    #[must_use]
    pub fn new(max_attempts: u32, unit: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            unit,
            retry_malformed: true,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
        )
        .retry_malformed(config.retry_malformed_body)
    }

    /// Whether undecodable bodies count as transient
    #[must_use]
    pub fn retry_malformed(mut self, retry: bool) -> Self {
        self.retry_malformed = retry;
        self
    }

    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Suspension before `attempt` (2-based): `unit * 2^(attempt - 1)`
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        self.unit.saturating_mul(2u32.saturating_pow(exponent))
    }

    pub fn is_retryable<E: Classify>(&self, err: &E) -> bool {
        match err.class() {
            ErrorClass::Transient => true,
            ErrorClass::Malformed => self.retry_malformed,
            ErrorClass::Permanent => false,
        }
    }

    /// Runs `operation` until it succeeds, fails permanently, or runs out of
    /// attempts.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        E: Classify + Display,
        F: FnMut(RetryContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts;
        let mut attempt = 1;

        loop {
            let context = RetryContext {
                attempt,
                max_attempts,
            };

            let err = match operation(context).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(attempt, max_attempts, "Succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !self.is_retryable(&err) {
                debug!(attempt, error = %err, "Non-retryable error");
                return Err(err);
            }

            if context.is_last() {
                error!(max_attempts, error = %err, "All retry attempts exhausted");
                return Err(err);
            }

            attempt += 1;
            let delay = self.delay_before(attempt);
            warn!(
                attempt = context.attempt,
                max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Retryable error, backing off"
            );
            self.sleeper.sleep(delay).await;
        }
    }
}
