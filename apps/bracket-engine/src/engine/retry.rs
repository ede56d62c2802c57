//! Retry policies and the bounded backoff scheduler.
//!
//! Every network-facing loop in the engine (position confirmation, bracket
//! leg placement) runs under [`RetryScheduler::run`] with an explicit
//! [`RetryPolicy`] and an explicit error classifier. The classifier decision
//! (retry or surface immediately) is the most safety-critical call in the
//! engine, so it lives here as a plain unit-testable function over typed
//! errors, never inferred from message text.
//!
//! # Retryable vs terminal
//!
//! | Retryable | Non-Retryable |
//! |-----------|---------------|
//! | Network timeouts, resets | Order rejected by the venue |
//! | HTTP 5xx | Invalid price tick |
//! | Rate limits (429) | Insufficient margin |
//! | | Authentication failures |

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::exchange::ExchangeError;

/// Retry policy configuration.
///
/// Applies independently to position confirmation and to each bracket leg;
/// `max_attempts` counts total executions, so the overall wall-clock time of
/// a loop is bounded but not fixed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (total executions).
    pub max_attempts: u32,
    /// Initial backoff duration.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth.
    pub backoff_multiplier: f64,
    /// Jitter factor for randomization (0.2 = ±20%).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Policy for waiting on the exchange to reflect a new position: a flat
    /// one-second cadence for up to a minute.
    #[must_use]
    pub const fn confirmation() -> Self {
        Self {
            max_attempts: 60,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(1),
            backoff_multiplier: 1.0,
            jitter_factor: 0.1,
        }
    }

    /// Policy for bracket leg submission.
    #[must_use]
    pub const fn leg() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

/// Calculator for exponential backoff with jitter.
#[derive(Debug)]
pub struct ExponentialBackoffCalculator {
    current_attempt: u32,
    max_attempts: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    backoff_multiplier: f64,
    jitter_factor: f64,
}

impl ExponentialBackoffCalculator {
    /// Create a new backoff calculator from a retry policy.
    #[must_use]
    pub const fn new(policy: &RetryPolicy) -> Self {
        Self {
            current_attempt: 0,
            max_attempts: policy.max_attempts,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
            backoff_multiplier: policy.backoff_multiplier,
            jitter_factor: policy.jitter_factor,
        }
    }

    /// Get the next backoff duration with jitter.
    ///
    /// Returns `None` once the policy's attempt budget is spent.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.current_attempt >= self.max_attempts {
            return None;
        }

        let base_backoff_ms = self.calculate_base_backoff_ms();
        let jittered_ms = self.apply_jitter(base_backoff_ms);
        let capped_ms = jittered_ms.min(self.max_backoff_ms);

        self.current_attempt += 1;

        Some(Duration::from_millis(capped_ms))
    }

    /// Consume one attempt without producing a delay (used when the venue
    /// supplies its own `Retry-After`).
    pub const fn advance(&mut self) {
        self.current_attempt += 1;
    }

    fn calculate_base_backoff_ms(&self) -> u64 {
        let multiplier = self.backoff_multiplier.powi(self.current_attempt as i32);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let backoff = (self.initial_backoff_ms as f64 * multiplier) as u64;
        backoff.min(self.max_backoff_ms)
    }

    fn apply_jitter(&self, backoff_ms: u64) -> u64 {
        if self.jitter_factor <= 0.0 {
            return backoff_ms;
        }
        let mut rng = rand::rng();
        let jitter_range = backoff_ms as f64 * self.jitter_factor;
        let min = (backoff_ms as f64 - jitter_range).max(0.0);
        let max = backoff_ms as f64 + jitter_range;

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let jittered = rng.random_range(min..=max) as u64;
        jittered
    }
}

/// Classification of an error for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Transient failure: retry with backoff.
    Transient,
    /// Rate limited: retry, preferring the venue-supplied delay.
    RateLimited {
        /// Delay the venue asked for, when provided.
        retry_after: Option<Duration>,
    },
    /// Permanent failure: surface immediately, consume zero further attempts.
    Terminal,
}

/// Classify an [`ExchangeError`] for retry decisions.
///
/// Transport failures and server-side errors are transient; venue rejections,
/// authentication failures and unparseable responses are terminal.
#[must_use]
pub const fn classify_exchange(error: &ExchangeError) -> RetryClass {
    match error {
        ExchangeError::Transport(_) | ExchangeError::ServerError { .. } => RetryClass::Transient,
        ExchangeError::RateLimited { retry_after_secs } => RetryClass::RateLimited {
            retry_after: match retry_after_secs {
                Some(secs) => Some(Duration::from_secs(*secs)),
                None => None,
            },
        },
        ExchangeError::Rejected { .. }
        | ExchangeError::AuthenticationFailed
        | ExchangeError::OrderNotFound(_)
        | ExchangeError::InvalidResponse(_) => RetryClass::Terminal,
    }
}

/// Error returned by [`RetryScheduler::run`].
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The operation failed with a non-retryable error.
    #[error("terminal failure: {0}")]
    Terminal(E),
    /// The attempt budget was spent; the last error is attached.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts consumed.
        attempts: u32,
        /// The final error.
        last: E,
    },
    /// Shutdown was requested before the next attempt could start.
    #[error("cancelled by shutdown")]
    Cancelled,
}

/// Pluggable async clock.
///
/// Production uses [`TokioClock`]; tests use [`InstantClock`] so retry loops
/// run deterministically without real sleeps.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Sleep for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by `tokio::time::sleep`.
#[derive(Debug, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock that returns immediately and records the requested delays.
#[derive(Debug, Default)]
pub struct InstantClock {
    slept: std::sync::Mutex<Vec<Duration>>,
}

impl InstantClock {
    /// Create a new instant clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All delays that were requested, in order.
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Clock for InstantClock {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut slept) = self.slept.lock() {
            slept.push(duration);
        }
    }
}

/// Bounded retry driver shared by position confirmation and leg placement.
#[derive(Clone)]
pub struct RetryScheduler {
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
}

impl RetryScheduler {
    /// Create a scheduler with the given clock and shutdown token.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, shutdown: CancellationToken) -> Self {
        Self { clock, shutdown }
    }

    /// Execute `op` until it succeeds, fails terminally, or the attempt
    /// budget is spent.
    ///
    /// `classify` decides whether an error is worth another attempt. An
    /// in-flight call is never interrupted; shutdown is only observed between
    /// attempts.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::Terminal`] for non-retryable failures,
    /// [`RetryError::Exhausted`] when the budget is spent, and
    /// [`RetryError::Cancelled`] when shutdown preempts the next attempt.
    pub async fn run<T, E, F, Fut>(
        &self,
        policy: &RetryPolicy,
        classify: impl Fn(&E) -> RetryClass,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        E: std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut backoff = ExponentialBackoffCalculator::new(policy);
        let mut attempt: u32 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            attempt += 1;
            let error = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let class = classify(&error);
            if class == RetryClass::Terminal {
                return Err(RetryError::Terminal(error));
            }
            if attempt >= policy.max_attempts {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let delay = match class {
                RetryClass::RateLimited {
                    retry_after: Some(delay),
                } => {
                    backoff.advance();
                    delay
                }
                _ => backoff.next_backoff().unwrap_or(policy.max_backoff),
            };

            tracing::warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retryable failure, backing off"
            );
            self.clock.sleep(delay).await;
        }
    }
}
