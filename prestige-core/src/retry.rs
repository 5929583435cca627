//! Bounded retry with exponential backoff.
//!
//! Used for model calls and for site writes. Only errors that report
//! themselves as retryable are repeated; anything else fails on the spot.

use crate::config::BackoffConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Errors that know whether another attempt might help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Delay requested by the other side, used instead of the computed
    /// backoff. Still capped at the policy's `max_delay`.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// How many times to retry and how long to wait in between.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts after the first one. Zero disables retrying.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay added or removed at random.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_backoff(3, &BackoffConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_backoff(max_retries: u32, backoff: &BackoffConfig) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(backoff.initial_delay_ms),
            max_delay: Duration::from_millis(backoff.max_delay_ms),
            multiplier: backoff.multiplier,
            jitter: 0.1,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Backoff before retry number `retry` (1-based), without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Wait before retry number `retry` after `err`.
    fn delay_for<E: Retryable>(&self, err: &E, retry: u32) -> Duration {
        match err.retry_after() {
            Some(hint) => hint.min(self.max_delay),
            None => self.delay_with_jitter(retry),
        }
    }

    fn delay_with_jitter(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let spread = base.as_millis() as f64 * self.jitter;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_millis((base.as_millis() as f64 + offset).max(0.0) as u64)
    }
}

/// Run `operation` until it succeeds, fails with a permanent error, or the
/// policy runs out of attempts.
///
/// On failure the last error is returned together with the number of
/// attempts made.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut operation: F,
) -> Result<T, (E, u32)>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(what, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                if !err.is_retryable() {
                    debug!(what, error = %err, "Permanent failure, not retrying");
                    return Err((err, attempt));
                }
                if attempt >= policy.max_attempts() {
                    warn!(what, attempt, error = %err, "Retries exhausted");
                    return Err((err, attempt));
                }

                let delay = policy.delay_for(&err, attempt);

                warn!(
                    what,
                    attempt,
                    max_attempts = policy.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Attempt failed, retrying"
                );

                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}
