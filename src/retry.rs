//! One retry/backoff policy for every external call.
//!
//! Classifier tiers and store writes both go through [`RetryPolicy::run`].
//! The wait before retry `n` is `base_delay_ms * 2^(n-1)`, capped at
//! `max_delay_ms`; with the defaults (3 attempts, 500 ms) the sequence is
//! 500 ms → 1 s. A server-supplied `retry_after` hint replaces the computed
//! delay when it is longer.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::warn;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    /// `true` for transient failures (transport, timeout, 429, 5xx).
    fn is_retryable(&self) -> bool;

    /// Server-suggested wait before the next attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Minimum 1.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Upper bound for any single wait.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Policy that tries once and gives up.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Policy used for persistence: the first attempt plus one retry.
    pub fn retry_once(base_delay_ms: u64) -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms,
            ..Self::default()
        }
    }

    /// Wait before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(20);
        let ms = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(exp))
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Run `op` until it succeeds, fails permanently, or the budget is spent.
    ///
    /// `op` receives the 0-based attempt number. The last error is returned
    /// together with the number of attempts made.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, (E, u32)>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    if !e.is_retryable() || attempt >= attempts {
                        return Err((e, attempt));
                    }
                    let computed = self.delay_for(attempt);
                    let wait = e.retry_after().map_or(computed, |hint| hint.max(computed));
                    warn!(
                        "{}: attempt {}/{} failed: {}; retrying in {}ms",
                        label,
                        attempt,
                        attempts,
                        e,
                        wait.as_millis()
                    );
                    sleep(wait).await;
                }
            }
        }
    }
}
