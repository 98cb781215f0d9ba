//! Requests-per-minute gate for LLM calls.
//!
//! Every classifier tier call waits on the shared governor permit via
//! `until_ready()`, which spaces requests evenly at the configured rate.

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Shared limiter. `None` inside means unlimited.
pub struct RequestLimiter {
    limiter: Option<DirectLimiter>,
    per_minute: u32,
}

impl RequestLimiter {
    /// Allow `n` requests per minute; `0` disables limiting.
    pub fn per_minute(n: u32) -> Self {
        let limiter = NonZeroU32::new(n).map(|n| DirectLimiter::direct(Quota::per_minute(n)));
        Self {
            limiter,
            per_minute: n,
        }
    }

    pub fn unlimited() -> Self {
        Self::per_minute(0)
    }

    pub fn rate(&self) -> Option<u32> {
        self.limiter.as_ref().map(|_| self.per_minute)
    }

    /// Wait until a request may be sent.
    pub async fn acquire(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

impl std::fmt::Debug for RequestLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestLimiter")
            .field("per_minute", &self.rate())
            .finish()
    }
}

/// Parse a Retry-After header value (seconds or HTTP-date).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    // HTTP-date: fall back to a short fixed wait instead of parsing it.
    if value.contains(',') || value.contains("GMT") {
        return Some(Duration::from_secs(5));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unlimited_never_waits() {
        let limiter = RequestLimiter::unlimited();
        assert_eq!(limiter.rate(), None);
        for _ in 0..100 {
            limiter.acquire().await;
        }
    }

    #[tokio::test]
    async fn burst_within_quota_is_immediate() {
        let limiter = RequestLimiter::per_minute(30);
        assert_eq!(limiter.rate(), Some(30));
        let start = std::time::Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn retry_after_values() {
        assert_eq!(parse_retry_after(" 12 "), Some(Duration::from_secs(12)));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::from_secs(5))
        );
        assert_eq!(parse_retry_after("soon"), None);
    }
}
