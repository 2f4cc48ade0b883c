//! Submission throttle for the worker pool.
//!
//! Caps the rate at which candidates are handed to workers, independent of
//! the resolver's per-query backoff. Even when every query succeeds quickly
//! the pool never exceeds the configured submissions per second.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{Quota, RateLimiter};

/// Direct token bucket; the pool is the only key.
type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Token-bucket submission limiter. Cloning shares the bucket.
#[derive(Clone, Default)]
pub struct SubmissionThrottle {
    limiter: Option<Arc<DirectLimiter>>,
}

impl SubmissionThrottle {
    /// Allow `rate` submissions per second with a burst of `rate`.
    /// A rate of 0 disables throttling.
    pub fn per_second(rate: u32) -> Self {
        let limiter =
            NonZeroU32::new(rate).map(|rate| Arc::new(RateLimiter::direct(Quota::per_second(rate))));
        Self { limiter }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.limiter.is_some()
    }

    /// Wait until the next submission is allowed.
    pub async fn acquire(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

impl std::fmt::Debug for SubmissionThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionThrottle")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_disabled_never_waits() {
        let throttle = SubmissionThrottle::per_second(0);
        assert!(!throttle.is_enabled());
        let start = Instant::now();
        for _ in 0..1000 {
            throttle.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_rate_limits_after_burst() {
        let throttle = SubmissionThrottle::per_second(20);
        assert!(throttle.is_enabled());
        let start = Instant::now();
        // 20 in the initial burst, then 5 more at 50ms each.
        for _ in 0..25 {
            throttle.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_clones_share_bucket() {
        let a = SubmissionThrottle::per_second(10);
        let b = a.clone();
        let start = Instant::now();
        for _ in 0..10 {
            a.acquire().await;
        }
        b.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
