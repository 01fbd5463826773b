//! Leaky-bucket rate limiting for broker requests.
//!
//! Two buckets protect the two broker-side quotas: trading operations
//! (50/s) and history downloads (5/s). `acquire` suspends the caller
//! until a slot frees up; requests are never silently dropped.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Default trading-operations budget per second.
pub const TRADING_OPS_PER_SEC: usize = 50;
/// Default history-operations budget per second.
pub const HISTORY_OPS_PER_SEC: usize = 5;

/// Async leaky bucket: at most `rate` acquisitions per window.
#[derive(Debug)]
pub struct RateLimiter {
    rate: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Limiter allowing `rate` acquisitions per second.
    #[must_use]
    pub fn per_second(rate: usize) -> Self {
        Self::new(rate, Duration::from_secs(1))
    }

    /// Limiter allowing `rate` acquisitions per `window`.
    #[must_use]
    pub fn new(rate: usize, window: Duration) -> Self {
        Self {
            rate,
            window,
            timestamps: Mutex::new(VecDeque::with_capacity(rate)),
        }
    }

    /// Wait until an acquisition is allowed, then record it.
    ///
    /// Holding the internal lock across the sleep serializes waiters,
    /// which keeps acquisitions fair and the bucket arithmetic simple.
    pub async fn acquire(&self) {
        let mut timestamps = self.timestamps.lock().await;
        let now = Instant::now();

        while let Some(&front) = timestamps.front() {
            if now.duration_since(front) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() >= self.rate {
            if let Some(&front) = timestamps.front() {
                let wake_at = front + self.window;
                tokio::time::sleep_until(wake_at).await;
                timestamps.pop_front();
            }
        }

        timestamps.push_back(Instant::now());
    }

    /// Acquisitions currently inside the window.
    pub async fn current_usage(&self) -> usize {
        let mut timestamps = self.timestamps.lock().await;
        let now = Instant::now();
        while let Some(&front) = timestamps.front() {
            if now.duration_since(front) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
        timestamps.len()
    }
}

/// The connector's pair of buckets.
#[derive(Debug)]
pub struct RequestBudget {
    /// Trading and account operations.
    pub trading: RateLimiter,
    /// History downloads.
    pub history: RateLimiter,
}

impl Default for RequestBudget {
    fn default() -> Self {
        Self {
            trading: RateLimiter::per_second(TRADING_OPS_PER_SEC),
            history: RateLimiter::per_second(HISTORY_OPS_PER_SEC),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_under_limit_does_not_block() {
        let limiter = RateLimiter::per_second(5);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(limiter.current_usage().await, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_over_limit_suspends_until_window_frees() {
        let limiter = RateLimiter::per_second(2);
        limiter.acquire().await;
        limiter.acquire().await;

        let start = Instant::now();
        limiter.acquire().await;
        // Third acquisition had to wait out the 1s window (virtual time).
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_frees_slots() {
        let limiter = RateLimiter::per_second(2);
        limiter.acquire().await;
        limiter.acquire().await;
        tokio::time::advance(Duration::from_millis(1100)).await;
        assert_eq!(limiter.current_usage().await, 0);
    }
}
