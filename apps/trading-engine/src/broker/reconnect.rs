//! Reconnection backoff with full jitter.
//!
//! Exponential backoff (base 1 s, cap 60 s) with a uniformly random
//! delay in `[0, capped]`, the "full jitter" scheme. Reconnection is
//! unbounded: the connector keeps trying until shutdown.

use std::time::Duration;

use rand::Rng;

/// Backoff state for one connection.
#[derive(Debug)]
pub struct ReconnectPolicy {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl ReconnectPolicy {
    /// Policy with the given base and cap.
    #[must_use]
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    /// Next delay to wait before reconnecting.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn next_backoff(&mut self) -> Duration {
        let base_ms = self.base.as_millis() as f64;
        let exponential = base_ms * 2f64.powi(i32::try_from(self.attempt).unwrap_or(i32::MAX));
        let capped = exponential.min(self.cap.as_millis() as f64);

        self.attempt = self.attempt.saturating_add(1);

        let jittered = rand::rng().random_range(0.0..=capped);
        Duration::from_millis(jittered as u64)
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Attempts since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}
