//! Global token-bucket rate limiter for outbound delivery.
//!
//! One permit is released per fixed interval. All delivery tasks share a
//! single bucket, so the combined send rate across destinations never
//! exceeds the configured ceiling.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Token bucket releasing one permit per interval.
///
/// `acquire` suspends until the next permit is available. Waiters are
/// serialized on an internal mutex, so permits are handed out in request
/// order.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_free: Mutex<Instant>,
}

impl RateLimiter {
    /// Create a limiter releasing `rate_per_sec` permits per second.
    ///
    /// A rate of zero or below is clamped to one permit per second.
    pub fn new(rate_per_sec: f64) -> Self {
        let rate = if rate_per_sec > 0.0 { rate_per_sec } else { 1.0 };
        Self {
            interval: Duration::from_secs_f64(1.0 / rate),
            next_free: Mutex::new(Instant::now()),
        }
    }

    /// Consume one token, waiting for it to become available.
    ///
    /// The first call after idle time returns immediately; subsequent calls
    /// are spaced at least one interval apart.
    pub async fn acquire(&self) {
        let mut next_free = self.next_free.lock().await;
        let now = Instant::now();
        if *next_free > now {
            tokio::time::sleep_until(*next_free).await;
        }
        *next_free = (*next_free).max(now) + self.interval;
    }

    /// The interval between permits.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}
