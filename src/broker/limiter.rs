//! Publish rate limiting
//!
//! Each room owns one `RateLimiter`. It is a token bucket: one token is
//! added every `interval`, up to `burst` tokens. A publish that finds the
//! bucket empty reserves the next token (the balance goes negative) and
//! sleeps until that token matures, so waiting publishers are released in
//! the order they asked. Only the publishing path waits here; delivery to
//! subscribers never does.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::utils::error::PublishError;

#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    burst: u32,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

impl RateLimiter {
    /// A zero `interval` disables limiting. `burst` is clamped to at least one.
    pub fn new(interval: Duration, burst: u32) -> Self {
        let burst = burst.max(1);
        Self {
            interval,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: f64::from(burst),
                last: Instant::now(),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Waits until a token is available or `cancel` fires.
    ///
    /// Excess callers are delayed, never dropped. On cancellation the
    /// reserved token is handed back and `PublishError::Cancelled` returned.
    /// Dropping the returned future mid-wait hands the token back as well.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), PublishError> {
        if cancel.is_cancelled() {
            return Err(PublishError::Cancelled);
        }
        if self.interval.is_zero() {
            return Ok(());
        }

        let wait = self.reserve(Instant::now());
        if wait.is_zero() {
            return Ok(());
        }

        // given back unless the sleep runs to completion, including when
        // the caller drops this future mid-wait
        let reservation = Reservation { limiter: self };
        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                reservation.keep();
                Ok(())
            }
            _ = cancel.cancelled() => Err(PublishError::Cancelled),
        }
    }

    /// Takes one token and returns how long the caller must wait for it.
    fn reserve(&self, now: Instant) -> Duration {
        let mut bucket = self.bucket.lock();
        bucket.refill(now, self.interval, self.burst);
        bucket.tokens -= 1.0;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            self.interval.mul_f64(-bucket.tokens)
        }
    }

    fn release(&self) {
        let mut bucket = self.bucket.lock();
        bucket.tokens = (bucket.tokens + 1.0).min(f64::from(self.burst));
    }
}

struct Reservation<'a> {
    limiter: &'a RateLimiter,
}

impl Reservation<'_> {
    fn keep(self) {
        std::mem::forget(self);
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

impl Bucket {
    fn refill(&mut self, now: Instant, interval: Duration, burst: u32) {
        let elapsed = now.saturating_duration_since(self.last);
        self.last = now;
        let earned = elapsed.as_secs_f64() / interval.as_secs_f64();
        self.tokens = (self.tokens + earned).min(f64::from(burst));
    }
}
