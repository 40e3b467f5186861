//! Per-client token-bucket rate limiting.
//!
//! Each external anime-DB client owns one limiter; the Jikan client stacks
//! two buckets (per-second and per-minute) and a request goes out only after
//! every bucket admits it. A 429 penalty pauses the whole client.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A single token bucket admitting `capacity` requests per `window`.
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(capacity: u32, window: Duration) -> Self {
        let capacity = capacity as f64;
        Self {
            capacity,
            refill_per_sec: capacity / window.as_secs_f64(),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, or report how long until one becomes available.
    fn try_take(&self) -> Result<(), Duration> {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - state.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }

    pub async fn acquire(&self) {
        loop {
            match self.try_take() {
                Ok(()) => return,
                Err(wait) => tokio::time::sleep(wait).await,
            }
        }
    }
}

/// A stack of buckets plus a shared 429 penalty window.
pub struct RateLimiter {
    buckets: Vec<TokenBucket>,
    hold_until: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(buckets: Vec<TokenBucket>) -> Self {
        Self {
            buckets,
            hold_until: Mutex::new(None),
        }
    }

    /// Wait until every bucket admits one request and any penalty expired.
    pub async fn acquire(&self) {
        loop {
            let hold = *self.hold_until.lock().unwrap();
            match hold {
                Some(until) if until > Instant::now() => {
                    tokio::time::sleep_until(until).await;
                }
                _ => break,
            }
        }
        for bucket in &self.buckets {
            bucket.acquire().await;
        }
    }

    /// Pause the whole client, typically from a 429 `Retry-After`.
    pub fn penalize(&self, wait: Duration) {
        let until = Instant::now() + wait;
        let mut hold = self.hold_until.lock().unwrap();
        if hold.map_or(true, |h| h < until) {
            *hold = Some(until);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn bucket_admits_up_to_capacity_immediately() {
        let bucket = TokenBucket::new(3, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..3 {
            bucket.acquire().await;
        }
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_delays_after_capacity() {
        let bucket = TokenBucket::new(2, Duration::from_secs(2));
        let start = Instant::now();
        for _ in 0..3 {
            bucket.acquire().await;
        }
        // Third request has to wait for one refill (1 token per second).
        assert!(Instant::now() >= start + Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn penalty_pauses_all_acquires() {
        let limiter = RateLimiter::new(vec![TokenBucket::new(10, Duration::from_secs(1))]);
        limiter.penalize(Duration::from_secs(5));
        let start = Instant::now();
        limiter.acquire().await;
        assert!(Instant::now() >= start + Duration::from_secs(5));
    }
}
