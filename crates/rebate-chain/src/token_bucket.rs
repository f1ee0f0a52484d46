use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;

/// Classic leaky-bucket rate limiter (§4.3.3), wrapped around
/// `create_auth`, `delegated_pay`, and confirmation polling to keep well
/// clear of provider rate limits.
pub struct TokenBucket {
    capacity: f64,
    rate_per_sec: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, rate_per_sec: f64) -> Self {
        Self {
            capacity: capacity as f64,
            rate_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Non-blocking: refills for elapsed time, then takes one token if
    /// available. Returns whether a token was taken.
    pub fn take(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        let elapsed = state.last_refill.elapsed().as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.capacity);
        state.last_refill = Instant::now();

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Retries [`take`] until one succeeds, sleeping a random 0-500ms
    /// between attempts.
    pub async fn wait_for_token(&self) {
        while !self.take() {
            let backoff_ms = rand::thread_rng().gen_range(0..=500);
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_capacity_then_refuses() {
        let bucket = TokenBucket::new(3, 1.0);
        assert!(bucket.take());
        assert!(bucket.take());
        assert!(bucket.take());
        assert!(!bucket.take());
    }

    #[tokio::test]
    async fn wait_for_token_eventually_succeeds_after_exhaustion() {
        let bucket = TokenBucket::new(1, 1000.0);
        assert!(bucket.take());
        assert!(!bucket.take());
        bucket.wait_for_token().await;
    }
}
