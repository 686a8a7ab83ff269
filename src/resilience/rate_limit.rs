//! Token-bucket rate limiter, adapted from the teacher's `r2e-rate-limit`
//! keyed-bucket design to the capacity/refill-rate-per-second form the
//! gateway needs, with an async `acquire` that backs off until tokens free
//! up.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A single named token bucket: `capacity` tokens, refilled continuously at
/// `refill_rate` tokens/second. All operations serialize under an internal
/// lock held only across the local state update.
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<Bucket>,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            state: Mutex::new(Bucket { tokens: capacity, last_refill: Instant::now() }),
        }
    }

    fn refill(bucket: &mut Bucket, capacity: f64, refill_rate: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * refill_rate).min(capacity);
        bucket.last_refill = now;
    }

    pub async fn try_acquire(&self, n: f64) -> bool {
        let mut bucket = self.state.lock().await;
        Self::refill(&mut bucket, self.capacity, self.refill_rate);
        if bucket.tokens >= n {
            bucket.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Tokens available right now, after a fresh refill.
    pub async fn remaining(&self) -> u64 {
        let mut bucket = self.state.lock().await;
        Self::refill(&mut bucket, self.capacity, self.refill_rate);
        bucket.tokens.floor().max(0.0) as u64
    }

    async fn wait_time(&self, n: f64) -> Duration {
        let mut bucket = self.state.lock().await;
        Self::refill(&mut bucket, self.capacity, self.refill_rate);
        if bucket.tokens >= n {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((n - bucket.tokens) / self.refill_rate)
        }
    }

    /// Block (async) until `n` tokens are available, then consume them.
    pub async fn acquire(&self, n: f64) {
        loop {
            if self.try_acquire(n).await {
                return;
            }
            let wait = self.wait_time(n).await;
            if wait > Duration::ZERO {
                tokio::time::sleep(wait).await;
            }
        }
    }
}

/// Keyed registry of token buckets, one per client identity (API-key prefix
/// preferred over remote address) or per provider name for the orchestrator's
/// upstream gate.
#[derive(Clone)]
pub struct RateLimitRegistry {
    buckets: Arc<DashMap<String, Arc<TokenBucket>>>,
    capacity: f64,
    refill_rate: f64,
}

impl RateLimitRegistry {
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self { buckets: Arc::new(DashMap::new()), capacity, refill_rate }
    }

    fn bucket_for(&self, key: &str) -> Arc<TokenBucket> {
        self.buckets
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(TokenBucket::new(self.capacity, self.refill_rate)))
            .clone()
    }

    pub async fn try_acquire(&self, key: &str, n: f64) -> bool {
        self.bucket_for(key).try_acquire(n).await
    }

    pub async fn acquire(&self, key: &str, n: f64) {
        self.bucket_for(key).acquire(n).await
    }

    pub async fn remaining(&self, key: &str) -> u64 {
        self.bucket_for(key).remaining().await
    }

    pub fn capacity(&self) -> u64 {
        self.capacity as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_of_capacity_succeeds_then_fails() {
        let bucket = TokenBucket::new(5.0, 1.0);
        for _ in 0..5 {
            assert!(bucket.try_acquire(1.0).await);
        }
        assert!(!bucket.try_acquire(1.0).await);
    }

    #[tokio::test]
    async fn refills_over_time() {
        let bucket = TokenBucket::new(1.0, 100.0);
        assert!(bucket.try_acquire(1.0).await);
        assert!(!bucket.try_acquire(1.0).await);
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert!(bucket.try_acquire(1.0).await);
    }

    #[tokio::test]
    async fn registry_isolates_keys() {
        let registry = RateLimitRegistry::new(1.0, 1.0);
        assert!(registry.try_acquire("a", 1.0).await);
        assert!(!registry.try_acquire("a", 1.0).await);
        assert!(registry.try_acquire("b", 1.0).await);
    }
}
