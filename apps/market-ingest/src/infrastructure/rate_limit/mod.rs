//! Token Bucket Rate Limiter
//!
//! Bounds the outbound REST request rate. Tokens refill continuously at a
//! fixed rate, computed lazily from elapsed time on every access, and are
//! capped at the bucket capacity.
//!
//! Waiters are served strictly in arrival order: the head waiter holds the
//! queue lock (a fair `tokio` mutex) until its request is covered, so a later
//! caller with a smaller request never overtakes an earlier one.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::metrics;

/// Shortest sleep between refill checks while waiting.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Longest sleep between refill checks while waiting.
const MAX_WAIT: Duration = Duration::from_secs(60);

/// Rate limiter errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RateLimitError {
    /// Capacity or refill rate is not a positive finite number.
    #[error("invalid rate limit: capacity={capacity}, refill_per_sec={refill_per_sec}")]
    InvalidConfig {
        /// Configured capacity.
        capacity: f64,
        /// Configured refill rate.
        refill_per_sec: f64,
    },

    /// Request can never be satisfied by this bucket.
    #[error("requested {requested} tokens exceeds capacity {capacity}")]
    ExceedsCapacity {
        /// Tokens requested.
        requested: f64,
        /// Bucket capacity.
        capacity: f64,
    },
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// FIFO token bucket.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
    queue: tokio::sync::Mutex<()>,
}

impl TokenBucket {
    /// Create a full bucket.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::InvalidConfig`] unless both values are
    /// positive and finite.
    pub fn new(capacity: f64, refill_per_sec: f64) -> Result<Self, RateLimitError> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if !valid(capacity) || !valid(refill_per_sec) {
            return Err(RateLimitError::InvalidConfig {
                capacity,
                refill_per_sec,
            });
        }
        Ok(Self {
            capacity,
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            queue: tokio::sync::Mutex::new(()),
        })
    }

    /// Bucket sized for a requests-per-minute budget: capacity equals the
    /// per-minute count and the refill rate spreads it over sixty seconds.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::InvalidConfig`] for a zero budget.
    pub fn per_minute(requests: u32) -> Result<Self, RateLimitError> {
        let capacity = f64::from(requests);
        Self::new(capacity, capacity / 60.0)
    }

    /// Maximum tokens held.
    #[must_use]
    pub const fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens added per second.
    #[must_use]
    pub const fn refill_per_sec(&self) -> f64 {
        self.refill_per_sec
    }

    /// Tokens currently available. Refills but never blocks.
    #[must_use]
    pub fn tokens(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }

    /// Wait until `n` tokens are available, then debit them.
    ///
    /// Callers are released in the order they called `acquire`. Cancelling
    /// the returned future gives up the caller's place without debiting.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::ExceedsCapacity`] if `n` is larger than the
    /// bucket can ever hold.
    pub async fn acquire(&self, n: f64) -> Result<(), RateLimitError> {
        if n > self.capacity {
            return Err(RateLimitError::ExceedsCapacity {
                requested: n,
                capacity: self.capacity,
            });
        }

        let started = Instant::now();
        let _turn = self.queue.lock().await;

        loop {
            let wait = {
                let mut state = self.state.lock();
                self.refill(&mut state);
                if state.tokens >= n {
                    state.tokens -= n;
                    metrics::set_rate_limit_tokens(state.tokens);
                    None
                } else {
                    let deficit = n - state.tokens;
                    let delay = Duration::try_from_secs_f64(deficit / self.refill_per_sec)
                        .unwrap_or(MAX_WAIT);
                    Some(delay.clamp(MIN_WAIT, MAX_WAIT))
                }
            };

            match wait {
                None => break,
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }

        let waited = started.elapsed();
        if !waited.is_zero() {
            metrics::record_rate_limit_wait(waited);
        }
        Ok(())
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = elapsed
                .mul_add(self.refill_per_sec, state.tokens)
                .min(self.capacity);
            state.last_refill = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn rejects_invalid_config() {
        assert!(TokenBucket::new(0.0, 1.0).is_err());
        assert!(TokenBucket::new(10.0, f64::NAN).is_err());
        assert!(TokenBucket::per_minute(0).is_err());
    }

    #[test]
    fn per_minute_sizing() {
        let bucket = TokenBucket::per_minute(120).unwrap();
        assert!((bucket.capacity() - 120.0).abs() < f64::EPSILON);
        assert!((bucket.refill_per_sec() - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn full_bucket_acquire_is_immediate() {
        let bucket = TokenBucket::new(5.0, 1.0).unwrap();
        let start = Instant::now();
        bucket.acquire(5.0).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(bucket.tokens() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn next_acquire_waits_for_refill() {
        let bucket = TokenBucket::new(5.0, 2.0).unwrap();
        bucket.acquire(5.0).await.unwrap();

        let start = Instant::now();
        bucket.acquire(1.0).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn later_small_request_cannot_overtake() {
        let bucket = Arc::new(TokenBucket::new(10.0, 1.0).unwrap());
        bucket.acquire(10.0).await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));

        let large = {
            let (bucket, order) = (Arc::clone(&bucket), Arc::clone(&order));
            tokio::spawn(async move {
                bucket.acquire(8.0).await.unwrap();
                order.lock().push("large");
            })
        };
        tokio::task::yield_now().await;

        let small = {
            let (bucket, order) = (Arc::clone(&bucket), Arc::clone(&order));
            tokio::spawn(async move {
                bucket.acquire(1.0).await.unwrap();
                order.lock().push("small");
            })
        };

        large.await.unwrap();
        small.await.unwrap();
        assert_eq!(*order.lock(), vec!["large", "small"]);
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_never_exceed_capacity() {
        let bucket = TokenBucket::new(3.0, 100.0).unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!((bucket.tokens() - 3.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn vanishing_refill_rate_keeps_waiting() {
        let bucket = TokenBucket::new(1.0, 1e-20).unwrap();
        bucket.acquire(1.0).await.unwrap();

        let pending = tokio::time::timeout(Duration::from_secs(600), bucket.acquire(1.0)).await;
        assert!(pending.is_err());
        assert!(bucket.tokens() < 1.0);
    }

    #[tokio::test]
    async fn oversized_request_is_rejected() {
        let bucket = TokenBucket::new(2.0, 1.0).unwrap();
        let err = bucket.acquire(3.0).await.unwrap_err();
        assert!(matches!(err, RateLimitError::ExceedsCapacity { .. }));
        assert!((bucket.tokens() - 2.0).abs() < f64::EPSILON);
    }
}
