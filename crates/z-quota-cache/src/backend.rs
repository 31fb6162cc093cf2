//! The key/value seam every cache implementation plugs into.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Parameters of one token bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketSpec {
    /// Maximum number of tokens (the burst size).
    pub capacity: f64,
    /// Tokens added per `window_ms`.
    pub limit_per_window: f64,
    /// Length of the refill window in milliseconds.
    pub window_ms: f64,
}

impl BucketSpec {
    /// Tokens after refilling `tokens` over `elapsed_ms`, capped at capacity.
    ///
    /// Multiplying before dividing keeps whole-token refills exact.
    #[must_use]
    pub fn refill(&self, tokens: f64, elapsed_ms: f64) -> f64 {
        let refilled = tokens + elapsed_ms.max(0.0) * self.limit_per_window / self.window_ms;
        refilled.min(self.capacity)
    }

    /// How long an idle bucket takes to fill up completely.
    #[must_use]
    pub fn full_refill(&self) -> Duration {
        let ms = self.capacity * self.window_ms / self.limit_per_window;
        Duration::from_secs_f64((ms / 1000.0).max(1.0))
    }
}

/// Outcome of an atomic take on a bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenTake {
    /// Whether a token was granted.
    pub allowed: bool,
    /// Tokens left in the bucket after the operation.
    pub tokens: f64,
}

/// Key/value operations the cache layer needs from its backend.
///
/// Values are opaque strings (JSON in practice). Implementations must make
/// [`CacheBackend::take_token`] atomic per key across every caller sharing
/// the backend.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch a value; `None` on miss or expiry.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value that expires after `ttl`.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Delete every listed key in one operation.
    async fn delete(&self, keys: &[String]) -> Result<()>;

    /// Refill the bucket at `key` to `now_ms`, then try to take one token.
    ///
    /// A missing bucket starts full.
    async fn take_token(&self, key: &str, spec: BucketSpec, now_ms: i64) -> Result<TokenTake>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refill_is_exact_for_whole_tokens() {
        let spec = BucketSpec {
            capacity: 5.0,
            limit_per_window: 10.0,
            window_ms: 60_000.0,
        };
        assert!((spec.refill(0.0, 6_000.0) - 1.0).abs() < f64::EPSILON);
        assert!((spec.refill(4.5, 600_000.0) - 5.0).abs() < f64::EPSILON);
        assert!((spec.refill(2.0, -10.0) - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn idle_bucket_ttl_covers_full_refill() {
        let spec = BucketSpec {
            capacity: 20.0,
            limit_per_window: 60.0,
            window_ms: 60_000.0,
        };
        assert_eq!(spec.full_refill(), Duration::from_secs(20));
    }
}
