//! Token-bucket rate limiter.
//!
//! One bucket per identity, stored in the cache backend so that every
//! service instance sharing the backend enforces the same budget. A bucket
//! holds up to `burst` tokens and refills continuously at
//! `limit_per_window / window`.
//!
//! The limiter fails open: if the backend is unreachable or slow, requests
//! are allowed and the failure is logged.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use z_quota_core::Clock;

use crate::backend::{BucketSpec, CacheBackend};
use crate::keys;

/// Rate-limit parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests granted per window once the burst is spent.
    pub limit_per_window: u32,
    /// Refill window.
    pub window: Duration,
    /// Bucket capacity.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit_per_window: 60,
            window: Duration::from_secs(60),
            burst: 20,
        }
    }
}

impl RateLimitConfig {
    /// Wait hint handed to denied callers: the time one token takes to refill.
    #[must_use]
    pub fn retry_after(&self) -> Duration {
        self.window / self.limit_per_window.max(1)
    }

    fn bucket(&self) -> BucketSpec {
        #[allow(clippy::cast_precision_loss)]
        let window_ms = self.window.as_millis().max(1) as f64;
        BucketSpec {
            capacity: f64::from(self.burst),
            limit_per_window: f64::from(self.limit_per_window.max(1)),
            window_ms,
        }
    }
}

/// Result of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed.
    Allowed {
        /// Whole tokens left in the bucket.
        remaining: u32,
    },
    /// The request must be rejected.
    Denied {
        /// How long the caller should wait before retrying.
        retry_after: Duration,
    },
}

impl Decision {
    /// Whether the request may proceed.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Per-identity token-bucket limiter.
#[derive(Clone)]
pub struct RateLimiter {
    backend: Arc<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
    op_timeout: Duration,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Create a limiter over `backend`.
    #[must_use]
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        clock: Arc<dyn Clock>,
        config: RateLimitConfig,
        op_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            clock,
            config,
            op_timeout,
        }
    }

    /// The active parameters.
    #[must_use]
    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Take one token from the bucket of `identity`.
    pub async fn check(&self, identity: &str) -> Decision {
        let key = keys::rate_limit(identity);
        let now_ms = self.clock.now().timestamp_millis();
        let take = self.backend.take_token(&key, self.config.bucket(), now_ms);

        match tokio::time::timeout(self.op_timeout, take).await {
            Ok(Ok(take)) if take.allowed => {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let remaining = take.tokens.max(0.0).floor() as u32;
                Decision::Allowed { remaining }
            }
            Ok(Ok(_)) => {
                debug!(identity, "Rate limit exceeded");
                Decision::Denied {
                    retry_after: self.config.retry_after(),
                }
            }
            Ok(Err(error)) => {
                warn!(identity, %error, "Rate limiter backend failed, allowing request");
                Decision::Allowed {
                    remaining: self.config.burst,
                }
            }
            Err(_) => {
                warn!(identity, "Rate limiter backend timed out, allowing request");
                Decision::Allowed {
                    remaining: self.config.burst,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCache;
    use chrono::Utc;
    use z_quota_core::ManualClock;

    fn limiter(config: RateLimitConfig) -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new(Utc::now());
        let limiter = RateLimiter::new(
            Arc::new(MemoryCache::new()),
            Arc::new(clock.clone()),
            config,
            Duration::from_millis(250),
        );
        (limiter, clock)
    }

    #[tokio::test]
    async fn burst_then_deny_then_refill() {
        let config = RateLimitConfig {
            limit_per_window: 10,
            window: Duration::from_secs(60),
            burst: 3,
        };
        let (limiter, clock) = limiter(config);

        for expected in [2, 1, 0] {
            assert_eq!(
                limiter.check("user:a").await,
                Decision::Allowed {
                    remaining: expected
                }
            );
        }
        assert_eq!(
            limiter.check("user:a").await,
            Decision::Denied {
                retry_after: Duration::from_secs(6)
            }
        );

        clock.advance(chrono::Duration::seconds(6));
        assert!(limiter.check("user:a").await.is_allowed());
        assert!(!limiter.check("user:a").await.is_allowed());
    }

    #[tokio::test]
    async fn identities_have_separate_buckets() {
        let config = RateLimitConfig {
            limit_per_window: 1,
            window: Duration::from_secs(60),
            burst: 1,
        };
        let (limiter, _) = limiter(config);

        assert!(limiter.check("user:a").await.is_allowed());
        assert!(!limiter.check("user:a").await.is_allowed());
        assert!(limiter.check("ip:10.0.0.1").await.is_allowed());
    }

    #[tokio::test]
    async fn concurrent_checks_never_overspend() {
        let config = RateLimitConfig {
            limit_per_window: 1,
            window: Duration::from_secs(3600),
            burst: 5,
        };
        let (limiter, _) = limiter(config);

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.check("user:busy").await })
            })
            .collect();

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap().is_allowed() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
    }
}
