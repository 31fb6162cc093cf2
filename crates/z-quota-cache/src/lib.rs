//! Cache layer for z-quota.
//!
//! Short-lived copies of subscriptions, quota figures and usage summaries,
//! plus the token buckets behind the per-caller rate limiter. Nothing in here
//! is authoritative: entries are invalidated after every store write and any
//! cache failure degrades to a store read.
//!
//! # Backends
//!
//! - [`MemoryCache`]: in-process maps, for tests and single-instance setups.
//! - `RedisCache`: shared Redis (feature `redis-backend`).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use z_quota_cache::{CacheTtls, MemoryCache, QuotaCache};
//!
//! let cache = QuotaCache::new(
//!     Arc::new(MemoryCache::new()),
//!     CacheTtls::default(),
//!     Duration::from_millis(200),
//! );
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod keys;
pub mod memory;
pub mod quota_cache;
pub mod rate_limit;
#[cfg(feature = "redis-backend")]
pub mod redis_cache;

pub use backend::{BucketSpec, CacheBackend, TokenTake};
pub use error::{CacheError, Result};
pub use memory::MemoryCache;
pub use quota_cache::{CacheTtls, QuotaCache};
pub use rate_limit::{Decision, RateLimitConfig, RateLimiter};
#[cfg(feature = "redis-backend")]
pub use redis_cache::RedisCache;
