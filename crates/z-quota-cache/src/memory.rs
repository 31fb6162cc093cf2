//! In-process cache backend.
//!
//! Suitable for tests and single-instance deployments. Expiry is measured
//! with the injected [`Clock`], so tests can move time forward.
//!
//! Expired entries and idle rate-limit buckets are dropped by a sweep that
//! runs on writes at most once per [`SWEEP_INTERVAL_MS`], so keys that are
//! never read again do not accumulate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use z_quota_core::{Clock, SystemClock};

use crate::backend::{BucketSpec, CacheBackend, TokenTake};
use crate::error::Result;

/// Minimum spacing between two sweeps of the same table.
pub const SWEEP_INTERVAL_MS: i64 = 60_000;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill_ms: i64,
    /// Past this instant the bucket is full again and can be forgotten.
    idle_until_ms: i64,
    allowed: u64,
    blocked: u64,
}

/// A keyed table with an amortized expiry sweep.
#[derive(Debug)]
struct Table<T> {
    items: HashMap<String, T>,
    next_sweep_ms: i64,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            items: HashMap::new(),
            next_sweep_ms: i64::MIN,
        }
    }
}

impl<T> Table<T> {
    fn sweep(&mut self, now_ms: i64, expired: impl Fn(&T) -> bool) {
        if now_ms < self.next_sweep_ms {
            return;
        }
        self.items.retain(|_, item| !expired(item));
        self.next_sweep_ms = now_ms.saturating_add(SWEEP_INTERVAL_MS);
    }
}

/// Cache backend holding everything in process memory.
#[derive(Debug)]
pub struct MemoryCache {
    clock: Arc<dyn Clock>,
    entries: Mutex<Table<Entry>>,
    buckets: Mutex<Table<Bucket>>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl MemoryCache {
    /// Create an empty cache using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty cache whose TTLs follow `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(Table::default()),
            buckets: Mutex::new(Table::default()),
        }
    }

    /// Whether an unexpired entry exists for `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        lock(&self.entries)
            .items
            .get(key)
            .is_some_and(|e| e.expires_at > now)
    }

    /// Cumulative `(allowed, blocked)` counts for a bucket.
    #[must_use]
    pub fn bucket_counters(&self, key: &str) -> Option<(u64, u64)> {
        lock(&self.buckets)
            .items
            .get(key)
            .map(|b| (b.allowed, b.blocked))
    }

    /// Number of rate-limit buckets currently held, idle ones included.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        lock(&self.buckets).items.len()
    }

    /// Number of cache entries currently held, expired ones included.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        lock(&self.entries).items.len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now();
        let mut entries = lock(&self.entries);
        match entries.items.get(key) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.items.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let now = self.clock.now();
        let ttl =
            chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365));
        let expires_at = now
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut entries = lock(&self.entries);
        entries.sweep(now.timestamp_millis(), |e| e.expires_at <= now);
        entries
            .items
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        let mut entries = lock(&self.entries);
        for key in keys {
            entries.items.remove(key);
        }
        Ok(())
    }

    async fn take_token(&self, key: &str, spec: BucketSpec, now_ms: i64) -> Result<TokenTake> {
        let idle_ms = duration_ms(spec.full_refill());

        let mut buckets = lock(&self.buckets);
        buckets.sweep(now_ms, |b| b.idle_until_ms <= now_ms);

        let bucket = buckets.items.entry(key.to_string()).or_insert(Bucket {
            tokens: spec.capacity,
            last_refill_ms: now_ms,
            idle_until_ms: now_ms,
            allowed: 0,
            blocked: 0,
        });

        #[allow(clippy::cast_precision_loss)]
        let elapsed_ms = (now_ms - bucket.last_refill_ms) as f64;
        bucket.tokens = spec.refill(bucket.tokens, elapsed_ms);
        bucket.last_refill_ms = now_ms;
        bucket.idle_until_ms = now_ms.saturating_add(idle_ms);

        let allowed = bucket.tokens >= 1.0;
        if allowed {
            bucket.tokens -= 1.0;
            bucket.allowed += 1;
        } else {
            bucket.blocked += 1;
        }

        Ok(TokenTake {
            allowed,
            tokens: bucket.tokens,
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
