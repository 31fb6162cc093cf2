//! Typed cache for subscriptions, quotas and usage summaries.
//!
//! Every method here is infallible from the caller's point of view: backend
//! errors and timeouts are logged and reported as a miss (reads) or ignored
//! (writes and invalidations). The persistent store stays the source of truth.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use z_quota_core::{known_resource_types, QuotaInfo, Subscription, UsageSummary, UserId};

use crate::backend::CacheBackend;
use crate::error::{CacheError, Result};
use crate::keys;

/// Time-to-live per kind of cached object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    /// Current subscription.
    pub subscription: Duration,
    /// Quota figures per resource type.
    pub quota: Duration,
    /// Monthly usage summary.
    pub usage_summary: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            subscription: Duration::from_secs(15 * 60),
            quota: Duration::from_secs(5 * 60),
            usage_summary: Duration::from_secs(10 * 60),
        }
    }
}

/// Cache facade used by the quota engine.
#[derive(Clone)]
pub struct QuotaCache {
    backend: Arc<dyn CacheBackend>,
    ttls: CacheTtls,
    op_timeout: Duration,
}

impl std::fmt::Debug for QuotaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaCache")
            .field("ttls", &self.ttls)
            .field("op_timeout", &self.op_timeout)
            .finish_non_exhaustive()
    }
}

impl QuotaCache {
    /// Wrap a backend.
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>, ttls: CacheTtls, op_timeout: Duration) -> Self {
        Self {
            backend,
            ttls,
            op_timeout,
        }
    }

    /// The underlying backend (shared with the rate limiter).
    #[must_use]
    pub fn backend(&self) -> Arc<dyn CacheBackend> {
        Arc::clone(&self.backend)
    }

    /// Check backend reachability within the operation timeout.
    ///
    /// # Errors
    ///
    /// Returns the backend error or `CacheError::Timeout`.
    pub async fn ping(&self) -> Result<()> {
        self.bounded(self.backend.ping()).await
    }

    // =========================================================================
    // Subscription
    // =========================================================================

    /// Cached current subscription.
    ///
    /// The outer `Option` is hit/miss; the inner one is the cached answer,
    /// which may itself be "no subscription".
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn get_subscription(&self, user_id: &UserId) -> Option<Option<Subscription>> {
        self.read(&keys::subscription(user_id)).await
    }

    /// Cache the current subscription (or its absence).
    pub async fn put_subscription(&self, user_id: &UserId, subscription: Option<&Subscription>) {
        self.write(
            &keys::subscription(user_id),
            &subscription,
            self.ttls.subscription,
        )
        .await;
    }

    /// Drop the cached subscription.
    pub async fn invalidate_subscription(&self, user_id: &UserId) {
        self.remove(vec![keys::subscription(user_id)]).await;
    }

    // =========================================================================
    // Quota
    // =========================================================================

    /// Cached quota figures for one resource type.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn get_quota(&self, user_id: &UserId, resource_type: &str) -> Option<QuotaInfo> {
        self.read(&keys::quota(user_id, resource_type)).await
    }

    /// Cache quota figures.
    pub async fn put_quota(&self, user_id: &UserId, quota: &QuotaInfo) {
        self.write(
            &keys::quota(user_id, &quota.resource_type),
            quota,
            self.ttls.quota,
        )
        .await;
    }

    /// Drop the cached quota for one resource type.
    pub async fn invalidate_quota(&self, user_id: &UserId, resource_type: &str) {
        self.remove(vec![keys::quota(user_id, resource_type)]).await;
    }

    // =========================================================================
    // Usage Summary
    // =========================================================================

    /// Cached monthly usage summary.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn get_usage_summary(&self, user_id: &UserId) -> Option<UsageSummary> {
        self.read(&keys::usage_summary(user_id)).await
    }

    /// Cache the monthly usage summary.
    pub async fn put_usage_summary(&self, summary: &UsageSummary) {
        self.write(
            &keys::usage_summary(&summary.user_id),
            summary,
            self.ttls.usage_summary,
        )
        .await;
    }

    /// Drop the cached usage summary.
    pub async fn invalidate_usage_summary(&self, user_id: &UserId) {
        self.remove(vec![keys::usage_summary(user_id)]).await;
    }

    /// Drop the quota entry for `resource_type` together with the usage
    /// summary, in one backend call.
    pub async fn invalidate_usage(&self, user_id: &UserId, resource_type: &str) {
        self.remove(vec![
            keys::quota(user_id, resource_type),
            keys::usage_summary(user_id),
        ])
        .await;
    }

    /// Drop every cached object for a user in one backend call: the
    /// subscription, the quota of every known resource type and the summary.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn invalidate_user(&self, user_id: &UserId) {
        let mut all = vec![keys::subscription(user_id), keys::usage_summary(user_id)];
        all.extend(
            known_resource_types()
                .iter()
                .map(|t| keys::quota(user_id, t)),
        );
        self.remove(all).await;
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    async fn bounded<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.op_timeout, op).await?
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.bounded(self.backend.get(key)).await {
            Ok(raw) => raw?,
            Err(error) => {
                warn!(key, %error, "Cache read failed, falling through to store");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!(key, "Cache hit");
                Some(value)
            }
            Err(error) => {
                warn!(key, %error, "Discarding undecodable cache entry");
                None
            }
        }
    }

    async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        let outcome = match serde_json::to_string(value) {
            Ok(json) => self.bounded(self.backend.set(key, json, ttl)).await,
            Err(e) => Err(CacheError::from(e)),
        };
        if let Err(error) = outcome {
            warn!(key, %error, "Cache write failed");
        }
    }

    async fn remove(&self, keys: Vec<String>) {
        if let Err(error) = self.bounded(self.backend.delete(&keys)).await {
            warn!(?keys, %error, "Cache invalidation failed");
        }
    }
}
