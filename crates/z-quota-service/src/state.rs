//! Application state.

use std::sync::Arc;

use z_quota_cache::{CacheBackend, QuotaCache, RateLimiter};
use z_quota_core::Clock;
use z_quota_store::Store;

use crate::audit::AuditSink;
use crate::config::ServiceConfig;
use crate::engine::QuotaEngine;

/// Application state shared across handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// The quota engine.
    pub engine: QuotaEngine,

    /// Per-caller request limiter.
    pub limiter: RateLimiter,

    /// Service configuration.
    pub config: ServiceConfig,
}

impl AppState {
    /// Wire the engine and limiter over the given backends.
    ///
    /// The cache backend is shared between the quota cache and the limiter.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn CacheBackend>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        config: ServiceConfig,
    ) -> Self {
        let quota_cache =
            QuotaCache::new(Arc::clone(&cache), config.cache_ttls, config.cache_timeout);
        let limiter = RateLimiter::new(
            cache,
            Arc::clone(&clock),
            config.rate_limit,
            config.cache_timeout,
        );
        let engine = QuotaEngine::new(store, quota_cache, audit, clock, config.store_timeout);

        tracing::debug!(
            rate_limit = config.rate_limit.limit_per_window,
            burst = config.rate_limit.burst,
            "Application state assembled"
        );

        Self {
            engine,
            limiter,
            config,
        }
    }
}
