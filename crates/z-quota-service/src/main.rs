//! Z-Quota Service - HTTP API for subscriptions, usage and quotas
//!
//! This is the main entry point for the z-quota service.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use z_quota_cache::{CacheBackend, MemoryCache};
use z_quota_core::{Clock, SystemClock};
use z_quota_service::{create_router, AppState, QuotaEngine, ServiceConfig, TracingAuditSink};
use z_quota_store::{MemoryStore, PgStore, PgStoreOptions, Store};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,z_quota=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Z-Quota Service");

    // Load configuration from environment
    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        postgres_configured = %config.database_url.is_some(),
        data_dir = ?config.data_dir,
        redis_configured = %config.redis_url.is_some(),
        rate_limit = config.rate_limit.limit_per_window,
        rate_limit_window_secs = config.rate_limit.window.as_secs(),
        rate_limit_burst = config.rate_limit.burst,
        "Service configuration loaded"
    );

    let store = open_store(&config).await?;
    let cache = open_cache(&config).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Build app state
    let state = AppState::new(
        store,
        cache,
        Arc::new(TracingAuditSink),
        clock,
        config.clone(),
    );

    spawn_expiry_sweep(state.engine.clone(), config.expiry_sweep_interval);

    // Create the router
    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    // Start HTTP server
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// PostgreSQL when `DATABASE_URL` is set, else `RocksDB` when built with
/// `rocksdb-backend` and `DATA_DIR` is set, else process memory.
async fn open_store(config: &ServiceConfig) -> Result<Arc<dyn Store>, BoxError> {
    if let Some(url) = &config.database_url {
        tracing::info!("Connecting to PostgreSQL store");
        let options = PgStoreOptions {
            max_connections: config.db_max_connections,
            ..PgStoreOptions::default()
        };
        let store = PgStore::connect(url, &options).await?;
        store.migrate().await?;
        return Ok(Arc::new(store));
    }

    if let Some(dir) = &config.data_dir {
        #[cfg(feature = "rocksdb-backend")]
        {
            tracing::info!(path = %dir, "Opening RocksDB store");
            let store = z_quota_store::RocksStore::open(dir)?;
            return Ok(Arc::new(store));
        }
        #[cfg(not(feature = "rocksdb-backend"))]
        tracing::warn!(
            path = %dir,
            "DATA_DIR set but built without rocksdb-backend - ignoring"
        );
    }

    tracing::warn!("No persistent store configured - data lives in memory only");
    Ok(Arc::new(MemoryStore::new()))
}

/// Redis when built with `redis-backend` and `REDIS_URL` is set, else
/// an in-process cache (rate limits are then per instance).
async fn open_cache(config: &ServiceConfig) -> Result<Arc<dyn CacheBackend>, BoxError> {
    if let Some(url) = &config.redis_url {
        #[cfg(feature = "redis-backend")]
        {
            tracing::info!("Connecting to Redis cache");
            let cache = z_quota_cache::RedisCache::connect(url).await?;
            return Ok(Arc::new(cache));
        }
        #[cfg(not(feature = "redis-backend"))]
        {
            let _ = url;
            tracing::warn!("REDIS_URL set but built without redis-backend - ignoring");
        }
    }

    tracing::info!("Using in-process cache");
    Ok(Arc::new(MemoryCache::new()))
}

/// Periodically terminate pending cancellations whose end date has passed.
fn spawn_expiry_sweep(engine: QuotaEngine, every: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(std::time::Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(error) = engine.expire_subscriptions().await {
                tracing::warn!(%error, "Expiry sweep failed");
            }
        }
    });
}
