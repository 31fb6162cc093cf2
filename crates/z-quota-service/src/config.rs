//! Service configuration.

use std::time::Duration;

use z_quota_cache::{CacheTtls, RateLimitConfig};

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// PostgreSQL connection string. Takes precedence over `data_dir`.
    pub database_url: Option<String>,

    /// Path to a `RocksDB` data directory (used with the `rocksdb-backend` feature).
    pub data_dir: Option<String>,

    /// PostgreSQL pool size.
    pub db_max_connections: u32,

    /// Redis URL for the shared cache (used with the `redis-backend` feature).
    pub redis_url: Option<String>,

    /// Upper bound on a single store call.
    pub store_timeout: Duration,

    /// Upper bound on a single cache call.
    pub cache_timeout: Duration,

    /// Cache lifetimes.
    pub cache_ttls: CacheTtls,

    /// Per-caller rate limit.
    pub rate_limit: RateLimitConfig,

    /// How often pending cancellations are checked for expiry.
    pub expiry_sweep_interval: Duration,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables fall back to [`ServiceConfig::default`].
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            database_url: non_empty("DATABASE_URL"),
            data_dir: non_empty("DATA_DIR"),
            db_max_connections: parse_env("DB_MAX_CONNECTIONS")
                .unwrap_or(defaults.db_max_connections),
            redis_url: non_empty("REDIS_URL"),
            store_timeout: parse_env("STORE_TIMEOUT_SECONDS")
                .map_or(defaults.store_timeout, Duration::from_secs),
            cache_timeout: parse_env("CACHE_TIMEOUT_MS")
                .map_or(defaults.cache_timeout, Duration::from_millis),
            cache_ttls: CacheTtls {
                subscription: parse_env("SUBSCRIPTION_CACHE_TTL_SECONDS")
                    .map_or(defaults.cache_ttls.subscription, Duration::from_secs),
                quota: parse_env("QUOTA_CACHE_TTL_SECONDS")
                    .map_or(defaults.cache_ttls.quota, Duration::from_secs),
                usage_summary: parse_env("USAGE_SUMMARY_CACHE_TTL_SECONDS")
                    .map_or(defaults.cache_ttls.usage_summary, Duration::from_secs),
            },
            rate_limit: RateLimitConfig {
                limit_per_window: parse_env("RATE_LIMIT_PER_WINDOW")
                    .unwrap_or(defaults.rate_limit.limit_per_window),
                window: parse_env("RATE_LIMIT_WINDOW_SECONDS")
                    .map_or(defaults.rate_limit.window, Duration::from_secs),
                burst: parse_env("RATE_LIMIT_BURST").unwrap_or(defaults.rate_limit.burst),
            },
            expiry_sweep_interval: parse_env("EXPIRY_SWEEP_INTERVAL_SECONDS")
                .map_or(defaults.expiry_sweep_interval, Duration::from_secs),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: parse_env("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            request_timeout_seconds: parse_env("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or(defaults.request_timeout_seconds),
        }
    }
}

fn non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: None,
            data_dir: None,
            db_max_connections: 10,
            redis_url: None,
            store_timeout: Duration::from_secs(5),
            cache_timeout: Duration::from_millis(200),
            cache_ttls: CacheTtls::default(),
            rate_limit: RateLimitConfig::default(),
            expiry_sweep_interval: Duration::from_secs(60),
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024, // 1MB
            request_timeout_seconds: 30,
        }
    }
}
