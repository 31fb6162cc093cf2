//! Error types for the cache layer.

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors that can occur talking to the cache.
///
/// None of these ever reach an API caller: the typed wrappers log them and
/// fall through to the persistent store.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The backend rejected the operation or is unreachable.
    #[error("cache backend error: {0}")]
    Backend(String),

    /// A cached value could not be encoded or decoded.
    #[error("cache serialization error: {0}")]
    Serialization(String),

    /// The operation did not finish within the configured timeout.
    #[error("cache operation timed out")]
    Timeout,
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(feature = "redis-backend")]
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for CacheError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}
