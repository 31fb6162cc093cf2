//! Error types for z-quota storage.

use z_quota_core::QuotaError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// Record already exists, or was modified concurrently.
    #[error("{entity} conflict: {id}")]
    Conflict {
        /// Kind of record.
        entity: &'static str,
        /// Identifier of the conflicting record.
        id: String,
    },

    /// The plan identifier is not in the catalog.
    #[error("invalid plan: {plan_id}")]
    InvalidPlan {
        /// The unknown plan identifier.
        plan_id: String,
    },

    /// The user has no current subscription.
    #[error("no active subscription for user {user_id}")]
    NoActiveSubscription {
        /// The user without a current subscription.
        user_id: String,
    },

    /// Free plans cannot be cancelled.
    #[error("cannot cancel the free plan")]
    CannotCancelFreePlan,
}

impl From<QuotaError> for StoreError {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::InvalidPlan { plan_id } => Self::InvalidPlan { plan_id },
            QuotaError::NoActiveSubscription { user_id } => Self::NoActiveSubscription { user_id },
            QuotaError::CannotCancelFreePlan => Self::CannotCancelFreePlan,
            // Stored rows that fail domain parsing are corrupt, not user error.
            other => Self::Serialization(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}
