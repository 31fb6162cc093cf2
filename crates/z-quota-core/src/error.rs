//! Error types for z-quota.

use crate::ids::IdError;

/// Result type for z-quota core operations.
pub type Result<T> = std::result::Result<T, QuotaError>;

/// Validation and business-rule errors raised by the core types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotaError {
    /// The plan identifier is not in the catalog.
    #[error("invalid plan: {plan_id}")]
    InvalidPlan {
        /// The unknown plan identifier.
        plan_id: String,
    },

    /// The billing cycle is neither `monthly` nor `yearly`.
    #[error("invalid billing cycle: {0}")]
    InvalidBillingCycle(String),

    /// The subscription status string is not recognised.
    #[error("invalid subscription status: {0}")]
    InvalidStatus(String),

    /// Usage quantity must be a positive integer no larger than `MAX_QUANTITY`.
    #[error("invalid quantity: {0} (must be between 1 and {max})", max = crate::usage::MAX_QUANTITY)]
    InvalidQuantity(i64),

    /// The resource type tag is empty or malformed.
    #[error("invalid resource type: {0:?}")]
    InvalidResourceType(String),

    /// The user has no current subscription.
    #[error("no active subscription for user {user_id}")]
    NoActiveSubscription {
        /// The user without a current subscription.
        user_id: String,
    },

    /// Free plans have nothing to cancel.
    #[error("cannot cancel the free plan")]
    CannotCancelFreePlan,

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}
