//! User records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::UserId;
use crate::plans::FREE_PLAN_ID;

/// The identity anchor for subscriptions and usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// The user ID (from the identity layer).
    pub id: UserId,

    /// Contact email.
    pub email: String,

    /// Denormalized plan label for display.
    ///
    /// Best effort only: it can drift from the authoritative subscription
    /// record and must never drive entitlement decisions.
    pub subscription_plan: String,

    /// When the user was registered.
    pub created_at: DateTime<Utc>,

    /// When the user was last updated.
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a user on the free plan.
    #[must_use]
    pub fn new(id: UserId, email: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            email: email.into(),
            subscription_plan: FREE_PLAN_ID.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}
