//! Cache key layout.
//!
//! All keys a user owns are derivable from the user ID and the set of known
//! resource types, which is what lets [`crate::QuotaCache::invalidate_user`]
//! drop them in a single call.

use z_quota_core::UserId;

/// Key holding the cached current subscription of a user.
#[must_use]
pub fn subscription(user_id: &UserId) -> String {
    format!("subscription:{user_id}")
}

/// Key holding cached quota figures for one resource type.
#[must_use]
pub fn quota(user_id: &UserId, resource_type: &str) -> String {
    format!("quota:{user_id}:{resource_type}")
}

/// Key holding the cached monthly usage summary.
#[must_use]
pub fn usage_summary(user_id: &UserId) -> String {
    format!("usage_summary:{user_id}")
}

/// Key holding a rate-limit bucket.
#[must_use]
pub fn rate_limit(identity: &str) -> String {
    format!("ratelimit:{identity}")
}
