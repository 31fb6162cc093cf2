//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// User records, keyed by `user_id`.
    pub const USERS: &str = "users";

    /// Subscription rows, keyed by `user_id || subscription_id`.
    ///
    /// Subscription IDs are ULIDs, so a prefix scan yields a user's rows in
    /// creation order.
    pub const SUBSCRIPTIONS: &str = "subscriptions";

    /// Usage records, keyed by `user_id || usage_record_id`.
    pub const USAGE: &str = "usage";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![cf::USERS, cf::SUBSCRIPTIONS, cf::USAGE]
}
