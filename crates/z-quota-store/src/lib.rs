//! Storage layer for z-quota.
//!
//! The [`Store`] trait is the single source of truth for users,
//! subscriptions and usage records. Each backing store implements the
//! primitive operations; the business rules for creating, changing and
//! cancelling subscriptions live in the trait's provided methods so that
//! no backend has to repeat them.
//!
//! # Backends
//!
//! - [`PgStore`]: PostgreSQL via `sqlx`, the production backend.
//! - `RocksStore`: embedded `RocksDB` (feature `rocksdb-backend`).
//! - [`MemoryStore`]: in-process maps for tests and single-node development.
//!
//! # Concurrency
//!
//! Usage is append-only, so concurrent usage writes never race. Subscription
//! mutations go through [`Store::swap_subscription`], a compare-and-swap on
//! the row's `version`; a lost race surfaces as [`StoreError::Conflict`].
//!
//! # Example
//!
//! ```no_run
//! use z_quota_core::{BillingCycle, UserId};
//! use z_quota_store::{MemoryStore, Store};
//!
//! # async fn example() -> z_quota_store::Result<()> {
//! let store = MemoryStore::new();
//! let user_id = UserId::generate();
//! let now = chrono::Utc::now();
//!
//! store.create_subscription(&user_id, "basic", BillingCycle::Monthly, now).await?;
//! let current = store.get_current_subscription(&user_id, now).await?;
//! assert!(current.is_some());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod memory;
pub mod postgres;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::{PgStore, PgStoreOptions};
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use z_quota_core::{
    get_plan, BillingCycle, BillingHistory, BillingPeriod, Subscription, UsageBreakdown,
    UsageRecord, User, UserId,
};

/// The storage trait defining all database operations.
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Health
    // =========================================================================

    /// Check that the backend is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot serve requests.
    async fn ping(&self) -> Result<()>;

    // =========================================================================
    // User Operations
    // =========================================================================

    /// Insert a new user.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if a user with the same ID exists.
    async fn create_user(&self, user: &User) -> Result<()>;

    /// Get a user by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>>;

    /// Refresh the denormalized plan label on a user record.
    ///
    /// A missing user is not an error; the label is a display hint.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn set_user_plan_label(
        &self,
        user_id: &UserId,
        plan_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()>;

    // =========================================================================
    // Subscription Primitives
    // =========================================================================

    /// Insert a new subscription row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()>;

    /// The user's current subscription at `now`, if any.
    ///
    /// Selects the most recently created row for which
    /// [`Subscription::is_current`] holds. `None` means "behaves like the
    /// free plan", not a fault.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_current_subscription(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>>;

    /// Overwrite a stored subscription if its version still equals
    /// `expected_version`.
    ///
    /// Returns `Ok(false)` when the row was modified concurrently.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn swap_subscription(
        &self,
        subscription: &Subscription,
        expected_version: i64,
    ) -> Result<bool>;

    /// Subscription rows for a user, newest first, with the total row count.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn billing_history(&self, user_id: &UserId, limit: usize) -> Result<BillingHistory>;

    /// Move pending cancellations whose `ends_at` has passed to `canceled`.
    ///
    /// Returns the number of rows changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn expire_subscriptions(&self, now: DateTime<Utc>) -> Result<u64>;

    // =========================================================================
    // Usage Operations
    // =========================================================================

    /// Append one immutable usage record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn record_usage(&self, record: &UsageRecord) -> Result<()>;

    /// Sum of quantities for one resource type created inside `period`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn sum_usage(
        &self,
        user_id: &UserId,
        resource_type: &str,
        period: BillingPeriod,
    ) -> Result<i64>;

    /// Usage inside `period` by resource type, at most `limit` records each.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn usage_breakdown(
        &self,
        user_id: &UserId,
        period: BillingPeriod,
        limit: usize,
    ) -> Result<UsageBreakdown>;

    // =========================================================================
    // Subscription Operations
    // =========================================================================

    /// Start a new subscription, snapshotting the plan's price and limits.
    ///
    /// Always inserts a new row; earlier rows stay in the history.
    ///
    /// # Errors
    ///
    /// - `StoreError::InvalidPlan` if `plan_id` is not in the catalog.
    async fn create_subscription(
        &self,
        user_id: &UserId,
        plan_id: &str,
        billing_cycle: BillingCycle,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        let plan = get_plan(plan_id).ok_or_else(|| StoreError::InvalidPlan {
            plan_id: plan_id.to_string(),
        })?;

        let subscription = Subscription::new(*user_id, plan, billing_cycle, now);
        self.insert_subscription(&subscription).await?;

        tracing::debug!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            plan_id = %plan_id,
            "Subscription row inserted"
        );

        Ok(subscription)
    }

    /// Change plan and cycle on the current subscription, in place.
    ///
    /// Changing plan withdraws a pending cancellation.
    ///
    /// # Errors
    ///
    /// - `StoreError::InvalidPlan` if `plan_id` is not in the catalog.
    /// - `StoreError::NoActiveSubscription` if there is no current row.
    /// - `StoreError::Conflict` if the row changed concurrently.
    async fn update_subscription(
        &self,
        user_id: &UserId,
        plan_id: &str,
        billing_cycle: BillingCycle,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        let plan = get_plan(plan_id).ok_or_else(|| StoreError::InvalidPlan {
            plan_id: plan_id.to_string(),
        })?;

        let current = self
            .get_current_subscription(user_id, now)
            .await?
            .ok_or_else(|| StoreError::NoActiveSubscription {
                user_id: user_id.to_string(),
            })?;

        let mut updated = current.clone();
        updated.apply_plan(plan, billing_cycle, now);
        updated.version = current.version + 1;

        if !self.swap_subscription(&updated, current.version).await? {
            return Err(StoreError::Conflict {
                entity: "subscription",
                id: current.id.to_string(),
            });
        }

        Ok(updated)
    }

    /// Schedule cancellation of the current subscription.
    ///
    /// # Errors
    ///
    /// - `StoreError::NoActiveSubscription` if there is no current row.
    /// - `StoreError::CannotCancelFreePlan` if the current plan is `free`.
    /// - `StoreError::Conflict` if the row changed concurrently.
    async fn cancel_subscription(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        let current = self
            .get_current_subscription(user_id, now)
            .await?
            .ok_or_else(|| StoreError::NoActiveSubscription {
                user_id: user_id.to_string(),
            })?;

        let mut canceled = current.clone();
        canceled.cancel(now)?;
        canceled.version = current.version + 1;

        if !self.swap_subscription(&canceled, current.version).await? {
            return Err(StoreError::Conflict {
                entity: "subscription",
                id: current.id.to_string(),
            });
        }

        Ok(canceled)
    }
}

/// Pick the current subscription among `rows` by the selection rule.
pub(crate) fn select_current<'a>(
    rows: impl IntoIterator<Item = &'a Subscription>,
    now: DateTime<Utc>,
) -> Option<&'a Subscription> {
    rows.into_iter()
        .filter(|s| s.is_current(now))
        .max_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)))
}
