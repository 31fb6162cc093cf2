//! In-memory storage implementation.
//!
//! Everything lives behind one `tokio::sync::RwLock`, which makes the
//! compare-and-swap in [`Store::swap_subscription`] trivially atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use z_quota_core::{
    BillingHistory, BillingPeriod, Subscription, SubscriptionId, UsageBreakdown, UsageRecord,
    User, UserId,
};

use crate::error::{Result, StoreError};
use crate::{select_current, Store};

#[derive(Debug, Default)]
struct State {
    users: HashMap<UserId, User>,
    /// Subscription rows per user, in insertion order.
    subscriptions: HashMap<UserId, Vec<Subscription>>,
    /// Usage records per user, in insertion order.
    usage: HashMap<UserId, Vec<UsageRecord>>,
}

/// Process-local storage for tests and single-node development.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of usage records stored for a user (test helper).
    pub async fn usage_record_count(&self, user_id: &UserId) -> usize {
        self.state
            .read()
            .await
            .usage
            .get(user_id)
            .map_or(0, Vec::len)
    }

    /// Number of subscription rows stored for a user (test helper).
    pub async fn subscription_count(&self, user_id: &UserId) -> usize {
        self.state
            .read()
            .await
            .subscriptions
            .get(user_id)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    // =========================================================================
    // User Operations
    // =========================================================================

    async fn create_user(&self, user: &User) -> Result<()> {
        let mut state = self.state.write().await;
        if state.users.contains_key(&user.id) {
            return Err(StoreError::Conflict {
                entity: "user",
                id: user.id.to_string(),
            });
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>> {
        Ok(self.state.read().await.users.get(user_id).cloned())
    }

    async fn set_user_plan_label(
        &self,
        user_id: &UserId,
        plan_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(user) = self.state.write().await.users.get_mut(user_id) {
            user.subscription_plan = plan_id.to_string();
            user.updated_at = now;
        }
        Ok(())
    }

    // =========================================================================
    // Subscription Primitives
    // =========================================================================

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()> {
        self.state
            .write()
            .await
            .subscriptions
            .entry(subscription.user_id)
            .or_default()
            .push(subscription.clone());
        Ok(())
    }

    async fn get_current_subscription(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .get(user_id)
            .and_then(|rows| select_current(rows, now))
            .cloned())
    }

    async fn swap_subscription(
        &self,
        subscription: &Subscription,
        expected_version: i64,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let row = state
            .subscriptions
            .get_mut(&subscription.user_id)
            .and_then(|rows| rows.iter_mut().find(|s| s.id == subscription.id))
            .ok_or_else(|| not_found(subscription.id))?;

        if row.version != expected_version {
            return Ok(false);
        }
        *row = subscription.clone();
        Ok(true)
    }

    async fn billing_history(&self, user_id: &UserId, limit: usize) -> Result<BillingHistory> {
        let state = self.state.read().await;
        let mut rows: Vec<Subscription> = state
            .subscriptions
            .get(user_id)
            .cloned()
            .unwrap_or_default();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        Ok(BillingHistory {
            total: rows.len(),
            subscriptions: rows.into_iter().take(limit).collect(),
        })
    }

    async fn expire_subscriptions(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut expired = 0;
        for row in state.subscriptions.values_mut().flatten() {
            if row.expire(now) {
                row.version += 1;
                expired += 1;
            }
        }
        Ok(expired)
    }

    // =========================================================================
    // Usage Operations
    // =========================================================================

    async fn record_usage(&self, record: &UsageRecord) -> Result<()> {
        self.state
            .write()
            .await
            .usage
            .entry(record.user_id)
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn sum_usage(
        &self,
        user_id: &UserId,
        resource_type: &str,
        period: BillingPeriod,
    ) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state.usage.get(user_id).map_or(0, |records| {
            records
                .iter()
                .filter(|r| r.resource_type == resource_type && period.contains(r.created_at))
                .fold(0, |total: i64, r| total.saturating_add(r.quantity))
        }))
    }

    async fn usage_breakdown(
        &self,
        user_id: &UserId,
        period: BillingPeriod,
        limit: usize,
    ) -> Result<UsageBreakdown> {
        let state = self.state.read().await;
        let mut breakdown = UsageBreakdown::empty(period);
        if let Some(records) = state.usage.get(user_id) {
            let mut in_period: Vec<UsageRecord> = records
                .iter()
                .filter(|r| period.contains(r.created_at))
                .cloned()
                .collect();
            in_period.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
            breakdown.absorb(in_period, limit);
        }
        Ok(breakdown)
    }
}

fn not_found(id: SubscriptionId) -> StoreError {
    StoreError::NotFound {
        entity: "subscription",
        id: id.to_string(),
    }
}
