//! Quota and subscription engine.
//!
//! Orchestrates the plan catalog, the persistent store and the cache:
//!
//! - Writes go to the store first; caches are invalidated only after the
//!   write succeeded, so a reader can never repopulate from pre-write data
//!   once the invalidation has completed.
//! - Reads try the cache, fall back to the store and repopulate.
//! - Cache failures never surface; store failures do, as internal errors.
//!
//! The engine holds no per-request state and never retries.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use z_quota_cache::QuotaCache;
use z_quota_core::{
    free_plan, is_valid_plan, list_plans, validate_resource_type, BillingCycle, BillingHistory,
    BillingPeriod, Clock, PlanDefinition, QuotaError, QuotaInfo, Subscription, UsageBreakdown,
    UsageRecord, UsageSummary, User, UserId, API_CALLS, BACKGROUND_TASKS, MESSAGES,
};
use z_quota_store::{Store, StoreError};

use crate::audit::{AuditAction, AuditEvent, AuditSink};

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors returned by the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Unknown plan identifier.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// Usage quantity below 1.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(i64),

    /// Malformed resource type tag.
    #[error("invalid resource type: {0}")]
    InvalidResourceType(String),

    /// Billing cycle other than `monthly` or `yearly`.
    #[error("invalid billing cycle: {0}")]
    InvalidBillingCycle(String),

    /// Window end before window start.
    #[error("invalid date range")]
    InvalidDateRange,

    /// The user has no current subscription.
    #[error("no active subscription")]
    NoActiveSubscription,

    /// Free plans cannot be cancelled.
    #[error("cannot cancel the free plan")]
    CannotCancelFreePlan,

    /// Record already exists or changed concurrently.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Record not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The store failed or timed out.
    #[error("store error: {0}")]
    Store(String),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidPlan { plan_id } => Self::InvalidPlan(plan_id),
            StoreError::NoActiveSubscription { .. } => Self::NoActiveSubscription,
            StoreError::CannotCancelFreePlan => Self::CannotCancelFreePlan,
            StoreError::Conflict { entity, id } => Self::Conflict(format!("{entity} {id}")),
            StoreError::NotFound { entity, id } => Self::NotFound(format!("{entity} {id}")),
            StoreError::Database(msg) | StoreError::Serialization(msg) => Self::Store(msg),
        }
    }
}

impl From<QuotaError> for EngineError {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::InvalidPlan { plan_id } => Self::InvalidPlan(plan_id),
            QuotaError::InvalidQuantity(q) => Self::InvalidQuantity(q),
            QuotaError::InvalidResourceType(t) => Self::InvalidResourceType(t),
            QuotaError::InvalidBillingCycle(c) => Self::InvalidBillingCycle(c),
            QuotaError::NoActiveSubscription { .. } => Self::NoActiveSubscription,
            QuotaError::CannotCancelFreePlan => Self::CannotCancelFreePlan,
            other => Self::Store(other.to_string()),
        }
    }
}

/// Overall service health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Store and cache reachable.
    Healthy,
    /// Store reachable, cache not; requests still succeed, slower.
    Degraded,
    /// Store unreachable.
    Unhealthy,
}

impl HealthStatus {
    /// Get the status name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

/// Reachability of each dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReport {
    /// Whether the store answered.
    pub store_ok: bool,
    /// Whether the cache answered.
    pub cache_ok: bool,
}

impl HealthReport {
    /// Fold component checks into one status.
    #[must_use]
    pub const fn status(&self) -> HealthStatus {
        match (self.store_ok, self.cache_ok) {
            (false, _) => HealthStatus::Unhealthy,
            (true, false) => HealthStatus::Degraded,
            (true, true) => HealthStatus::Healthy,
        }
    }
}

/// The subscription and quota engine.
#[derive(Clone)]
pub struct QuotaEngine {
    store: Arc<dyn Store>,
    cache: QuotaCache,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
}

impl std::fmt::Debug for QuotaEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaEngine")
            .field("cache", &self.cache)
            .field("clock", &self.clock)
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}

impl QuotaEngine {
    /// Assemble an engine.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        cache: QuotaCache,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            audit,
            clock,
            store_timeout,
        }
    }

    /// The engine's notion of "now".
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run a store call under the store timeout.
    async fn store_call<T>(
        &self,
        op: impl Future<Output = z_quota_store::Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.store_timeout, op).await {
            Ok(result) => result.map_err(EngineError::from),
            Err(_) => Err(EngineError::Store("store call timed out".into())),
        }
    }

    // =========================================================================
    // Plans
    // =========================================================================

    /// The plan catalog.
    #[must_use]
    pub fn list_plans(&self) -> &'static [PlanDefinition] {
        list_plans()
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// The user's current subscription; `None` means free-plan defaults.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn get_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>> {
        let now = self.now();

        if let Some(cached) = self.cache.get_subscription(user_id).await {
            // A cached pending cancellation may have run past its end date.
            if cached.as_ref().map_or(true, |s| s.is_current(now)) {
                return Ok(cached);
            }
        }

        let current = self
            .store_call(self.store.get_current_subscription(user_id, now))
            .await?;
        self.cache.put_subscription(user_id, current.as_ref()).await;
        Ok(current)
    }

    /// Start a new subscription.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn create_subscription(
        &self,
        user_id: &UserId,
        plan_id: &str,
        billing_cycle: BillingCycle,
    ) -> Result<Subscription> {
        if !is_valid_plan(plan_id) {
            return Err(EngineError::InvalidPlan(plan_id.to_string()));
        }

        let now = self.now();
        let subscription = self
            .store_call(
                self.store
                    .create_subscription(user_id, plan_id, billing_cycle, now),
            )
            .await?;

        self.cache.invalidate_user(user_id).await;
        self.after_subscription_change(AuditAction::SubscriptionCreated, &subscription, now)
            .await;

        info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            plan_id = %plan_id,
            billing_cycle = %billing_cycle,
            "Subscription created"
        );
        Ok(subscription)
    }

    /// Switch the current subscription to another plan or cycle.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn update_subscription(
        &self,
        user_id: &UserId,
        plan_id: &str,
        billing_cycle: BillingCycle,
    ) -> Result<Subscription> {
        if !is_valid_plan(plan_id) {
            return Err(EngineError::InvalidPlan(plan_id.to_string()));
        }

        let now = self.now();
        let subscription = self
            .write_subscription(
                user_id,
                self.store
                    .update_subscription(user_id, plan_id, billing_cycle, now),
            )
            .await?;

        self.cache.invalidate_user(user_id).await;
        self.after_subscription_change(AuditAction::SubscriptionUpdated, &subscription, now)
            .await;

        info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            plan_id = %plan_id,
            "Subscription updated"
        );
        Ok(subscription)
    }

    /// Schedule cancellation of the current subscription.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn cancel_subscription(&self, user_id: &UserId) -> Result<Subscription> {
        let now = self.now();
        let subscription = self
            .write_subscription(user_id, self.store.cancel_subscription(user_id, now))
            .await?;

        self.cache.invalidate_user(user_id).await;
        self.after_subscription_change(AuditAction::SubscriptionCanceled, &subscription, now)
            .await;

        info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            ends_at = ?subscription.ends_at,
            "Subscription cancellation scheduled"
        );
        Ok(subscription)
    }

    /// Run a compare-and-swap write on the user's current subscription.
    ///
    /// A lost race drops the user's cached view before the conflict is
    /// reported.
    async fn write_subscription(
        &self,
        user_id: &UserId,
        op: impl Future<Output = z_quota_store::Result<Subscription>>,
    ) -> Result<Subscription> {
        let result = self.store_call(op).await;
        if let Err(EngineError::Conflict(what)) = &result {
            warn!(user_id = %user_id, conflict = %what, "Subscription changed concurrently");
            self.cache.invalidate_user(user_id).await;
        }
        result
    }

    async fn after_subscription_change(
        &self,
        action: AuditAction,
        subscription: &Subscription,
        now: DateTime<Utc>,
    ) {
        let label = self.store_call(self.store.set_user_plan_label(
            &subscription.user_id,
            &subscription.plan_id,
            now,
        ));
        if let Err(error) = label.await {
            warn!(user_id = %subscription.user_id, %error, "Failed to refresh plan label");
        }

        self.audit
            .record(AuditEvent::subscription(action, subscription, now));
    }

    /// Terminate pending cancellations whose end date has passed.
    pub async fn expire_subscriptions(&self) -> Result<u64> {
        let now = self.now();
        let expired = self
            .store_call(self.store.expire_subscriptions(now))
            .await?;
        if expired > 0 {
            info!(expired, "Expired pending cancellations");
        }
        Ok(expired)
    }

    /// Past and present subscription rows, newest first.
    pub async fn billing_history(&self, user_id: &UserId, limit: usize) -> Result<BillingHistory> {
        self.store_call(self.store.billing_history(user_id, limit))
            .await
    }

    // =========================================================================
    // Usage
    // =========================================================================

    /// Append one usage record.
    #[instrument(skip(self, metadata), fields(user_id = %user_id))]
    pub async fn record_usage(
        &self,
        user_id: &UserId,
        resource_type: &str,
        quantity: i64,
        metadata: serde_json::Value,
    ) -> Result<UsageRecord> {
        let record = UsageRecord::new(*user_id, resource_type, quantity, metadata, self.now())?;

        self.store_call(self.store.record_usage(&record)).await?;
        self.cache.invalidate_usage(user_id, resource_type).await;
        self.audit.record(AuditEvent::usage(&record));

        debug!(
            user_id = %user_id,
            resource_type = %resource_type,
            quantity,
            "Usage recorded"
        );
        Ok(record)
    }

    /// Quota figures for one resource type in the current calendar month.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn check_quota(&self, user_id: &UserId, resource_type: &str) -> Result<QuotaInfo> {
        validate_resource_type(resource_type)?;
        let now = self.now();
        let period = BillingPeriod::containing(now);

        if let Some(cached) = self.cache.get_quota(user_id, resource_type).await {
            if cached.period_start == period.start {
                return Ok(cached);
            }
        }

        let limit = self.limit_for(user_id, resource_type).await?;
        let used = self
            .store_call(self.store.sum_usage(user_id, resource_type, period))
            .await?;

        let quota = QuotaInfo::compute(resource_type, limit, used, period);
        self.cache.put_quota(user_id, &quota).await;
        Ok(quota)
    }

    /// Headline usage for the current calendar month.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn usage_summary(&self, user_id: &UserId) -> Result<UsageSummary> {
        let period = BillingPeriod::containing(self.now());

        if let Some(cached) = self.cache.get_usage_summary(user_id).await {
            if cached.period_start == period.start {
                return Ok(cached);
            }
        }

        let subscription = self.get_subscription(user_id).await?;
        let (plan_id, messages_limit) = match &subscription {
            Some(s) => (s.plan_id.clone(), s.limit_for(MESSAGES)),
            None => (free_plan().id.clone(), free_plan().limit_for(MESSAGES)),
        };

        let messages = self.sum(user_id, MESSAGES, period).await?;
        let background_tasks = self.sum(user_id, BACKGROUND_TASKS, period).await?;
        let api_calls = self.sum(user_id, API_CALLS, period).await?;
        let quota = QuotaInfo::compute(MESSAGES, messages_limit, messages, period);

        let summary = UsageSummary {
            user_id: *user_id,
            plan_id,
            messages_this_month: messages,
            background_tasks_this_month: background_tasks,
            api_calls_this_month: api_calls,
            quota_remaining: quota.remaining,
            has_quota: quota.has_quota,
            period_start: period.start,
            period_end: period.end,
        };
        self.cache.put_usage_summary(&summary).await;
        Ok(summary)
    }

    /// Usage by resource type inside a window (defaults to the current month).
    pub async fn usage_details(
        &self,
        user_id: &UserId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<UsageBreakdown> {
        let month = BillingPeriod::containing(self.now());
        let window = BillingPeriod::new(start.unwrap_or(month.start), end.unwrap_or(month.end));
        if window.end < window.start {
            return Err(EngineError::InvalidDateRange);
        }

        self.store_call(self.store.usage_breakdown(user_id, window, limit))
            .await
    }

    async fn sum(&self, user_id: &UserId, resource_type: &str, period: BillingPeriod) -> Result<i64> {
        self.store_call(self.store.sum_usage(user_id, resource_type, period))
            .await
    }

    async fn limit_for(&self, user_id: &UserId, resource_type: &str) -> Result<i64> {
        Ok(match self.get_subscription(user_id).await? {
            Some(subscription) => subscription.limit_for(resource_type),
            None => free_plan().limit_for(resource_type),
        })
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Register a user on the free plan.
    #[instrument(skip(self, email), fields(user_id = %user_id))]
    pub async fn register_user(&self, user_id: &UserId, email: &str) -> Result<User> {
        let user = User::new(*user_id, email, self.now());
        self.store_call(self.store.create_user(&user)).await?;
        info!(user_id = %user_id, "User registered");
        Ok(user)
    }

    /// Fetch a registered user.
    pub async fn get_user(&self, user_id: &UserId) -> Result<User> {
        self.store_call(self.store.get_user(user_id))
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("user {user_id}")))
    }

    // =========================================================================
    // Health
    // =========================================================================

    /// Probe the store and the cache.
    pub async fn health(&self) -> HealthReport {
        let store_ok = match self.store_call(self.store.ping()).await {
            Ok(()) => true,
            Err(error) => {
                warn!(%error, "Store health check failed");
                false
            }
        };
        let cache_ok = match self.cache.ping().await {
            Ok(()) => true,
            Err(error) => {
                warn!(%error, "Cache health check failed");
                false
            }
        };
        HealthReport { store_ok, cache_ok }
    }
}
