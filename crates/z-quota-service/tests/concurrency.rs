//! Racing subscription writes surface as conflicts.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum_test::TestServer;
use chrono::{DateTime, Utc};
use common::{start_instant, test_config, user_value, RecordingAuditSink, USER_ID};
use serde_json::json;

use z_quota_cache::MemoryCache;
use z_quota_core::{
    BillingCycle, BillingHistory, BillingPeriod, ManualClock, Subscription, UsageBreakdown,
    UsageRecord, User, UserId,
};
use z_quota_service::{create_router, ApiError, AppState, AuditAction, EngineError};
use z_quota_store::{MemoryStore, Store};

/// Store that lets a competing writer move the subscription to enterprise
/// right before the next compare-and-swap lands.
struct RacingStore {
    inner: MemoryStore,
    armed: AtomicBool,
}

impl RacingStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            armed: AtomicBool::new(false),
        }
    }

    fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for RacingStore {
    async fn ping(&self) -> z_quota_store::Result<()> {
        self.inner.ping().await
    }

    async fn create_user(&self, user: &User) -> z_quota_store::Result<()> {
        self.inner.create_user(user).await
    }

    async fn get_user(&self, user_id: &UserId) -> z_quota_store::Result<Option<User>> {
        self.inner.get_user(user_id).await
    }

    async fn set_user_plan_label(
        &self,
        user_id: &UserId,
        plan_id: &str,
        now: DateTime<Utc>,
    ) -> z_quota_store::Result<()> {
        self.inner.set_user_plan_label(user_id, plan_id, now).await
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> z_quota_store::Result<()> {
        self.inner.insert_subscription(subscription).await
    }

    async fn get_current_subscription(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> z_quota_store::Result<Option<Subscription>> {
        self.inner.get_current_subscription(user_id, now).await
    }

    async fn swap_subscription(
        &self,
        subscription: &Subscription,
        expected_version: i64,
    ) -> z_quota_store::Result<bool> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.inner
                .update_subscription(
                    &subscription.user_id,
                    "enterprise",
                    BillingCycle::Monthly,
                    subscription.updated_at,
                )
                .await?;
        }
        self.inner
            .swap_subscription(subscription, expected_version)
            .await
    }

    async fn billing_history(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> z_quota_store::Result<BillingHistory> {
        self.inner.billing_history(user_id, limit).await
    }

    async fn expire_subscriptions(&self, now: DateTime<Utc>) -> z_quota_store::Result<u64> {
        self.inner.expire_subscriptions(now).await
    }

    async fn record_usage(&self, record: &UsageRecord) -> z_quota_store::Result<()> {
        self.inner.record_usage(record).await
    }

    async fn sum_usage(
        &self,
        user_id: &UserId,
        resource_type: &str,
        period: BillingPeriod,
    ) -> z_quota_store::Result<i64> {
        self.inner.sum_usage(user_id, resource_type, period).await
    }

    async fn usage_breakdown(
        &self,
        user_id: &UserId,
        period: BillingPeriod,
        limit: usize,
    ) -> z_quota_store::Result<UsageBreakdown> {
        self.inner.usage_breakdown(user_id, period, limit).await
    }
}

struct RaceHarness {
    server: TestServer,
    state: AppState,
    store: Arc<RacingStore>,
    audit: Arc<RecordingAuditSink>,
    user_id: UserId,
}

impl RaceHarness {
    fn new() -> Self {
        let clock = ManualClock::new(start_instant());
        let store = Arc::new(RacingStore::new());
        let audit = Arc::new(RecordingAuditSink::default());
        let state = AppState::new(
            store.clone(),
            Arc::new(MemoryCache::with_clock(Arc::new(clock.clone()))),
            audit.clone(),
            Arc::new(clock),
            test_config(),
        );
        let server = TestServer::new(create_router(state.clone())).unwrap();

        Self {
            server,
            state,
            store,
            audit,
            user_id: UserId::generate(),
        }
    }

    async fn max_messages(&self) -> serde_json::Value {
        let body: serde_json::Value = self
            .server
            .get("/v1/quota/messages")
            .add_header(USER_ID, user_value(&self.user_id))
            .await
            .json();
        body["max_allowed"].clone()
    }

    async fn current(&self) -> serde_json::Value {
        self.server
            .get("/v1/subscription")
            .add_header(USER_ID, user_value(&self.user_id))
            .await
            .json()
    }
}

#[tokio::test]
async fn racing_update_is_a_conflict_and_cache_follows_the_winner() {
    let harness = RaceHarness::new();
    harness
        .server
        .post("/v1/subscription")
        .add_header(USER_ID, user_value(&harness.user_id))
        .json(&json!({ "plan_id": "basic" }))
        .await
        .assert_status(StatusCode::CREATED);

    // Warm the cache with the basic limit.
    assert_eq!(harness.max_messages().await, 1000);

    harness.store.arm();
    let response = harness
        .server
        .put("/v1/subscription")
        .add_header(USER_ID, user_value(&harness.user_id))
        .json(&json!({ "plan_id": "premium" }))
        .await;

    response.assert_status(StatusCode::CONFLICT);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "conflict");

    // The competing write won and nothing stale is served.
    assert_eq!(harness.max_messages().await, -1);
    let current = harness.current().await;
    assert_eq!(current["plan_id"], "enterprise");
    assert_eq!(current["status"], "active");

    let actions: Vec<_> = harness.audit.events().iter().map(|e| e.action).collect();
    assert_eq!(actions, [AuditAction::SubscriptionCreated]);
}

#[tokio::test]
async fn racing_cancel_leaves_the_row_untouched() {
    let harness = RaceHarness::new();
    harness
        .server
        .post("/v1/subscription")
        .add_header(USER_ID, user_value(&harness.user_id))
        .json(&json!({ "plan_id": "premium" }))
        .await
        .assert_status(StatusCode::CREATED);

    harness.store.arm();
    harness
        .server
        .delete("/v1/subscription")
        .add_header(USER_ID, user_value(&harness.user_id))
        .await
        .assert_status(StatusCode::CONFLICT);

    let current = harness.current().await;
    assert_eq!(current["status"], "active");
    assert_eq!(current["auto_renew"], true);
    assert!(current["ends_at"].is_null());
}

#[tokio::test]
async fn engine_reports_lost_race_as_conflict() {
    let harness = RaceHarness::new();
    let engine = &harness.state.engine;
    engine
        .create_subscription(&harness.user_id, "basic", BillingCycle::Monthly)
        .await
        .unwrap();

    harness.store.arm();
    let err = engine
        .update_subscription(&harness.user_id, "premium", BillingCycle::Yearly)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Conflict(_)));
    assert_eq!(ApiError::from(err).status(), StatusCode::CONFLICT);

    // A retry against the fresh version goes through.
    let retried = engine
        .update_subscription(&harness.user_id, "premium", BillingCycle::Yearly)
        .await
        .unwrap();
    assert_eq!(retried.plan_id, "premium");
}
