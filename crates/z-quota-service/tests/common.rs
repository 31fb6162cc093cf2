//! Common test utilities for z-quota integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use axum_test::TestServer;
use chrono::{DateTime, TimeZone, Utc};

use z_quota_cache::{
    BucketSpec, CacheBackend, CacheError, MemoryCache, RateLimitConfig, TokenTake,
};
use z_quota_core::{
    BillingHistory, BillingPeriod, ManualClock, Subscription, UsageBreakdown, UsageRecord, User,
    UserId,
};
use z_quota_service::{create_router, AppState, AuditEvent, AuditSink, ServiceConfig};
use z_quota_store::{MemoryStore, Store, StoreError};

/// The identity header set by the upstream layer.
pub const USER_ID: HeaderName = HeaderName::from_static("x-user-id");

/// Header value identifying `user_id`.
pub fn user_value(user_id: &UserId) -> HeaderValue {
    HeaderValue::from_str(&user_id.to_string()).unwrap()
}

/// Audit sink that keeps every event for inspection.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    /// Events recorded so far.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Cache backend that is always unreachable.
#[derive(Debug)]
pub struct DownCache;

#[async_trait]
impl CacheBackend for DownCache {
    async fn get(&self, _key: &str) -> z_quota_cache::Result<Option<String>> {
        Err(CacheError::Backend("connection refused".into()))
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> z_quota_cache::Result<()> {
        Err(CacheError::Backend("connection refused".into()))
    }

    async fn delete(&self, _keys: &[String]) -> z_quota_cache::Result<()> {
        Err(CacheError::Backend("connection refused".into()))
    }

    async fn take_token(
        &self,
        _key: &str,
        _spec: BucketSpec,
        _now_ms: i64,
    ) -> z_quota_cache::Result<TokenTake> {
        Err(CacheError::Backend("connection refused".into()))
    }

    async fn ping(&self) -> z_quota_cache::Result<()> {
        Err(CacheError::Backend("connection refused".into()))
    }
}

/// Store that is always unreachable.
#[derive(Debug)]
pub struct DownStore;

fn down<T>() -> z_quota_store::Result<T> {
    Err(StoreError::Database("connection refused".into()))
}

#[async_trait]
impl Store for DownStore {
    async fn ping(&self) -> z_quota_store::Result<()> {
        down()
    }

    async fn create_user(&self, _user: &User) -> z_quota_store::Result<()> {
        down()
    }

    async fn get_user(&self, _user_id: &UserId) -> z_quota_store::Result<Option<User>> {
        down()
    }

    async fn set_user_plan_label(
        &self,
        _user_id: &UserId,
        _plan_id: &str,
        _now: DateTime<Utc>,
    ) -> z_quota_store::Result<()> {
        down()
    }

    async fn insert_subscription(&self, _subscription: &Subscription) -> z_quota_store::Result<()> {
        down()
    }

    async fn get_current_subscription(
        &self,
        _user_id: &UserId,
        _now: DateTime<Utc>,
    ) -> z_quota_store::Result<Option<Subscription>> {
        down()
    }

    async fn swap_subscription(
        &self,
        _subscription: &Subscription,
        _expected_version: i64,
    ) -> z_quota_store::Result<bool> {
        down()
    }

    async fn billing_history(
        &self,
        _user_id: &UserId,
        _limit: usize,
    ) -> z_quota_store::Result<BillingHistory> {
        down()
    }

    async fn expire_subscriptions(&self, _now: DateTime<Utc>) -> z_quota_store::Result<u64> {
        down()
    }

    async fn record_usage(&self, _record: &UsageRecord) -> z_quota_store::Result<()> {
        down()
    }

    async fn sum_usage(
        &self,
        _user_id: &UserId,
        _resource_type: &str,
        _period: BillingPeriod,
    ) -> z_quota_store::Result<i64> {
        down()
    }

    async fn usage_breakdown(
        &self,
        _user_id: &UserId,
        _period: BillingPeriod,
        _limit: usize,
    ) -> z_quota_store::Result<UsageBreakdown> {
        down()
    }
}

/// Fixed start instant: mid-month so tests can move within the month.
pub fn start_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
}

/// Config with a rate limit generous enough to stay out of the way.
pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        listen_addr: "127.0.0.1:0".into(),
        cache_timeout: Duration::from_millis(250),
        rate_limit: RateLimitConfig {
            limit_per_window: 10_000,
            window: Duration::from_secs(1),
            burst: 10_000,
        },
        ..ServiceConfig::default()
    }
}

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The shared application state.
    pub state: AppState,
    /// Clock driving the engine, the cache and the limiter.
    pub clock: ManualClock,
    /// The in-memory store behind the server.
    pub store: Arc<MemoryStore>,
    /// The in-memory cache behind the server.
    pub cache: Arc<MemoryCache>,
    /// Every audit event emitted.
    pub audit: Arc<RecordingAuditSink>,
    /// A test user ID for requests carrying an identity.
    pub test_user_id: UserId,
}

impl TestHarness {
    /// Create a new test harness with fresh in-memory backends.
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Create a harness with a custom configuration.
    pub fn with_config(config: ServiceConfig) -> Self {
        let clock = ManualClock::new(start_instant());
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::with_clock(Arc::new(clock.clone())));
        let audit = Arc::new(RecordingAuditSink::default());

        let state = AppState::new(
            store.clone(),
            cache.clone(),
            audit.clone(),
            Arc::new(clock.clone()),
            config,
        );
        let router: Router = create_router(state.clone());
        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            state,
            clock,
            store,
            cache,
            audit,
            test_user_id: UserId::generate(),
        }
    }

    /// A server over arbitrary backends (for failure scenarios).
    pub fn server_over(store: Arc<dyn Store>, cache: Arc<dyn CacheBackend>) -> TestServer {
        let clock = ManualClock::new(start_instant());
        let state = AppState::new(
            store,
            cache,
            Arc::new(RecordingAuditSink::default()),
            Arc::new(clock),
            test_config(),
        );
        TestServer::new(create_router(state)).expect("Failed to create test server")
    }

    /// The identity header value for the test user.
    pub fn user_header(&self) -> HeaderValue {
        user_value(&self.test_user_id)
    }

    /// Subscribe the test user to `plan_id` (monthly).
    pub async fn subscribe(&self, plan_id: &str) -> serde_json::Value {
        let response = self
            .server
            .post("/v1/subscription")
            .add_header(USER_ID, self.user_header())
            .json(&serde_json::json!({ "plan_id": plan_id }))
            .await;
        response.assert_status(axum::http::StatusCode::CREATED);
        response.json()
    }

    /// Record `quantity` units of `resource_type` for the test user.
    pub async fn record(&self, resource_type: &str, quantity: i64) {
        self.server
            .post("/v1/usage")
            .add_header(USER_ID, self.user_header())
            .json(&serde_json::json!({
                "resource_type": resource_type,
                "quantity": quantity,
            }))
            .await
            .assert_status(axum::http::StatusCode::CREATED);
    }

    /// Fetch quota figures for the test user.
    pub async fn quota(&self, resource_type: &str) -> serde_json::Value {
        let response = self
            .server
            .get(&format!("/v1/quota/{resource_type}"))
            .add_header(USER_ID, self.user_header())
            .await;
        response.assert_status_ok();
        response.json()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
