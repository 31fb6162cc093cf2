//! Rate limiting integration tests.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::{test_config, TestHarness, USER_ID};
use z_quota_cache::RateLimitConfig;
use z_quota_core::UserId;

fn tight_harness() -> TestHarness {
    TestHarness::with_config(z_quota_service::ServiceConfig {
        rate_limit: RateLimitConfig {
            limit_per_window: 10,
            window: Duration::from_secs(60),
            burst: 3,
        },
        ..test_config()
    })
}

#[tokio::test]
async fn burst_is_allowed_then_denied() {
    let harness = tight_harness();

    for expected in ["2", "1", "0"] {
        let response = harness
            .server
            .get("/v1/plans")
            .add_header(USER_ID, harness.user_header())
            .await;
        response.assert_status_ok();
        assert_eq!(response.headers()["x-ratelimit-remaining"], expected);
    }

    let response = harness
        .server
        .get("/v1/plans")
        .add_header(USER_ID, harness.user_header())
        .await;

    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["retry-after"], "6");
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "rate_limited");
    assert_eq!(body["error"]["details"]["retry_after_seconds"], 6);
}

#[tokio::test]
async fn tokens_refill_over_time() {
    let harness = tight_harness();
    for _ in 0..3 {
        harness
            .server
            .get("/v1/plans")
            .add_header(USER_ID, harness.user_header())
            .await
            .assert_status_ok();
    }

    harness.clock.advance(chrono::Duration::seconds(6));

    harness
        .server
        .get("/v1/plans")
        .add_header(USER_ID, harness.user_header())
        .await
        .assert_status_ok();
    harness
        .server
        .get("/v1/plans")
        .add_header(USER_ID, harness.user_header())
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn callers_have_separate_budgets() {
    let harness = tight_harness();
    for _ in 0..4 {
        harness
            .server
            .get("/v1/plans")
            .add_header(USER_ID, harness.user_header())
            .await;
    }

    let other = common::user_value(&UserId::generate());
    harness
        .server
        .get("/v1/plans")
        .add_header(USER_ID, other)
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn denied_requests_do_not_reach_handlers() {
    let harness = tight_harness();
    for _ in 0..3 {
        harness.record("messages", 1).await;
    }

    harness
        .server
        .post("/v1/usage")
        .add_header(USER_ID, harness.user_header())
        .json(&serde_json::json!({ "resource_type": "messages", "quantity": 1 }))
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);

    assert_eq!(harness.store.usage_record_count(&harness.test_user_id).await, 3);
}

#[tokio::test]
async fn limiter_fails_open_when_cache_is_down() {
    let server = TestHarness::server_over(
        std::sync::Arc::new(z_quota_store::MemoryStore::new()),
        std::sync::Arc::new(common::DownCache),
    );
    let user = common::user_value(&UserId::generate());

    for _ in 0..50 {
        server
            .get("/v1/plans")
            .add_header(USER_ID, user.clone())
            .await
            .assert_status_ok();
    }

    // Requests still succeed against the store alone.
    server
        .post("/v1/usage")
        .add_header(USER_ID, user.clone())
        .json(&serde_json::json!({ "resource_type": "messages", "quantity": 2 }))
        .await
        .assert_status(StatusCode::CREATED);
    let quota: serde_json::Value = server
        .get("/v1/quota/messages")
        .add_header(USER_ID, user)
        .await
        .json();
    assert_eq!(quota["current_usage"], 2);
}
