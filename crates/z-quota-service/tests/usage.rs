//! Usage recording and quota integration tests.

mod common;

use chrono::{Duration, TimeZone, Utc};
use common::{TestHarness, USER_ID};
use serde_json::json;
use z_quota_core::MAX_QUANTITY;
use z_quota_service::AuditAction;

// ============================================================================
// Record Usage
// ============================================================================

#[tokio::test]
async fn record_usage_success() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/usage")
        .add_header(USER_ID, harness.user_header())
        .json(&json!({
            "resource_type": "messages",
            "quantity": 3,
            "metadata": { "conversation_id": "c-1" }
        }))
        .await;

    response.assert_status(axum::http::StatusCode::CREATED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["recorded"], true);
    assert!(body["usage_id"].is_string());
    assert_eq!(harness.store.usage_record_count(&harness.test_user_id).await, 1);

    let events = harness.audit.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, AuditAction::UsageRecorded);
    assert_eq!(events[0].quantity, Some(3));
}

#[tokio::test]
async fn quantity_defaults_to_one() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/v1/usage")
        .add_header(USER_ID, harness.user_header())
        .json(&json!({ "resource_type": "api_calls" }))
        .await
        .assert_status(axum::http::StatusCode::CREATED);

    assert_eq!(harness.quota("api_calls").await["current_usage"], 1);
}

#[tokio::test]
async fn non_positive_quantity_is_rejected_without_writing() {
    let harness = TestHarness::new();

    for quantity in [0, -5] {
        let response = harness
            .server
            .post("/v1/usage")
            .add_header(USER_ID, harness.user_header())
            .json(&json!({ "resource_type": "messages", "quantity": quantity }))
            .await;

        response.assert_status_bad_request();
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"]["code"], "invalid_quantity");
    }

    assert_eq!(harness.store.usage_record_count(&harness.test_user_id).await, 0);
    assert!(harness.audit.events().is_empty());
}

#[tokio::test]
async fn oversized_quantity_is_rejected_and_large_totals_stay_sane() {
    let harness = TestHarness::new();
    harness.subscribe("basic").await;

    let response = harness
        .server
        .post("/v1/usage")
        .add_header(USER_ID, harness.user_header())
        .json(&json!({ "resource_type": "messages", "quantity": i64::MAX }))
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "invalid_quantity");
    assert_eq!(harness.store.usage_record_count(&harness.test_user_id).await, 0);

    harness.record("messages", MAX_QUANTITY).await;
    harness.record("messages", MAX_QUANTITY).await;

    let quota = harness.quota("messages").await;
    assert_eq!(quota["current_usage"], 2 * MAX_QUANTITY);
    assert_eq!(quota["remaining"], 0);

    let summary: serde_json::Value = harness
        .server
        .get("/v1/usage/summary")
        .add_header(USER_ID, harness.user_header())
        .await
        .json();
    assert_eq!(summary["messages_this_month"], 2 * MAX_QUANTITY);
}

#[tokio::test]
async fn malformed_resource_type_is_rejected() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/usage")
        .add_header(USER_ID, harness.user_header())
        .json(&json!({ "resource_type": "Chat Messages", "quantity": 1 }))
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "invalid_resource_type");
}

// ============================================================================
// Quota
// ============================================================================

#[tokio::test]
async fn basic_plan_quota_boundary() {
    let harness = TestHarness::new();
    harness.subscribe("basic").await;

    harness.record("messages", 999).await;
    let quota = harness.quota("messages").await;
    assert_eq!(quota["has_quota"], true);
    assert_eq!(quota["max_allowed"], 1000);
    assert_eq!(quota["current_usage"], 999);
    assert_eq!(quota["remaining"], 1);

    harness.record("messages", 1).await;
    let quota = harness.quota("messages").await;
    assert_eq!(quota["current_usage"], 1000);
    assert_eq!(quota["remaining"], 0);

    harness.record("messages", 1).await;
    let quota = harness.quota("messages").await;
    assert_eq!(quota["current_usage"], 1001);
    assert_eq!(quota["remaining"], 0);
}

#[tokio::test]
async fn no_subscription_uses_free_defaults() {
    let harness = TestHarness::new();

    harness.record("messages", 40).await;
    let quota = harness.quota("messages").await;

    assert_eq!(quota["has_quota"], true);
    assert_eq!(quota["max_allowed"], 100);
    assert_eq!(quota["remaining"], 60);
}

#[tokio::test]
async fn unlisted_resource_type_has_zero_limit() {
    let harness = TestHarness::new();
    harness.subscribe("basic").await;

    let quota = harness.quota("gpu_minutes").await;

    assert_eq!(quota["has_quota"], true);
    assert_eq!(quota["max_allowed"], 0);
    assert_eq!(quota["remaining"], 0);
}

#[tokio::test]
async fn unlimited_plan_reports_no_quota() {
    let harness = TestHarness::new();
    harness.subscribe("enterprise").await;
    harness.record("messages", 1_000_000).await;

    let quota = harness.quota("messages").await;

    assert_eq!(quota["has_quota"], false);
    assert_eq!(quota["max_allowed"], -1);
    assert_eq!(quota["remaining"], 0);
    assert_eq!(quota["current_usage"], 1_000_000);
}

#[tokio::test]
async fn recording_invalidates_cached_quota() {
    let harness = TestHarness::new();
    harness.subscribe("basic").await;

    let mut previous = harness.quota("messages").await["current_usage"]
        .as_i64()
        .unwrap();
    for _ in 0..5 {
        harness.record("messages", 2).await;
        let used = harness.quota("messages").await["current_usage"]
            .as_i64()
            .unwrap();
        assert_eq!(used, previous + 2);
        previous = used;
    }
}

#[tokio::test]
async fn usage_resets_with_the_calendar_month() {
    let harness = TestHarness::new();
    harness.subscribe("basic").await;
    harness.record("messages", 500).await;
    assert_eq!(harness.quota("messages").await["current_usage"], 500);

    harness
        .clock
        .set(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());

    let quota = harness.quota("messages").await;
    assert_eq!(quota["current_usage"], 0);
    assert_eq!(quota["remaining"], 1000);
    assert_eq!(quota["period_start"], "2024-06-01T00:00:00Z");
}

#[tokio::test]
async fn quota_is_per_user() {
    let harness = TestHarness::new();
    harness.record("messages", 10).await;

    let other = common::user_value(&z_quota_core::UserId::generate());
    let quota: serde_json::Value = harness
        .server
        .get("/v1/quota/messages")
        .add_header(USER_ID, other)
        .await
        .json();

    assert_eq!(quota["current_usage"], 0);
}

// ============================================================================
// Summary
// ============================================================================

#[tokio::test]
async fn summary_reports_well_known_types() {
    let harness = TestHarness::new();
    harness.subscribe("basic").await;
    harness.record("messages", 7).await;
    harness.record("api_calls", 3).await;
    harness.record("background_tasks", 2).await;
    harness.record("background_tasks", 1).await;

    let response = harness
        .server
        .get("/v1/usage/summary")
        .add_header(USER_ID, harness.user_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["plan_id"], "basic");
    assert_eq!(body["messages_this_month"], 7);
    assert_eq!(body["api_calls_this_month"], 3);
    assert_eq!(body["background_tasks_this_month"], 3);
    assert_eq!(body["quota_remaining"], 993);
    assert_eq!(body["has_quota"], true);

    // The cached summary is dropped on the next write.
    harness.record("messages", 3).await;
    let body: serde_json::Value = harness
        .server
        .get("/v1/usage/summary")
        .add_header(USER_ID, harness.user_header())
        .await
        .json();
    assert_eq!(body["messages_this_month"], 10);
}

#[tokio::test]
async fn summary_without_subscription_is_free() {
    let harness = TestHarness::new();

    let body: serde_json::Value = harness
        .server
        .get("/v1/usage/summary")
        .add_header(USER_ID, harness.user_header())
        .await
        .json();

    assert_eq!(body["plan_id"], "free");
    assert_eq!(body["messages_this_month"], 0);
    assert_eq!(body["quota_remaining"], 100);
}

// ============================================================================
// Details
// ============================================================================

#[tokio::test]
async fn details_default_to_current_month() {
    let harness = TestHarness::new();
    harness.record("messages", 4).await;
    harness.clock.advance(Duration::minutes(1));
    harness.record("messages", 6).await;

    let response = harness
        .server
        .get("/v1/usage/details")
        .add_header(USER_ID, harness.user_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["period_start"], "2024-05-01T00:00:00Z");
    assert_eq!(body["resources"]["messages"]["total"], 10);
    assert_eq!(body["resources"]["messages"]["records"][0]["quantity"], 6);
    assert_eq!(body["resources"]["api_calls"]["total"], 0);
}

#[tokio::test]
async fn details_respect_window_and_limit() {
    let harness = TestHarness::new();
    for _ in 0..3 {
        harness.record("messages", 1).await;
        harness.clock.advance(Duration::days(1));
    }

    let body: serde_json::Value = harness
        .server
        .get("/v1/usage/details")
        .add_query_param("start_date", "2024-05-11")
        .add_query_param("end_date", "2024-05-12")
        .add_query_param("limit", 1)
        .add_header(USER_ID, harness.user_header())
        .await
        .json();

    assert_eq!(body["resources"]["messages"]["total"], 2);
    assert_eq!(
        body["resources"]["messages"]["records"]
            .as_array()
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn details_reject_bad_dates() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/usage/details")
        .add_query_param("start_date", "yesterday")
        .add_header(USER_ID, harness.user_header())
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "invalid_date");

    let response = harness
        .server
        .get("/v1/usage/details")
        .add_query_param("start_date", "2024-05-20")
        .add_query_param("end_date", "2024-05-01")
        .add_header(USER_ID, harness.user_header())
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "invalid_date");
}
