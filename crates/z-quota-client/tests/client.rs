//! Client SDK tests against a mocked z-quota service.

use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use z_quota_client::{
    ClientError, RecordUsage, SubscriptionRequest, UsageDetailsQuery, ZQuotaClient,
};
use z_quota_core::{
    get_plan, BillingCycle, BillingPeriod, QuotaInfo, Subscription, UsageBreakdown, UserId,
};

async fn setup() -> (MockServer, ZQuotaClient, UserId) {
    let server = MockServer::start().await;
    let client = ZQuotaClient::new(server.uri()).unwrap();
    (server, client, UserId::generate())
}

fn error_body(code: &str, message: &str) -> serde_json::Value {
    json!({ "error": { "code": code, "message": message } })
}

#[tokio::test]
async fn get_subscription_forwards_identity() {
    let (server, client, user) = setup().await;
    let subscription = Subscription::new(
        user,
        get_plan("basic").unwrap(),
        BillingCycle::Monthly,
        Utc::now(),
    );

    Mock::given(method("GET"))
        .and(path("/v1/subscription"))
        .and(header("x-user-id", user.to_string().as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(&subscription))
        .expect(1)
        .mount(&server)
        .await;

    let current = client.get_subscription(&user).await.unwrap();
    assert_eq!(current, Some(subscription));
}

#[tokio::test]
async fn null_subscription_is_none() {
    let (server, client, user) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/subscription"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "subscription": null })))
        .mount(&server)
        .await;

    assert_eq!(client.get_subscription(&user).await.unwrap(), None);
}

#[tokio::test]
async fn create_subscription_sends_plan_and_cycle() {
    let (server, client, user) = setup().await;
    let subscription = Subscription::new(
        user,
        get_plan("premium").unwrap(),
        BillingCycle::Yearly,
        Utc::now(),
    );

    Mock::given(method("POST"))
        .and(path("/v1/subscription"))
        .and(body_json(json!({ "plan_id": "premium", "billing_cycle": "yearly" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(&subscription))
        .expect(1)
        .mount(&server)
        .await;

    let created = client
        .create_subscription(&user, &SubscriptionRequest::yearly("premium"))
        .await
        .unwrap();
    assert_eq!(created.plan_id, "premium");
}

#[tokio::test]
async fn invalid_plan_maps_to_typed_error() {
    let (server, client, user) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v1/subscription"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "code": "invalid_plan",
                "message": "invalid plan: gold",
                "details": { "plan_id": "gold" }
            }
        })))
        .mount(&server)
        .await;

    let err = client
        .create_subscription(&user, &SubscriptionRequest::monthly("gold"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidPlan { plan_id } if plan_id == "gold"));
}

#[tokio::test]
async fn no_active_subscription_maps_to_typed_error() {
    let (server, client, user) = setup().await;

    Mock::given(method("DELETE"))
        .and(path("/v1/subscription"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(error_body("no_active_subscription", "no active subscription")),
        )
        .mount(&server)
        .await;

    let err = client.cancel_subscription(&user).await.unwrap_err();
    assert!(matches!(err, ClientError::NoActiveSubscription));
}

#[tokio::test]
async fn record_usage_posts_body() {
    let (server, client, user) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v1/usage"))
        .and(body_json(json!({
            "resource_type": "messages",
            "quantity": 2,
            "metadata": { "conversation_id": "c-1" }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "recorded": true,
            "usage_id": "01HZX3V7W5N8Q2R4T6Y8A0C2E4"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let usage = RecordUsage::new("messages", 2).with_metadata(json!({ "conversation_id": "c-1" }));
    let response = client.record_usage(&user, &usage).await.unwrap();
    assert!(response.recorded);
}

#[tokio::test]
async fn check_quota_parses_figures() {
    let (server, client, user) = setup().await;
    let quota = QuotaInfo::compute("messages", 1000, 999, BillingPeriod::containing(Utc::now()));

    Mock::given(method("GET"))
        .and(path("/v1/quota/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&quota))
        .mount(&server)
        .await;

    let fetched = client.check_quota(&user, "messages").await.unwrap();
    assert_eq!(fetched.remaining, 1);
    assert!(fetched.allows_more());
}

#[tokio::test]
async fn usage_details_sends_query() {
    let (server, client, user) = setup().await;
    let breakdown = UsageBreakdown::empty(BillingPeriod::containing(Utc::now()));

    Mock::given(method("GET"))
        .and(path("/v1/usage/details"))
        .and(query_param("start_date", "2024-05-01"))
        .and(query_param("limit", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&breakdown))
        .expect(1)
        .mount(&server)
        .await;

    let query = UsageDetailsQuery {
        start_date: chrono::NaiveDate::from_ymd_opt(2024, 5, 1),
        end_date: None,
        limit: Some(5),
    };
    let fetched = client.usage_details(&user, &query).await.unwrap();
    assert_eq!(fetched.resources.len(), 3);
}

#[tokio::test]
async fn rate_limit_carries_retry_after() {
    let (server, client, user) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/usage/summary"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "6")
                .set_body_json(error_body("rate_limited", "rate limit exceeded")),
        )
        .mount(&server)
        .await;

    let err = client.usage_summary(&user).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::RateLimited {
            retry_after_seconds: Some(6)
        }
    ));
}

#[tokio::test]
async fn unknown_errors_keep_code_and_status() {
    let (server, client, user) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v1/users"))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(error_body("conflict", "user exists")),
        )
        .mount(&server)
        .await;

    let err = client
        .register_user(&user, "ada@example.com")
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("conflict"));
    assert!(matches!(err, ClientError::Api { status: 409, .. }));
}

#[tokio::test]
async fn non_json_errors_are_reported() {
    let (server, client, _) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/plans"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let err = client.list_plans().await.unwrap_err();
    assert!(matches!(err, ClientError::Api { status: 502, ref code, .. } if code == "unknown"));
}

#[tokio::test]
async fn unhealthy_service_still_returns_body() {
    let (server, client, _) = setup().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "status": "unhealthy",
            "service": "z-quota",
            "version": "0.1.0",
            "store": false,
            "cache": true
        })))
        .mount(&server)
        .await;

    let health = client.health().await.unwrap();
    assert_eq!(health.status, "unhealthy");
    assert!(!health.store);
}
