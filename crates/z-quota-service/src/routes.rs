//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{billing, health, plans, quota, subscriptions, usage, users};
use crate::middleware::rate_limit;
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent requests for usage endpoints.
/// Usage recording is the hot path for metered callers.
const USAGE_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Plans
/// - `GET /v1/plans` - Plan catalog
///
/// ## Subscriptions (`x-user-id`)
/// - `GET /v1/subscription` - Current subscription
/// - `POST /v1/subscription` - Create subscription
/// - `PUT /v1/subscription` - Change plan or cycle
/// - `DELETE /v1/subscription` - Schedule cancellation
///
/// ## Usage and quota (`x-user-id`)
/// - `POST /v1/usage` - Record usage
/// - `GET /v1/usage/summary` - Current month summary
/// - `GET /v1/usage/details` - Breakdown by resource type
/// - `GET /v1/quota/:resource_type` - Quota check
///
/// ## Billing and users (`x-user-id`)
/// - `GET /v1/billing/history` - Subscription history
/// - `POST /v1/users` - Register
/// - `GET /v1/users/me` - Current user
///
/// Every `/v1` route is rate limited per caller.
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let usage_routes = Router::new()
        .route("/", post(usage::record_usage))
        .route("/summary", get(usage::usage_summary))
        .route("/details", get(usage::usage_details))
        .layer(ConcurrencyLimitLayer::new(USAGE_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        // Plans
        .route("/plans", get(plans::list_plans))
        // Subscriptions
        .route(
            "/subscription",
            get(subscriptions::get_subscription)
                .post(subscriptions::create_subscription)
                .put(subscriptions::update_subscription)
                .delete(subscriptions::cancel_subscription),
        )
        // Quota
        .route("/quota/:resource_type", get(quota::check_quota))
        // Billing
        .route("/billing/history", get(billing::billing_history))
        // Users
        .route("/users", post(users::register_user))
        .route("/users/me", get(users::get_current_user))
        // Usage routes (with their own concurrency limit)
        .nest("/usage", usage_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS))
        .layer(from_fn_with_state(Arc::clone(&state), rate_limit));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        // API v1 routes (rate limited)
        .nest("/v1", api_routes)
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
