//! Subscription handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use z_quota_core::{BillingCycle, Subscription, SubscriptionId};

use crate::error::ApiError;
use crate::identity::Caller;
use crate::state::AppState;

/// Create or update request.
#[derive(Debug, Deserialize)]
pub struct SubscriptionRequest {
    /// Target plan.
    pub plan_id: String,
    /// `monthly` (default) or `yearly`.
    pub billing_cycle: Option<String>,
}

impl SubscriptionRequest {
    fn billing_cycle(&self) -> Result<BillingCycle, ApiError> {
        match self.billing_cycle.as_deref() {
            None => Ok(BillingCycle::Monthly),
            Some(raw) => raw
                .parse()
                .map_err(|_| ApiError::InvalidBillingCycle(raw.to_string())),
        }
    }
}

/// Cancellation response.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    /// Always `true`.
    pub canceled: bool,
    /// The cancelled subscription.
    pub subscription_id: SubscriptionId,
    /// When entitlement ends.
    pub ends_at: Option<DateTime<Utc>>,
    /// The subscription after cancellation.
    pub subscription: Subscription,
}

/// The caller's current subscription, or `{"subscription": null}`.
pub async fn get_subscription(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Response, ApiError> {
    let response = match state.engine.get_subscription(&caller.user_id).await? {
        Some(subscription) => Json(subscription).into_response(),
        None => Json(serde_json::json!({ "subscription": null })).into_response(),
    };
    Ok(response)
}

/// Start a new subscription.
pub async fn create_subscription(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(body): Json<SubscriptionRequest>,
) -> Result<(StatusCode, Json<Subscription>), ApiError> {
    let cycle = body.billing_cycle()?;
    let subscription = state
        .engine
        .create_subscription(&caller.user_id, &body.plan_id, cycle)
        .await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

/// Change plan or cycle of the current subscription.
pub async fn update_subscription(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(body): Json<SubscriptionRequest>,
) -> Result<Json<Subscription>, ApiError> {
    let cycle = body.billing_cycle()?;
    let subscription = state
        .engine
        .update_subscription(&caller.user_id, &body.plan_id, cycle)
        .await?;
    Ok(Json(subscription))
}

/// Schedule cancellation at the end of the current cycle.
pub async fn cancel_subscription(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<CancelResponse>, ApiError> {
    let subscription = state.engine.cancel_subscription(&caller.user_id).await?;
    Ok(Json(CancelResponse {
        canceled: true,
        subscription_id: subscription.id,
        ends_at: subscription.ends_at,
        subscription,
    }))
}
