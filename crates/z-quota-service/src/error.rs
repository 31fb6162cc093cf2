//! API error types and responses.

use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::engine::EngineError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing caller identity.
    #[error("missing x-user-id header")]
    Unauthorized,

    /// Caller identity is not a valid user id.
    #[error("invalid user id: {0}")]
    InvalidUserId(String),

    /// Unknown plan identifier.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// Usage quantity below 1.
    #[error("invalid quantity: {0} (must be at least 1)")]
    InvalidQuantity(i64),

    /// Malformed resource type.
    #[error("invalid resource type: {0}")]
    InvalidResourceType(String),

    /// Malformed date or inverted range.
    #[error("invalid date: {0}")]
    InvalidDate(String),

    /// Billing cycle other than `monthly` or `yearly`.
    #[error("invalid billing cycle: {0}")]
    InvalidBillingCycle(String),

    /// The user has no current subscription.
    #[error("no active subscription")]
    NoActiveSubscription,

    /// Free plans cannot be cancelled.
    #[error("cannot cancel the free plan")]
    CannotCancelFreePlan,

    /// Bad request - malformed body or query.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Resource already exists or changed concurrently.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded")]
    RateLimited {
        /// How long to wait before retrying.
        retry_after: Duration,
    },

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl ApiError {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::InvalidUserId(_) => "invalid_user_id",
            Self::InvalidPlan(_) => "invalid_plan",
            Self::InvalidQuantity(_) => "invalid_quantity",
            Self::InvalidResourceType(_) => "invalid_resource_type",
            Self::InvalidDate(_) => "invalid_date",
            Self::InvalidBillingCycle(_) => "invalid_billing_cycle",
            Self::NoActiveSubscription => "no_active_subscription",
            Self::CannotCancelFreePlan => "cannot_cancel_free_plan",
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::RateLimited { .. } => "rate_limited",
            Self::Internal(_) => "internal_error",
        }
    }

    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::InvalidUserId(_)
            | Self::InvalidPlan(_)
            | Self::InvalidQuantity(_)
            | Self::InvalidResourceType(_)
            | Self::InvalidDate(_)
            | Self::InvalidBillingCycle(_)
            | Self::CannotCancelFreePlan
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NoActiveSubscription | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let (message, details) = match &self {
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                ("An internal error occurred".to_string(), None)
            }
            Self::InvalidPlan(plan_id) => (
                self.to_string(),
                Some(serde_json::json!({ "plan_id": plan_id })),
            ),
            Self::RateLimited { retry_after } => (
                self.to_string(),
                Some(serde_json::json!({ "retry_after_seconds": retry_after_secs(*retry_after) })),
            ),
            _ => (self.to_string(), None),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let Self::RateLimited { retry_after } = self {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(retry_after_secs(retry_after)),
            );
        }
        response
    }
}

/// Whole seconds, rounded up so clients never retry early.
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidPlan(plan_id) => Self::InvalidPlan(plan_id),
            EngineError::InvalidQuantity(q) => Self::InvalidQuantity(q),
            EngineError::InvalidResourceType(t) => Self::InvalidResourceType(t),
            EngineError::InvalidBillingCycle(c) => Self::InvalidBillingCycle(c),
            EngineError::InvalidDateRange => {
                Self::InvalidDate("end_date must not be before start_date".into())
            }
            EngineError::NoActiveSubscription => Self::NoActiveSubscription,
            EngineError::CannotCancelFreePlan => Self::CannotCancelFreePlan,
            EngineError::Conflict(msg) => Self::Conflict(msg),
            EngineError::NotFound(msg) => Self::NotFound(msg),
            EngineError::Store(msg) => Self::Internal(msg),
        }
    }
}
