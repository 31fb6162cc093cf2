//! Request middleware.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use z_quota_cache::Decision;

use crate::error::ApiError;
use crate::identity::Caller;
use crate::state::AppState;

/// Response header carrying the caller's remaining request budget.
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Token-bucket rate limiting per caller.
///
/// Callers are keyed by user id when the identity header is valid, else by
/// client address. Denied requests get `429 rate_limited` with `Retry-After`.
pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let identity = rate_limit_identity(&request);

    match state.limiter.check(&identity).await {
        Decision::Allowed { remaining } => {
            let mut response = next.run(request).await;
            response
                .headers_mut()
                .insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from(remaining));
            response
        }
        Decision::Denied { retry_after } => {
            tracing::info!(identity = %identity, "Request rate limited");
            let mut response = ApiError::RateLimited { retry_after }.into_response();
            response
                .headers_mut()
                .insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from(0u32));
            response
        }
    }
}

fn rate_limit_identity(request: &Request) -> String {
    if let Ok(caller) = Caller::from_headers(request.headers()) {
        return format!("user:{}", caller.user_id);
    }

    if let Some(addr) = forwarded_for(request.headers()) {
        return format!("ip:{addr}");
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_string(), |info| format!("ip:{}", info.0.ip()))
}

/// First hop of `x-forwarded-for`, as set by the fronting proxy.
fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .map(str::trim)
        .find(|hop| !hop.is_empty())
        .map(str::to_string)
}
