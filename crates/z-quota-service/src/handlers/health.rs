//! Health check handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::engine::HealthStatus;
use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy`, `degraded` or `unhealthy`.
    pub status: &'static str,
    /// Service name.
    pub service: &'static str,
    /// Service version.
    pub version: &'static str,
    /// Whether the store answered.
    pub store: bool,
    /// Whether the cache answered.
    pub cache: bool,
}

/// Health check endpoint.
///
/// A degraded service (cache down) still answers 200; only an unreachable
/// store turns this into a 503.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let report = state.engine.health().await;
    let status = report.status();

    let code = match status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };

    (
        code,
        Json(HealthResponse {
            status: status.as_str(),
            service: "z-quota",
            version: env!("CARGO_PKG_VERSION"),
            store: report.store_ok,
            cache: report.cache_ok,
        }),
    )
}
