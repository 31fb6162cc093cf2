//! Usage handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use z_quota_core::{UsageBreakdown, UsageRecordId, UsageSummary};

use super::page_limit;
use crate::error::ApiError;
use crate::identity::Caller;
use crate::state::AppState;

const DEFAULT_DETAILS_LIMIT: usize = 50;
const MAX_DETAILS_LIMIT: usize = 1000;

/// Usage recording request.
#[derive(Debug, Deserialize)]
pub struct RecordUsageRequest {
    /// Resource type, e.g. `messages`.
    pub resource_type: String,
    /// Units consumed; at least 1.
    #[serde(default = "one")]
    pub quantity: i64,
    /// Free-form context.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

const fn one() -> i64 {
    1
}

/// Usage recording response.
#[derive(Debug, Serialize)]
pub struct RecordUsageResponse {
    /// Always `true`.
    pub recorded: bool,
    /// The new record.
    pub usage_id: UsageRecordId,
}

/// Detailed usage query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct DetailsQuery {
    /// Window start (`YYYY-MM-DD` or RFC 3339); defaults to the month start.
    pub start_date: Option<String>,
    /// Window end, inclusive; defaults to the month end.
    pub end_date: Option<String>,
    /// Maximum records per resource type.
    pub limit: Option<usize>,
}

/// Record consumption for the caller.
pub async fn record_usage(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(body): Json<RecordUsageRequest>,
) -> Result<(StatusCode, Json<RecordUsageResponse>), ApiError> {
    let record = state
        .engine
        .record_usage(
            &caller.user_id,
            &body.resource_type,
            body.quantity,
            body.metadata,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RecordUsageResponse {
            recorded: true,
            usage_id: record.id,
        }),
    ))
}

/// Headline usage for the current month.
pub async fn usage_summary(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<UsageSummary>, ApiError> {
    Ok(Json(state.engine.usage_summary(&caller.user_id).await?))
}

/// Usage broken down by resource type.
pub async fn usage_details(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Query(query): Query<DetailsQuery>,
) -> Result<Json<UsageBreakdown>, ApiError> {
    let start = query
        .start_date
        .as_deref()
        .map(|raw| parse_date(raw, Bound::Start))
        .transpose()?;
    let end = query
        .end_date
        .as_deref()
        .map(|raw| parse_date(raw, Bound::End))
        .transpose()?;
    let limit = page_limit(query.limit, DEFAULT_DETAILS_LIMIT, MAX_DETAILS_LIMIT);

    let breakdown = state
        .engine
        .usage_details(&caller.user_id, start, end, limit)
        .await?;
    Ok(Json(breakdown))
}

#[derive(Debug, Clone, Copy)]
enum Bound {
    Start,
    End,
}

/// Parse a query date. A bare day covers the whole day: start bounds map
/// to midnight, end bounds to the last microsecond.
fn parse_date(raw: &str, bound: Bound) -> Result<DateTime<Utc>, ApiError> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(instant.with_timezone(&Utc));
    }

    let day = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ApiError::InvalidDate(format!("{raw:?} is not YYYY-MM-DD or RFC 3339")))?;
    let midnight = day.and_time(NaiveTime::MIN).and_utc();

    Ok(match bound {
        Bound::Start => midnight,
        Bound::End => midnight + Duration::days(1) - Duration::microseconds(1),
    })
}
