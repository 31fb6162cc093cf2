//! Billing history handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use z_quota_core::BillingHistory;

use super::page_limit;
use crate::error::ApiError;
use crate::identity::Caller;
use crate::state::AppState;

const DEFAULT_HISTORY_LIMIT: usize = 10;
const MAX_HISTORY_LIMIT: usize = 100;

/// Billing history query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    /// Maximum rows to return.
    pub limit: Option<usize>,
}

/// Past and present subscriptions, newest first.
pub async fn billing_history(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<BillingHistory>, ApiError> {
    let limit = page_limit(query.limit, DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT);
    let history = state
        .engine
        .billing_history(&caller.user_id, limit)
        .await?;
    Ok(Json(history))
}
