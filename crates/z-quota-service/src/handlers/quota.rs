//! Quota check handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;

use z_quota_core::QuotaInfo;

use crate::error::ApiError;
use crate::identity::Caller;
use crate::state::AppState;

/// Quota figures for one resource type in the current month.
pub async fn check_quota(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(resource_type): Path<String>,
) -> Result<Json<QuotaInfo>, ApiError> {
    let quota = state
        .engine
        .check_quota(&caller.user_id, &resource_type)
        .await?;
    Ok(Json(quota))
}
