//! Plan catalog handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use z_quota_core::PlanDefinition;

use crate::state::AppState;

/// List every plan in the catalog.
pub async fn list_plans(State(state): State<Arc<AppState>>) -> Json<&'static [PlanDefinition]> {
    Json(state.engine.list_plans())
}
