//! User registration handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use z_quota_core::User;

use crate::error::ApiError;
use crate::identity::Caller;
use crate::state::AppState;

/// Registration request.
#[derive(Debug, Deserialize)]
pub struct RegisterUserRequest {
    /// Contact email.
    pub email: String,
}

/// Register the caller on the free plan.
pub async fn register_user(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(body): Json<RegisterUserRequest>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let email = body.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::BadRequest("email must be a valid address".into()));
    }

    let user = state.engine.register_user(&caller.user_id, email).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// The caller's user record.
pub async fn get_current_user(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.engine.get_user(&caller.user_id).await?))
}
