//! Caller identity extraction.
//!
//! The upstream identity layer authenticates the caller and forwards the
//! user's id in the `x-user-id` header. This service trusts that header and
//! only checks that it is a well-formed user id.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use z_quota_core::UserId;

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The calling user, taken from the `x-user-id` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    /// The user id.
    pub user_id: UserId,
}

impl Caller {
    /// Read the caller from request headers.
    ///
    /// # Errors
    ///
    /// `Unauthorized` when the header is missing, `InvalidUserId` when it
    /// does not parse.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ApiError> {
        let raw = headers
            .get(USER_ID_HEADER)
            .ok_or(ApiError::Unauthorized)?
            .to_str()
            .map_err(|_| ApiError::InvalidUserId("header is not valid UTF-8".into()))?
            .trim();

        if raw.is_empty() {
            return Err(ApiError::Unauthorized);
        }

        let user_id = raw
            .parse::<UserId>()
            .map_err(|_| ApiError::InvalidUserId(raw.to_string()))?;

        Ok(Self { user_id })
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: Option<&'static str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = value {
            headers.insert(USER_ID_HEADER, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn parses_uuid_header() {
        let caller =
            Caller::from_headers(&headers(Some("550e8400-e29b-41d4-a716-446655440000"))).unwrap();
        assert_eq!(
            caller.user_id.to_string(),
            "550e8400-e29b-41d4-a716-446655440000"
        );
    }

    #[test]
    fn missing_header_is_unauthorized() {
        assert!(matches!(
            Caller::from_headers(&headers(None)),
            Err(ApiError::Unauthorized)
        ));
        assert!(matches!(
            Caller::from_headers(&headers(Some("  "))),
            Err(ApiError::Unauthorized)
        ));
    }

    #[test]
    fn malformed_header_is_rejected() {
        assert!(matches!(
            Caller::from_headers(&headers(Some("not-a-uuid"))),
            Err(ApiError::InvalidUserId(_))
        ));
    }
}
