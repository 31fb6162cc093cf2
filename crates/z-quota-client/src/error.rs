//! Client error types.

/// Errors that can occur when using the z-quota client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned an error response.
    #[error("API error: {code} - {message}")]
    Api {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
        /// HTTP status code.
        status: u16,
    },

    /// The plan identifier is not in the catalog.
    #[error("invalid plan: {plan_id}")]
    InvalidPlan {
        /// The rejected plan.
        plan_id: String,
    },

    /// The user has no current subscription.
    #[error("no active subscription")]
    NoActiveSubscription,

    /// Too many requests; retry later.
    #[error("rate limited (retry after {retry_after_seconds:?}s)")]
    RateLimited {
        /// Server-suggested wait, if provided.
        retry_after_seconds: Option<u64>,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// The API error code, if the server answered with one.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => Some(code),
            Self::InvalidPlan { .. } => Some("invalid_plan"),
            Self::NoActiveSubscription => Some("no_active_subscription"),
            Self::RateLimited { .. } => Some("rate_limited"),
            Self::Http(_) | Self::Serialization(_) | Self::Configuration(_) => None,
        }
    }
}
