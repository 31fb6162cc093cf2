//! Z-Quota HTTP client implementation.

use reqwest::{Client, RequestBuilder};
use std::time::Duration;

use z_quota_core::{
    BillingHistory, PlanDefinition, QuotaInfo, Subscription, UsageBreakdown, UsageSummary, User,
    UserId,
};

use crate::error::ClientError;
use crate::types::{
    ApiErrorResponse, CancelResponse, CurrentSubscription, HealthResponse, RecordUsage,
    RecordUsageResponse, SubscriptionRequest, UsageDetailsQuery,
};

/// Header carrying the user a request acts for.
const USER_ID_HEADER: &str = "x-user-id";

/// Z-Quota API client.
///
/// Every user-scoped call takes the [`UserId`] it acts for and forwards it
/// in the `x-user-id` header, the way the upstream identity layer does.
#[derive(Debug, Clone)]
pub struct ZQuotaClient {
    client: Client,
    base_url: String,
}

impl ZQuotaClient {
    /// Create a new z-quota client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the z-quota service (e.g., `"http://z-quota:8080"`)
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_options(base_url, ClientOptions::default())
    }

    /// Create a new z-quota client with custom options.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if the HTTP client cannot be built.
    pub fn with_options(
        base_url: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .user_agent(options.user_agent)
            .build()
            .map_err(|e| ClientError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    // =========================================================================
    // Plans and health
    // =========================================================================

    /// List the plan catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn list_plans(&self) -> Result<Vec<PlanDefinition>, ClientError> {
        let response = self.client.get(self.url("/v1/plans")).send().await?;
        self.handle_response(response).await
    }

    /// Query service health.
    ///
    /// An unhealthy service answers 503 with a health body; that body is
    /// returned rather than an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body cannot be parsed.
    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        let response = self.client.get(self.url("/health")).send().await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// The user's current subscription, `None` when the user is on free defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn get_subscription(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, ClientError> {
        let request = as_user(self.client.get(self.url("/v1/subscription")), user_id);
        let current: CurrentSubscription = self.handle_response(request.send().await?).await?;
        Ok(current.into())
    }

    /// Start a new subscription.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidPlan` for unknown plans, or another error
    /// if the request fails.
    pub async fn create_subscription(
        &self,
        user_id: &UserId,
        request: &SubscriptionRequest,
    ) -> Result<Subscription, ClientError> {
        let builder = as_user(self.client.post(self.url("/v1/subscription")), user_id);
        let response = builder.json(request).send().await?;
        self.handle_response(response).await
    }

    /// Change plan or cycle of the current subscription.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NoActiveSubscription` when there is nothing to
    /// update, or another error if the request fails.
    pub async fn update_subscription(
        &self,
        user_id: &UserId,
        request: &SubscriptionRequest,
    ) -> Result<Subscription, ClientError> {
        let builder = as_user(self.client.put(self.url("/v1/subscription")), user_id);
        let response = builder.json(request).send().await?;
        self.handle_response(response).await
    }

    /// Schedule cancellation of the current subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn cancel_subscription(
        &self,
        user_id: &UserId,
    ) -> Result<CancelResponse, ClientError> {
        let builder = as_user(self.client.delete(self.url("/v1/subscription")), user_id);
        self.handle_response(builder.send().await?).await
    }

    /// Subscription history, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn billing_history(
        &self,
        user_id: &UserId,
        limit: Option<usize>,
    ) -> Result<BillingHistory, ClientError> {
        let mut builder = as_user(self.client.get(self.url("/v1/billing/history")), user_id);
        if let Some(limit) = limit {
            builder = builder.query(&[("limit", limit)]);
        }
        self.handle_response(builder.send().await?).await
    }

    // =========================================================================
    // Usage and quota
    // =========================================================================

    /// Record usage for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn record_usage(
        &self,
        user_id: &UserId,
        usage: &RecordUsage,
    ) -> Result<RecordUsageResponse, ClientError> {
        tracing::debug!(
            user_id = %user_id,
            resource_type = %usage.resource_type,
            quantity = usage.quantity,
            "Recording usage"
        );
        let builder = as_user(self.client.post(self.url("/v1/usage")), user_id);
        let response = builder.json(usage).send().await?;
        self.handle_response(response).await
    }

    /// Quota figures for one resource type in the current month.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn check_quota(
        &self,
        user_id: &UserId,
        resource_type: &str,
    ) -> Result<QuotaInfo, ClientError> {
        let url = self.url(&format!("/v1/quota/{resource_type}"));
        let builder = as_user(self.client.get(url), user_id);
        self.handle_response(builder.send().await?).await
    }

    /// Headline usage for the current month.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn usage_summary(&self, user_id: &UserId) -> Result<UsageSummary, ClientError> {
        let builder = as_user(self.client.get(self.url("/v1/usage/summary")), user_id);
        self.handle_response(builder.send().await?).await
    }

    /// Usage broken down by resource type.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn usage_details(
        &self,
        user_id: &UserId,
        query: &UsageDetailsQuery,
    ) -> Result<UsageBreakdown, ClientError> {
        let builder = as_user(self.client.get(self.url("/v1/usage/details")), user_id);
        self.handle_response(builder.query(query).send().await?)
            .await
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Register a user on the free plan.
    ///
    /// # Errors
    ///
    /// Returns an `Api` error with code `conflict` if the user exists.
    pub async fn register_user(&self, user_id: &UserId, email: &str) -> Result<User, ClientError> {
        let builder = as_user(self.client.post(self.url("/v1/users")), user_id);
        let response = builder
            .json(&serde_json::json!({ "email": email }))
            .send()
            .await?;
        self.handle_response(response).await
    }

    /// Fetch a registered user.
    ///
    /// # Errors
    ///
    /// Returns an `Api` error with code `not_found` for unknown users.
    pub async fn get_user(&self, user_id: &UserId) -> Result<User, ClientError> {
        let builder = as_user(self.client.get(self.url("/v1/users/me")), user_id);
        self.handle_response(builder.send().await?).await
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let retry_after_seconds = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        // Try to parse error response
        let error_body: Result<ApiErrorResponse, _> = response.json().await;

        match error_body {
            Ok(api_error) => {
                let code = api_error.error.code.as_str();
                let message = api_error.error.message;

                // Map specific error codes to typed errors
                match code {
                    "invalid_plan" => {
                        let plan_id = api_error
                            .error
                            .details
                            .as_ref()
                            .and_then(|d| d.get("plan_id"))
                            .and_then(serde_json::Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        Err(ClientError::InvalidPlan { plan_id })
                    }
                    "no_active_subscription" => Err(ClientError::NoActiveSubscription),
                    "rate_limited" => Err(ClientError::RateLimited {
                        retry_after_seconds,
                    }),
                    _ => Err(ClientError::Api {
                        code: code.to_string(),
                        message,
                        status: status.as_u16(),
                    }),
                }
            }
            Err(_) if status == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                Err(ClientError::RateLimited {
                    retry_after_seconds,
                })
            }
            Err(_) => Err(ClientError::Api {
                code: "unknown".to_string(),
                message: format!("HTTP {status}"),
                status: status.as_u16(),
            }),
        }
    }
}

fn as_user(builder: RequestBuilder, user_id: &UserId) -> RequestBuilder {
    builder.header(USER_ID_HEADER, user_id.to_string())
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 30).
    pub timeout_seconds: u64,
    /// User agent sent with every request.
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            user_agent: concat!("z-quota-client/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ClientOptions {
    /// Create options with a request timeout.
    #[must_use]
    pub fn with_timeout(seconds: u64) -> Self {
        Self {
            timeout_seconds: seconds,
            ..Self::default()
        }
    }
}
