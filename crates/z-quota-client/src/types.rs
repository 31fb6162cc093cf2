//! Request and response types for the z-quota client.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use z_quota_core::{BillingCycle, Subscription, SubscriptionId, UsageRecordId};

/// Create or update a subscription.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionRequest {
    /// Target plan (e.g. `"basic"`).
    pub plan_id: String,
    /// Renewal cadence.
    pub billing_cycle: BillingCycle,
}

impl SubscriptionRequest {
    /// Monthly subscription to `plan_id`.
    #[must_use]
    pub fn monthly(plan_id: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            billing_cycle: BillingCycle::Monthly,
        }
    }

    /// Yearly subscription to `plan_id`.
    #[must_use]
    pub fn yearly(plan_id: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            billing_cycle: BillingCycle::Yearly,
        }
    }
}

/// Usage to record.
#[derive(Debug, Clone, Serialize)]
pub struct RecordUsage {
    /// Resource type, e.g. `messages`.
    pub resource_type: String,
    /// Units consumed; at least 1.
    pub quantity: i64,
    /// Free-form context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl RecordUsage {
    /// Usage without metadata.
    #[must_use]
    pub fn new(resource_type: impl Into<String>, quantity: i64) -> Self {
        Self {
            resource_type: resource_type.into(),
            quantity,
            metadata: None,
        }
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Response to a usage recording.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordUsageResponse {
    /// Always `true` on success.
    pub recorded: bool,
    /// The new record.
    pub usage_id: UsageRecordId,
}

/// Response to a cancellation.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelResponse {
    /// Always `true` on success.
    pub canceled: bool,
    /// The cancelled subscription.
    pub subscription_id: SubscriptionId,
    /// When entitlement ends.
    pub ends_at: Option<DateTime<Utc>>,
    /// The subscription after cancellation.
    pub subscription: Subscription,
}

/// Window and page size for detailed usage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageDetailsQuery {
    /// First day (inclusive); defaults to the month start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    /// Last day (inclusive); defaults to the month end.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    /// Maximum records per resource type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Health check response.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    /// `healthy`, `degraded` or `unhealthy`.
    pub status: String,
    /// Service name.
    pub service: String,
    /// Service version.
    pub version: String,
    /// Whether the store answered.
    pub store: bool,
    /// Whether the cache answered.
    pub cache: bool,
}

/// Current subscription as returned by the API.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum CurrentSubscription {
    Some(Box<Subscription>),
    None { subscription: Option<Subscription> },
}

impl From<CurrentSubscription> for Option<Subscription> {
    fn from(value: CurrentSubscription) -> Self {
        match value {
            CurrentSubscription::Some(subscription) => Some(*subscription),
            CurrentSubscription::None { subscription } => subscription,
        }
    }
}

/// API error response format.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

/// API error body.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}
