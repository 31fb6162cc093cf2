//! Audit trail for billing-relevant mutations.
//!
//! The engine hands every successful mutation to an [`AuditSink`]. Recording
//! is fire-and-forget: a sink must not block and cannot fail the request.

use chrono::{DateTime, Utc};
use serde::Serialize;

use z_quota_core::{Subscription, SubscriptionId, UsageRecord, UserId};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A new subscription row was created.
    SubscriptionCreated,
    /// The current subscription changed plan or cycle.
    SubscriptionUpdated,
    /// The current subscription was scheduled for cancellation.
    SubscriptionCanceled,
    /// Usage was recorded.
    UsageRecorded,
}

impl AuditAction {
    /// Get the action name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SubscriptionCreated => "subscription_created",
            Self::SubscriptionUpdated => "subscription_updated",
            Self::SubscriptionCanceled => "subscription_canceled",
            Self::UsageRecorded => "usage_recorded",
        }
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    /// What happened.
    pub action: AuditAction,
    /// Whose entitlement or usage changed.
    pub user_id: UserId,
    /// The subscription involved, if any.
    pub subscription_id: Option<SubscriptionId>,
    /// Plan after the change, for subscription events.
    pub plan_id: Option<String>,
    /// Resource type, for usage events.
    pub resource_type: Option<String>,
    /// Quantity, for usage events.
    pub quantity: Option<i64>,
    /// When it happened.
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    /// Event for a subscription mutation.
    #[must_use]
    pub fn subscription(
        action: AuditAction,
        subscription: &Subscription,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            action,
            user_id: subscription.user_id,
            subscription_id: Some(subscription.id),
            plan_id: Some(subscription.plan_id.clone()),
            resource_type: None,
            quantity: None,
            at,
        }
    }

    /// Event for recorded usage.
    #[must_use]
    pub fn usage(record: &UsageRecord) -> Self {
        Self {
            action: AuditAction::UsageRecorded,
            user_id: record.user_id,
            subscription_id: None,
            plan_id: None,
            resource_type: Some(record.resource_type.clone()),
            quantity: Some(record.quantity),
            at: record.created_at,
        }
    }
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    /// Record an event. Must return promptly.
    fn record(&self, event: AuditEvent);
}

/// Writes audit events to the `audit` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::info!(
            target: "audit",
            action = event.action.as_str(),
            user_id = %event.user_id,
            subscription_id = ?event.subscription_id.map(|id| id.to_string()),
            plan_id = ?event.plan_id,
            resource_type = ?event.resource_type,
            quantity = ?event.quantity,
            at = %event.at.to_rfc3339(),
            "audit"
        );
    }
}
