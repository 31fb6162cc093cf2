//! Subscription types for z-quota.
//!
//! A [`Subscription`] is the entitlement record for one user. Price and limits
//! are snapshots taken from the plan catalog when the row is created or
//! updated, so later catalog edits never change what an existing subscriber
//! was sold.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QuotaError;
use crate::ids::{SubscriptionId, UserId};
use crate::plans::{PlanDefinition, FREE_PLAN_ID};

/// Renewal cadence of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    /// Renews every calendar month.
    Monthly,
    /// Renews every year.
    Yearly,
}

impl BillingCycle {
    /// Get the cycle name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    /// Advance `from` by one cycle unit.
    ///
    /// Month arithmetic clamps to the last day of the target month, so
    /// January 31st plus one month is the last day of February.
    #[must_use]
    pub fn advance(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        let months = match self {
            Self::Monthly => Months::new(1),
            Self::Yearly => Months::new(12),
        };
        from.checked_add_months(months)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingCycle {
    type Err = QuotaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            other => Err(QuotaError::InvalidBillingCycle(other.to_string())),
        }
    }
}

/// Status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Paid and in good standing.
    Active,
    /// In a trial period.
    Trialing,
    /// Cancelled by the user, still usable until `ends_at`.
    PendingCancellation,
    /// Terminated.
    Canceled,
}

impl SubscriptionStatus {
    /// Get the status name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PendingCancellation => "pending_cancellation",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = QuotaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "trialing" => Ok(Self::Trialing),
            "pending_cancellation" => Ok(Self::PendingCancellation),
            "canceled" => Ok(Self::Canceled),
            other => Err(QuotaError::InvalidStatus(other.to_string())),
        }
    }
}

/// A price in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Amount in minor units (cents).
    pub amount_cents: i64,
    /// ISO 4217 currency code.
    pub currency: String,
}

impl Price {
    /// A price in US dollars.
    #[must_use]
    pub fn usd(amount_cents: i64) -> Self {
        Self {
            amount_cents,
            currency: "USD".to_string(),
        }
    }
}

/// The entitlement record for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscription ID.
    pub id: SubscriptionId,

    /// Owner.
    pub user_id: UserId,

    /// Plan identifier from the catalog.
    pub plan_id: String,

    /// Renewal cadence.
    pub billing_cycle: BillingCycle,

    /// Lifecycle status.
    pub status: SubscriptionStatus,

    /// Price frozen at creation/update time.
    pub price: Price,

    /// When the subscription started.
    pub started_at: DateTime<Utc>,

    /// When entitlement ends, if scheduled.
    pub ends_at: Option<DateTime<Utc>>,

    /// Whether the subscription renews automatically.
    pub auto_renew: bool,

    /// Resource limits frozen at creation/update time (`-1` = unlimited).
    pub limits: BTreeMap<String, i64>,

    /// Optimistic concurrency token, bumped on every stored mutation.
    pub version: i64,

    /// When the row was created.
    pub created_at: DateTime<Utc>,

    /// When the row was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Start a new active subscription to `plan`.
    #[must_use]
    pub fn new(
        user_id: UserId,
        plan: &PlanDefinition,
        billing_cycle: BillingCycle,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SubscriptionId::generate(),
            user_id,
            plan_id: plan.id.clone(),
            billing_cycle,
            status: SubscriptionStatus::Active,
            price: plan.pricing.price_for(billing_cycle),
            started_at: now,
            ends_at: None,
            auto_renew: true,
            limits: plan.limits.clone(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this row counts as the user's current entitlement at `now`.
    ///
    /// Active and trialing rows always count. A pending cancellation keeps
    /// counting until its `ends_at` passes.
    #[must_use]
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            SubscriptionStatus::Active | SubscriptionStatus::Trialing => true,
            SubscriptionStatus::PendingCancellation => self.ends_at.is_some_and(|end| end > now),
            SubscriptionStatus::Canceled => false,
        }
    }

    /// Limit for `resource_type`; a missing key means no access (`0`).
    #[must_use]
    pub fn limit_for(&self, resource_type: &str) -> i64 {
        self.limits.get(resource_type).copied().unwrap_or(0)
    }

    /// Switch to another plan/cycle in place, re-snapshotting price and limits.
    ///
    /// A pending cancellation is withdrawn: the row becomes `active` again
    /// with `auto_renew` set and no end date.
    pub fn apply_plan(
        &mut self,
        plan: &PlanDefinition,
        billing_cycle: BillingCycle,
        now: DateTime<Utc>,
    ) {
        self.plan_id.clone_from(&plan.id);
        self.billing_cycle = billing_cycle;
        self.price = plan.pricing.price_for(billing_cycle);
        self.limits = plan.limits.clone();
        if self.status == SubscriptionStatus::PendingCancellation {
            self.status = SubscriptionStatus::Active;
            self.auto_renew = true;
            self.ends_at = None;
        }
        self.updated_at = now;
    }

    /// Schedule cancellation at the end of the current cycle.
    ///
    /// # Errors
    ///
    /// Returns `QuotaError::CannotCancelFreePlan` for the free plan.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), QuotaError> {
        if self.plan_id == FREE_PLAN_ID {
            return Err(QuotaError::CannotCancelFreePlan);
        }

        self.status = SubscriptionStatus::PendingCancellation;
        self.auto_renew = false;
        self.ends_at = Some(
            self.ends_at
                .unwrap_or_else(|| self.billing_cycle.advance(self.started_at)),
        );
        self.updated_at = now;
        Ok(())
    }

    /// Terminate a pending cancellation whose end date has passed.
    ///
    /// Returns `true` if the status changed.
    pub fn expire(&mut self, now: DateTime<Utc>) -> bool {
        let due = self.status == SubscriptionStatus::PendingCancellation
            && self.ends_at.is_some_and(|end| end <= now);
        if due {
            self.status = SubscriptionStatus::Canceled;
            self.updated_at = now;
        }
        due
    }
}
