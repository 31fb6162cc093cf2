//! Derived quota and reporting types.
//!
//! None of these are persisted; they are computed from subscriptions and
//! usage records and may be cached for a short time.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::UserId;
use crate::plans::UNLIMITED;
use crate::subscription::Subscription;
use crate::usage::{BillingPeriod, UsageRecord, WELL_KNOWN_RESOURCE_TYPES};

/// Quota figures for one (user, resource type) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaInfo {
    /// The resource type.
    pub resource_type: String,
    /// `false` when the plan grants unlimited use.
    pub has_quota: bool,
    /// Usage in the current period.
    pub current_usage: i64,
    /// The plan limit (`-1` = unlimited).
    pub max_allowed: i64,
    /// `max(0, max_allowed - current_usage)`; always `0` when unlimited.
    pub remaining: i64,
    /// First instant of the period.
    pub period_start: DateTime<Utc>,
    /// Last instant of the period.
    pub period_end: DateTime<Utc>,
}

impl QuotaInfo {
    /// Compute quota figures from a limit and the usage summed over `period`.
    ///
    /// Callers must check `has_quota` rather than `remaining` to detect
    /// unlimited access.
    #[must_use]
    pub fn compute(
        resource_type: impl Into<String>,
        limit: i64,
        current_usage: i64,
        period: BillingPeriod,
    ) -> Self {
        let has_quota = limit != UNLIMITED;
        let remaining = if has_quota {
            limit.saturating_sub(current_usage).max(0)
        } else {
            0
        };
        Self {
            resource_type: resource_type.into(),
            has_quota,
            current_usage,
            max_allowed: limit,
            remaining,
            period_start: period.start,
            period_end: period.end,
        }
    }

    /// Whether one more unit may be consumed.
    #[must_use]
    pub fn allows_more(&self) -> bool {
        !self.has_quota || self.remaining > 0
    }
}

/// Headline usage figures for the current calendar month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    /// The user.
    pub user_id: UserId,
    /// Plan the figures are measured against (`free` without a subscription).
    pub plan_id: String,
    /// Messages sent this month.
    pub messages_this_month: i64,
    /// Background tasks started this month.
    pub background_tasks_this_month: i64,
    /// API calls made this month.
    pub api_calls_this_month: i64,
    /// Remaining `messages` quota, the representative figure.
    pub quota_remaining: i64,
    /// Whether `messages` is limited at all.
    pub has_quota: bool,
    /// First instant of the period.
    pub period_start: DateTime<Utc>,
    /// Last instant of the period.
    pub period_end: DateTime<Utc>,
}

/// Usage of one resource type inside a window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Sum of quantities.
    pub total: i64,
    /// The individual records, newest first (possibly truncated).
    pub records: Vec<UsageRecord>,
}

/// Usage broken down by resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageBreakdown {
    /// Window start.
    pub period_start: DateTime<Utc>,
    /// Window end.
    pub period_end: DateTime<Utc>,
    /// Per resource type; always contains the well-known types.
    pub resources: BTreeMap<String, ResourceUsage>,
}

impl UsageBreakdown {
    /// An empty breakdown with zero entries for every well-known type.
    #[must_use]
    pub fn empty(period: BillingPeriod) -> Self {
        Self {
            period_start: period.start,
            period_end: period.end,
            resources: WELL_KNOWN_RESOURCE_TYPES
                .iter()
                .map(|t| ((*t).to_string(), ResourceUsage::default()))
                .collect(),
        }
    }

    /// Fold records (newest first) into the breakdown, keeping at most
    /// `limit` records per type while totalling all of them.
    pub fn absorb(&mut self, records: impl IntoIterator<Item = UsageRecord>, limit: usize) {
        for record in records {
            let entry = self
                .resources
                .entry(record.resource_type.clone())
                .or_default();
            entry.total = entry.total.saturating_add(record.quantity);
            if entry.records.len() < limit {
                entry.records.push(record);
            }
        }
    }
}

/// Past subscription snapshots, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingHistory {
    /// Total number of subscription rows for the user.
    pub total: usize,
    /// Up to `limit` rows, newest first.
    pub subscriptions: Vec<Subscription>,
}
