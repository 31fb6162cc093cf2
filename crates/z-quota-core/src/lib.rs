//! Core types and utilities for z-quota.
//!
//! This crate provides the foundational types used throughout the quota engine:
//!
//! - **Identifiers**: `UserId`, `SubscriptionId`, `UsageRecordId`
//! - **Plans**: `PlanDefinition` and the static plan catalog
//! - **Subscriptions**: `Subscription`, `SubscriptionStatus`, `BillingCycle`
//! - **Usage**: `UsageRecord`, `BillingPeriod`
//! - **Quota**: `QuotaInfo`, `UsageSummary`, `UsageBreakdown`
//!
//! # Money
//!
//! Prices are stored as `i64` minor currency units (cents) next to an ISO
//! currency code, never as floating point.
//!
//! # Unlimited limits
//!
//! A plan limit of [`UNLIMITED`] (`-1`) means the resource has no finite quota.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod clock;
pub mod error;
pub mod ids;
pub mod plans;
pub mod quota;
pub mod subscription;
pub mod usage;
pub mod user;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{QuotaError, Result};
pub use ids::{IdError, SubscriptionId, UsageRecordId, UserId};
pub use plans::{
    free_plan, get_plan, is_valid_plan, known_resource_types, list_plans, PlanDefinition,
    PlanPricing, FREE_PLAN_ID, UNLIMITED,
};
pub use quota::{BillingHistory, QuotaInfo, ResourceUsage, UsageBreakdown, UsageSummary};
pub use subscription::{BillingCycle, Price, Subscription, SubscriptionStatus};
pub use usage::{
    validate_resource_type, BillingPeriod, UsageRecord, API_CALLS, BACKGROUND_TASKS, MAX_QUANTITY,
    MESSAGES, WELL_KNOWN_RESOURCE_TYPES,
};
pub use user::User;
