//! Usage records and billing periods.
//!
//! Usage is append-only: every call to record usage produces one immutable
//! [`UsageRecord`]. Quotas are computed by summing records inside a
//! [`BillingPeriod`], never by mutating a counter.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QuotaError;
use crate::ids::{UsageRecordId, UserId};

/// Chat messages sent.
pub const MESSAGES: &str = "messages";

/// Background tasks started.
pub const BACKGROUND_TASKS: &str = "background_tasks";

/// API calls made.
pub const API_CALLS: &str = "api_calls";

/// Resource types that always appear in summaries and breakdowns.
pub const WELL_KNOWN_RESOURCE_TYPES: &[&str] = &[MESSAGES, BACKGROUND_TASKS, API_CALLS];

/// Maximum length of a resource type tag.
const MAX_RESOURCE_TYPE_LEN: usize = 64;

/// Largest quantity a single usage record may carry.
pub const MAX_QUANTITY: i64 = 1_000_000_000;

/// An inclusive time window usage is aggregated over.
///
/// Usage periods are always calendar months in UTC, independent of the
/// subscription's billing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPeriod {
    /// First instant of the period.
    pub start: DateTime<Utc>,
    /// Last instant of the period (inclusive).
    pub end: DateTime<Utc>,
}

impl BillingPeriod {
    /// The calendar month containing `instant`.
    #[must_use]
    pub fn containing(instant: DateTime<Utc>) -> Self {
        let midnight = NaiveDate::from_ymd_opt(instant.year(), instant.month(), 1)
            .and_then(|first| first.and_hms_opt(0, 0, 0))
            .unwrap_or_else(|| instant.naive_utc());
        let start = Utc.from_utc_datetime(&midnight);
        let next = start
            .checked_add_months(Months::new(1))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            start,
            // Microsecond resolution so the bound survives a Postgres round trip.
            end: next - Duration::microseconds(1),
        }
    }

    /// A custom window; `end` is inclusive.
    #[must_use]
    pub const fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Whether `instant` lies inside the window.
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }
}

/// An immutable usage fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Record ID.
    pub id: UsageRecordId,

    /// The user the usage is attributed to.
    pub user_id: UserId,

    /// Resource type tag (e.g. `"messages"`).
    pub resource_type: String,

    /// Quantity consumed, in `1..=MAX_QUANTITY`.
    pub quantity: i64,

    /// Start of the calendar month the record falls into.
    pub period_start: DateTime<Utc>,

    /// Last instant of that month.
    pub period_end: DateTime<Utc>,

    /// Free-form context supplied by the caller.
    pub metadata: serde_json::Value,

    /// When the usage was recorded.
    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    /// Build a record for usage happening at `now`.
    ///
    /// # Errors
    ///
    /// - `QuotaError::InvalidQuantity` if `quantity` is outside `1..=MAX_QUANTITY`.
    /// - `QuotaError::InvalidResourceType` if the tag is empty or too long.
    pub fn new(
        user_id: UserId,
        resource_type: impl Into<String>,
        quantity: i64,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Self, QuotaError> {
        let resource_type = resource_type.into();
        validate_resource_type(&resource_type)?;
        if !(1..=MAX_QUANTITY).contains(&quantity) {
            return Err(QuotaError::InvalidQuantity(quantity));
        }

        // Stored timestamps are microsecond precision in every backend.
        let now = now.trunc_subsecs(6);
        let period = BillingPeriod::containing(now);
        Ok(Self {
            id: UsageRecordId::generate(),
            user_id,
            resource_type,
            quantity,
            period_start: period.start,
            period_end: period.end,
            metadata,
            created_at: now,
        })
    }
}

/// Check that a resource type tag is usable as a storage and cache key.
///
/// # Errors
///
/// Returns `QuotaError::InvalidResourceType` for empty, overlong or
/// non `[a-z0-9_]` tags.
pub fn validate_resource_type(resource_type: &str) -> Result<(), QuotaError> {
    let valid = !resource_type.is_empty()
        && resource_type.len() <= MAX_RESOURCE_TYPE_LEN
        && resource_type
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(QuotaError::InvalidResourceType(resource_type.to_string()))
    }
}
