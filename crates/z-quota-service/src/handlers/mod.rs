//! API handlers.

// Axum handlers take their extractors by value.
#![allow(clippy::needless_pass_by_value)]

pub mod billing;
pub mod health;
pub mod plans;
pub mod quota;
pub mod subscriptions;
pub mod usage;
pub mod users;

/// Clamp an optional page size to `1..=max`, defaulting to `default`.
pub(crate) fn page_limit(requested: Option<usize>, default: usize, max: usize) -> usize {
    requested.unwrap_or(default).clamp(1, max)
}
