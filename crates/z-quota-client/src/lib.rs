//! Z-Quota Client SDK.
//!
//! This crate provides a client library for services to interact with the z-quota API
//! on behalf of a user: subscriptions, usage recording and quota checks.
//!
//! # Example
//!
//! ```no_run
//! use z_quota_client::{RecordUsage, ZQuotaClient};
//! use z_quota_core::UserId;
//!
//! # async fn example() -> Result<(), z_quota_client::ClientError> {
//! let client = ZQuotaClient::new("http://z-quota.billing-system.svc:8080")?;
//! let user: UserId = "550e8400-e29b-41d4-a716-446655440000".parse().unwrap();
//!
//! let quota = client.check_quota(&user, "messages").await?;
//! if quota.allows_more() {
//!     client.record_usage(&user, &RecordUsage::new("messages", 1)).await?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{ClientOptions, ZQuotaClient};
pub use error::ClientError;
pub use types::*;
