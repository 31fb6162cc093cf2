//! Z-Quota HTTP API Service.
//!
//! This crate provides the HTTP API for the z-quota engine, including:
//!
//! - The plan catalog
//! - Subscription lifecycle (create, update, cancel, history)
//! - Usage recording, quota checks and usage reports
//! - Per-caller rate limiting
//! - Health reporting over the store and the cache
//!
//! # Identity
//!
//! Authentication happens upstream. The identity layer forwards the
//! authenticated user id in the `x-user-id` header, which the [`Caller`]
//! extractor reads.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers are async for the router

pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod middleware;
pub mod routes;
pub mod state;

pub use audit::{AuditAction, AuditEvent, AuditSink, TracingAuditSink};
pub use config::ServiceConfig;
pub use engine::{EngineError, HealthReport, HealthStatus, QuotaEngine};
pub use error::ApiError;
pub use identity::Caller;
pub use routes::create_router;
pub use state::AppState;
