//! Batchmail sends personalized email campaigns in time-staggered batches.
//!
//! # Features
//!
//! - Recipient upload (CSV or JSON), one recipient set per campaign
//! - Batch planning with a fixed batch size and interval
//! - Durable scheduling: every batch is a job that survives restarts and runs once
//! - Delivery through a SendGrid-style HTTP API or SMTP
//! - Per-message status records updated from provider webhooks
//! - Analytics, pulled or pushed live over WebSocket

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

// Re-export shared types and adapter traits from batchmail-types
pub use batchmail_types::batch;
pub use batchmail_types::delivery_adapter;
pub use batchmail_types::error;
pub use batchmail_types::job_adapter;
pub use batchmail_types::recipient;
pub use batchmail_types::status_adapter;
pub use batchmail_types::types;
pub use batchmail_types::utils;

// Feature crate re-exports
pub use batchmail_campaign as campaign;
pub use batchmail_core::analytics;
pub use batchmail_core::memory;
pub use batchmail_core::scheduler;
pub use batchmail_email as email;
pub use batchmail_webhook as webhook;

// Local modules
pub mod app;
pub mod handler;
pub mod prelude;
pub mod routes;
pub mod websocket;

pub use crate::app::{App, AppBuilder};

// vim: ts=4
