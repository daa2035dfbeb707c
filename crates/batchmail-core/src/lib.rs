//! Core infrastructure for Batchmail.
//!
//! Holds the pieces shared by the feature crates: the durable job scheduler,
//! the analytics projection and its live subscriber registry, in-memory
//! adapters and the application state.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod analytics;
pub mod app;
pub mod memory;
pub mod prelude;
pub mod scheduler;
pub mod ws_broadcast;

// Re-export commonly used types
pub use app::{App, AppBuilderOpts, AppState};
pub use ws_broadcast::BroadcastManager;

// vim: ts=4
