//! Shared types, adapter traits, and core utilities for Batchmail.
//!
//! This crate holds the foundational types shared by the feature crates and
//! every adapter implementation, so adapters compile without pulling in the
//! scheduler or the HTTP surface.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod batch;
pub mod delivery_adapter;
pub mod error;
pub mod job_adapter;
pub mod prelude;
pub mod recipient;
pub mod status_adapter;
pub mod types;
pub mod utils;

// vim: ts=4
