//! Provider webhook ingestion.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod handler;
pub mod ingest;

mod prelude;

pub use ingest::{IngestReport, ingest, ingest_payload};

// vim: ts=4
