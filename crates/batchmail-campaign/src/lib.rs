//! Campaigns: recipient upload, batch planning and scheduling.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod handler;
pub mod planner;
pub mod recipients;
pub mod submit;

mod prelude;

pub use planner::plan;
pub use submit::{CampaignRequest, ScheduleResponse, schedule_campaign};


// vim: ts=4
