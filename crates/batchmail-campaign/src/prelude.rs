pub use batchmail_core::App;
pub use batchmail_types::error::{ClResult, Error};
pub use batchmail_types::types::{CampaignId, JobId, Timestamp};
pub use tracing::{debug, info, warn};

// vim: ts=4
