pub use batchmail_types::error::{ClResult, Error};
pub use batchmail_types::types::{CampaignId, JobId, Timestamp};
pub use tracing::{debug, error, info, warn};

// vim: ts=4
