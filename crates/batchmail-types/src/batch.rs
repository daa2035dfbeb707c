//! Batch definition shared by the planner and the dispatcher

use serde::{Deserialize, Serialize};

use crate::recipient::RecipientRow;
use crate::types::Timestamp;

/// A time-staggered subset of a campaign's recipients dispatched together
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
	/// Sequence index within the campaign, 0-based
	pub index: u32,
	/// Assigned send time
	pub fire_at: Timestamp,
	pub recipients: Vec<RecipientRow>,
}

impl Batch {
	pub fn len(&self) -> usize {
		self.recipients.len()
	}

	pub fn is_empty(&self) -> bool {
		self.recipients.is_empty()
	}
}

// vim: ts=4
