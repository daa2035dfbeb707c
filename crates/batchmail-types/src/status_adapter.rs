//! Status store adapter: persists one record per dispatched message.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::prelude::*;

/// Dispatch-side outcome of a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
	Scheduled,
	Sent,
	Failed,
}

impl LifecycleStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			LifecycleStatus::Scheduled => "scheduled",
			LifecycleStatus::Sent => "sent",
			LifecycleStatus::Failed => "failed",
		}
	}

	pub fn parse(s: &str) -> ClResult<Self> {
		match s {
			"scheduled" => Ok(LifecycleStatus::Scheduled),
			"sent" => Ok(LifecycleStatus::Sent),
			"failed" => Ok(LifecycleStatus::Failed),
			_ => Err(Error::Parse),
		}
	}
}

/// Provider-reported post-send outcome. Unrecognised event types are kept verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeliveryStatus {
	Pending,
	Delivered,
	Opened,
	Bounced,
	Dropped,
	Other(Box<str>),
}

impl DeliveryStatus {
	pub fn as_str(&self) -> &str {
		match self {
			DeliveryStatus::Pending => "pending",
			DeliveryStatus::Delivered => "delivered",
			DeliveryStatus::Opened => "opened",
			DeliveryStatus::Bounced => "bounced",
			DeliveryStatus::Dropped => "dropped",
			DeliveryStatus::Other(s) => s,
		}
	}

	/// Map a provider event name. Provider spellings (`open`, `bounce`) are folded
	/// onto the known states, everything else is stored as-is.
	pub fn from_event(event: &str) -> Self {
		match event.trim().to_ascii_lowercase().as_str() {
			"pending" => DeliveryStatus::Pending,
			"delivered" => DeliveryStatus::Delivered,
			"open" | "opened" => DeliveryStatus::Opened,
			"bounce" | "bounced" => DeliveryStatus::Bounced,
			"dropped" => DeliveryStatus::Dropped,
			_ => DeliveryStatus::Other(event.into()),
		}
	}
}

impl From<String> for DeliveryStatus {
	fn from(s: String) -> Self {
		Self::from_event(&s)
	}
}

impl From<DeliveryStatus> for String {
	fn from(status: DeliveryStatus) -> Self {
		status.as_str().to_string()
	}
}

/// The audit record of one dispatched message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageRecord {
	pub tracking_id: Box<str>,
	pub campaign_id: CampaignId,
	pub batch_index: u32,
	pub to_email: Box<str>,
	pub subject: Box<str>,
	pub status: LifecycleStatus,
	pub delivery_status: DeliveryStatus,
	pub scheduled_at: Timestamp,
	pub sent_at: Option<Timestamp>,
	pub provider_message_id: Option<Box<str>>,
	pub error: Option<Box<str>>,
}

/// Server-side filter for listing records. `None` fields match everything.
#[derive(Clone, Debug, Default)]
pub struct ListMessageOptions {
	pub campaign_id: Option<CampaignId>,
	pub batch_index: Option<u32>,
	pub status: Option<LifecycleStatus>,
	pub delivery_status: Option<DeliveryStatus>,
	pub to_email: Option<Box<str>>,
}

impl ListMessageOptions {
	pub fn campaign(campaign_id: &CampaignId) -> Self {
		Self { campaign_id: Some(campaign_id.clone()), ..Default::default() }
	}

	pub fn matches(&self, record: &MessageRecord) -> bool {
		self.campaign_id.as_ref().is_none_or(|c| *c == record.campaign_id)
			&& self.batch_index.is_none_or(|b| b == record.batch_index)
			&& self.status.is_none_or(|s| s == record.status)
			&& self.delivery_status.as_ref().is_none_or(|d| *d == record.delivery_status)
			&& self.to_email.as_deref().is_none_or(|e| e == record.to_email.as_ref())
	}
}

pub type RecordPredicate<'a> = &'a (dyn Fn(&MessageRecord) -> bool + Send + Sync);

#[async_trait]
pub trait StatusStore: Debug + Send + Sync {
	/// Append a new record. A duplicate tracking id is a `Conflict`.
	async fn create_message(&self, record: &MessageRecord) -> ClResult<()>;

	/// Set the delivery status of an existing record.
	///
	/// Returns `false` (and logs a warning) when the tracking id is unknown; the
	/// store is left untouched in that case.
	async fn update_delivery_status(
		&self,
		tracking_id: &str,
		status: &DeliveryStatus,
	) -> ClResult<bool>;

	async fn read_message(&self, tracking_id: &str) -> ClResult<MessageRecord>;

	async fn list_messages(&self, opts: &ListMessageOptions) -> ClResult<Vec<MessageRecord>>;

	/// List with an arbitrary predicate applied after the server-side filter
	async fn list_messages_by(
		&self,
		opts: &ListMessageOptions,
		predicate: RecordPredicate<'_>,
	) -> ClResult<Vec<MessageRecord>> {
		let mut records = self.list_messages(opts).await?;
		records.retain(|r| predicate(r));
		Ok(records)
	}
}


// vim: ts=4
