//! Webhook ingestor
//!
//! Applies provider delivery events to the status store. Events are matched to
//! records by tracking id only. An event that cannot be applied is counted and
//! logged but never fails the payload; only a payload that is not JSON at all
//! is rejected.

use serde::Serialize;
use serde_json::Value;

use crate::prelude::*;
use batchmail_types::status_adapter::{DeliveryStatus, StatusStore};

/// Outcome of one applied event
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Applied {
	pub tracking_id: Box<str>,
	pub campaign_id: Option<CampaignId>,
	pub delivery_status: DeliveryStatus,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
	pub status: &'static str,
	/// Events applied to a record
	pub processed: usize,
	/// Events for unknown tracking ids, or that the store could not apply
	pub ignored: usize,
	/// Events without a tracking id or event type
	pub invalid: usize,
	#[serde(skip)]
	pub campaigns: Vec<CampaignId>,
}

fn field<'a>(event: &'a Value, name: &str) -> Option<&'a str> {
	event.get(name).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

/// Apply one event
pub async fn ingest(store: &dyn StatusStore, event: &Value) -> ClResult<Applied> {
	if !event.is_object() {
		return Err(Error::InvalidEvent("event is not an object".into()));
	}
	let tracking_id =
		field(event, "tracking_id").ok_or_else(|| Error::InvalidEvent("missing tracking_id".into()))?;
	let event_type =
		field(event, "event").ok_or_else(|| Error::InvalidEvent("missing event type".into()))?;

	let delivery_status = DeliveryStatus::from_event(event_type);
	if !store.update_delivery_status(tracking_id, &delivery_status).await? {
		return Err(Error::UnknownTrackingId(tracking_id.into()));
	}
	let campaign_id = match store.read_message(tracking_id).await {
		Ok(record) => Some(record.campaign_id),
		Err(e) => {
			debug!(tracking_id = %tracking_id, "Cannot read back updated record: {}", e);
			None
		}
	};
	debug!(tracking_id = %tracking_id, "Delivery status set to {}", delivery_status.as_str());
	Ok(Applied { tracking_id: tracking_id.into(), campaign_id, delivery_status })
}

/// Parse a webhook payload (array of events or a single event) and apply every event
pub async fn ingest_payload(store: &dyn StatusStore, body: &[u8]) -> ClResult<IngestReport> {
	let payload: Value = serde_json::from_slice(body)
		.map_err(|e| Error::BadRequest(format!("webhook payload is not JSON: {}", e)))?;
	let events = match payload {
		Value::Array(events) => events,
		event @ Value::Object(_) => vec![event],
		_ => return Err(Error::BadRequest("webhook payload must be an array or object".into())),
	};

	let mut report = IngestReport { status: "success", ..Default::default() };
	for event in &events {
		match ingest(store, event).await {
			Ok(applied) => {
				report.processed += 1;
				if let Some(campaign_id) = applied.campaign_id {
					if !report.campaigns.contains(&campaign_id) {
						report.campaigns.push(campaign_id);
					}
				}
			}
			Err(Error::UnknownTrackingId(id)) => {
				warn!(tracking_id = %id, "Webhook event for unknown tracking id ignored");
				report.ignored += 1;
			}
			Err(Error::InvalidEvent(msg)) => {
				warn!("Invalid webhook event: {}", msg);
				report.invalid += 1;
			}
			Err(e) => {
				error!("Webhook event could not be applied: {}", e);
				report.ignored += 1;
			}
		}
	}
	info!(
		"Webhook payload: {} processed, {} ignored, {} invalid",
		report.processed, report.ignored, report.invalid
	);
	Ok(report)
}


// vim: ts=4
