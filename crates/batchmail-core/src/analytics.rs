//! Analytics projection over the status store
//!
//! Message records only exist once a batch has been dispatched. Recipients of
//! batches still waiting in the job store are counted as `scheduled`.

use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::prelude::*;
use crate::ws_broadcast::{BroadcastManager, BroadcastMessage};
use batchmail_types::job_adapter::{JobStatus, JobStore, ListJobOptions};
use batchmail_types::status_adapter::{
	DeliveryStatus, LifecycleStatus, ListMessageOptions, MessageRecord, StatusStore,
};
use batchmail_types::utils::campaign_job_prefix;

/// Key prefix of every campaign batch job
const BATCH_JOB_PREFIX: &str = "campaign:";

/// Which records an analytics view covers
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AnalyticsScope {
	All,
	Campaign(CampaignId),
}

impl AnalyticsScope {
	pub fn from_option(campaign_id: Option<CampaignId>) -> Self {
		campaign_id.map_or(AnalyticsScope::All, AnalyticsScope::Campaign)
	}

	pub fn list_options(&self) -> ListMessageOptions {
		match self {
			AnalyticsScope::All => ListMessageOptions::default(),
			AnalyticsScope::Campaign(id) => ListMessageOptions::campaign(id),
		}
	}

	fn job_options(&self) -> ListJobOptions {
		let key_prefix = match self {
			AnalyticsScope::All => BATCH_JOB_PREFIX.into(),
			AnalyticsScope::Campaign(id) => campaign_job_prefix(id).into(),
		};
		ListJobOptions { key_prefix: Some(key_prefix), status: Some(JobStatus::Pending) }
	}

	/// Whether a record of `campaign_id` contributes to this scope
	pub fn covers(&self, campaign_id: &CampaignId) -> bool {
		match self {
			AnalyticsScope::All => true,
			AnalyticsScope::Campaign(id) => id == campaign_id,
		}
	}
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScheduledBreakdown {
	pub past: u64,
	pub upcoming: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Analytics {
	pub total: u64,
	pub status_breakdown: BTreeMap<String, u64>,
	pub delivery_breakdown: BTreeMap<String, u64>,
	pub scheduled_breakdown: ScheduledBreakdown,
}

/// A batch job that has not been dispatched yet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingBatch {
	pub fire_at: Timestamp,
	pub recipients: u64,
}

#[derive(Deserialize)]
struct BatchInput {
	batch: BatchRecipients,
}

#[derive(Deserialize)]
struct BatchRecipients {
	recipients: Vec<IgnoredAny>,
}

impl Analytics {
	fn count(
		&mut self,
		status: LifecycleStatus,
		delivery: &DeliveryStatus,
		at: Timestamp,
		now: Timestamp,
		n: u64,
	) {
		self.total += n;
		*self.status_breakdown.entry(status.as_str().to_string()).or_default() += n;
		*self.delivery_breakdown.entry(delivery.as_str().to_string()).or_default() += n;
		if at <= now {
			self.scheduled_breakdown.past += n;
		} else {
			self.scheduled_breakdown.upcoming += n;
		}
	}
}

/// Aggregate `records` and the recipients of `pending` batches against `now`
pub fn compute<'a>(
	records: impl IntoIterator<Item = &'a MessageRecord>,
	pending: &[PendingBatch],
	now: Timestamp,
) -> Analytics {
	let mut res = Analytics::default();
	for record in records {
		res.count(record.status, &record.delivery_status, record.scheduled_at, now, 1);
	}
	for batch in pending {
		res.count(
			LifecycleStatus::Scheduled,
			&DeliveryStatus::Pending,
			batch.fire_at,
			now,
			batch.recipients,
		);
	}
	res
}

/// Pending batch jobs in `scope` that have never been attempted.
///
/// A requeued job already has records for the recipients it reached.
pub async fn pending_batches(
	store: &dyn JobStore,
	scope: &AnalyticsScope,
) -> ClResult<Vec<PendingBatch>> {
	let mut res = Vec::new();
	for job in store.list_jobs(&scope.job_options()).await? {
		if job.attempts > 0 {
			continue;
		}
		match serde_json::from_str::<BatchInput>(&job.input) {
			Ok(input) => res.push(PendingBatch {
				fire_at: job.fire_at,
				recipients: u64::try_from(input.batch.recipients.len()).unwrap_or(u64::MAX),
			}),
			Err(e) => debug!(job_id = job.job_id, "Not a batch job: {}", e),
		}
	}
	Ok(res)
}

/// Scan the status store and the pending batch jobs and aggregate
pub async fn collect(
	status_store: &dyn StatusStore,
	job_store: &dyn JobStore,
	scope: &AnalyticsScope,
	now: Timestamp,
) -> ClResult<Analytics> {
	let records = status_store.list_messages(&scope.list_options()).await?;
	let pending = pending_batches(job_store, scope).await?;
	Ok(compute(&records, &pending, now))
}

/// Push a fresh snapshot to every subscribed scope touched by `campaigns`.
///
/// Returns the number of subscribers the snapshot was queued for. Snapshot
/// failures are logged and skipped.
pub async fn publish_refresh(
	status_store: &dyn StatusStore,
	job_store: &dyn JobStore,
	broadcast: &BroadcastManager,
	campaigns: &[CampaignId],
) -> usize {
	let now = Timestamp::now();
	let mut delivered = 0;
	for scope in broadcast.scopes().await {
		if !campaigns.iter().any(|c| scope.covers(c)) {
			continue;
		}
		let analytics = match collect(status_store, job_store, &scope, now).await {
			Ok(analytics) => analytics,
			Err(e) => {
				warn!("Analytics snapshot failed: {}", e);
				continue;
			}
		};
		match serde_json::to_value(&analytics) {
			Ok(data) => {
				delivered +=
					broadcast.publish(&scope, BroadcastMessage::new("analytics", data)).await.delivered;
			}
			Err(e) => warn!("Analytics serialization failed: {}", e),
		}
	}
	delivered
}


// vim: ts=4
