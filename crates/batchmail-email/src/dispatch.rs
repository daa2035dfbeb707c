//! Delivery dispatcher: sends one batch and records a status per recipient

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::prelude::*;
use crate::template::Template;
use batchmail_types::batch::Batch;
use batchmail_types::delivery_adapter::{DeliveryProvider, OutboundEmail};
use batchmail_types::recipient::RecipientRow;
use batchmail_types::status_adapter::{
	DeliveryStatus, LifecycleStatus, ListMessageOptions, MessageRecord, StatusStore,
};
use batchmail_types::utils::new_tracking_id;

/// Result of dispatching to one recipient
#[derive(Clone, Debug, Serialize)]
pub struct DispatchOutcome {
	pub tracking_id: Option<Box<str>>,
	pub to_email: Box<str>,
	pub status: LifecycleStatus,
	pub error: Option<Box<str>>,
	/// Recipient already had a Sent record for this batch
	pub skipped: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchSummary {
	pub sent: usize,
	pub failed: usize,
	pub skipped: usize,
}

impl DispatchSummary {
	pub fn of(outcomes: &[DispatchOutcome]) -> Self {
		let mut res = Self::default();
		for outcome in outcomes {
			if outcome.skipped {
				res.skipped += 1;
			} else if outcome.status == LifecycleStatus::Sent {
				res.sent += 1;
			} else {
				res.failed += 1;
			}
		}
		res
	}
}

#[derive(Clone, Debug)]
pub struct Dispatcher {
	provider: Arc<dyn DeliveryProvider>,
	status_store: Arc<dyn StatusStore>,
	from_email: Box<str>,
	from_name: Option<Box<str>>,
	concurrency: usize,
	timeout: Duration,
}

impl Dispatcher {
	pub fn new(
		provider: Arc<dyn DeliveryProvider>,
		status_store: Arc<dyn StatusStore>,
		from_email: impl Into<Box<str>>,
	) -> Self {
		Self {
			provider,
			status_store,
			from_email: from_email.into(),
			from_name: None,
			concurrency: 8,
			timeout: Duration::from_secs(30),
		}
	}

	pub fn from_app(app: &App) -> Self {
		Self {
			provider: app.provider.clone(),
			status_store: app.status_store.clone(),
			from_email: app.opts.sender_email.clone(),
			from_name: app.opts.sender_name.clone(),
			concurrency: app.opts.dispatch_concurrency,
			timeout: app.opts.provider_timeout,
		}
	}

	pub fn from_name(mut self, name: impl Into<Box<str>>) -> Self {
		self.from_name = Some(name.into());
		self
	}

	pub fn concurrency(mut self, concurrency: usize) -> Self {
		self.concurrency = concurrency;
		self
	}

	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	/// Send every recipient of `batch`.
	///
	/// Provider failures are isolated to the recipient's own record. Only a
	/// failure to write to the status store is returned as an error, after all
	/// recipients have been attempted.
	pub async fn dispatch(
		&self,
		campaign_id: &CampaignId,
		template: &Template,
		batch: &Batch,
	) -> ClResult<Vec<DispatchOutcome>> {
		let already_sent = self.already_sent(campaign_id, batch.index).await?;
		if !already_sent.is_empty() {
			info!(
				campaign_id = %campaign_id, batch = batch.index,
				"{} recipients already sent, skipping them", already_sent.len()
			);
		}

		let already_sent = &already_sent;
		let sends: Vec<_> = batch
			.recipients
			.iter()
			.map(|row| async move {
				if already_sent.contains(row.email()) {
					return Ok(DispatchOutcome {
						tracking_id: None,
						to_email: row.email().into(),
						status: LifecycleStatus::Sent,
						error: None,
						skipped: true,
					});
				}
				self.send_one(campaign_id, template, batch, row).await
			})
			.collect();
		let results: Vec<ClResult<DispatchOutcome>> =
			stream::iter(sends).buffer_unordered(self.concurrency.max(1)).collect().await;

		let mut outcomes = Vec::with_capacity(results.len());
		let mut store_error = None;
		for res in results {
			match res {
				Ok(outcome) => outcomes.push(outcome),
				Err(e) => {
					error!(campaign_id = %campaign_id, batch = batch.index, "Status write failed: {}", e);
					store_error.get_or_insert(e);
				}
			}
		}
		if let Some(e) = store_error {
			return Err(e);
		}
		Ok(outcomes)
	}

	async fn already_sent(
		&self,
		campaign_id: &CampaignId,
		batch_index: u32,
	) -> ClResult<HashSet<Box<str>>> {
		let opts = ListMessageOptions {
			campaign_id: Some(campaign_id.clone()),
			batch_index: Some(batch_index),
			status: Some(LifecycleStatus::Sent),
			..Default::default()
		};
		Ok(self.status_store.list_messages(&opts).await?.into_iter().map(|r| r.to_email).collect())
	}

	async fn send_one(
		&self,
		campaign_id: &CampaignId,
		template: &Template,
		batch: &Batch,
		row: &RecipientRow,
	) -> ClResult<DispatchOutcome> {
		let tracking_id = new_tracking_id();
		let (subject, html_body) = template.render_for(row);
		let email = OutboundEmail {
			from_email: self.from_email.clone(),
			from_name: self.from_name.clone(),
			to: row.email().into(),
			subject: subject.into(),
			html_body: html_body.into(),
			tracking_id: tracking_id.clone(),
		};

		let (status, provider_message_id, error) =
			match tokio::time::timeout(self.timeout, self.provider.send(&email)).await {
				Ok(Ok(res)) if res.accepted => (LifecycleStatus::Sent, res.provider_message_id, None),
				Ok(Ok(res)) => (
					LifecycleStatus::Failed,
					None,
					Some(res.error.unwrap_or_else(|| "rejected by provider".into())),
				),
				Ok(Err(e)) => (LifecycleStatus::Failed, None, Some(e.to_string().into())),
				Err(_) => (
					LifecycleStatus::Failed,
					None,
					Some(
						Error::ProviderFailure(format!(
							"no answer within {}s",
							self.timeout.as_secs_f32()
						))
						.to_string()
						.into(),
					),
				),
			};
		if let Some(err) = &error {
			warn!(
				campaign_id = %campaign_id, tracking_id = %tracking_id, to = %email.to,
				"Delivery failed: {}", err
			);
		}

		let record = MessageRecord {
			tracking_id: tracking_id.clone(),
			campaign_id: campaign_id.clone(),
			batch_index: batch.index,
			to_email: email.to.clone(),
			subject: email.subject.clone(),
			status,
			delivery_status: DeliveryStatus::Pending,
			scheduled_at: batch.fire_at,
			sent_at: (status == LifecycleStatus::Sent).then(Timestamp::now),
			provider_message_id,
			error: error.clone(),
		};
		self.status_store.create_message(&record).await?;

		Ok(DispatchOutcome {
			tracking_id: Some(tracking_id),
			to_email: email.to,
			status,
			error,
			skipped: false,
		})
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use async_trait::async_trait;
	use batchmail_core::memory::InMemoryStatusStore;
	use batchmail_types::delivery_adapter::ProviderResponse;
	use parking_lot::Mutex;

	/// Provider double: rejects listed addresses, hangs on `slow@`, records the rest
	#[derive(Debug, Default)]
	pub(crate) struct FakeProvider {
		pub reject: Vec<&'static str>,
		pub sent: Mutex<Vec<OutboundEmail>>,
	}

	#[async_trait]
	impl DeliveryProvider for FakeProvider {
		fn name(&self) -> &'static str {
			"fake"
		}

		async fn send(&self, email: &OutboundEmail) -> ClResult<ProviderResponse> {
			if email.to.starts_with("slow@") {
				tokio::time::sleep(Duration::from_secs(60)).await;
			}
			if email.to.starts_with("down@") {
				return Err(Error::ProviderFailure("connection refused".into()));
			}
			if self.reject.iter().any(|r| *r == &*email.to) {
				return Ok(ProviderResponse::rejected("HTTP 401: unauthorized"));
			}
			self.sent.lock().push(email.clone());
			Ok(ProviderResponse::accepted(Some(format!("id-{}", email.to).into())))
		}
	}

	pub(crate) fn rows(emails: &[&str]) -> Vec<RecipientRow> {
		emails
			.iter()
			.map(|e| RecipientRow::from_pairs([("email", *e), ("name", "Friend")]).unwrap())
			.collect()
	}

	fn batch(emails: &[&str]) -> Batch {
		Batch { index: 0, fire_at: Timestamp(1000), recipients: rows(emails) }
	}

	fn template() -> Template {
		Template::new("Hi {name}", "<p>Hello {name}, {missing}</p>").unwrap()
	}

	#[tokio::test]
	async fn test_failure_is_isolated_per_recipient() {
		let provider = Arc::new(FakeProvider { reject: vec!["bad@x.com"], ..Default::default() });
		let store = InMemoryStatusStore::new();
		let dispatcher = Dispatcher::new(provider.clone(), store.clone(), "from@x.com");
		let campaign = CampaignId::new("c1").unwrap();

		let outcomes = dispatcher
			.dispatch(&campaign, &template(), &batch(&["a@x.com", "bad@x.com", "down@x.com", "b@x.com"]))
			.await
			.unwrap();
		assert_eq!(outcomes.len(), 4);
		assert_eq!(DispatchSummary::of(&outcomes), DispatchSummary { sent: 2, failed: 2, skipped: 0 });

		let records = store.list_messages(&ListMessageOptions::default()).await.unwrap();
		assert_eq!(records.len(), 4);
		for r in &records {
			match r.to_email.as_ref() {
				"a@x.com" | "b@x.com" => {
					assert_eq!(r.status, LifecycleStatus::Sent);
					assert!(r.sent_at.is_some());
					assert_eq!(r.delivery_status, DeliveryStatus::Pending);
				}
				_ => {
					assert_eq!(r.status, LifecycleStatus::Failed);
					assert!(r.error.is_some());
					assert!(r.sent_at.is_none());
				}
			}
			assert_eq!(r.subject.as_ref(), "Hi Friend");
			assert_eq!(r.scheduled_at, Timestamp(1000));
		}

		let sent = provider.sent.lock();
		assert_eq!(sent[0].html_body.as_ref(), "<p>Hello Friend, {missing}</p>");
		let tracking: HashSet<_> = records.iter().map(|r| r.tracking_id.clone()).collect();
		assert_eq!(tracking.len(), 4);
	}

	#[tokio::test]
	async fn test_provider_timeout_marks_failed() {
		let provider = Arc::new(FakeProvider::default());
		let store = InMemoryStatusStore::new();
		let dispatcher = Dispatcher::new(provider, store.clone(), "from@x.com")
			.timeout(Duration::from_millis(50));
		let campaign = CampaignId::new("c1").unwrap();

		let outcomes =
			dispatcher.dispatch(&campaign, &template(), &batch(&["slow@x.com", "a@x.com"])).await.unwrap();
		let slow = outcomes.iter().find(|o| o.to_email.as_ref() == "slow@x.com").unwrap();
		assert_eq!(slow.status, LifecycleStatus::Failed);
		assert!(slow.error.as_deref().unwrap().contains("no answer"));
		let ok = outcomes.iter().find(|o| o.to_email.as_ref() == "a@x.com").unwrap();
		assert_eq!(ok.status, LifecycleStatus::Sent);
	}

	#[tokio::test]
	async fn test_redispatch_skips_sent_recipients() {
		let provider = Arc::new(FakeProvider { reject: vec!["bad@x.com"], ..Default::default() });
		let store = InMemoryStatusStore::new();
		let dispatcher = Dispatcher::new(provider.clone(), store.clone(), "from@x.com");
		let campaign = CampaignId::new("c1").unwrap();
		let b = batch(&["a@x.com", "bad@x.com"]);

		dispatcher.dispatch(&campaign, &template(), &b).await.unwrap();
		let outcomes = dispatcher.dispatch(&campaign, &template(), &b).await.unwrap();
		assert_eq!(DispatchSummary::of(&outcomes), DispatchSummary { sent: 0, failed: 1, skipped: 1 });
		assert_eq!(provider.sent.lock().len(), 1);
	}

	#[tokio::test]
	async fn test_empty_batch() {
		let dispatcher =
			Dispatcher::new(Arc::new(FakeProvider::default()), InMemoryStatusStore::new(), "f@x.com");
		let campaign = CampaignId::new("c1").unwrap();
		assert!(dispatcher.dispatch(&campaign, &template(), &batch(&[])).await.unwrap().is_empty());
	}
}

// vim: ts=4
