//! Scheduler task dispatching one campaign batch
//!
//! The job input carries the batch rows and the template, so a batch can be
//! executed by any worker sharing the job store, also after a restart.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::dispatch::{DispatchSummary, Dispatcher};
use crate::prelude::*;
use crate::template::Template;
use batchmail_core::analytics;
use batchmail_core::scheduler::Task;
use batchmail_types::batch::Batch;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDispatchTask {
	pub campaign_id: CampaignId,
	pub template: Template,
	pub batch: Batch,
}

impl BatchDispatchTask {
	pub fn new(campaign_id: CampaignId, template: Template, batch: Batch) -> Arc<Self> {
		Arc::new(Self { campaign_id, template, batch })
	}
}

#[async_trait]
impl Task<App> for BatchDispatchTask {
	fn kind() -> &'static str {
		"campaign.dispatch_batch"
	}

	fn kind_of(&self) -> &'static str {
		Self::kind()
	}

	fn build(_id: JobId, context: &str) -> ClResult<Arc<dyn Task<App>>> {
		let task: BatchDispatchTask = serde_json::from_str(context).map_err(|e| {
			Error::Internal(format!("Failed to deserialize batch dispatch task: {}", e))
		})?;
		Ok(Arc::new(task))
	}

	fn serialize(&self) -> String {
		serde_json::to_string(self).unwrap_or_else(|e| {
			error!("Failed to serialize BatchDispatchTask: {}", e);
			"{}".to_string()
		})
	}

	async fn run(&self, app: &App) -> ClResult<()> {
		info!(
			campaign_id = %self.campaign_id, batch = self.batch.index,
			"Dispatching batch of {} recipients", self.batch.len()
		);
		let outcomes =
			Dispatcher::from_app(app).dispatch(&self.campaign_id, &self.template, &self.batch).await?;
		let summary = DispatchSummary::of(&outcomes);
		info!(
			campaign_id = %self.campaign_id, batch = self.batch.index,
			"Batch done: {} sent, {} failed, {} skipped", summary.sent, summary.failed, summary.skipped
		);

		analytics::publish_refresh(
			app.status_store.as_ref(),
			app.job_store.as_ref(),
			&app.broadcast,
			std::slice::from_ref(&self.campaign_id),
		)
		.await;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::dispatch::tests::rows;

	#[test]
	fn test_task_context_round_trip() {
		let task = BatchDispatchTask {
			campaign_id: CampaignId::new("spring").unwrap(),
			template: Template::new("Hi {name}", "<p>{name}</p>").unwrap(),
			batch: Batch { index: 2, fire_at: Timestamp(7200), recipients: rows(&["a@x.com"]) },
		};
		let context = Task::<App>::serialize(&task);
		let built = BatchDispatchTask::build(1, &context).unwrap();
		assert_eq!(built.kind_of(), "campaign.dispatch_batch");
		assert_eq!(built.serialize(), context);
	}

	#[tokio::test]
	async fn test_task_future_is_send() {
		fn assert_send<T: Send>(_: &T) {}
		let dispatcher = Dispatcher::new(
			std::sync::Arc::new(crate::dispatch::tests::FakeProvider::default()),
			batchmail_core::memory::InMemoryStatusStore::new(),
			"f@x.com",
		);
		let campaign = CampaignId::new("c").unwrap();
		let template = Template::new("Hi", "<p>Hi</p>").unwrap();
		let batch = Batch { index: 0, fire_at: Timestamp(0), recipients: rows(&["a@x.com"]) };
		let fut = dispatcher.dispatch(&campaign, &template, &batch);
		assert_send(&fut);
		assert_eq!(fut.await.unwrap().len(), 1);
	}

	#[test]
	fn test_build_rejects_garbage() {
		assert!(BatchDispatchTask::build(1, "not json").is_err());
	}
}

// vim: ts=4
