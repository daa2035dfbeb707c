//! Campaign submission: plan the batches and hand each one to the scheduler

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::planner;
use crate::prelude::*;
use batchmail_email::{BatchDispatchTask, Template};
use batchmail_types::job_adapter::{JobData, JobStatus, ListJobOptions};
use batchmail_types::utils::{batch_job_key, campaign_job_prefix};

fn default_batch_size() -> i64 {
	50
}

fn default_interval_minutes() -> i64 {
	60
}

#[derive(Clone, Debug, Deserialize)]
pub struct CampaignRequest {
	pub subject: String,
	/// Body template
	pub prompt_template: String,
	/// `YYYY-MM-DD HH:MM` (UTC) or RFC 3339. Absent means now.
	pub schedule_time: Option<String>,
	#[serde(default = "default_batch_size")]
	pub batch_size: i64,
	#[serde(default = "default_interval_minutes")]
	pub interval_minutes: i64,
}

#[derive(Debug, Serialize)]
pub struct ScheduleResponse {
	pub message: String,
	pub campaign_id: CampaignId,
	/// Recipients covered by the scheduled batches
	pub total_scheduled: usize,
	pub batches: usize,
	pub job_ids: Vec<JobId>,
}

/// Validate the request, plan the batches and schedule one durable job per batch.
///
/// Validation happens before anything is persisted. Re-submitting a campaign
/// updates its Pending batch jobs in place and cancels Pending jobs of batches
/// that no longer exist. Nothing changes while one of its batches is Running.
pub async fn schedule_campaign(
	app: &App,
	campaign_id: &CampaignId,
	req: CampaignRequest,
) -> ClResult<ScheduleResponse> {
	let template = Template::new(req.subject, req.prompt_template)?;
	let start = match req.schedule_time.as_deref().map(str::trim) {
		Some(s) if !s.is_empty() => Timestamp::parse(s)?,
		_ => Timestamp::now(),
	};

	let rows = app.recipients.rows(campaign_id).await?;
	let batches = planner::plan(rows, req.batch_size, start, req.interval_minutes)?;
	if batches.is_empty() {
		return Err(Error::InvalidParameter(format!(
			"campaign {} has no recipients to schedule",
			campaign_id
		)));
	}

	let keys: Vec<String> = batches.iter().map(|b| batch_job_key(campaign_id, b.index)).collect();
	// All or nothing: no batch is rewritten while another one is being sent
	for key in &keys {
		if let Some(job) = app.job_store.find_by_key(key).await? {
			if job.status == JobStatus::Running {
				warn!(
					campaign_id = %campaign_id, job_id = job.job_id,
					"Batch is being sent, not rescheduling"
				);
				return Err(Error::SchedulerConflict(job.job_id));
			}
		}
	}

	let total_scheduled = batches.iter().map(|b| b.len()).sum();
	let mut job_ids = Vec::with_capacity(batches.len());
	for (batch, key) in batches.into_iter().zip(&keys) {
		let fire_at = batch.fire_at;
		let task = BatchDispatchTask::new(campaign_id.clone(), template.clone(), batch);
		let job_id = app.scheduler.task(task).key(key).schedule_at(fire_at).schedule().await?;
		job_ids.push(job_id);
	}
	let keys: HashSet<String> = keys.into_iter().collect();

	let dropped = cancel_leftover_batches(app, campaign_id, &keys).await?;
	if dropped > 0 {
		info!(campaign_id = %campaign_id, "Cancelled {} batches of an earlier submission", dropped);
	}

	info!(
		campaign_id = %campaign_id,
		"Scheduled {} recipients in {} batches starting at {}", total_scheduled, job_ids.len(), start.to_iso()
	);
	Ok(ScheduleResponse {
		message: "Emails scheduled successfully".into(),
		campaign_id: campaign_id.clone(),
		total_scheduled,
		batches: job_ids.len(),
		job_ids,
	})
}

async fn cancel_leftover_batches(
	app: &App,
	campaign_id: &CampaignId,
	keys: &HashSet<String>,
) -> ClResult<usize> {
	let opts = ListJobOptions {
		key_prefix: Some(campaign_job_prefix(campaign_id).into()),
		status: Some(JobStatus::Pending),
	};
	let mut cancelled = 0;
	for job in app.job_store.list_jobs(&opts).await? {
		if job.key.as_deref().is_some_and(|k| keys.contains(k)) {
			continue;
		}
		match app.scheduler.cancel(job.job_id).await {
			Ok(()) => cancelled += 1,
			Err(Error::Conflict(_) | Error::NotFound) => {
				debug!(job_id = job.job_id, "Leftover batch no longer pending");
			}
			Err(e) => return Err(e),
		}
	}
	Ok(cancelled)
}

/// Jobs of a campaign in fire time order
pub async fn list_campaign_jobs(app: &App, campaign_id: &CampaignId) -> ClResult<Vec<JobData>> {
	let opts =
		ListJobOptions { key_prefix: Some(campaign_job_prefix(campaign_id).into()), status: None };
	let mut jobs = app.job_store.list_jobs(&opts).await?;
	jobs.sort_by_key(|j| (j.fire_at, j.job_id));
	Ok(jobs)
}

/// Cancel every Pending job of a campaign. Returns the number cancelled.
pub async fn cancel_campaign(app: &App, campaign_id: &CampaignId) -> ClResult<usize> {
	let cancelled = app.scheduler.cancel_by_prefix(&campaign_job_prefix(campaign_id)).await?;
	info!(campaign_id = %campaign_id, "Cancelled {} pending batches", cancelled);
	Ok(cancelled)
}


// vim: ts=4
