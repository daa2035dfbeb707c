//! In-memory adapters for tests and ephemeral runs. Nothing survives a restart.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::{collections::HashMap, sync::Arc};

use crate::prelude::*;
use batchmail_types::job_adapter::{JobData, JobStatus, JobStore, ListJobOptions};
use batchmail_types::recipient::{RecipientRow, RecipientSource};
use batchmail_types::status_adapter::{
	DeliveryStatus, ListMessageOptions, MessageRecord, StatusStore,
};

// InMemoryStatusStore
//*********************
/// Records are individually locked, the map lock is only held to look a record up
/// or to insert a new one.
#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
	records: RwLock<HashMap<Box<str>, Arc<Mutex<MessageRecord>>>>,
	order: Mutex<Vec<Box<str>>>,
}

impl InMemoryStatusStore {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn len(&self) -> usize {
		self.records.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.read().is_empty()
	}
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
	async fn create_message(&self, record: &MessageRecord) -> ClResult<()> {
		let mut records = self.records.write();
		if records.contains_key(&record.tracking_id) {
			return Err(Error::Conflict(format!("tracking id exists: {}", record.tracking_id)));
		}
		records.insert(record.tracking_id.clone(), Arc::new(Mutex::new(record.clone())));
		self.order.lock().push(record.tracking_id.clone());
		Ok(())
	}

	async fn update_delivery_status(
		&self,
		tracking_id: &str,
		status: &DeliveryStatus,
	) -> ClResult<bool> {
		let record = self.records.read().get(tracking_id).cloned();
		let Some(record) = record else {
			warn!(tracking_id = %tracking_id, "Delivery status update for unknown tracking id");
			return Ok(false);
		};
		record.lock().delivery_status = status.clone();
		Ok(true)
	}

	async fn read_message(&self, tracking_id: &str) -> ClResult<MessageRecord> {
		let record = self.records.read().get(tracking_id).cloned();
		record.map(|r| r.lock().clone()).ok_or(Error::NotFound)
	}

	async fn list_messages(&self, opts: &ListMessageOptions) -> ClResult<Vec<MessageRecord>> {
		let handles: Vec<Arc<Mutex<MessageRecord>>> = {
			let records = self.records.read();
			self.order.lock().iter().filter_map(|id| records.get(id).cloned()).collect()
		};
		Ok(handles
			.iter()
			.map(|r| r.lock().clone())
			.filter(|r| opts.matches(r))
			.collect())
	}
}

// InMemoryJobStore
//******************
#[derive(Debug, Default)]
struct JobTable {
	last_id: JobId,
	jobs: Vec<JobData>,
}

impl JobTable {
	fn job_mut(&mut self, job_id: JobId) -> ClResult<&mut JobData> {
		self.jobs.iter_mut().find(|j| j.job_id == job_id).ok_or(Error::NotFound)
	}
}

/// Every operation runs under one lock, which makes claims trivially atomic
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
	table: Mutex<JobTable>,
}

impl InMemoryJobStore {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}
}

fn claim_job(job: &mut JobData, worker: &str, now: Timestamp) {
	job.status = JobStatus::Running;
	job.claimed_at = Some(now);
	job.claimed_by = Some(worker.into());
	job.attempts += 1;
}

fn requeue_job(job: &mut JobData) {
	job.status = JobStatus::Pending;
	job.claimed_at = None;
	job.claimed_by = None;
}

#[async_trait]
impl JobStore for InMemoryJobStore {
	async fn schedule(
		&self,
		kind: &str,
		key: Option<&str>,
		input: &str,
		fire_at: Timestamp,
	) -> ClResult<JobId> {
		let mut table = self.table.lock();
		table.last_id += 1;
		let job_id = table.last_id;
		table.jobs.push(JobData {
			job_id,
			kind: kind.into(),
			key: key.map(Into::into),
			input: input.into(),
			status: JobStatus::Pending,
			fire_at,
			claimed_at: None,
			claimed_by: None,
			attempts: 0,
			error: None,
		});
		Ok(job_id)
	}

	async fn find_by_key(&self, key: &str) -> ClResult<Option<JobData>> {
		let table = self.table.lock();
		let mut with_key = table.jobs.iter().filter(|j| j.key.as_deref() == Some(key));
		let active = with_key.clone().find(|j| j.status.is_active());
		Ok(active.or_else(|| with_key.next_back()).cloned())
	}

	async fn reschedule(&self, job_id: JobId, input: &str, fire_at: Timestamp) -> ClResult<()> {
		let mut table = self.table.lock();
		let job = table.job_mut(job_id)?;
		if job.status != JobStatus::Pending {
			return Err(Error::Conflict(format!("job {} is not pending", job_id)));
		}
		job.input = input.into();
		job.fire_at = fire_at;
		Ok(())
	}

	async fn claim(&self, job_id: JobId, worker: &str, now: Timestamp) -> ClResult<bool> {
		let mut table = self.table.lock();
		let job = table.job_mut(job_id)?;
		if job.status != JobStatus::Pending {
			return Ok(false);
		}
		claim_job(job, worker, now);
		Ok(true)
	}

	async fn claim_due_jobs(
		&self,
		worker: &str,
		now: Timestamp,
		limit: u32,
	) -> ClResult<Vec<JobData>> {
		let mut table = self.table.lock();
		let mut due: Vec<&mut JobData> = table
			.jobs
			.iter_mut()
			.filter(|j| j.status == JobStatus::Pending && j.fire_at <= now)
			.collect();
		due.sort_by_key(|j| (j.fire_at, j.job_id));
		Ok(due
			.into_iter()
			.take(usize::try_from(limit).unwrap_or(usize::MAX))
			.map(|job| {
				claim_job(job, worker, now);
				job.clone()
			})
			.collect())
	}

	async fn mark(&self, job_id: JobId, status: JobStatus, output: Option<&str>) -> ClResult<()> {
		let mut table = self.table.lock();
		let job = table.job_mut(job_id)?;
		job.status = status;
		job.error = output.map(Into::into);
		Ok(())
	}

	async fn cancel(&self, job_id: JobId) -> ClResult<bool> {
		let mut table = self.table.lock();
		let Some(pos) = table.jobs.iter().position(|j| j.job_id == job_id) else {
			return Ok(false);
		};
		let status = table.jobs[pos].status;
		match status {
			JobStatus::Pending => {
				table.jobs.remove(pos);
				Ok(true)
			}
			_ => Err(Error::Conflict(format!("job {} is {:?}", job_id, status))),
		}
	}

	async fn requeue(&self, job_id: JobId, stale_before: Timestamp) -> ClResult<()> {
		let mut table = self.table.lock();
		let job = table.job_mut(job_id)?;
		let stale = job.status == JobStatus::Running
			&& job.claimed_at.is_none_or(|t| t < stale_before);
		if job.status == JobStatus::Failed || stale {
			requeue_job(job);
			Ok(())
		} else {
			Err(Error::Conflict(format!("job {} is {:?}", job_id, job.status)))
		}
	}

	async fn reclaim_stale(&self, older_than: Timestamp) -> ClResult<Vec<JobId>> {
		let mut table = self.table.lock();
		Ok(table
			.jobs
			.iter_mut()
			.filter(|j| {
				j.status == JobStatus::Running && j.claimed_at.is_none_or(|t| t < older_than)
			})
			.map(|job| {
				requeue_job(job);
				job.job_id
			})
			.collect())
	}

	async fn read_job(&self, job_id: JobId) -> ClResult<JobData> {
		let table = self.table.lock();
		table.jobs.iter().find(|j| j.job_id == job_id).cloned().ok_or(Error::NotFound)
	}

	async fn list_jobs(&self, opts: &ListJobOptions) -> ClResult<Vec<JobData>> {
		let table = self.table.lock();
		Ok(table.jobs.iter().filter(|j| opts.matches(j)).cloned().collect())
	}

	async fn next_fire_at(&self) -> ClResult<Option<Timestamp>> {
		let table = self.table.lock();
		Ok(table
			.jobs
			.iter()
			.filter(|j| j.status == JobStatus::Pending)
			.map(|j| j.fire_at)
			.min())
	}
}

// InMemoryRecipientSource
//*************************
#[derive(Debug, Default)]
pub struct InMemoryRecipientSource {
	campaigns: RwLock<HashMap<CampaignId, (Vec<Box<str>>, Vec<RecipientRow>)>>,
}

impl InMemoryRecipientSource {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}
}

#[async_trait]
impl RecipientSource for InMemoryRecipientSource {
	async fn store_recipients(
		&self,
		campaign_id: &CampaignId,
		fields: &[Box<str>],
		rows: &[RecipientRow],
	) -> ClResult<()> {
		if rows.is_empty() {
			return Err(Error::InvalidParameter("recipient list is empty".into()));
		}
		self.campaigns.write().insert(campaign_id.clone(), (fields.to_vec(), rows.to_vec()));
		Ok(())
	}

	async fn rows(&self, campaign_id: &CampaignId) -> ClResult<Vec<RecipientRow>> {
		Ok(self.campaigns.read().get(campaign_id).map(|(_, rows)| rows.clone()).unwrap_or_default())
	}

	async fn fields(&self, campaign_id: &CampaignId) -> ClResult<Vec<Box<str>>> {
		Ok(self
			.campaigns
			.read()
			.get(campaign_id)
			.map(|(fields, _)| fields.clone())
			.unwrap_or_default())
	}
}


// vim: ts=4
