//! SQLite-backed store for Batchmail.
//!
//! One database file holds the message status records, the durable job table
//! and the uploaded recipients. Everything survives a restart, and job claims
//! are atomic across processes sharing the file.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

mod job;
mod message;
mod recipient;
mod schema;
mod utils;

use async_trait::async_trait;
use sqlx::sqlite::{self, SqlitePool};
use std::path::Path;

use batchmail_types::job_adapter::{JobData, JobStatus, JobStore, ListJobOptions};
use batchmail_types::prelude::*;
use batchmail_types::recipient::{RecipientRow, RecipientSource};
use batchmail_types::status_adapter::{
	DeliveryStatus, ListMessageOptions, MessageRecord, StatusStore,
};

use crate::utils::inspect;

#[derive(Debug)]
pub struct StoreAdapterSqlite {
	db: SqlitePool,
}

impl StoreAdapterSqlite {
	/// Open (or create) the database file at `path`
	pub async fn new(path: impl AsRef<Path>) -> ClResult<Self> {
		let opts = sqlite::SqliteConnectOptions::new()
			.filename(path.as_ref())
			.create_if_missing(true)
			.journal_mode(sqlite::SqliteJournalMode::Wal);
		let db = sqlite::SqlitePoolOptions::new()
			.max_connections(5)
			.connect_with(opts)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;

		schema::init_db(&db).await.inspect_err(inspect).map_err(|_| Error::DbError)?;
		info!("Store database opened at {}", path.as_ref().display());

		Ok(Self { db })
	}

	/// Close all pooled connections
	pub async fn close(&self) {
		self.db.close().await;
	}
}

#[async_trait]
impl StatusStore for StoreAdapterSqlite {
	async fn create_message(&self, record: &MessageRecord) -> ClResult<()> {
		message::create(&self.db, record).await
	}

	async fn update_delivery_status(
		&self,
		tracking_id: &str,
		status: &DeliveryStatus,
	) -> ClResult<bool> {
		message::update_delivery_status(&self.db, tracking_id, status).await
	}

	async fn read_message(&self, tracking_id: &str) -> ClResult<MessageRecord> {
		message::read(&self.db, tracking_id).await
	}

	async fn list_messages(&self, opts: &ListMessageOptions) -> ClResult<Vec<MessageRecord>> {
		message::list(&self.db, opts).await
	}
}

#[async_trait]
impl JobStore for StoreAdapterSqlite {
	async fn schedule(
		&self,
		kind: &str,
		key: Option<&str>,
		input: &str,
		fire_at: Timestamp,
	) -> ClResult<JobId> {
		job::schedule(&self.db, kind, key, input, fire_at).await
	}

	async fn find_by_key(&self, key: &str) -> ClResult<Option<JobData>> {
		job::find_by_key(&self.db, key).await
	}

	async fn reschedule(&self, job_id: JobId, input: &str, fire_at: Timestamp) -> ClResult<()> {
		job::reschedule(&self.db, job_id, input, fire_at).await
	}

	async fn claim(&self, job_id: JobId, worker: &str, now: Timestamp) -> ClResult<bool> {
		job::claim(&self.db, job_id, worker, now).await
	}

	async fn claim_due_jobs(
		&self,
		worker: &str,
		now: Timestamp,
		limit: u32,
	) -> ClResult<Vec<JobData>> {
		job::claim_due(&self.db, worker, now, limit).await
	}

	async fn mark(&self, job_id: JobId, status: JobStatus, output: Option<&str>) -> ClResult<()> {
		job::mark(&self.db, job_id, status, output).await
	}

	async fn cancel(&self, job_id: JobId) -> ClResult<bool> {
		job::cancel(&self.db, job_id).await
	}

	async fn requeue(&self, job_id: JobId, stale_before: Timestamp) -> ClResult<()> {
		job::requeue(&self.db, job_id, stale_before).await
	}

	async fn reclaim_stale(&self, older_than: Timestamp) -> ClResult<Vec<JobId>> {
		job::reclaim_stale(&self.db, older_than).await
	}

	async fn read_job(&self, job_id: JobId) -> ClResult<JobData> {
		job::read(&self.db, job_id).await
	}

	async fn list_jobs(&self, opts: &ListJobOptions) -> ClResult<Vec<JobData>> {
		job::list(&self.db, opts).await
	}

	async fn next_fire_at(&self) -> ClResult<Option<Timestamp>> {
		job::next_fire_at(&self.db).await
	}
}

#[async_trait]
impl RecipientSource for StoreAdapterSqlite {
	async fn store_recipients(
		&self,
		campaign_id: &CampaignId,
		fields: &[Box<str>],
		rows: &[RecipientRow],
	) -> ClResult<()> {
		recipient::store(&self.db, campaign_id, fields, rows).await
	}

	async fn rows(&self, campaign_id: &CampaignId) -> ClResult<Vec<RecipientRow>> {
		recipient::rows(&self.db, campaign_id, None).await
	}

	async fn fields(&self, campaign_id: &CampaignId) -> ClResult<Vec<Box<str>>> {
		recipient::fields(&self.db, campaign_id).await
	}

	async fn preview(&self, campaign_id: &CampaignId, limit: usize) -> ClResult<Vec<RecipientRow>> {
		recipient::rows(&self.db, campaign_id, Some(limit)).await
	}
}

// vim: ts=4
