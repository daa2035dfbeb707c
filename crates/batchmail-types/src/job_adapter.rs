//! Durable job store adapter. Backs the job scheduler.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
	Pending,
	Running,
	Done,
	Failed,
}

impl JobStatus {
	/// Single character code used by persistent stores
	pub fn as_char(self) -> char {
		match self {
			JobStatus::Pending => 'P',
			JobStatus::Running => 'R',
			JobStatus::Done => 'D',
			JobStatus::Failed => 'F',
		}
	}

	pub fn from_char(c: char) -> ClResult<Self> {
		match c {
			'P' => Ok(JobStatus::Pending),
			'R' => Ok(JobStatus::Running),
			'D' => Ok(JobStatus::Done),
			'F' => Ok(JobStatus::Failed),
			_ => Err(Error::Parse),
		}
	}

	pub fn is_active(self) -> bool {
		matches!(self, JobStatus::Pending | JobStatus::Running)
	}
}

#[derive(Clone, Debug, Serialize)]
pub struct JobData {
	pub job_id: JobId,
	pub kind: Box<str>,
	pub key: Option<Box<str>>,
	#[serde(skip)]
	pub input: Box<str>,
	pub status: JobStatus,
	pub fire_at: Timestamp,
	pub claimed_at: Option<Timestamp>,
	pub claimed_by: Option<Box<str>>,
	pub attempts: u32,
	pub error: Option<Box<str>>,
}

#[derive(Clone, Debug, Default)]
pub struct ListJobOptions {
	pub key_prefix: Option<Box<str>>,
	pub status: Option<JobStatus>,
}

impl ListJobOptions {
	pub fn matches(&self, job: &JobData) -> bool {
		self.key_prefix
			.as_deref()
			.is_none_or(|p| job.key.as_deref().is_some_and(|k| k.starts_with(p)))
			&& self.status.is_none_or(|s| s == job.status)
	}
}

#[async_trait]
pub trait JobStore: Debug + Send + Sync {
	/// Persist a new Pending job
	async fn schedule(
		&self,
		kind: &str,
		key: Option<&str>,
		input: &str,
		fire_at: Timestamp,
	) -> ClResult<JobId>;

	/// The job carrying `key`: the active (Pending or Running) one if any,
	/// otherwise the most recently created finished one
	async fn find_by_key(&self, key: &str) -> ClResult<Option<JobData>>;

	/// Replace input and fire time of a Pending job. `Conflict` if it is no longer Pending.
	async fn reschedule(&self, job_id: JobId, input: &str, fire_at: Timestamp) -> ClResult<()>;

	/// Atomically move one Pending job to Running. Returns `false` when it was not Pending.
	async fn claim(&self, job_id: JobId, worker: &str, now: Timestamp) -> ClResult<bool>;

	/// Atomically claim up to `limit` due Pending jobs, earliest fire time first.
	/// A job is never returned to two callers.
	async fn claim_due_jobs(
		&self,
		worker: &str,
		now: Timestamp,
		limit: u32,
	) -> ClResult<Vec<JobData>>;

	/// Final transition of a Running job. `output` is the error text for `Failed`.
	async fn mark(&self, job_id: JobId, status: JobStatus, output: Option<&str>) -> ClResult<()>;

	/// Remove a Pending job. Returns `false` for an unknown id, `Conflict` when it
	/// is not Pending any more.
	async fn cancel(&self, job_id: JobId) -> ClResult<bool>;

	/// Put a Failed job, or a Running job claimed before `stale_before`, back to Pending.
	async fn requeue(&self, job_id: JobId, stale_before: Timestamp) -> ClResult<()>;

	/// Requeue every Running job claimed before `older_than`
	async fn reclaim_stale(&self, older_than: Timestamp) -> ClResult<Vec<JobId>>;

	async fn read_job(&self, job_id: JobId) -> ClResult<JobData>;

	async fn list_jobs(&self, opts: &ListJobOptions) -> ClResult<Vec<JobData>>;

	/// Earliest fire time among Pending jobs
	async fn next_fire_at(&self) -> ClResult<Option<Timestamp>>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_status_char_round_trip() {
		for s in [JobStatus::Pending, JobStatus::Running, JobStatus::Done, JobStatus::Failed] {
			assert_eq!(JobStatus::from_char(s.as_char()).unwrap(), s);
		}
		assert!(JobStatus::from_char('X').is_err());
	}

	#[test]
	fn test_list_options_prefix() {
		let job = JobData {
			job_id: 1,
			kind: "k".into(),
			key: Some("campaign:a:batch:0".into()),
			input: "{}".into(),
			status: JobStatus::Pending,
			fire_at: Timestamp(0),
			claimed_at: None,
			claimed_by: None,
			attempts: 0,
			error: None,
		};
		let opts = ListJobOptions { key_prefix: Some("campaign:a:".into()), status: None };
		assert!(opts.matches(&job));
		let opts = ListJobOptions { key_prefix: Some("campaign:b:".into()), status: None };
		assert!(!opts.matches(&job));
		let opts = ListJobOptions { key_prefix: None, status: Some(JobStatus::Done) };
		assert!(!opts.matches(&job));
	}
}

// vim: ts=4
