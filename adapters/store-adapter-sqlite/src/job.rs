//! Durable job persistence
//!
//! Every state transition is a single conditional UPDATE, so a job moves from
//! Pending to Running for exactly one caller even with several processes
//! sharing the database file.

use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use batchmail_types::job_adapter::{JobData, JobStatus, ListJobOptions};
use batchmail_types::prelude::*;

use crate::utils::*;

const COLUMNS: &str =
	"job_id, kind, key, input, status, fire_at, claimed_at, claimed_by, attempts, error";

fn from_row(row: &SqliteRow) -> Result<JobData, sqlx::Error> {
	let job_id: i64 = row.try_get("job_id")?;
	let status: &str = row.try_get("status")?;
	Ok(JobData {
		job_id: JobId::try_from(job_id).map_err(decode_err)?,
		kind: row.try_get("kind")?,
		key: row.try_get("key")?,
		input: row.try_get("input")?,
		status: JobStatus::from_char(status.chars().next().unwrap_or('E')).map_err(decode_err)?,
		fire_at: row.try_get("fire_at").map(Timestamp)?,
		claimed_at: row.try_get::<Option<i64>, _>("claimed_at")?.map(Timestamp),
		claimed_by: row.try_get("claimed_by")?,
		attempts: row.try_get("attempts")?,
		error: row.try_get("error")?,
	})
}

fn status_str(status: JobStatus) -> String {
	status.as_char().to_string()
}

/// Status of an existing job, `None` for an unknown id
async fn read_status(db: &SqlitePool, job_id: i64) -> ClResult<Option<JobStatus>> {
	let res = sqlx::query("SELECT status FROM jobs WHERE job_id=?")
		.bind(job_id)
		.fetch_optional(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	match res {
		Some(row) => {
			let status: &str = row.try_get("status").map_err(|_| Error::DbError)?;
			Ok(Some(JobStatus::from_char(status.chars().next().unwrap_or('E'))?))
		}
		None => Ok(None),
	}
}

/// Explain why a conditional update touched no row
async fn no_row_error(db: &SqlitePool, job_id: i64, action: &str) -> Error {
	match read_status(db, job_id).await {
		Ok(Some(status)) => Error::Conflict(format!("cannot {} job {}: {:?}", action, job_id, status)),
		Ok(None) => Error::NotFound,
		Err(err) => err,
	}
}

pub(crate) async fn schedule(
	db: &SqlitePool,
	kind: &str,
	key: Option<&str>,
	input: &str,
	fire_at: Timestamp,
) -> ClResult<JobId> {
	let res = sqlx::query(
		"INSERT INTO jobs (kind, key, input, status, fire_at) VALUES (?, ?, ?, 'P', ?)
		RETURNING job_id",
	)
	.bind(kind)
	.bind(key)
	.bind(input)
	.bind(fire_at.0)
	.fetch_one(db)
	.await;

	let job_id: i64 = map_res(res, |row| row.try_get(0))?;
	JobId::try_from(job_id).map_err(|_| Error::DbError)
}

pub(crate) async fn find_by_key(db: &SqlitePool, key: &str) -> ClResult<Option<JobData>> {
	let res = sqlx::query(&format!(
		"SELECT {} FROM jobs WHERE key=? ORDER BY status IN ('P', 'R') DESC, job_id DESC LIMIT 1",
		COLUMNS
	))
	.bind(key)
	.fetch_optional(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	res.map(|row| from_row(&row).inspect_err(inspect).map_err(|_| Error::DbError)).transpose()
}

pub(crate) async fn reschedule(
	db: &SqlitePool,
	job_id: JobId,
	input: &str,
	fire_at: Timestamp,
) -> ClResult<()> {
	let id = db_id(job_id)?;
	let res = sqlx::query("UPDATE jobs SET input=?, fire_at=? WHERE job_id=? AND status='P'")
		.bind(input)
		.bind(fire_at.0)
		.bind(id)
		.execute(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	if res.rows_affected() == 0 {
		return Err(no_row_error(db, id, "reschedule").await);
	}
	Ok(())
}

pub(crate) async fn claim(
	db: &SqlitePool,
	job_id: JobId,
	worker: &str,
	now: Timestamp,
) -> ClResult<bool> {
	let id = db_id(job_id)?;
	let res = sqlx::query(
		"UPDATE jobs SET status='R', claimed_at=?, claimed_by=?, attempts=attempts+1
		WHERE job_id=? AND status='P'",
	)
	.bind(now.0)
	.bind(worker)
	.bind(id)
	.execute(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	if res.rows_affected() == 0 {
		return match read_status(db, id).await? {
			Some(_) => Ok(false),
			None => Err(Error::NotFound),
		};
	}
	Ok(true)
}

pub(crate) async fn claim_due(
	db: &SqlitePool,
	worker: &str,
	now: Timestamp,
	limit: u32,
) -> ClResult<Vec<JobData>> {
	let res = sqlx::query(&format!(
		"UPDATE jobs SET status='R', claimed_at=?1, claimed_by=?2, attempts=attempts+1
		WHERE status='P' AND job_id IN (
			SELECT job_id FROM jobs WHERE status='P' AND fire_at<=?1
			ORDER BY fire_at, job_id LIMIT ?3
		)
		RETURNING {}",
		COLUMNS
	))
	.bind(now.0)
	.bind(worker)
	.bind(limit)
	.fetch_all(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	// RETURNING order is unspecified
	let mut jobs = collect_res(res.iter().map(from_row))?;
	jobs.sort_by_key(|j| (j.fire_at, j.job_id));
	Ok(jobs)
}

pub(crate) async fn mark(
	db: &SqlitePool,
	job_id: JobId,
	status: JobStatus,
	output: Option<&str>,
) -> ClResult<()> {
	let res = sqlx::query("UPDATE jobs SET status=?, error=? WHERE job_id=?")
		.bind(status_str(status))
		.bind(output)
		.bind(db_id(job_id)?)
		.execute(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	if res.rows_affected() == 0 {
		return Err(Error::NotFound);
	}
	Ok(())
}

pub(crate) async fn cancel(db: &SqlitePool, job_id: JobId) -> ClResult<bool> {
	let id = db_id(job_id)?;
	let res = sqlx::query("DELETE FROM jobs WHERE job_id=? AND status='P'")
		.bind(id)
		.execute(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	if res.rows_affected() > 0 {
		return Ok(true);
	}
	match no_row_error(db, id, "cancel").await {
		Error::NotFound => Ok(false),
		err => Err(err),
	}
}

pub(crate) async fn requeue(db: &SqlitePool, job_id: JobId, stale_before: Timestamp) -> ClResult<()> {
	let id = db_id(job_id)?;
	let res = sqlx::query(
		"UPDATE jobs SET status='P', claimed_at=NULL, claimed_by=NULL
		WHERE job_id=? AND (status='F' OR (status='R' AND (claimed_at IS NULL OR claimed_at<?)))",
	)
	.bind(id)
	.bind(stale_before.0)
	.execute(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	if res.rows_affected() == 0 {
		return Err(no_row_error(db, id, "requeue").await);
	}
	Ok(())
}

pub(crate) async fn reclaim_stale(db: &SqlitePool, older_than: Timestamp) -> ClResult<Vec<JobId>> {
	let res = sqlx::query(
		"UPDATE jobs SET status='P', claimed_at=NULL, claimed_by=NULL
		WHERE status='R' AND (claimed_at IS NULL OR claimed_at<?)
		RETURNING job_id",
	)
	.bind(older_than.0)
	.fetch_all(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	collect_res(res.iter().map(|row| {
		let job_id: i64 = row.try_get("job_id")?;
		JobId::try_from(job_id).map_err(decode_err)
	}))
}

pub(crate) async fn read(db: &SqlitePool, job_id: JobId) -> ClResult<JobData> {
	let res = sqlx::query(&format!("SELECT {} FROM jobs WHERE job_id=?", COLUMNS))
		.bind(db_id(job_id)?)
		.fetch_one(db)
		.await;

	map_res(res, |row| from_row(&row))
}

pub(crate) async fn list(db: &SqlitePool, opts: &ListJobOptions) -> ClResult<Vec<JobData>> {
	let mut query = sqlx::QueryBuilder::new(format!("SELECT {} FROM jobs WHERE 1=1", COLUMNS));
	if let Some(prefix) = &opts.key_prefix {
		// instr() keeps LIKE wildcards in keys literal
		query.push(" AND key IS NOT NULL AND instr(key, ").push_bind(prefix.as_ref()).push(")=1");
	}
	if let Some(status) = opts.status {
		query.push(" AND status=").push_bind(status_str(status));
	}
	query.push(" ORDER BY job_id");

	let res = query
		.build()
		.fetch_all(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	collect_res(res.iter().map(from_row))
}

pub(crate) async fn next_fire_at(db: &SqlitePool) -> ClResult<Option<Timestamp>> {
	let res = sqlx::query("SELECT min(fire_at) AS fire_at FROM jobs WHERE status='P'")
		.fetch_one(db)
		.await;

	map_res(res, |row| row.try_get::<Option<i64>, _>("fire_at")).map(|t| t.map(Timestamp))
}

// vim: ts=4
