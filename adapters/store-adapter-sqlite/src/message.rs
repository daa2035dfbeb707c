//! Message record persistence

use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use batchmail_types::prelude::*;
use batchmail_types::status_adapter::{
	DeliveryStatus, LifecycleStatus, ListMessageOptions, MessageRecord,
};

use crate::utils::*;

const COLUMNS: &str = "tracking_id, campaign_id, batch_index, to_email, subject, status,
	delivery_status, scheduled_at, sent_at, provider_message_id, error";

fn from_row(row: &SqliteRow) -> Result<MessageRecord, sqlx::Error> {
	let status: &str = row.try_get("status")?;
	let delivery_status: &str = row.try_get("delivery_status")?;
	Ok(MessageRecord {
		tracking_id: row.try_get("tracking_id")?,
		campaign_id: CampaignId(row.try_get("campaign_id")?),
		batch_index: row.try_get("batch_index")?,
		to_email: row.try_get("to_email")?,
		subject: row.try_get("subject")?,
		status: LifecycleStatus::parse(status).map_err(decode_err)?,
		delivery_status: DeliveryStatus::from_event(delivery_status),
		scheduled_at: row.try_get("scheduled_at").map(Timestamp)?,
		sent_at: row.try_get::<Option<i64>, _>("sent_at")?.map(Timestamp),
		provider_message_id: row.try_get("provider_message_id")?,
		error: row.try_get("error")?,
	})
}

pub(crate) async fn create(db: &SqlitePool, record: &MessageRecord) -> ClResult<()> {
	let res = sqlx::query(
		"INSERT INTO messages (tracking_id, campaign_id, batch_index, to_email, subject, status,
		delivery_status, scheduled_at, sent_at, provider_message_id, error)
		VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
	)
	.bind(record.tracking_id.as_ref())
	.bind(record.campaign_id.as_str())
	.bind(record.batch_index)
	.bind(record.to_email.as_ref())
	.bind(record.subject.as_ref())
	.bind(record.status.as_str())
	.bind(record.delivery_status.as_str())
	.bind(record.scheduled_at.0)
	.bind(record.sent_at.map(|t| t.0))
	.bind(record.provider_message_id.as_deref())
	.bind(record.error.as_deref())
	.execute(db)
	.await;

	match res {
		Ok(_) => Ok(()),
		Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
			Err(Error::Conflict(format!("tracking id exists: {}", record.tracking_id)))
		}
		Err(err) => {
			inspect(&err);
			Err(Error::DbError)
		}
	}
}

pub(crate) async fn update_delivery_status(
	db: &SqlitePool,
	tracking_id: &str,
	status: &DeliveryStatus,
) -> ClResult<bool> {
	let res = sqlx::query("UPDATE messages SET delivery_status=? WHERE tracking_id=?")
		.bind(status.as_str())
		.bind(tracking_id)
		.execute(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	if res.rows_affected() == 0 {
		warn!(tracking_id = %tracking_id, "Delivery status update for unknown tracking id");
		return Ok(false);
	}
	Ok(true)
}

pub(crate) async fn read(db: &SqlitePool, tracking_id: &str) -> ClResult<MessageRecord> {
	let res = sqlx::query(&format!("SELECT {} FROM messages WHERE tracking_id=?", COLUMNS))
		.bind(tracking_id)
		.fetch_one(db)
		.await;

	map_res(res, |row| from_row(&row))
}

pub(crate) async fn list(db: &SqlitePool, opts: &ListMessageOptions) -> ClResult<Vec<MessageRecord>> {
	let mut query = sqlx::QueryBuilder::new(format!("SELECT {} FROM messages WHERE 1=1", COLUMNS));
	if let Some(campaign_id) = &opts.campaign_id {
		query.push(" AND campaign_id=").push_bind(campaign_id.as_str());
	}
	if let Some(batch_index) = opts.batch_index {
		query.push(" AND batch_index=").push_bind(batch_index);
	}
	if let Some(status) = opts.status {
		query.push(" AND status=").push_bind(status.as_str());
	}
	if let Some(delivery_status) = &opts.delivery_status {
		query.push(" AND delivery_status=").push_bind(delivery_status.as_str());
	}
	if let Some(to_email) = &opts.to_email {
		query.push(" AND to_email=").push_bind(to_email.as_ref());
	}
	// Insertion order
	query.push(" ORDER BY rowid");

	let res = query
		.build()
		.fetch_all(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	collect_res(res.iter().map(from_row))
}

// vim: ts=4
