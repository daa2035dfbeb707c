//! Recipient rows, stored as one JSON object per row in upload order

use std::collections::BTreeMap;

use sqlx::{Row, SqlitePool};

use batchmail_types::prelude::*;
use batchmail_types::recipient::RecipientRow;

use crate::utils::*;

pub(crate) async fn store(
	db: &SqlitePool,
	campaign_id: &CampaignId,
	fields: &[Box<str>],
	rows: &[RecipientRow],
) -> ClResult<()> {
	if rows.is_empty() {
		return Err(Error::InvalidParameter("recipient list is empty".into()));
	}
	let fields_json = serde_json::to_string(fields)?;

	let mut tx = db.begin().await.inspect_err(inspect).map_err(|_| Error::DbError)?;

	sqlx::query("DELETE FROM recipients WHERE campaign_id=?")
		.bind(campaign_id.as_str())
		.execute(&mut *tx)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	sqlx::query(
		"INSERT INTO campaign_fields (campaign_id, fields) VALUES (?, ?)
		ON CONFLICT(campaign_id) DO UPDATE SET fields=excluded.fields, updated_at=unixepoch()",
	)
	.bind(campaign_id.as_str())
	.bind(&fields_json)
	.execute(&mut *tx)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	for (seq, row) in rows.iter().enumerate() {
		let data = serde_json::to_string(row.fields())?;
		sqlx::query("INSERT INTO recipients (campaign_id, seq, data) VALUES (?, ?, ?)")
			.bind(campaign_id.as_str())
			.bind(i64::try_from(seq).map_err(|_| Error::DbError)?)
			.bind(data)
			.execute(&mut *tx)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
	}

	tx.commit().await.inspect_err(inspect).map_err(|_| Error::DbError)?;
	debug!(campaign_id = %campaign_id, "Stored {} recipients", rows.len());
	Ok(())
}

pub(crate) async fn rows(
	db: &SqlitePool,
	campaign_id: &CampaignId,
	limit: Option<usize>,
) -> ClResult<Vec<RecipientRow>> {
	// LIMIT -1 means no limit in SQLite
	let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
	let res = sqlx::query("SELECT data FROM recipients WHERE campaign_id=? ORDER BY seq LIMIT ?")
		.bind(campaign_id.as_str())
		.bind(limit)
		.fetch_all(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	let data = collect_res(res.iter().map(|row| row.try_get::<String, _>("data")))?;
	data.iter()
		.map(|data| {
			let fields: BTreeMap<String, String> = serde_json::from_str(data)?;
			RecipientRow::new(fields)
		})
		.collect()
}

pub(crate) async fn fields(db: &SqlitePool, campaign_id: &CampaignId) -> ClResult<Vec<Box<str>>> {
	let res = sqlx::query("SELECT fields FROM campaign_fields WHERE campaign_id=?")
		.bind(campaign_id.as_str())
		.fetch_optional(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	match res {
		Some(row) => {
			let fields: String = row.try_get("fields").map_err(|_| Error::DbError)?;
			Ok(serde_json::from_str(&fields)?)
		}
		None => Ok(Vec::new()),
	}
}

// vim: ts=4
