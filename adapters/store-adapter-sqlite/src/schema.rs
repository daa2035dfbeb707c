//! Database schema initialization

use sqlx::SqlitePool;

/// Create tables and indexes if they do not exist yet
pub(crate) async fn init_db(db: &SqlitePool) -> Result<(), sqlx::Error> {
	let mut tx = db.begin().await?;

	// Message records
	//*****************
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS messages (
		tracking_id text NOT NULL,
		campaign_id text NOT NULL,
		batch_index integer NOT NULL,
		to_email text NOT NULL,
		subject text NOT NULL,
		status text NOT NULL,
		delivery_status text NOT NULL,
		scheduled_at integer NOT NULL,
		sent_at integer,
		provider_message_id text,
		error text,
		PRIMARY KEY(tracking_id)
	)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query(
		"CREATE INDEX IF NOT EXISTS idx_messages_campaign ON messages(campaign_id, batch_index)",
	)
	.execute(&mut *tx)
	.await?;

	// Jobs
	//******
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS jobs (
		job_id integer PRIMARY KEY AUTOINCREMENT,
		kind text NOT NULL,
		key text,
		input text NOT NULL,
		status char(1) NOT NULL DEFAULT 'P',
		fire_at integer NOT NULL,
		claimed_at integer,
		claimed_by text,
		attempts integer NOT NULL DEFAULT 0,
		error text,
		created_at integer DEFAULT (unixepoch())
	)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs(status, fire_at)")
		.execute(&mut *tx)
		.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_key ON jobs(key)")
		.execute(&mut *tx)
		.await?;

	// Recipients
	//************
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS campaign_fields (
		campaign_id text NOT NULL,
		fields json NOT NULL,
		updated_at integer DEFAULT (unixepoch()),
		PRIMARY KEY(campaign_id)
	)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS recipients (
		campaign_id text NOT NULL,
		seq integer NOT NULL,
		data json NOT NULL,
		PRIMARY KEY(campaign_id, seq)
	)",
	)
	.execute(&mut *tx)
	.await?;

	tx.commit().await?;
	Ok(())
}

// vim: ts=4
