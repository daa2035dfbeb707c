//! Webhook HTTP handler

use axum::{Json, body::Bytes, extract::State};

use crate::ingest::{self, IngestReport};
use crate::prelude::*;
use batchmail_core::analytics;

/// POST /webhook/email-events
///
/// Always acknowledges with 200 unless the payload is not JSON. Subscribers of
/// the touched campaigns get a fresh analytics snapshot afterwards.
pub async fn post_email_events(
	State(app): State<App>,
	body: Bytes,
) -> ClResult<Json<IngestReport>> {
	let report = ingest::ingest_payload(app.status_store.as_ref(), &body).await?;

	if report.processed > 0 {
		let campaigns = report.campaigns.clone();
		tokio::spawn(async move {
			let pushed = analytics::publish_refresh(
				app.status_store.as_ref(),
				app.job_store.as_ref(),
				&app.broadcast,
				&campaigns,
			)
			.await;
			debug!("Analytics pushed to {} subscribers", pushed);
		});
	}
	Ok(Json(report))
}

// vim: ts=4
