//! Campaign HTTP handlers

use axum::{
	Json,
	body::Bytes,
	extract::{Path, Query, State},
	http::{HeaderMap, StatusCode, header},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::prelude::*;
use crate::recipients::{self, UploadSummary};
use crate::submit::{self, CampaignRequest, ScheduleResponse};
use batchmail_types::job_adapter::JobData;
use batchmail_types::recipient::RecipientRow;
use batchmail_types::status_adapter::{
	DeliveryStatus, LifecycleStatus, ListMessageOptions, MessageRecord,
};

fn campaign_id(id: &str) -> ClResult<CampaignId> {
	CampaignId::new(id)
}

/// Message record as exposed over the API
#[derive(Debug, Serialize)]
pub struct MessageView {
	pub tracking_id: Box<str>,
	pub campaign_id: CampaignId,
	pub batch_index: u32,
	pub to_email: Box<str>,
	pub subject: Box<str>,
	pub status: LifecycleStatus,
	pub delivery_status: DeliveryStatus,
	/// ISO-8601
	pub scheduled_time: String,
	pub sent_time: Option<String>,
	pub provider_message_id: Option<Box<str>>,
	pub error: Option<Box<str>>,
}

impl From<MessageRecord> for MessageView {
	fn from(r: MessageRecord) -> Self {
		Self {
			tracking_id: r.tracking_id,
			campaign_id: r.campaign_id,
			batch_index: r.batch_index,
			to_email: r.to_email,
			subject: r.subject,
			status: r.status,
			delivery_status: r.delivery_status,
			scheduled_time: r.scheduled_at.to_iso(),
			sent_time: r.sent_at.map(Timestamp::to_iso),
			provider_message_id: r.provider_message_id,
			error: r.error,
		}
	}
}

// Recipients //
//************//
async fn upload_recipients(
	app: &App,
	campaign_id: CampaignId,
	headers: &HeaderMap,
	body: &[u8],
) -> ClResult<(StatusCode, Json<UploadSummary>)> {
	let is_json = headers
		.get(header::CONTENT_TYPE)
		.and_then(|v| v.to_str().ok())
		.is_some_and(|ct| ct.contains("json"));
	let (fields, rows) =
		if is_json { recipients::parse_json(body)? } else { recipients::parse_csv(body)? };
	let summary = recipients::upload(app, campaign_id, fields, rows).await?;
	Ok((StatusCode::CREATED, Json(summary)))
}

/// POST /api/campaigns/recipients
///
/// Upload recipients for a new campaign. The campaign id is generated.
pub async fn post_recipients(
	State(app): State<App>,
	headers: HeaderMap,
	body: Bytes,
) -> ClResult<(StatusCode, Json<UploadSummary>)> {
	upload_recipients(&app, CampaignId::generate(), &headers, &body).await
}

/// POST /api/campaigns/{campaign_id}/recipients
///
/// Replace the recipients of a campaign. CSV unless the content type is JSON.
pub async fn post_campaign_recipients(
	State(app): State<App>,
	Path(id): Path<String>,
	headers: HeaderMap,
	body: Bytes,
) -> ClResult<(StatusCode, Json<UploadSummary>)> {
	upload_recipients(&app, campaign_id(&id)?, &headers, &body).await
}

/// GET /api/campaigns/{campaign_id}/fields
pub async fn get_fields(
	State(app): State<App>,
	Path(id): Path<String>,
) -> ClResult<Json<serde_json::Value>> {
	let fields = app.recipients.fields(&campaign_id(&id)?).await?;
	Ok(Json(json!({ "fields": fields })))
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
	pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
	pub fields: Vec<Box<str>>,
	pub rows: Vec<RecipientRow>,
}

/// GET /api/campaigns/{campaign_id}/preview?limit=
pub async fn get_preview(
	State(app): State<App>,
	Path(id): Path<String>,
	Query(query): Query<PreviewQuery>,
) -> ClResult<Json<PreviewResponse>> {
	let campaign_id = campaign_id(&id)?;
	let limit = query.limit.unwrap_or(5).min(100);
	let rows = app.recipients.preview(&campaign_id, limit).await?;
	let fields = app.recipients.fields(&campaign_id).await?;
	Ok(Json(PreviewResponse { fields, rows }))
}

// Scheduling //
//************//
/// POST /api/campaigns/{campaign_id}/schedule
pub async fn post_schedule(
	State(app): State<App>,
	Path(id): Path<String>,
	Json(req): Json<CampaignRequest>,
) -> ClResult<(StatusCode, Json<ScheduleResponse>)> {
	let res = submit::schedule_campaign(&app, &campaign_id(&id)?, req).await?;
	Ok((StatusCode::CREATED, Json(res)))
}

/// GET /api/campaigns/{campaign_id}/jobs
pub async fn get_campaign_jobs(
	State(app): State<App>,
	Path(id): Path<String>,
) -> ClResult<Json<Vec<JobData>>> {
	Ok(Json(submit::list_campaign_jobs(&app, &campaign_id(&id)?).await?))
}

/// DELETE /api/campaigns/{campaign_id}/jobs
pub async fn delete_campaign_jobs(
	State(app): State<App>,
	Path(id): Path<String>,
) -> ClResult<Json<serde_json::Value>> {
	let cancelled = submit::cancel_campaign(&app, &campaign_id(&id)?).await?;
	Ok(Json(json!({ "cancelled": cancelled })))
}

/// DELETE /api/jobs/{job_id}
///
/// Only Pending jobs can be cancelled, a Running job answers 409.
pub async fn delete_job(
	State(app): State<App>,
	Path(job_id): Path<JobId>,
) -> ClResult<StatusCode> {
	app.scheduler.cancel(job_id).await?;
	Ok(StatusCode::NO_CONTENT)
}

/// POST /api/jobs/{job_id}/retry
///
/// Requeue a Failed job, or a Running job whose claim is past the liveness threshold.
pub async fn post_job_retry(
	State(app): State<App>,
	Path(job_id): Path<JobId>,
) -> ClResult<Json<JobData>> {
	app.scheduler.retry(job_id).await?;
	Ok(Json(app.job_store.read_job(job_id).await?))
}

// Messages //
//**********//
/// GET /api/messages/{tracking_id}
pub async fn get_message(
	State(app): State<App>,
	Path(tracking_id): Path<String>,
) -> ClResult<Json<MessageView>> {
	let record = app.status_store.read_message(&tracking_id).await?;
	Ok(Json(record.into()))
}

#[derive(Debug, Default, Deserialize)]
pub struct MessageQuery {
	pub status: Option<String>,
	pub delivery_status: Option<String>,
	pub batch: Option<u32>,
}

/// GET /api/campaigns/{campaign_id}/messages?status=&delivery_status=&batch=
pub async fn get_campaign_messages(
	State(app): State<App>,
	Path(id): Path<String>,
	Query(query): Query<MessageQuery>,
) -> ClResult<Json<Vec<MessageView>>> {
	let status = query
		.status
		.as_deref()
		.map(|s| {
			LifecycleStatus::parse(&s.to_ascii_lowercase())
				.map_err(|_| Error::InvalidParameter(format!("unknown status: {}", s)))
		})
		.transpose()?;
	let opts = ListMessageOptions {
		campaign_id: Some(campaign_id(&id)?),
		batch_index: query.batch,
		status,
		delivery_status: query.delivery_status.as_deref().map(DeliveryStatus::from_event),
		to_email: None,
	};
	let records = app.status_store.list_messages(&opts).await?;
	Ok(Json(records.into_iter().map(MessageView::from).collect()))
}

// vim: ts=4
