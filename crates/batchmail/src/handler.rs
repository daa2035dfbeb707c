//! Analytics and health handlers

use axum::{
	Json,
	extract::{Query, State},
};
use serde::{Deserialize, Serialize};

use crate::prelude::*;
use batchmail_core::analytics::{self, Analytics, AnalyticsScope};
use batchmail_core::app::VERSION;
use batchmail_core::scheduler::SchedulerHealth;

#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsQuery {
	pub campaign_id: Option<String>,
}

impl AnalyticsQuery {
	pub fn scope(&self) -> ClResult<AnalyticsScope> {
		let campaign_id = match self.campaign_id.as_deref().map(str::trim) {
			Some(id) if !id.is_empty() => Some(CampaignId::new(id)?),
			_ => None,
		};
		Ok(AnalyticsScope::from_option(campaign_id))
	}
}

/// GET /api/analytics?campaign_id=
pub async fn get_analytics(
	State(app): State<App>,
	Query(query): Query<AnalyticsQuery>,
) -> ClResult<Json<Analytics>> {
	let scope = query.scope()?;
	let snapshot = analytics::collect(
		app.status_store.as_ref(),
		app.job_store.as_ref(),
		&scope,
		Timestamp::now(),
	)
	.await?;
	Ok(Json(snapshot))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
	pub status: &'static str,
	pub version: &'static str,
	pub scheduler: SchedulerHealth,
	pub subscribers: usize,
	pub timestamp: String,
}

/// GET /health
pub async fn get_health(State(app): State<App>) -> ClResult<Json<HealthResponse>> {
	let scheduler = app.scheduler.health_check().await?;
	let subscribers = app.broadcast.stats().await.total_connections;
	Ok(Json(HealthResponse {
		status: "healthy",
		version: VERSION,
		scheduler,
		subscribers,
		timestamp: Timestamp::now().to_iso(),
	}))
}

// vim: ts=4
