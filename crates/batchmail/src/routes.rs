use axum::{
	Router,
	routing::{delete, get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::prelude::*;
use crate::{handler, websocket};
use batchmail_campaign::handler as campaign;
use batchmail_webhook::handler as webhook;

pub fn init(app: App) -> Router {
	let api_router = Router::new()
		// Recipients
		.route("/api/campaigns/recipients", post(campaign::post_recipients))
		.route("/api/campaigns/{campaign_id}/recipients", post(campaign::post_campaign_recipients))
		.route("/api/campaigns/{campaign_id}/fields", get(campaign::get_fields))
		.route("/api/campaigns/{campaign_id}/preview", get(campaign::get_preview))
		// Scheduling
		.route("/api/campaigns/{campaign_id}/schedule", post(campaign::post_schedule))
		.route(
			"/api/campaigns/{campaign_id}/jobs",
			get(campaign::get_campaign_jobs).delete(campaign::delete_campaign_jobs),
		)
		.route("/api/jobs/{job_id}", delete(campaign::delete_job))
		.route("/api/jobs/{job_id}/retry", post(campaign::post_job_retry))
		// Status
		.route("/api/messages/{tracking_id}", get(campaign::get_message))
		.route("/api/campaigns/{campaign_id}/messages", get(campaign::get_campaign_messages))
		.route("/api/analytics", get(handler::get_analytics))
		// Provider callbacks
		.route("/webhook/email-events", post(webhook::post_email_events));

	Router::new()
		.merge(api_router)
		.route("/ws/analytics", get(websocket::get_ws_analytics))
		.route("/health", get(handler::get_health))
		.layer(CorsLayer::permissive())
		.layer(TraceLayer::new_for_http())
		.with_state(app)
}

// vim: ts=4
