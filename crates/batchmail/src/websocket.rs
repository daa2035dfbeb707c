//! Live analytics over WebSocket
//!
//! `/ws/analytics?campaign_id=` sends a snapshot on connect and on every text
//! message from the client, then forwards the pushes queued for the
//! connection's scope.

use axum::{
	extract::ws::{Message, WebSocket, WebSocketUpgrade},
	extract::{Query, State},
	response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use serde_json::Value;
use std::time::Duration;

use crate::handler::AnalyticsQuery;
use crate::prelude::*;
use batchmail_core::analytics::{self, AnalyticsScope};

const HEARTBEAT: Duration = Duration::from_secs(30);

type WsSink = SplitSink<WebSocket, Message>;

/// WebSocket upgrade handler for analytics subscriptions
pub async fn get_ws_analytics(
	ws: WebSocketUpgrade,
	State(app): State<App>,
	Query(query): Query<AnalyticsQuery>,
) -> Response {
	match query.scope() {
		Ok(scope) => ws.on_upgrade(move |socket| handle_analytics_connection(socket, scope, app)),
		Err(e) => e.into_response(),
	}
}

async fn send_json(tx: &mut WsSink, value: &Value) -> Result<(), axum::Error> {
	tx.send(Message::Text(value.to_string().into())).await
}

async fn send_snapshot(
	tx: &mut WsSink,
	app: &App,
	scope: &AnalyticsScope,
) -> Result<(), axum::Error> {
	let snapshot =
		analytics::collect(app.status_store.as_ref(), app.job_store.as_ref(), scope, Timestamp::now())
			.await;
	let value = match snapshot {
		Ok(analytics) => serde_json::to_value(analytics).unwrap_or_default(),
		Err(e) => {
			warn!("Analytics snapshot failed: {}", e);
			serde_json::json!({ "error": e.code() })
		}
	};
	send_json(tx, &value).await
}

pub async fn handle_analytics_connection(ws: WebSocket, scope: AnalyticsScope, app: App) {
	let connection_id = uuid::Uuid::new_v4().to_string();
	info!(connection_id = %connection_id, "Analytics subscriber connected ({:?})", scope);
	let rx = app.broadcast.register(&connection_id, scope.clone()).await;
	let (mut ws_tx, mut ws_rx) = ws.split();

	let mut heartbeat = tokio::time::interval(HEARTBEAT);
	heartbeat.tick().await;

	if send_snapshot(&mut ws_tx, &app, &scope).await.is_ok() {
		loop {
			tokio::select! {
				msg = ws_rx.next() => match msg {
					Some(Ok(Message::Text(_))) => {
						if send_snapshot(&mut ws_tx, &app, &scope).await.is_err() {
							break;
						}
					}
					Some(Ok(Message::Close(_))) | None => break,
					Some(Ok(_)) => (),
					Some(Err(e)) => {
						debug!(connection_id = %connection_id, "Analytics connection error: {}", e);
						break;
					}
				},
				push = rx.recv_async() => match push {
					Ok(msg) => {
						if send_json(&mut ws_tx, &msg.data).await.is_err() {
							break;
						}
					}
					// Removed from the registry
					Err(_) => break,
				},
				_ = heartbeat.tick() => {
					if ws_tx.send(Message::Ping(Vec::<u8>::new().into())).await.is_err() {
						break;
					}
				}
			}
		}
	}

	app.broadcast.unregister(&connection_id).await;
	info!(connection_id = %connection_id, "Analytics subscriber disconnected");
}

// vim: ts=4
