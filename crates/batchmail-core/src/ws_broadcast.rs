//! Live analytics subscribers
//!
//! Registry of WebSocket connections waiting for analytics pushes. Each
//! connection owns a bounded queue; publishing never waits on a subscriber.
//! A full queue drops the message for that subscriber only, a closed queue
//! removes the subscriber.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::analytics::AnalyticsScope;
use crate::prelude::*;

/// A message pushed to subscribers
#[derive(Clone, Debug)]
pub struct BroadcastMessage {
	pub cmd: String,
	pub data: Value,
	pub timestamp: Timestamp,
}

impl BroadcastMessage {
	pub fn new(cmd: impl Into<String>, data: Value) -> Self {
		Self { cmd: cmd.into(), data, timestamp: Timestamp::now() }
	}
}

/// A subscriber connection
#[derive(Debug)]
pub struct Subscriber {
	/// Unique connection ID (UUID)
	pub connection_id: Box<str>,
	pub scope: AnalyticsScope,
	/// When this connection was established
	pub connected_at: Timestamp,
	sender: flume::Sender<BroadcastMessage>,
}

/// Result of publishing one message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryResult {
	/// Subscribers the message was queued for
	pub delivered: usize,
	/// Subscribers whose queue was full
	pub dropped: usize,
	/// Subscribers found disconnected and removed
	pub removed: usize,
}

/// Registry statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct SubscriberStats {
	pub total_connections: usize,
	pub scopes: usize,
}

#[derive(Clone, Debug)]
pub struct BroadcastConfig {
	/// Maximum number of messages to buffer per connection
	pub buffer_size: usize,
}

impl Default for BroadcastConfig {
	fn default() -> Self {
		Self { buffer_size: 16 }
	}
}

/// Manages analytics subscribers
#[derive(Debug)]
pub struct BroadcastManager {
	subscribers: Arc<RwLock<HashMap<Box<str>, Subscriber>>>,
	config: BroadcastConfig,
}

impl BroadcastManager {
	pub fn new() -> Self {
		Self::with_config(BroadcastConfig::default())
	}

	pub fn with_config(config: BroadcastConfig) -> Self {
		Self { subscribers: Arc::new(RwLock::new(HashMap::new())), config }
	}

	/// Register a connection. Returns the receiving end of its queue.
	pub async fn register(
		&self,
		connection_id: &str,
		scope: AnalyticsScope,
	) -> flume::Receiver<BroadcastMessage> {
		let (sender, receiver) = flume::bounded(self.config.buffer_size.max(1));
		let subscriber = Subscriber {
			connection_id: connection_id.into(),
			scope,
			connected_at: Timestamp::now(),
			sender,
		};
		self.subscribers.write().await.insert(connection_id.into(), subscriber);
		debug!(connection_id = %connection_id, "Subscriber registered");
		receiver
	}

	pub async fn unregister(&self, connection_id: &str) {
		self.subscribers.write().await.remove(connection_id);
		debug!(connection_id = %connection_id, "Subscriber unregistered");
	}

	/// Distinct scopes with at least one subscriber
	pub async fn scopes(&self) -> Vec<AnalyticsScope> {
		let subscribers = self.subscribers.read().await;
		let mut scopes: Vec<AnalyticsScope> = Vec::new();
		for sub in subscribers.values() {
			if !scopes.contains(&sub.scope) {
				scopes.push(sub.scope.clone());
			}
		}
		scopes
	}

	/// Queue `msg` for every subscriber of `scope` without waiting
	pub async fn publish(&self, scope: &AnalyticsScope, msg: BroadcastMessage) -> DeliveryResult {
		let mut result = DeliveryResult::default();
		let mut closed: Vec<Box<str>> = Vec::new();
		{
			let subscribers = self.subscribers.read().await;
			for sub in subscribers.values().filter(|s| s.scope == *scope) {
				match sub.sender.try_send(msg.clone()) {
					Ok(()) => result.delivered += 1,
					Err(flume::TrySendError::Full(_)) => {
						debug!(connection_id = %sub.connection_id, "Subscriber queue full, dropping message");
						result.dropped += 1;
					}
					Err(flume::TrySendError::Disconnected(_)) => {
						closed.push(sub.connection_id.clone());
					}
				}
			}
		}

		if !closed.is_empty() {
			let mut subscribers = self.subscribers.write().await;
			for id in &closed {
				subscribers.remove(id);
			}
			result.removed = closed.len();
		}
		result
	}

	pub async fn stats(&self) -> SubscriberStats {
		let total_connections = self.subscribers.read().await.len();
		SubscriberStats { total_connections, scopes: self.scopes().await.len() }
	}

	/// Drop subscribers whose receiver is gone
	pub async fn cleanup(&self) {
		self.subscribers.write().await.retain(|_, sub| !sub.sender.is_disconnected());
	}
}

impl Default for BroadcastManager {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn msg() -> BroadcastMessage {
		BroadcastMessage::new("analytics", serde_json::json!({ "total": 1 }))
	}

	#[tokio::test]
	async fn test_publish_by_scope() {
		let manager = BroadcastManager::new();
		let campaign = AnalyticsScope::Campaign(CampaignId::new("a").unwrap());
		let rx_all = manager.register("conn-1", AnalyticsScope::All).await;
		let rx_a = manager.register("conn-2", campaign.clone()).await;

		let res = manager.publish(&campaign, msg()).await;
		assert_eq!(res.delivered, 1);
		assert_eq!(rx_a.recv_async().await.unwrap().cmd, "analytics");
		assert!(rx_all.is_empty());

		assert_eq!(manager.scopes().await.len(), 2);
	}

	#[tokio::test]
	async fn test_full_queue_drops_without_blocking() {
		let manager = BroadcastManager::with_config(BroadcastConfig { buffer_size: 1 });
		let _slow = manager.register("slow", AnalyticsScope::All).await;
		let fast = manager.register("fast", AnalyticsScope::All).await;

		assert_eq!(manager.publish(&AnalyticsScope::All, msg()).await.delivered, 2);
		fast.recv_async().await.unwrap();

		let res = manager.publish(&AnalyticsScope::All, msg()).await;
		assert_eq!(res, DeliveryResult { delivered: 1, dropped: 1, removed: 0 });
		assert!(fast.recv_async().await.is_ok());
	}

	#[tokio::test]
	async fn test_disconnected_removed_on_publish() {
		let manager = BroadcastManager::new();
		let rx = manager.register("gone", AnalyticsScope::All).await;
		drop(rx);

		let res = manager.publish(&AnalyticsScope::All, msg()).await;
		assert_eq!(res.removed, 1);
		assert_eq!(manager.stats().await.total_connections, 0);
	}

	#[tokio::test]
	async fn test_unregister_and_cleanup() {
		let manager = BroadcastManager::new();
		let _rx = manager.register("c1", AnalyticsScope::All).await;
		let rx2 = manager.register("c2", AnalyticsScope::All).await;
		manager.unregister("c1").await;
		drop(rx2);
		manager.cleanup().await;
		assert_eq!(manager.stats().await.total_connections, 0);
	}
}

// vim: ts=4
