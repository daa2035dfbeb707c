//! App state type

use std::{sync::Arc, time::Duration};

use crate::prelude::*;
use crate::{
	scheduler,
	ws_broadcast::{BroadcastConfig, BroadcastManager},
};

use batchmail_types::delivery_adapter::DeliveryProvider;
use batchmail_types::job_adapter::JobStore;
use batchmail_types::recipient::RecipientSource;
use batchmail_types::status_adapter::StatusStore;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct AppState {
	pub scheduler: Arc<scheduler::Scheduler<App>>,
	pub opts: AppBuilderOpts,
	pub broadcast: BroadcastManager,

	pub status_store: Arc<dyn StatusStore>,
	pub job_store: Arc<dyn JobStore>,
	pub recipients: Arc<dyn RecipientSource>,
	pub provider: Arc<dyn DeliveryProvider>,
}

pub type App = Arc<AppState>;

#[derive(Default)]
pub struct Adapters {
	pub status_store: Option<Arc<dyn StatusStore>>,
	pub job_store: Option<Arc<dyn JobStore>>,
	pub recipients: Option<Arc<dyn RecipientSource>>,
	pub provider: Option<Arc<dyn DeliveryProvider>>,
}

impl AppState {
	/// Assemble the state. Every adapter must be set.
	pub fn from_adapters(opts: AppBuilderOpts, adapters: Adapters) -> ClResult<App> {
		let job_store = adapters
			.job_store
			.ok_or_else(|| Error::ConfigError("job store adapter not configured".into()))?;
		let scheduler = scheduler::Scheduler::new(job_store.clone(), opts.scheduler.clone());
		let broadcast =
			BroadcastManager::with_config(BroadcastConfig { buffer_size: opts.subscriber_buffer });
		Ok(Arc::new(AppState {
			scheduler,
			broadcast,
			status_store: adapters
				.status_store
				.ok_or_else(|| Error::ConfigError("status store adapter not configured".into()))?,
			job_store,
			recipients: adapters
				.recipients
				.ok_or_else(|| Error::ConfigError("recipient source not configured".into()))?,
			provider: adapters
				.provider
				.ok_or_else(|| Error::ConfigError("delivery provider not configured".into()))?,
			opts,
		}))
	}
}

#[derive(Debug, Clone)]
pub struct AppBuilderOpts {
	pub listen: Box<str>,
	/// Sender identity used for every outbound message
	pub sender_email: Box<str>,
	pub sender_name: Option<Box<str>>,
	/// Recipients of one batch dispatched in parallel
	pub dispatch_concurrency: usize,
	/// Upper bound on a single provider call
	pub provider_timeout: Duration,
	pub scheduler: scheduler::SchedulerOpts,
	/// Queued analytics pushes per subscriber before messages are dropped
	pub subscriber_buffer: usize,
}

impl Default for AppBuilderOpts {
	fn default() -> Self {
		Self {
			listen: "127.0.0.1:8080".into(),
			sender_email: "noreply@localhost".into(),
			sender_name: None,
			dispatch_concurrency: 8,
			provider_timeout: Duration::from_secs(30),
			scheduler: scheduler::SchedulerOpts::default(),
			subscriber_buffer: 16,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::memory::{InMemoryJobStore, InMemoryRecipientSource, InMemoryStatusStore};

	#[test]
	fn test_missing_adapter_is_config_error() {
		let adapters = Adapters {
			status_store: Some(InMemoryStatusStore::new()),
			job_store: Some(InMemoryJobStore::new()),
			recipients: Some(InMemoryRecipientSource::new()),
			provider: None,
		};
		let res = AppState::from_adapters(AppBuilderOpts::default(), adapters);
		assert!(matches!(res, Err(Error::ConfigError(_))));
	}
}

// vim: ts=4
