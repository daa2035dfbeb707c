//! App builder - constructs and runs the Batchmail service

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use crate::prelude::*;
use crate::routes;
pub use batchmail_core::app::{Adapters, App, AppBuilderOpts, AppState, VERSION};
use batchmail_types::delivery_adapter::DeliveryProvider;
use batchmail_types::job_adapter::JobStore;
use batchmail_types::recipient::RecipientSource;
use batchmail_types::status_adapter::StatusStore;

/// Type alias for async initialization callbacks
type InitCallback =
	Box<dyn FnOnce(App) -> Pin<Box<dyn Future<Output = ClResult<()>> + Send>> + Send>;

/// Both ring and aws-lc-rs are linked, so rustls cannot pick a default on its own
fn install_crypto_provider() {
	if rustls::crypto::CryptoProvider::get_default().is_none()
		&& rustls::crypto::CryptoProvider::install_default(
			rustls::crypto::aws_lc_rs::default_provider(),
		)
		.is_err()
	{
		debug!("Crypto provider installed concurrently");
	}
}

pub struct AppBuilder {
	opts: AppBuilderOpts,
	adapters: Adapters,
	on_init: Vec<InitCallback>,
}

impl AppBuilder {
	pub fn new() -> Self {
		// Embedders and tests may have installed a subscriber already
		let _ = tracing_subscriber::fmt()
			.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
			.with_target(false)
			.try_init();
		install_crypto_provider();
		AppBuilder {
			opts: AppBuilderOpts::default(),
			adapters: Adapters::default(),
			on_init: Vec::new(),
		}
	}

	// Opts
	pub fn listen(&mut self, listen: impl Into<Box<str>>) -> &mut Self {
		self.opts.listen = listen.into();
		self
	}
	pub fn sender_email(&mut self, sender_email: impl Into<Box<str>>) -> &mut Self {
		self.opts.sender_email = sender_email.into();
		self
	}
	pub fn sender_name(&mut self, sender_name: impl Into<Box<str>>) -> &mut Self {
		self.opts.sender_name = Some(sender_name.into());
		self
	}
	pub fn dispatch_concurrency(&mut self, concurrency: usize) -> &mut Self {
		self.opts.dispatch_concurrency = concurrency;
		self
	}
	pub fn provider_timeout(&mut self, timeout: Duration) -> &mut Self {
		self.opts.provider_timeout = timeout;
		self
	}
	pub fn scheduler_workers(&mut self, workers: usize) -> &mut Self {
		self.opts.scheduler.workers = workers;
		self
	}
	pub fn poll_interval(&mut self, interval: Duration) -> &mut Self {
		self.opts.scheduler.poll_interval = interval;
		self
	}
	pub fn stale_after(&mut self, stale_after: Duration) -> &mut Self {
		self.opts.scheduler.stale_after = stale_after;
		self
	}
	pub fn auto_reclaim(&mut self, enabled: bool) -> &mut Self {
		self.opts.scheduler.auto_reclaim = enabled;
		self
	}
	pub fn subscriber_buffer(&mut self, size: usize) -> &mut Self {
		self.opts.subscriber_buffer = size;
		self
	}

	// Adapters
	pub fn status_store(&mut self, status_store: Arc<dyn StatusStore>) -> &mut Self {
		self.adapters.status_store = Some(status_store);
		self
	}
	pub fn job_store(&mut self, job_store: Arc<dyn JobStore>) -> &mut Self {
		self.adapters.job_store = Some(job_store);
		self
	}
	pub fn recipient_source(&mut self, recipients: Arc<dyn RecipientSource>) -> &mut Self {
		self.adapters.recipients = Some(recipients);
		self
	}
	pub fn provider(&mut self, provider: Arc<dyn DeliveryProvider>) -> &mut Self {
		self.adapters.provider = Some(provider);
		self
	}

	/// Register an async initialization callback that runs after App is created
	/// but before the scheduler starts.
	pub fn on_init<F, Fut>(&mut self, f: F) -> &mut Self
	where
		F: FnOnce(App) -> Fut + Send + 'static,
		Fut: Future<Output = ClResult<()>> + Send + 'static,
	{
		self.on_init.push(Box::new(move |app| Box::pin(f(app))));
		self
	}

	/// Assemble the application state and register its tasks. Nothing is started.
	pub async fn build(self) -> ClResult<App> {
		install_crypto_provider();

		let app = AppState::from_adapters(self.opts, self.adapters).inspect_err(|e| {
			error!("FATAL: {}", e);
		})?;
		info!("Delivery provider: {}", app.provider.name());

		// Init modules
		batchmail_email::init(&app)?;

		for callback in self.on_init {
			callback(app.clone()).await?;
		}
		Ok(app)
	}

	pub async fn run(self) -> ClResult<()> {
		info!("Batchmail V{}", VERSION);

		let app = self.build().await?;

		// Start scheduler
		app.scheduler.start(app.clone());

		// Periodic scheduler health check
		{
			let scheduler = app.scheduler.clone();
			tokio::spawn(async move {
				loop {
					tokio::time::sleep(Duration::from_secs(30)).await;
					match scheduler.health_check().await {
						Ok(health) => {
							debug!(
								"Scheduler health: workers={}, running={}, pending={}, stale={}",
								health.workers, health.running, health.pending, health.stale
							);
						}
						Err(e) => {
							warn!("Scheduler health check failed: {}", e);
						}
					}
				}
			});
		}

		let router = routes::init(app.clone());
		let listener = tokio::net::TcpListener::bind(&*app.opts.listen).await?;
		info!("Listening on HTTP {}", app.opts.listen);

		let scheduler = app.scheduler.clone();
		axum::serve(listener, router)
			.with_graceful_shutdown(async move {
				if let Err(e) = tokio::signal::ctrl_c().await {
					error!("Cannot listen for shutdown signal: {}", e);
					std::future::pending::<()>().await;
				}
				info!("Shutting down");
				scheduler.shutdown();
			})
			.await?;

		Ok(())
	}
}

impl Default for AppBuilder {
	fn default() -> Self {
		Self::new()
	}
}

// vim: ts=4
