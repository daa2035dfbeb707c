use std::{env, path, str::FromStr, sync::Arc, time::Duration};

use batchmail::delivery_adapter::DeliveryProvider;
use batchmail::email::provider::SENDGRID_API_URL;
use batchmail::email::{SendGridProvider, SmtpConfig, SmtpProvider, SmtpTls};
use batchmail::prelude::*;
use batchmail::AppBuilder;
use batchmail_store_adapter_sqlite::StoreAdapterSqlite;

#[derive(Debug)]
pub enum Esp {
	SendGrid { api_key: Box<str>, api_url: Box<str> },
	Smtp(SmtpConfig),
}

#[derive(Debug)]
pub struct Config {
	pub db_dir: path::PathBuf,
	pub listen: Box<str>,
	pub sender_email: Box<str>,
	pub sender_name: Option<Box<str>>,
	pub esp: Esp,
	pub scheduler_workers: Option<usize>,
	pub poll_secs: Option<u64>,
	pub stale_secs: Option<u64>,
	pub auto_reclaim: bool,
	pub dispatch_concurrency: Option<usize>,
	pub provider_timeout_secs: u64,
}

fn parse_num<T: FromStr>(name: &str, value: Option<String>) -> ClResult<Option<T>> {
	value
		.map(|v| {
			v.trim()
				.parse()
				.map_err(|_| Error::ConfigError(format!("{} is not a valid number: {}", name, v)))
		})
		.transpose()
}

fn parse_bool(name: &str, value: Option<String>) -> ClResult<bool> {
	match value.as_deref().map(str::trim) {
		None | Some("" | "0" | "false" | "no") => Ok(false),
		Some("1" | "true" | "yes") => Ok(true),
		Some(v) => Err(Error::ConfigError(format!("{} must be true or false: {}", name, v))),
	}
}

impl Config {
	pub fn from_env() -> ClResult<Self> {
		Self::from_lookup(|name| env::var(name).ok())
	}

	pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> ClResult<Self> {
		let provider_timeout_secs =
			parse_num("PROVIDER_TIMEOUT_SECS", var("PROVIDER_TIMEOUT_SECS"))?.unwrap_or(30);

		let esp = match var("ESP").as_deref().unwrap_or("sendgrid") {
			"sendgrid" => Esp::SendGrid {
				api_key: var("SENDGRID_API_KEY")
					.ok_or_else(|| Error::ConfigError("SENDGRID_API_KEY is not set".into()))?
					.into(),
				api_url: var("SENDGRID_API_URL").unwrap_or_else(|| SENDGRID_API_URL.into()).into(),
			},
			"smtp" => Esp::Smtp(SmtpConfig {
				host: var("SMTP_HOST")
					.ok_or_else(|| Error::ConfigError("SMTP_HOST is not set".into()))?
					.into(),
				port: parse_num("SMTP_PORT", var("SMTP_PORT"))?.unwrap_or(587),
				username: var("SMTP_USERNAME").map(Into::into),
				password: var("SMTP_PASSWORD").map(Into::into),
				tls: SmtpTls::parse(var("SMTP_TLS").as_deref().unwrap_or("starttls"))?,
				timeout: Duration::from_secs(provider_timeout_secs),
			}),
			other => {
				return Err(Error::ConfigError(format!(
					"Invalid ESP: {}. Must be 'sendgrid' or 'smtp'",
					other
				)));
			}
		};

		Ok(Config {
			db_dir: path::PathBuf::from(var("DB_DIR").unwrap_or_else(|| "./data".into())),
			listen: var("LISTEN").unwrap_or_else(|| "127.0.0.1:8080".into()).into(),
			sender_email: var("SENDER_EMAIL")
				.ok_or_else(|| Error::ConfigError("SENDER_EMAIL is not set".into()))?
				.into(),
			sender_name: var("SENDER_NAME").map(Into::into),
			esp,
			scheduler_workers: parse_num("SCHEDULER_WORKERS", var("SCHEDULER_WORKERS"))?,
			poll_secs: parse_num("SCHEDULER_POLL_SECS", var("SCHEDULER_POLL_SECS"))?,
			stale_secs: parse_num("JOB_STALE_SECS", var("JOB_STALE_SECS"))?,
			auto_reclaim: parse_bool("JOB_AUTO_RECLAIM", var("JOB_AUTO_RECLAIM"))?,
			dispatch_concurrency: parse_num("DISPATCH_CONCURRENCY", var("DISPATCH_CONCURRENCY"))?,
			provider_timeout_secs,
		})
	}
}

async fn run(mut builder: AppBuilder) -> ClResult<()> {
	let config = Config::from_env()?;

	tokio::fs::create_dir_all(&config.db_dir).await?;
	let store = Arc::new(StoreAdapterSqlite::new(config.db_dir.join("batchmail.db")).await?);
	let provider: Arc<dyn DeliveryProvider> = match &config.esp {
		Esp::SendGrid { api_key, api_url } => {
			Arc::new(SendGridProvider::new(api_key.clone(), api_url)?)
		}
		Esp::Smtp(smtp) => Arc::new(SmtpProvider::new(smtp)?),
	};

	builder
		.listen(config.listen)
		.sender_email(config.sender_email)
		.provider_timeout(Duration::from_secs(config.provider_timeout_secs))
		.auto_reclaim(config.auto_reclaim)
		.status_store(store.clone())
		.job_store(store.clone())
		.recipient_source(store)
		.provider(provider);
	if let Some(name) = config.sender_name {
		builder.sender_name(name);
	}
	if let Some(workers) = config.scheduler_workers {
		builder.scheduler_workers(workers);
	}
	if let Some(secs) = config.poll_secs {
		builder.poll_interval(Duration::from_secs(secs));
	}
	if let Some(secs) = config.stale_secs {
		builder.stale_after(Duration::from_secs(secs));
	}
	if let Some(concurrency) = config.dispatch_concurrency {
		builder.dispatch_concurrency(concurrency);
	}

	builder.run().await
}

#[tokio::main]
async fn main() {
	// Sets up logging before the configuration is read
	let builder = AppBuilder::new();
	if let Err(e) = run(builder).await {
		error!("FATAL: {}", e);
		std::process::exit(1);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;

	fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let vars: HashMap<String, String> =
			vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
		move |name| vars.get(name).cloned()
	}

	#[test]
	fn test_defaults_with_sendgrid() {
		let config = Config::from_lookup(lookup(&[
			("SENDER_EMAIL", "news@example.com"),
			("SENDGRID_API_KEY", "key"),
		]))
		.unwrap();
		assert_eq!(&*config.listen, "127.0.0.1:8080");
		assert_eq!(config.db_dir, path::PathBuf::from("./data"));
		assert!(!config.auto_reclaim);
		assert_eq!(config.provider_timeout_secs, 30);
		assert!(
			matches!(config.esp, Esp::SendGrid { ref api_url, .. } if &**api_url == SENDGRID_API_URL)
		);
	}

	#[test]
	fn test_smtp_config() {
		let config = Config::from_lookup(lookup(&[
			("SENDER_EMAIL", "news@example.com"),
			("ESP", "smtp"),
			("SMTP_HOST", "mail.example.com"),
			("SMTP_PORT", "465"),
			("SMTP_TLS", "tls"),
			("JOB_AUTO_RECLAIM", "true"),
			("SCHEDULER_WORKERS", "2"),
		]))
		.unwrap();
		let Esp::Smtp(smtp) = config.esp else { panic!("expected SMTP") };
		assert_eq!(smtp.port, 465);
		assert_eq!(smtp.tls, SmtpTls::Tls);
		assert!(config.auto_reclaim);
		assert_eq!(config.scheduler_workers, Some(2));
	}

	#[test]
	fn test_invalid_values_are_config_errors() {
		let base = [("SENDER_EMAIL", "a@example.com"), ("SENDGRID_API_KEY", "key")];
		for (name, value) in [
			("SCHEDULER_WORKERS", "many"),
			("SCHEDULER_POLL_SECS", "-1"),
			("PROVIDER_TIMEOUT_SECS", "1.5"),
			("JOB_AUTO_RECLAIM", "sometimes"),
			("ESP", "pigeon"),
		] {
			let mut vars = base.to_vec();
			vars.push((name, value));
			assert!(
				matches!(Config::from_lookup(lookup(&vars)), Err(Error::ConfigError(_))),
				"{}={} accepted",
				name,
				value
			);
		}
		assert!(matches!(
			Config::from_lookup(lookup(&[("SENDGRID_API_KEY", "key")])),
			Err(Error::ConfigError(_))
		));
	}
}

// vim: ts=4
