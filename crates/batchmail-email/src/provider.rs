//! Delivery providers
//!
//! `SendGridProvider` talks to a SendGrid-compatible HTTP API, `SmtpProvider`
//! relays through an SMTP server using lettre.

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::prelude::*;
use batchmail_types::delivery_adapter::{DeliveryProvider, OutboundEmail, ProviderResponse};
use batchmail_types::utils::truncate;

pub const SENDGRID_API_URL: &str = "https://api.sendgrid.com";

/// Longest provider response excerpt kept in an error message
const ERROR_EXCERPT: usize = 300;

// SendGridProvider
//******************
pub struct SendGridProvider {
	api_key: Box<str>,
	endpoint: Box<str>,
	client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl std::fmt::Debug for SendGridProvider {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SendGridProvider").field("endpoint", &self.endpoint).finish_non_exhaustive()
	}
}

/// Uses its own crypto provider, the process-wide default may not be installed yet
fn https_connector(allow_plain: bool) -> ClResult<HttpsConnector<HttpConnector>> {
	let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
	let builder = match HttpsConnectorBuilder::new().with_provider_and_native_roots(provider.clone())
	{
		Ok(builder) => builder,
		Err(e) if allow_plain => {
			warn!("No native root certificates ({}), only plain HTTP will work", e);
			let config = rustls::ClientConfig::builder_with_provider(provider)
				.with_safe_default_protocol_versions()
				.map_err(|e| Error::ConfigError(format!("TLS configuration error: {}", e)))?
				.with_root_certificates(rustls::RootCertStore::empty())
				.with_no_client_auth();
			HttpsConnectorBuilder::new().with_tls_config(config)
		}
		Err(e) => return Err(Error::ConfigError(format!("TLS root certificates: {}", e))),
	};
	Ok(builder.https_or_http().enable_http1().build())
}

impl SendGridProvider {
	/// `api_url` is the API base, e.g. [`SENDGRID_API_URL`]
	pub fn new(api_key: impl Into<Box<str>>, api_url: &str) -> ClResult<Self> {
		let api_key = api_key.into();
		if api_key.is_empty() {
			return Err(Error::ConfigError("SendGrid API key is empty".into()));
		}
		let base = api_url.trim_end_matches('/');
		if !base.starts_with("https://") && !base.starts_with("http://") {
			return Err(Error::ConfigError(format!("invalid API URL: {}", api_url)));
		}
		let connector = https_connector(base.starts_with("http://"))?;
		let client = Client::builder(TokioExecutor::new()).build(connector);
		Ok(Self { api_key, endpoint: format!("{}/v3/mail/send", base).into(), client })
	}

	fn request_body(email: &OutboundEmail) -> serde_json::Value {
		let mut from = json!({ "email": email.from_email });
		if let Some(name) = &email.from_name {
			from["name"] = json!(name);
		}
		json!({
			"personalizations": [{
				"to": [{ "email": email.to }],
				"custom_args": { "tracking_id": email.tracking_id },
			}],
			"from": from,
			"subject": email.subject,
			"content": [{ "type": "text/html", "value": email.html_body }],
			"tracking_settings": {
				"click_tracking": { "enable": true },
				"open_tracking": { "enable": true },
			},
		})
	}
}

#[async_trait]
impl DeliveryProvider for SendGridProvider {
	fn name(&self) -> &'static str {
		"sendgrid"
	}

	async fn send(&self, email: &OutboundEmail) -> ClResult<ProviderResponse> {
		let body = serde_json::to_vec(&Self::request_body(email))?;
		let request = hyper::Request::builder()
			.method(hyper::Method::POST)
			.uri(&*self.endpoint)
			.header("Content-Type", "application/json")
			.header("Authorization", format!("Bearer {}", self.api_key))
			.body(Full::new(Bytes::from(body)))
			.map_err(|e| Error::Internal(format!("request build error: {}", e)))?;

		let response = self
			.client
			.request(request)
			.await
			.map_err(|e| Error::ProviderFailure(format!("network error: {}", e)))?;
		let status = response.status();
		if status.is_success() {
			let message_id = response
				.headers()
				.get("X-Message-Id")
				.and_then(|v| v.to_str().ok())
				.map(Into::into);
			debug!(tracking_id = %email.tracking_id, "Accepted by SendGrid ({})", status);
			return Ok(ProviderResponse::accepted(message_id));
		}

		let body_bytes = response.into_body().collect().await.ok().map(|b| b.to_bytes());
		let body_str = body_bytes.as_ref().and_then(|b| std::str::from_utf8(b).ok()).unwrap_or("");
		warn!(tracking_id = %email.tracking_id, "SendGrid rejected message: HTTP {}", status);
		Ok(ProviderResponse::rejected(format!(
			"HTTP {}: {}",
			status,
			truncate(body_str, ERROR_EXCERPT)
		)))
	}
}

// SmtpProvider
//**************
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmtpTls {
	None,
	StartTls,
	Tls,
}

impl SmtpTls {
	pub fn parse(s: &str) -> ClResult<Self> {
		match s {
			"none" => Ok(SmtpTls::None),
			"starttls" => Ok(SmtpTls::StartTls),
			"tls" => Ok(SmtpTls::Tls),
			_ => Err(Error::ConfigError(format!(
				"Invalid TLS mode: {}. Must be 'none', 'starttls', or 'tls'",
				s
			))),
		}
	}
}

#[derive(Clone, Debug)]
pub struct SmtpConfig {
	pub host: Box<str>,
	pub port: u16,
	pub username: Option<Box<str>>,
	pub password: Option<Box<str>>,
	pub tls: SmtpTls,
	pub timeout: Duration,
}

pub struct SmtpProvider {
	mailer: AsyncSmtpTransport<Tokio1Executor>,
	host: Box<str>,
}

impl std::fmt::Debug for SmtpProvider {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SmtpProvider").field("host", &self.host).finish_non_exhaustive()
	}
}

impl SmtpProvider {
	pub fn new(config: &SmtpConfig) -> ClResult<Self> {
		let tls_params = || {
			TlsParameters::builder(config.host.to_string())
				.build()
				.map_err(|e| Error::ConfigError(format!("TLS configuration error: {}", e)))
		};
		let tls = match config.tls {
			SmtpTls::Tls => Tls::Wrapper(tls_params()?),
			SmtpTls::StartTls => Tls::Required(tls_params()?),
			SmtpTls::None => Tls::None,
		};

		let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&*config.host)
			.port(config.port)
			.timeout(Some(config.timeout))
			.tls(tls);
		if let (Some(user), Some(pass)) = (&config.username, &config.password) {
			builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
		}
		Ok(Self { mailer: builder.build(), host: config.host.clone() })
	}

	/// The tracking id doubles as the local part of the Message-ID
	fn message_id(email: &OutboundEmail) -> String {
		let domain = email.from_email.rsplit_once('@').map_or("localhost", |(_, d)| d);
		format!("<{}@{}>", email.tracking_id, domain)
	}

	fn build_message(email: &OutboundEmail) -> Result<Message, String> {
		let from = match &email.from_name {
			Some(name) => format!("{} <{}>", name, email.from_email),
			None => email.from_email.to_string(),
		};
		Message::builder()
			.from(from.parse().map_err(|_| "invalid sender address".to_string())?)
			.to(email.to.parse().map_err(|_| format!("invalid recipient address: {}", email.to))?)
			.subject(&*email.subject)
			.message_id(Some(Self::message_id(email)))
			.header(ContentType::TEXT_HTML)
			.body(email.html_body.to_string())
			.map_err(|e| format!("failed to build email: {}", e))
	}
}

#[async_trait]
impl DeliveryProvider for SmtpProvider {
	fn name(&self) -> &'static str {
		"smtp"
	}

	async fn send(&self, email: &OutboundEmail) -> ClResult<ProviderResponse> {
		let message = match Self::build_message(email) {
			Ok(message) => message,
			Err(e) => return Ok(ProviderResponse::rejected(e)),
		};
		match self.mailer.send(message).await {
			Ok(response) if response.is_positive() => {
				debug!(tracking_id = %email.tracking_id, "Accepted by {}", self.host);
				Ok(ProviderResponse::accepted(Some(Self::message_id(email).into())))
			}
			Ok(response) => Ok(ProviderResponse::rejected(format!("SMTP {}", response.code()))),
			Err(e) if e.is_permanent() => Ok(ProviderResponse::rejected(e.to_string())),
			Err(e) => Err(Error::ProviderFailure(format!("SMTP send failed: {}", e))),
		}
	}
}


// vim: ts=4
