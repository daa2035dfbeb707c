//! Delivery provider adapter. Implementations live in `batchmail-email`.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt::Debug;

use crate::prelude::*;

/// A fully rendered message ready to hand to a provider
#[derive(Clone, Debug)]
pub struct OutboundEmail {
	pub from_email: Box<str>,
	pub from_name: Option<Box<str>>,
	pub to: Box<str>,
	pub subject: Box<str>,
	pub html_body: Box<str>,
	/// Provider-level metadata so webhook events can be correlated back
	pub tracking_id: Box<str>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ProviderResponse {
	pub accepted: bool,
	pub provider_message_id: Option<Box<str>>,
	pub error: Option<Box<str>>,
}

impl ProviderResponse {
	pub fn accepted(provider_message_id: Option<Box<str>>) -> Self {
		Self { accepted: true, provider_message_id, error: None }
	}

	pub fn rejected(error: impl Into<Box<str>>) -> Self {
		Self { accepted: false, provider_message_id: None, error: Some(error.into()) }
	}
}

#[async_trait]
pub trait DeliveryProvider: Debug + Send + Sync {
	fn name(&self) -> &'static str;

	/// Hand one message to the provider.
	///
	/// Transport errors are returned as `Err`; a provider that answered but
	/// refused the message yields `Ok` with `accepted == false`.
	async fn send(&self, email: &OutboundEmail) -> ClResult<ProviderResponse>;
}

// vim: ts=4
