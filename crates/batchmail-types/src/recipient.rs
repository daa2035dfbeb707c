//! Recipient rows and the adapter that supplies them per campaign.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::prelude::*;

pub const EMAIL_FIELD: &str = "email";

/// One recipient: field name -> value. Always carries a non-empty `email` field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct RecipientRow {
	fields: BTreeMap<String, String>,
}

impl RecipientRow {
	pub fn new(fields: BTreeMap<String, String>) -> ClResult<Self> {
		match fields.get(EMAIL_FIELD) {
			Some(email) if !email.trim().is_empty() => Ok(Self { fields }),
			_ => Err(Error::InvalidParameter("recipient row has no email field".into())),
		}
	}

	/// Build a row from `(field, value)` pairs
	pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> ClResult<Self>
	where
		K: Into<String>,
		V: Into<String>,
	{
		Self::new(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
	}

	pub fn email(&self) -> &str {
		self.fields.get(EMAIL_FIELD).map_or("", |e| e.trim())
	}

	pub fn get(&self, field: &str) -> Option<&str> {
		self.fields.get(field).map(String::as_str)
	}

	pub fn fields(&self) -> &BTreeMap<String, String> {
		&self.fields
	}
}

impl TryFrom<BTreeMap<String, String>> for RecipientRow {
	type Error = Error;

	fn try_from(fields: BTreeMap<String, String>) -> ClResult<Self> {
		Self::new(fields)
	}
}

impl From<RecipientRow> for BTreeMap<String, String> {
	fn from(row: RecipientRow) -> Self {
		row.fields
	}
}

/// Supplies the ordered recipient rows of a campaign
#[async_trait]
pub trait RecipientSource: Debug + Send + Sync {
	/// Replace the recipient rows of a campaign. `fields` is the column order.
	async fn store_recipients(
		&self,
		campaign_id: &CampaignId,
		fields: &[Box<str>],
		rows: &[RecipientRow],
	) -> ClResult<()>;

	/// Rows in upload order. Unknown campaign yields an empty list.
	async fn rows(&self, campaign_id: &CampaignId) -> ClResult<Vec<RecipientRow>>;

	/// Column names in upload order
	async fn fields(&self, campaign_id: &CampaignId) -> ClResult<Vec<Box<str>>>;

	/// First `limit` rows of a campaign
	async fn preview(&self, campaign_id: &CampaignId, limit: usize) -> ClResult<Vec<RecipientRow>> {
		let mut rows = self.rows(campaign_id).await?;
		rows.truncate(limit);
		Ok(rows)
	}
}

/// Column names in first-seen order across `rows`
pub fn collect_fields(rows: &[BTreeMap<String, String>]) -> Vec<Box<str>> {
	let mut fields: Vec<Box<str>> = Vec::new();
	for row in rows {
		for key in row.keys() {
			if !fields.iter().any(|f| f.as_ref() == key) {
				fields.push(key.as_str().into());
			}
		}
	}
	fields
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_row_requires_email() {
		assert!(RecipientRow::from_pairs([("name", "Ann")]).is_err());
		assert!(RecipientRow::from_pairs([("email", "  ")]).is_err());
		let row = RecipientRow::from_pairs([("email", "ann@example.com"), ("name", "Ann")]).unwrap();
		assert_eq!(row.email(), "ann@example.com");
		assert_eq!(row.get("name"), Some("Ann"));
	}

	#[test]
	fn test_row_deserialize_rejects_missing_email() {
		let res: Result<RecipientRow, _> = serde_json::from_str(r#"{"name":"Ann"}"#);
		assert!(res.is_err());
		let row: RecipientRow =
			serde_json::from_str(r#"{"email":"ann@example.com","company":"Acme"}"#).unwrap();
		assert_eq!(row.get("company"), Some("Acme"));
	}

	#[test]
	fn test_collect_fields() {
		let rows = vec![
			BTreeMap::from([("email".to_string(), "a@x".to_string())]),
			BTreeMap::from([
				("email".to_string(), "b@x".to_string()),
				("city".to_string(), "Oslo".to_string()),
			]),
		];
		let fields = collect_fields(&rows);
		assert_eq!(fields.len(), 2);
		assert!(fields.iter().any(|f| f.as_ref() == "city"));
	}
}

// vim: ts=4
