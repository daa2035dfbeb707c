//! Recipient upload
//!
//! Recipients arrive as CSV text with a header line, or as a JSON array of
//! objects. Every row must carry a non-empty `email` column.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::prelude::*;
use batchmail_types::recipient::{EMAIL_FIELD, RecipientRow, collect_fields};

#[derive(Debug, Serialize)]
pub struct UploadSummary {
	pub message: String,
	pub campaign_id: CampaignId,
	pub fields: Vec<Box<str>>,
	pub total_records: usize,
}

/// Parse CSV text into column names (header order) and rows
pub fn parse_csv(data: &[u8]) -> ClResult<(Vec<Box<str>>, Vec<RecipientRow>)> {
	let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(data);
	let headers: Vec<String> = reader
		.headers()
		.map_err(|e| Error::InvalidParameter(format!("unreadable CSV header: {}", e)))?
		.iter()
		.map(str::to_string)
		.collect();
	if !headers.iter().any(|h| h == EMAIL_FIELD) {
		return Err(Error::InvalidParameter("CSV has no email column".into()));
	}

	let mut rows = Vec::new();
	for (n, record) in reader.records().enumerate() {
		let record = record
			.map_err(|e| Error::InvalidParameter(format!("CSV record {}: {}", n + 1, e)))?;
		let fields: BTreeMap<String, String> =
			headers.iter().cloned().zip(record.iter().map(str::to_string)).collect();
		let row = RecipientRow::new(fields).map_err(|_| {
			Error::InvalidParameter(format!("CSV record {} has an empty email", n + 1))
		})?;
		rows.push(row);
	}
	Ok((headers.into_iter().map(String::into_boxed_str).collect(), rows))
}

/// Parse a JSON array of `{field: value}` objects
pub fn parse_json(data: &[u8]) -> ClResult<(Vec<Box<str>>, Vec<RecipientRow>)> {
	let maps: Vec<BTreeMap<String, serde_json::Value>> = serde_json::from_slice(data)
		.map_err(|e| Error::InvalidParameter(format!("recipient JSON: {}", e)))?;
	let maps: Vec<BTreeMap<String, String>> = maps
		.into_iter()
		.map(|m| {
			m.into_iter()
				.map(|(k, v)| {
					let v = match v {
						serde_json::Value::String(s) => s,
						serde_json::Value::Null => String::new(),
						other => other.to_string(),
					};
					(k, v)
				})
				.collect()
		})
		.collect();

	let fields = collect_fields(&maps);
	let rows = maps
		.into_iter()
		.enumerate()
		.map(|(n, m)| {
			RecipientRow::new(m).map_err(|_| {
				Error::InvalidParameter(format!("recipient {} has no email", n + 1))
			})
		})
		.collect::<ClResult<Vec<_>>>()?;
	Ok((fields, rows))
}

/// Store the uploaded recipients of a campaign, replacing earlier uploads
pub async fn upload(
	app: &App,
	campaign_id: CampaignId,
	fields: Vec<Box<str>>,
	rows: Vec<RecipientRow>,
) -> ClResult<UploadSummary> {
	app.recipients.store_recipients(&campaign_id, &fields, &rows).await?;
	info!(campaign_id = %campaign_id, "Stored {} recipients", rows.len());
	Ok(UploadSummary {
		message: "Recipients uploaded successfully".into(),
		campaign_id,
		fields,
		total_records: rows.len(),
	})
}


// vim: ts=4
