//! Placeholder substitution for campaign templates
//!
//! `{field}` is replaced by the recipient's value for `field`. Placeholders
//! without a matching field are left untouched, and substituted values are
//! never scanned again.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::prelude::*;
use batchmail_types::recipient::RecipientRow;

/// Substitute `{key}` placeholders from `fields`
pub fn render(template: &str, fields: &BTreeMap<String, String>) -> String {
	let mut out = String::with_capacity(template.len());
	let mut rest = template;
	while let Some(start) = rest.find('{') {
		out.push_str(&rest[..start]);
		let after = &rest[start + 1..];
		match after.find(['{', '}']) {
			Some(end) if after[end..].starts_with('}') => {
				let key = &after[..end];
				if let Some(value) = fields.get(key) {
					out.push_str(value);
				} else {
					out.push('{');
					out.push_str(key);
					out.push('}');
				}
				rest = &after[end + 1..];
			}
			// Unclosed, or another '{' before the closing brace
			_ => {
				out.push('{');
				rest = after;
			}
		}
	}
	out.push_str(rest);
	out
}

/// Subject and body template of a campaign
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
	pub subject: String,
	pub body: String,
}

impl Template {
	pub fn new(subject: impl Into<String>, body: impl Into<String>) -> ClResult<Self> {
		let (subject, body) = (subject.into(), body.into());
		if subject.trim().is_empty() {
			return Err(Error::InvalidParameter("subject is empty".into()));
		}
		if body.trim().is_empty() {
			return Err(Error::InvalidParameter("body template is empty".into()));
		}
		Ok(Self { subject, body })
	}

	/// Rendered `(subject, body)` for one recipient
	pub fn render_for(&self, row: &RecipientRow) -> (String, String) {
		(render(&self.subject, row.fields()), render(&self.body, row.fields()))
	}
}


// vim: ts=4
