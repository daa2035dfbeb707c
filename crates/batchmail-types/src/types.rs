//! Common types used throughout Batchmail.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::prelude::*;

pub type JobId = u64;

// Timestamp //
//***********//
/// Seconds since the Unix epoch (UTC)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub i64);

impl Timestamp {
	pub fn now() -> Timestamp {
		let res = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
		Timestamp(i64::try_from(res.as_secs()).unwrap_or(i64::MAX))
	}

	pub fn from_now(seconds: i64) -> Timestamp {
		Timestamp(Self::now().0.saturating_add(seconds))
	}

	pub fn add_seconds(self, seconds: i64) -> Timestamp {
		Timestamp(self.0.saturating_add(seconds))
	}

	pub fn add_minutes(self, minutes: i64) -> Timestamp {
		self.add_seconds(minutes.saturating_mul(60))
	}

	/// RFC 3339 / ISO-8601 rendering in UTC
	pub fn to_iso(self) -> String {
		DateTime::<Utc>::from_timestamp(self.0, 0)
			.map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
			.unwrap_or_default()
	}

	/// Parse a schedule time.
	///
	/// Accepts RFC 3339 (`2025-03-01T09:30:00Z`) and the form used by the
	/// scheduling UI (`2025-03-01 09:30`, interpreted as UTC).
	pub fn parse(s: &str) -> ClResult<Timestamp> {
		let s = s.trim();
		if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
			return Ok(Timestamp(dt.timestamp()));
		}
		for fmt in ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S"] {
			if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
				return Ok(Timestamp(dt.and_utc().timestamp()));
			}
		}
		Err(Error::InvalidParameter(format!("malformed schedule time: {:?}", s)))
	}
}

impl std::fmt::Display for Timestamp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl Serialize for Timestamp {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_i64(self.0)
	}
}

impl<'de> Deserialize<'de> for Timestamp {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		Ok(Timestamp(i64::deserialize(deserializer)?))
	}
}

// CampaignId //
//************//
/// Identifier threaded through every store key so campaigns never share state
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(pub Box<str>);

impl CampaignId {
	pub fn new(id: impl Into<Box<str>>) -> ClResult<Self> {
		let id = id.into();
		if id.is_empty()
			|| id.len() > 64
			|| !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
		{
			return Err(Error::InvalidParameter(format!("invalid campaign id: {:?}", id)));
		}
		Ok(Self(id))
	}

	pub fn generate() -> Self {
		Self(uuid::Uuid::new_v4().simple().to_string().into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Display for CampaignId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_ui_format() {
		let ts = Timestamp::parse("2025-03-01 09:30").unwrap();
		assert_eq!(ts.to_iso(), "2025-03-01T09:30:00Z");
	}

	#[test]
	fn test_parse_rfc3339_with_offset() {
		let ts = Timestamp::parse("2025-03-01T11:30:00+02:00").unwrap();
		assert_eq!(ts.to_iso(), "2025-03-01T09:30:00Z");
	}

	#[test]
	fn test_parse_malformed() {
		assert!(matches!(Timestamp::parse("next tuesday"), Err(Error::InvalidParameter(_))));
		assert!(matches!(Timestamp::parse(""), Err(Error::InvalidParameter(_))));
	}

	#[test]
	fn test_add_minutes() {
		assert_eq!(Timestamp(1000).add_minutes(60), Timestamp(4600));
		assert_eq!(Timestamp(1000).add_minutes(0), Timestamp(1000));
	}

	#[test]
	fn test_campaign_id_validation() {
		assert!(CampaignId::new("spring-sale_2025").is_ok());
		assert!(CampaignId::new("").is_err());
		assert!(CampaignId::new("a/b").is_err());
		assert_eq!(CampaignId::generate().as_str().len(), 32);
	}
}

// vim: ts=4
