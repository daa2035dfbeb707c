//! Misc helpers

use crate::types::CampaignId;

/// Fresh globally unique tracking id for one message
pub fn new_tracking_id() -> Box<str> {
	uuid::Uuid::new_v4().to_string().into()
}

/// Job key of one campaign batch
pub fn batch_job_key(campaign_id: &CampaignId, batch_index: u32) -> String {
	format!("campaign:{}:batch:{}", campaign_id, batch_index)
}

/// Key prefix shared by every batch job of a campaign
pub fn campaign_job_prefix(campaign_id: &CampaignId) -> String {
	format!("campaign:{}:", campaign_id)
}

/// Shorten `s` to at most `max` bytes on a char boundary
pub fn truncate(s: &str, max: usize) -> &str {
	if s.len() <= max {
		return s;
	}
	let mut end = max;
	while !s.is_char_boundary(end) {
		end -= 1;
	}
	&s[..end]
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_tracking_ids_are_unique() {
		assert_ne!(new_tracking_id(), new_tracking_id());
	}

	#[test]
	fn test_job_keys() {
		let id = CampaignId::new("spring").unwrap();
		assert_eq!(batch_job_key(&id, 2), "campaign:spring:batch:2");
		assert!(batch_job_key(&id, 2).starts_with(&campaign_job_prefix(&id)));
	}

	#[test]
	fn test_truncate() {
		assert_eq!(truncate("hello", 10), "hello");
		assert_eq!(truncate("hello", 3), "hel");
		assert_eq!(truncate("héllo", 2), "h");
	}
}

// vim: ts=4
