//! Batch planner
//!
//! Splits the ordered recipient list into consecutive chunks. Membership and
//! send times are a pure function of the input order: the first `batch_size`
//! rows form batch 0, sent at `start`, the next chunk is batch 1, sent
//! `interval_minutes` later, and so on.

use crate::prelude::*;
use batchmail_types::batch::Batch;
use batchmail_types::recipient::RecipientRow;

pub fn plan(
	recipients: Vec<RecipientRow>,
	batch_size: i64,
	start: Timestamp,
	interval_minutes: i64,
) -> ClResult<Vec<Batch>> {
	if batch_size <= 0 {
		return Err(Error::InvalidParameter(format!(
			"batch_size must be positive, got {}",
			batch_size
		)));
	}
	if interval_minutes < 0 {
		return Err(Error::InvalidParameter(format!(
			"interval_minutes must not be negative, got {}",
			interval_minutes
		)));
	}
	let size = usize::try_from(batch_size).unwrap_or(usize::MAX);

	let mut batches = Vec::with_capacity(recipients.len().div_ceil(size));
	let mut rows = recipients.into_iter().peekable();
	let mut index: u32 = 0;
	while rows.peek().is_some() {
		let chunk: Vec<RecipientRow> = rows.by_ref().take(size).collect();
		let fire_at = start.add_minutes(interval_minutes.saturating_mul(i64::from(index)));
		batches.push(Batch { index, fire_at, recipients: chunk });
		index = index
			.checked_add(1)
			.ok_or_else(|| Error::InvalidParameter("too many batches".into()))?;
	}
	Ok(batches)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn recipients(n: usize) -> Vec<RecipientRow> {
		(0..n)
			.map(|i| RecipientRow::from_pairs([("email", format!("r{}@example.com", i))]).unwrap())
			.collect()
	}

	#[test]
	fn test_plan_partitions_in_order() {
		for (n, b) in [(0, 1), (1, 1), (7, 3), (9, 3), (10, 50), (120, 50), (5, 1)] {
			let input = recipients(n);
			let batches = plan(input.clone(), b, Timestamp(0), 1).unwrap();
			let b = usize::try_from(b).unwrap();
			assert_eq!(batches.len(), n.div_ceil(b), "n={} b={}", n, b);
			for (i, batch) in batches.iter().enumerate() {
				assert_eq!(batch.index as usize, i);
				assert_eq!(batch.len(), b.min(n - i * b));
			}
			let flat: Vec<RecipientRow> =
				batches.into_iter().flat_map(|batch| batch.recipients).collect();
			assert_eq!(flat, input);
		}
	}

	#[test]
	fn test_plan_fire_times() {
		let start = Timestamp(1_700_000_000);
		let batches = plan(recipients(120), 50, start, 60).unwrap();
		let times: Vec<Timestamp> = batches.iter().map(|b| b.fire_at).collect();
		assert_eq!(times, vec![start, start.add_minutes(60), start.add_minutes(120)]);
		let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
		assert_eq!(sizes, vec![50, 50, 20]);
	}

	#[test]
	fn test_plan_zero_interval() {
		let batches = plan(recipients(4), 2, Timestamp(50), 0).unwrap();
		assert!(batches.iter().all(|b| b.fire_at == Timestamp(50)));
	}

	#[test]
	fn test_plan_empty_is_not_an_error() {
		assert!(plan(Vec::new(), 10, Timestamp(0), 5).unwrap().is_empty());
	}

	#[test]
	fn test_plan_rejects_bad_parameters() {
		assert!(matches!(plan(recipients(3), 0, Timestamp(0), 1), Err(Error::InvalidParameter(_))));
		assert!(matches!(plan(recipients(3), -5, Timestamp(0), 1), Err(Error::InvalidParameter(_))));
		assert!(matches!(plan(recipients(3), 1, Timestamp(0), -1), Err(Error::InvalidParameter(_))));
	}
}

// vim: ts=4
