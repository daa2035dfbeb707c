//! SQLite store tests
//!
//! Records, jobs and recipients against a real database file

use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

use batchmail_store_adapter_sqlite::StoreAdapterSqlite;
use batchmail_types::error::Error;
use batchmail_types::job_adapter::{JobStatus, JobStore, ListJobOptions};
use batchmail_types::recipient::{RecipientRow, RecipientSource};
use batchmail_types::status_adapter::{
	DeliveryStatus, LifecycleStatus, ListMessageOptions, MessageRecord, StatusStore,
};
use batchmail_types::types::{CampaignId, Timestamp};

async fn create_test_adapter() -> (StoreAdapterSqlite, TempDir) {
	let temp_dir = TempDir::new().expect("Failed to create temp directory");
	let adapter = StoreAdapterSqlite::new(temp_dir.path().join("batchmail.db"))
		.await
		.expect("Failed to create adapter");
	(adapter, temp_dir)
}

fn record(tracking_id: &str, campaign: &str, batch_index: u32) -> MessageRecord {
	MessageRecord {
		tracking_id: tracking_id.into(),
		campaign_id: CampaignId::new(campaign).unwrap(),
		batch_index,
		to_email: format!("{}@example.com", tracking_id).into(),
		subject: "Hello".into(),
		status: LifecycleStatus::Sent,
		delivery_status: DeliveryStatus::Pending,
		scheduled_at: Timestamp(1_000),
		sent_at: Some(Timestamp(1_010)),
		provider_message_id: Some("pm-1".into()),
		error: None,
	}
}

// Status records
//****************
#[tokio::test]
async fn test_message_create_read_update() {
	let (store, _temp) = create_test_adapter().await;
	let rec = record("t1", "spring", 0);
	store.create_message(&rec).await.unwrap();
	assert_eq!(store.read_message("t1").await.unwrap(), rec);

	assert!(matches!(store.create_message(&rec).await, Err(Error::Conflict(_))));

	assert!(store.update_delivery_status("t1", &DeliveryStatus::Opened).await.unwrap());
	assert_eq!(store.read_message("t1").await.unwrap().delivery_status, DeliveryStatus::Opened);

	assert!(
		store
			.update_delivery_status("t1", &DeliveryStatus::from_event("spamreport"))
			.await
			.unwrap()
	);
	assert_eq!(
		store.read_message("t1").await.unwrap().delivery_status,
		DeliveryStatus::Other("spamreport".into())
	);
}

#[tokio::test]
async fn test_unknown_tracking_id_changes_nothing() {
	let (store, _temp) = create_test_adapter().await;
	store.create_message(&record("t1", "spring", 0)).await.unwrap();
	let before = store.list_messages(&ListMessageOptions::default()).await.unwrap();

	assert!(!store.update_delivery_status("nope", &DeliveryStatus::Delivered).await.unwrap());
	assert_eq!(store.list_messages(&ListMessageOptions::default()).await.unwrap(), before);
	assert!(matches!(store.read_message("nope").await, Err(Error::NotFound)));
}

#[tokio::test]
async fn test_list_messages_filters() {
	let (store, _temp) = create_test_adapter().await;
	store.create_message(&record("a1", "a", 0)).await.unwrap();
	store.create_message(&record("a2", "a", 1)).await.unwrap();
	let mut failed = record("a3", "a", 1);
	failed.status = LifecycleStatus::Failed;
	failed.sent_at = None;
	failed.error = Some("provider failure: rejected".into());
	store.create_message(&failed).await.unwrap();
	store.create_message(&record("b1", "b", 0)).await.unwrap();

	let campaign_a = CampaignId::new("a").unwrap();
	let all_a = store.list_messages(&ListMessageOptions::campaign(&campaign_a)).await.unwrap();
	let ids: Vec<&str> = all_a.iter().map(|r| &*r.tracking_id).collect();
	assert_eq!(ids, vec!["a1", "a2", "a3"]);

	let opts = ListMessageOptions { batch_index: Some(1), ..ListMessageOptions::campaign(&campaign_a) };
	assert_eq!(store.list_messages(&opts).await.unwrap().len(), 2);

	let opts = ListMessageOptions { status: Some(LifecycleStatus::Failed), ..Default::default() };
	let failed_list = store.list_messages(&opts).await.unwrap();
	assert_eq!(failed_list, vec![failed]);

	let opts = ListMessageOptions { to_email: Some("b1@example.com".into()), ..Default::default() };
	assert_eq!(store.list_messages(&opts).await.unwrap().len(), 1);
}

// Jobs
//******
#[tokio::test]
async fn test_job_lifecycle() {
	let (store, _temp) = create_test_adapter().await;
	let job_id = store
		.schedule("campaign.dispatch_batch", Some("campaign:a:batch:0"), "{}", Timestamp(100))
		.await
		.unwrap();

	let found = store.find_by_key("campaign:a:batch:0").await.unwrap().unwrap();
	assert_eq!(found.job_id, job_id);
	assert_eq!(found.status, JobStatus::Pending);

	store.reschedule(job_id, r#"{"v":2}"#, Timestamp(200)).await.unwrap();
	assert_eq!(store.next_fire_at().await.unwrap(), Some(Timestamp(200)));

	// Not due yet
	assert!(store.claim_due_jobs("w1", Timestamp(150), 10).await.unwrap().is_empty());

	let claimed = store.claim_due_jobs("w1", Timestamp(200), 10).await.unwrap();
	assert_eq!(claimed.len(), 1);
	assert_eq!(&*claimed[0].input, r#"{"v":2}"#);
	assert_eq!(claimed[0].status, JobStatus::Running);
	assert_eq!(claimed[0].claimed_by.as_deref(), Some("w1"));
	assert_eq!(claimed[0].attempts, 1);
	assert_eq!(store.next_fire_at().await.unwrap(), None);

	assert!(matches!(
		store.reschedule(job_id, "{}", Timestamp(300)).await,
		Err(Error::Conflict(_))
	));
	assert!(!store.claim(job_id, "w2", Timestamp(201)).await.unwrap());

	store.mark(job_id, JobStatus::Failed, Some("boom")).await.unwrap();
	let job = store.read_job(job_id).await.unwrap();
	assert_eq!(job.status, JobStatus::Failed);
	assert_eq!(job.error.as_deref(), Some("boom"));
	let found = store.find_by_key("campaign:a:batch:0").await.unwrap().unwrap();
	assert_eq!((found.job_id, found.status), (job_id, JobStatus::Failed));

	store.requeue(job_id, Timestamp(0)).await.unwrap();
	assert_eq!(store.read_job(job_id).await.unwrap().status, JobStatus::Pending);
	assert!(store.claim(job_id, "w2", Timestamp(300)).await.unwrap());
	assert_eq!(store.read_job(job_id).await.unwrap().attempts, 2);

	assert!(matches!(store.claim(9_999, "w2", Timestamp(300)).await, Err(Error::NotFound)));
	assert!(matches!(store.read_job(9_999).await, Err(Error::NotFound)));
}

#[tokio::test]
async fn test_cancel_rules() {
	let (store, _temp) = create_test_adapter().await;
	let pending = store.schedule("k", None, "{}", Timestamp(100)).await.unwrap();
	let running = store.schedule("k", None, "{}", Timestamp(100)).await.unwrap();
	assert!(store.claim(running, "w", Timestamp(100)).await.unwrap());

	assert!(store.cancel(pending).await.unwrap());
	assert!(!store.cancel(pending).await.unwrap());
	assert!(matches!(store.cancel(running).await, Err(Error::Conflict(_))));
	assert!(matches!(store.read_job(pending).await, Err(Error::NotFound)));
}

#[tokio::test]
async fn test_requeue_and_reclaim_stale() {
	let (store, _temp) = create_test_adapter().await;
	let old = store.schedule("k", None, "{}", Timestamp(0)).await.unwrap();
	let fresh = store.schedule("k", None, "{}", Timestamp(0)).await.unwrap();
	assert!(store.claim(old, "w", Timestamp(100)).await.unwrap());
	assert!(store.claim(fresh, "w", Timestamp(500)).await.unwrap());

	// A Running job with a recent claim cannot be requeued by hand
	assert!(matches!(store.requeue(fresh, Timestamp(200)).await, Err(Error::Conflict(_))));

	let reclaimed = store.reclaim_stale(Timestamp(200)).await.unwrap();
	assert_eq!(reclaimed, vec![old]);
	let job = store.read_job(old).await.unwrap();
	assert_eq!(job.status, JobStatus::Pending);
	assert_eq!(job.claimed_at, None);
	assert_eq!(store.read_job(fresh).await.unwrap().status, JobStatus::Running);
}

#[tokio::test]
async fn test_list_jobs_by_prefix() {
	let (store, _temp) = create_test_adapter().await;
	store.schedule("k", Some("campaign:a_1:batch:0"), "{}", Timestamp(0)).await.unwrap();
	store.schedule("k", Some("campaign:a_1:batch:1"), "{}", Timestamp(0)).await.unwrap();
	// `_` must not act as a wildcard
	store.schedule("k", Some("campaign:ax1:batch:0"), "{}", Timestamp(0)).await.unwrap();
	store.schedule("k", None, "{}", Timestamp(0)).await.unwrap();

	let opts = ListJobOptions { key_prefix: Some("campaign:a_1:".into()), status: None };
	assert_eq!(store.list_jobs(&opts).await.unwrap().len(), 2);
	assert_eq!(store.list_jobs(&ListJobOptions::default()).await.unwrap().len(), 4);
	let opts = ListJobOptions { key_prefix: None, status: Some(JobStatus::Done) };
	assert!(store.list_jobs(&opts).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_have_single_winner() {
	let (store, _temp) = create_test_adapter().await;
	let store = Arc::new(store);
	for i in 0..20 {
		store.schedule("k", None, "{}", Timestamp(i)).await.unwrap();
	}

	let mut handles = Vec::new();
	for w in 0..4 {
		let store = store.clone();
		handles.push(tokio::spawn(async move {
			store.claim_due_jobs(&format!("w{}", w), Timestamp(1_000), 10).await.unwrap()
		}));
	}
	let mut seen = HashSet::new();
	for handle in handles {
		for job in handle.await.unwrap() {
			assert!(seen.insert(job.job_id), "job {} claimed twice", job.job_id);
		}
	}
	assert_eq!(seen.len(), 20);
}

#[tokio::test]
async fn test_state_survives_reopen() {
	let temp_dir = TempDir::new().unwrap();
	let path = temp_dir.path().join("batchmail.db");
	let campaign = CampaignId::new("spring").unwrap();

	let (job_id, fields) = {
		let store = StoreAdapterSqlite::new(&path).await.unwrap();
		store.create_message(&record("t1", "spring", 0)).await.unwrap();
		let job_id =
			store.schedule("k", Some("campaign:spring:batch:1"), "{}", Timestamp(5_000)).await.unwrap();
		let fields: Vec<Box<str>> = vec!["email".into(), "name".into()];
		let rows = vec![
			RecipientRow::from_pairs([("email", "ann@example.com"), ("name", "Ann")]).unwrap(),
			RecipientRow::from_pairs([("email", "bob@example.com"), ("name", "Bob")]).unwrap(),
		];
		store.store_recipients(&campaign, &fields, &rows).await.unwrap();
		store.close().await;
		(job_id, fields)
	};

	let store = StoreAdapterSqlite::new(&path).await.unwrap();
	assert_eq!(store.read_message("t1").await.unwrap().campaign_id, campaign);
	let job = store.read_job(job_id).await.unwrap();
	assert_eq!(job.status, JobStatus::Pending);
	assert_eq!(job.fire_at, Timestamp(5_000));
	assert_eq!(store.fields(&campaign).await.unwrap(), fields);
	let rows = store.rows(&campaign).await.unwrap();
	assert_eq!(rows.len(), 2);
	assert_eq!(rows[1].get("name"), Some("Bob"));

	let claimed = store.claim_due_jobs("after-restart", Timestamp(5_000), 10).await.unwrap();
	assert_eq!(claimed.len(), 1);
	assert_eq!(claimed[0].job_id, job_id);
}

// Recipients
//************
#[tokio::test]
async fn test_recipients_replace_and_preview() {
	let (store, _temp) = create_test_adapter().await;
	let campaign = CampaignId::new("c").unwrap();
	let rows: Vec<RecipientRow> = (0..7)
		.map(|i| RecipientRow::from_pairs([("email", format!("r{}@example.com", i))]).unwrap())
		.collect();
	let fields: Vec<Box<str>> = vec!["email".into()];

	store.store_recipients(&campaign, &fields, &rows).await.unwrap();
	let preview = store.preview(&campaign, 3).await.unwrap();
	assert_eq!(preview, rows[..3].to_vec());

	store.store_recipients(&campaign, &fields, &rows[..2]).await.unwrap();
	assert_eq!(store.rows(&campaign).await.unwrap(), rows[..2].to_vec());

	assert!(matches!(
		store.store_recipients(&campaign, &fields, &[]).await,
		Err(Error::InvalidParameter(_))
	));

	let unknown = CampaignId::new("unknown").unwrap();
	assert!(store.rows(&unknown).await.unwrap().is_empty());
	assert!(store.fields(&unknown).await.unwrap().is_empty());
}

// vim: ts=4
