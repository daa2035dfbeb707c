//! Scheduler subsystem. Durable, claim-based execution of future-dated jobs.
//!
//! Jobs live in a [`JobStore`]; any number of workers (in this process or in
//! others sharing the store) poll for due jobs and claim them atomically, so a
//! job transitions into Running exactly once. A job that stays Running past the
//! liveness threshold can be put back to Pending by an operator (`retry`) or,
//! when enabled, by the stale reaper.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::{collections::HashMap, fmt::Debug, sync::Arc, time::Duration};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::prelude::*;
use batchmail_types::job_adapter::{JobData, JobStatus, JobStore, ListJobOptions};

/// Shortest sleep between polls, keeps a worker from spinning on a job it lost
const MIN_WAIT: Duration = Duration::from_millis(100);

#[async_trait]
pub trait Task<S: Clone>: Send + Sync + Debug {
	fn kind() -> &'static str
	where
		Self: Sized;
	fn build(id: JobId, context: &str) -> ClResult<Arc<dyn Task<S>>>
	where
		Self: Sized;
	fn serialize(&self) -> String;
	async fn run(&self, state: &S) -> ClResult<()>;

	fn kind_of(&self) -> &'static str;
}

type TaskBuilder<S> = dyn Fn(JobId, &str) -> ClResult<Arc<dyn Task<S>>> + Send + Sync;
type TaskBuilderRegistry<S> = HashMap<&'static str, Box<TaskBuilder<S>>>;

#[derive(Clone, Debug)]
pub struct SchedulerOpts {
	/// Number of concurrent worker loops
	pub workers: usize,
	/// Upper bound on the sleep between polls
	pub poll_interval: Duration,
	/// Jobs claimed per poll by one worker
	pub claim_limit: u32,
	/// A Running job claimed longer ago than this is considered stale
	pub stale_after: Duration,
	/// Requeue stale jobs automatically instead of waiting for an operator retry
	pub auto_reclaim: bool,
}

impl Default for SchedulerOpts {
	fn default() -> Self {
		Self {
			workers: 4,
			poll_interval: Duration::from_secs(5),
			claim_limit: 1,
			stale_after: Duration::from_secs(900),
			auto_reclaim: false,
		}
	}
}

// JobSchedulerBuilder - Fluent API for job scheduling
//*****************************************************
pub struct JobSchedulerBuilder<'a, S: Clone> {
	scheduler: &'a Scheduler<S>,
	task: Arc<dyn Task<S>>,
	key: Option<String>,
	fire_at: Option<Timestamp>,
}

impl<'a, S: Clone + Send + Sync + 'static> JobSchedulerBuilder<'a, S> {
	fn new(scheduler: &'a Scheduler<S>, task: Arc<dyn Task<S>>) -> Self {
		Self { scheduler, task, key: None, fire_at: None }
	}

	/// Set a string key for job identification and deduplication
	pub fn key(mut self, key: impl Into<String>) -> Self {
		self.key = Some(key.into());
		self
	}

	/// Schedule for a specific absolute timestamp
	pub fn schedule_at(mut self, timestamp: Timestamp) -> Self {
		self.fire_at = Some(timestamp);
		self
	}

	/// Schedule after a relative delay (in seconds)
	pub fn schedule_after(mut self, seconds: i64) -> Self {
		self.fire_at = Some(Timestamp::from_now(seconds));
		self
	}

	/// Run as soon as a worker is free
	pub async fn now(self) -> ClResult<JobId> {
		self.schedule().await
	}

	/// Run at a specific timestamp. A timestamp in the past runs promptly.
	pub async fn at(mut self, ts: Timestamp) -> ClResult<JobId> {
		self.fire_at = Some(ts);
		self.schedule().await
	}

	/// Run after a delay (in seconds)
	pub async fn after(mut self, seconds: i64) -> ClResult<JobId> {
		self.fire_at = Some(Timestamp::from_now(seconds));
		self.schedule().await
	}

	/// Persist the job with all configured options - main terminal method
	pub async fn schedule(self) -> ClResult<JobId> {
		self.scheduler.schedule_job_impl(self.task, self.key.as_deref(), self.fire_at).await
	}
}

/// Health status of the scheduler
#[derive(Debug, Clone, serde::Serialize)]
pub struct SchedulerHealth {
	/// Worker loops started by this process
	pub workers: usize,
	/// Jobs currently executing in this process
	pub running: usize,
	/// Pending jobs in the store
	pub pending: usize,
	/// Running jobs whose claim is older than the liveness threshold
	pub stale: usize,
}

// Scheduler
#[derive(Clone)]
pub struct Scheduler<S: Clone> {
	task_builders: Arc<RwLock<TaskBuilderRegistry<S>>>,
	store: Arc<dyn JobStore>,
	opts: SchedulerOpts,
	instance: Box<str>,
	jobs_running: Arc<Mutex<HashMap<JobId, Timestamp>>>,
	workers_started: Arc<Mutex<usize>>,
	notify_schedule: Arc<Notify>,
	shutdown: CancellationToken,
}

impl<S: Clone + Send + Sync + 'static> Scheduler<S> {
	pub fn new(store: Arc<dyn JobStore>, opts: SchedulerOpts) -> Arc<Self> {
		let instance = uuid::Uuid::new_v4().simple().to_string();
		Arc::new(Self {
			task_builders: Arc::new(RwLock::new(HashMap::new())),
			store,
			opts,
			instance: instance[..8].into(),
			jobs_running: Arc::new(Mutex::new(HashMap::new())),
			workers_started: Arc::new(Mutex::new(0)),
			notify_schedule: Arc::new(Notify::new()),
			shutdown: CancellationToken::new(),
		})
	}

	pub fn opts(&self) -> &SchedulerOpts {
		&self.opts
	}

	pub fn store(&self) -> &Arc<dyn JobStore> {
		&self.store
	}

	/// Spawn the worker loops (and the stale reaper if enabled)
	pub fn start(&self, state: S) {
		let workers = self.opts.workers.max(1);
		for n in 0..workers {
			let schedule = self.clone();
			let state = state.clone();
			let worker: Box<str> = format!("{}-{}", self.instance, n).into();
			tokio::spawn(async move {
				schedule.worker_loop(state, worker).await;
			});
		}
		*self.workers_started.lock() += workers;
		info!("Scheduler started with {} workers", workers);

		if self.opts.auto_reclaim {
			let schedule = self.clone();
			tokio::spawn(async move {
				schedule.reaper_loop().await;
			});
		}
	}

	/// Stop all worker loops. Jobs already executing run to completion.
	pub fn shutdown(&self) {
		self.shutdown.cancel();
	}

	pub fn register<T: Task<S> + 'static>(&self) -> ClResult<&Self> {
		info!("Registering task type {}", T::kind());
		self.task_builders
			.write()
			.insert(T::kind(), Box::new(|id: JobId, params: &str| T::build(id, params)));
		Ok(self)
	}

	/// Create a builder for scheduling a job using the fluent API
	pub fn task(&self, task: Arc<dyn Task<S>>) -> JobSchedulerBuilder<'_, S> {
		JobSchedulerBuilder::new(self, task)
	}

	pub async fn add(&self, task: Arc<dyn Task<S>>) -> ClResult<JobId> {
		self.task(task).now().await
	}

	async fn schedule_job_impl(
		&self,
		task: Arc<dyn Task<S>>,
		key: Option<&str>,
		fire_at: Option<Timestamp>,
	) -> ClResult<JobId> {
		let fire_at = fire_at.unwrap_or_else(Timestamp::now);
		let input = task.serialize();

		// Key-based deduplication
		if let Some(key) = key {
			if let Some(existing) = self.store.find_by_key(key).await? {
				if existing.status == JobStatus::Running {
					warn!(job_id = existing.job_id, key = %key, "Job is running, cannot replace");
					return Err(Error::SchedulerConflict(existing.job_id));
				}
				// A finished job is only re-run through `retry`
				if existing.input.as_ref() == input {
					info!(job_id = existing.job_id, key = %key, "Job already scheduled with identical input");
					return Ok(existing.job_id);
				}
				if existing.status == JobStatus::Pending {
					info!(job_id = existing.job_id, key = %key, "Replacing pending job, input changed");
					self.store.reschedule(existing.job_id, &input, fire_at).await?;
					self.notify_schedule.notify_one();
					return Ok(existing.job_id);
				}
			}
		}

		let id = self.store.schedule(task.kind_of(), key, &input, fire_at).await?;
		debug!(job_id = id, kind = task.kind_of(), "Scheduled job for {}", fire_at);
		self.notify_schedule.notify_one();
		Ok(id)
	}

	/// Cancel a Pending job. Running jobs cannot be cancelled.
	pub async fn cancel(&self, job_id: JobId) -> ClResult<()> {
		if self.store.cancel(job_id).await? {
			info!(job_id = job_id, "Cancelled job");
			Ok(())
		} else {
			Err(Error::NotFound)
		}
	}

	/// Cancel every Pending job whose key starts with `key_prefix`. Returns the number cancelled.
	pub async fn cancel_by_prefix(&self, key_prefix: &str) -> ClResult<usize> {
		let opts =
			ListJobOptions { key_prefix: Some(key_prefix.into()), status: Some(JobStatus::Pending) };
		let mut cancelled = 0;
		for job in self.store.list_jobs(&opts).await? {
			match self.store.cancel(job.job_id).await {
				Ok(true) => cancelled += 1,
				Ok(false) => (),
				// Claimed between listing and cancelling
				Err(Error::Conflict(_)) => debug!(job_id = job.job_id, "Job claimed before cancel"),
				Err(e) => return Err(e),
			}
		}
		Ok(cancelled)
	}

	/// Operator retry: requeue a Failed job or a Running job past the liveness threshold
	pub async fn retry(&self, job_id: JobId) -> ClResult<()> {
		self.store.requeue(job_id, self.stale_before()).await?;
		info!(job_id = job_id, "Requeued job");
		self.notify_schedule.notify_one();
		Ok(())
	}

	fn stale_before(&self) -> Timestamp {
		let secs = i64::try_from(self.opts.stale_after.as_secs()).unwrap_or(i64::MAX);
		Timestamp::from_now(-secs)
	}

	/// Claim and execute due jobs until none are left. Returns the number executed.
	pub async fn run_due(&self, state: &S, worker: &str) -> ClResult<usize> {
		let mut executed = 0;
		loop {
			let jobs =
				self.store.claim_due_jobs(worker, Timestamp::now(), self.opts.claim_limit).await?;
			if jobs.is_empty() {
				return Ok(executed);
			}
			for job in jobs {
				self.execute(state, job).await;
				executed += 1;
			}
		}
	}

	fn build_task(&self, job: &JobData) -> ClResult<Arc<dyn Task<S>>> {
		let builders = self.task_builders.read();
		let builder = builders
			.get(job.kind.as_ref())
			.ok_or_else(|| Error::Internal(format!("task builder not registered: {}", job.kind)))?;
		builder(job.job_id, &job.input)
	}

	async fn execute(&self, state: &S, job: JobData) {
		let id = job.job_id;
		let task = match self.build_task(&job) {
			Ok(task) => task,
			Err(e) => {
				error!(job_id = id, "Cannot build job {}: {}", job.kind, e);
				if let Err(e) = self.store.mark(id, JobStatus::Failed, Some(&e.to_string())).await {
					error!(job_id = id, "Failed to mark job as failed: {}", e);
				}
				return;
			}
		};

		debug!(job_id = id, kind = %job.kind, attempt = job.attempts, "Running job");
		self.jobs_running.lock().insert(id, Timestamp::now());
		let st = state.clone();
		// Run on its own task so a panic ends up as a failed job instead of a dead worker
		let res = tokio::spawn(async move { task.run(&st).await }).await;
		self.jobs_running.lock().remove(&id);

		let (status, output) = match res {
			Ok(Ok(())) => {
				debug!(job_id = id, "Job completed successfully");
				(JobStatus::Done, None)
			}
			Ok(Err(e)) => {
				error!(job_id = id, "Job failed: {}", e);
				(JobStatus::Failed, Some(e.to_string()))
			}
			Err(e) => {
				error!(job_id = id, "Job aborted: {}", e);
				(JobStatus::Failed, Some(format!("job aborted: {}", e)))
			}
		};
		if let Err(e) = self.store.mark(id, status, output.as_deref()).await {
			error!(job_id = id, "Failed to record job state {:?}: {}", status, e);
		}
	}

	async fn next_wait(&self) -> Duration {
		let poll = self.opts.poll_interval;
		match self.store.next_fire_at().await {
			Ok(Some(next)) => {
				let diff = u64::try_from(next.0 - Timestamp::now().0).unwrap_or_default();
				Duration::from_secs(diff).clamp(MIN_WAIT, poll.max(MIN_WAIT))
			}
			Ok(None) => poll,
			Err(e) => {
				warn!("Cannot read next fire time: {}", e);
				poll
			}
		}
	}

	async fn worker_loop(&self, state: S, worker: Box<str>) {
		debug!(worker = %worker, "Worker started");
		while !self.shutdown.is_cancelled() {
			if let Err(e) = self.run_due(&state, &worker).await {
				error!(worker = %worker, "Polling due jobs failed: {}", e);
			}
			let wait = self.next_wait().await;
			tokio::select! {
				() = tokio::time::sleep(wait) => (),
				() = self.notify_schedule.notified() => (),
				() = self.shutdown.cancelled() => break,
			}
		}
		debug!(worker = %worker, "Worker stopped");
	}

	async fn reaper_loop(&self) {
		let every = (self.opts.stale_after / 2).max(self.opts.poll_interval);
		loop {
			tokio::select! {
				() = tokio::time::sleep(every) => (),
				() = self.shutdown.cancelled() => break,
			}
			match self.store.reclaim_stale(self.stale_before()).await {
				Ok(ids) if !ids.is_empty() => {
					warn!("Reclaimed {} stale jobs: {:?}", ids.len(), ids);
					self.notify_schedule.notify_one();
				}
				Ok(_) => (),
				Err(e) => error!("Stale job reclaim failed: {}", e),
			}
		}
	}

	/// Get health status of the scheduler
	pub async fn health_check(&self) -> ClResult<SchedulerHealth> {
		let pending = self
			.store
			.list_jobs(&ListJobOptions { status: Some(JobStatus::Pending), ..Default::default() })
			.await?
			.len();
		let stale_before = self.stale_before();
		let stale = self
			.store
			.list_jobs(&ListJobOptions { status: Some(JobStatus::Running), ..Default::default() })
			.await?
			.iter()
			.filter(|j| j.claimed_at.is_some_and(|t| t < stale_before))
			.count();
		if stale > 0 {
			warn!("SCHEDULER HEALTH: {} jobs running past the liveness threshold", stale);
		}

		Ok(SchedulerHealth {
			workers: *self.workers_started.lock(),
			running: self.jobs_running.lock().len(),
			pending,
			stale,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::memory::InMemoryJobStore;

	type State = Arc<Mutex<Vec<u8>>>;

	#[derive(Debug)]
	struct TestTask {
		num: u8,
	}

	impl TestTask {
		pub fn new(num: u8) -> Arc<Self> {
			Arc::new(Self { num })
		}
	}

	#[async_trait]
	impl Task<State> for TestTask {
		fn kind() -> &'static str {
			"test"
		}

		fn build(_id: JobId, ctx: &str) -> ClResult<Arc<dyn Task<State>>> {
			let num: u8 = ctx
				.parse()
				.map_err(|_| Error::Internal("test task context must be u8".into()))?;
			Ok(TestTask::new(num))
		}

		fn serialize(&self) -> String {
			self.num.to_string()
		}

		fn kind_of(&self) -> &'static str {
			"test"
		}

		async fn run(&self, state: &State) -> ClResult<()> {
			if self.num == 0 {
				return Err(Error::ProviderFailure("zero is not allowed".into()));
			}
			state.lock().push(self.num);
			Ok(())
		}
	}

	#[derive(Debug)]
	struct PanickingTask;

	#[async_trait]
	impl Task<State> for PanickingTask {
		fn kind() -> &'static str {
			"panicking"
		}

		fn build(_id: JobId, _ctx: &str) -> ClResult<Arc<dyn Task<State>>> {
			Ok(Arc::new(PanickingTask))
		}

		fn serialize(&self) -> String {
			String::new()
		}

		fn kind_of(&self) -> &'static str {
			"panicking"
		}

		#[allow(clippy::panic)]
		async fn run(&self, _state: &State) -> ClResult<()> {
			panic!("boom");
		}
	}

	fn setup() -> (Arc<Scheduler<State>>, Arc<InMemoryJobStore>, State) {
		let store = InMemoryJobStore::new();
		let scheduler = Scheduler::new(store.clone(), SchedulerOpts::default());
		scheduler.register::<TestTask>().unwrap();
		scheduler.register::<PanickingTask>().unwrap();
		(scheduler, store, Arc::new(Mutex::new(Vec::new())))
	}

	#[tokio::test]
	async fn test_due_jobs_run_in_fire_order() {
		let (scheduler, _store, state) = setup();
		let now = Timestamp::now();
		scheduler.task(TestTask::new(3)).at(now.add_seconds(-10)).await.unwrap();
		scheduler.task(TestTask::new(1)).at(now.add_seconds(-30)).await.unwrap();
		scheduler.task(TestTask::new(2)).at(now.add_seconds(-20)).await.unwrap();
		scheduler.task(TestTask::new(9)).after(3600).await.unwrap();

		let executed = scheduler.run_due(&state, "w").await.unwrap();
		assert_eq!(executed, 3);
		assert_eq!(*state.lock(), vec![1, 2, 3]);
	}

	#[tokio::test]
	async fn test_done_jobs_do_not_rerun() {
		let (scheduler, store, state) = setup();
		let id = scheduler.add(TestTask::new(5)).await.unwrap();
		assert_eq!(scheduler.run_due(&state, "w").await.unwrap(), 1);
		assert_eq!(scheduler.run_due(&state, "w").await.unwrap(), 0);
		assert_eq!(store.read_job(id).await.unwrap().status, JobStatus::Done);
		assert_eq!(*state.lock(), vec![5]);
	}

	#[tokio::test]
	async fn test_failing_job_ends_failed() {
		let (scheduler, store, state) = setup();
		let id = scheduler.add(TestTask::new(0)).await.unwrap();
		scheduler.run_due(&state, "w").await.unwrap();
		let job = store.read_job(id).await.unwrap();
		assert_eq!(job.status, JobStatus::Failed);
		assert!(job.error.unwrap().contains("zero is not allowed"));
	}

	#[tokio::test]
	async fn test_panicking_job_ends_failed() {
		let (scheduler, store, state) = setup();
		let id = scheduler.add(Arc::new(PanickingTask)).await.unwrap();
		scheduler.run_due(&state, "w").await.unwrap();
		assert_eq!(store.read_job(id).await.unwrap().status, JobStatus::Failed);
	}

	#[tokio::test]
	async fn test_key_deduplication() {
		let (scheduler, store, _state) = setup();
		let id1 = scheduler.task(TestTask::new(1)).key("k").after(60).await.unwrap();
		let id2 = scheduler.task(TestTask::new(1)).key("k").after(60).await.unwrap();
		assert_eq!(id1, id2);

		// Changed input replaces the pending job
		let id3 = scheduler.task(TestTask::new(2)).key("k").after(120).await.unwrap();
		assert_eq!(id1, id3);
		assert_eq!(store.read_job(id1).await.unwrap().input.as_ref(), "2");

		// Running job cannot be replaced
		assert!(store.claim(id1, "other", Timestamp::from_now(1000)).await.unwrap());
		let res = scheduler.task(TestTask::new(3)).key("k").now().await;
		assert!(matches!(res, Err(Error::SchedulerConflict(id)) if id == id1));
	}

	#[tokio::test]
	async fn test_finished_job_with_same_input_is_not_rescheduled() {
		let (scheduler, store, state) = setup();
		let id = scheduler.task(TestTask::new(0)).key("k").now().await.unwrap();
		scheduler.run_due(&state, "w").await.unwrap();
		assert_eq!(store.read_job(id).await.unwrap().status, JobStatus::Failed);

		assert_eq!(scheduler.task(TestTask::new(0)).key("k").now().await.unwrap(), id);
		assert_eq!(scheduler.run_due(&state, "w").await.unwrap(), 0);
		assert_eq!(store.read_job(id).await.unwrap().status, JobStatus::Failed);

		// Different input under the same key is a new job
		let next = scheduler.task(TestTask::new(4)).key("k").now().await.unwrap();
		assert_ne!(next, id);
		assert_eq!(scheduler.run_due(&state, "w").await.unwrap(), 1);
		assert_eq!(*state.lock(), vec![4]);
	}

	#[tokio::test]
	async fn test_cancel() {
		let (scheduler, store, state) = setup();
		let id = scheduler.task(TestTask::new(1)).key("campaign:a:batch:0").now().await.unwrap();
		scheduler.task(TestTask::new(2)).key("campaign:a:batch:1").after(60).await.unwrap();
		scheduler.task(TestTask::new(3)).key("campaign:b:batch:0").after(60).await.unwrap();

		scheduler.cancel(id).await.unwrap();
		assert!(matches!(scheduler.cancel(id).await, Err(Error::NotFound)));
		assert_eq!(scheduler.cancel_by_prefix("campaign:a:").await.unwrap(), 1);
		assert_eq!(scheduler.run_due(&state, "w").await.unwrap(), 0);
		assert_eq!(store.list_jobs(&ListJobOptions::default()).await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_retry_failed_job() {
		let (scheduler, store, state) = setup();
		let id = scheduler.add(TestTask::new(0)).await.unwrap();
		scheduler.run_due(&state, "w").await.unwrap();
		scheduler.retry(id).await.unwrap();
		let job = store.read_job(id).await.unwrap();
		assert_eq!(job.status, JobStatus::Pending);

		// Fresh running job is not stale
		assert!(store.claim(id, "w", Timestamp::now()).await.unwrap());
		assert!(matches!(scheduler.retry(id).await, Err(Error::Conflict(_))));
	}

	#[tokio::test]
	async fn test_started_workers_pick_up_past_job() {
		let (scheduler, store, state) = setup();
		scheduler.start(state.clone());
		let id = scheduler.task(TestTask::new(7)).at(Timestamp::from_now(-3600)).await.unwrap();

		for _ in 0..50 {
			if store.read_job(id).await.unwrap().status == JobStatus::Done {
				break;
			}
			tokio::time::sleep(Duration::from_millis(50)).await;
		}
		assert_eq!(store.read_job(id).await.unwrap().status, JobStatus::Done);
		assert_eq!(*state.lock(), vec![7]);

		let health = scheduler.health_check().await.unwrap();
		assert_eq!(health.workers, 4);
		assert_eq!(health.pending, 0);
		scheduler.shutdown();
	}
}

// vim: ts=4
