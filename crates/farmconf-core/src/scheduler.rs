//! Scheduler subsystem. Runs background jobs with persistence, key-based deduplication and retries.

use async_trait::async_trait;
use itertools::Itertools;
use serde::Serialize;
use std::{
	collections::{BTreeMap, HashMap},
	fmt::Debug,
	sync::{Arc, Mutex},
};

use crate::prelude::*;
use farmconf_types::config_adapter::{self, ConfigAdapter};
use farmconf_types::types::TaskId;

#[async_trait]
pub trait Task<S: Clone>: Send + Sync + Debug {
	fn kind() -> &'static str
	where
		Self: Sized;
	fn build(id: TaskId, context: &str) -> ClResult<Arc<dyn Task<S>>>
	where
		Self: Sized;
	fn serialize(&self) -> String;
	async fn run(&self, state: &S) -> ClResult<()>;

	fn kind_of(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
	Pending,
	Completed,
	Failed,
}

impl TaskStatus {
	fn from_char(status: char) -> Self {
		match status {
			'P' => TaskStatus::Pending,
			'F' => TaskStatus::Completed,
			// 'E' or unknown status = Failed
			_ => TaskStatus::Failed,
		}
	}
}

#[derive(Debug, Clone)]
pub struct TaskData {
	pub id: TaskId,
	pub kind: Box<str>,
	pub status: TaskStatus,
	pub input: Box<str>,
	pub retry_data: Option<Box<str>>,
	pub next_at: Option<Timestamp>,
}

#[async_trait]
pub trait TaskStore<S: Clone>: Send + Sync {
	async fn add(&self, task: &TaskMeta<S>, key: Option<&str>) -> ClResult<TaskId>;
	async fn finished(&self, id: TaskId, output: &str) -> ClResult<()>;
	async fn load(&self) -> ClResult<Vec<TaskData>>;
	async fn update_task_error(
		&self,
		task_id: TaskId,
		output: &str,
		next_at: Option<Timestamp>,
	) -> ClResult<()>;
	async fn find_by_key(&self, key: &str) -> ClResult<Option<(TaskId, TaskData)>>;
	async fn update_task(&self, id: TaskId, task: &TaskMeta<S>) -> ClResult<()>;
}

fn retry_string<S: Clone>(task: &TaskMeta<S>) -> Option<String> {
	task.retry.as_ref().map(|retry| {
		format!("{},{},{},{}", task.retry_count, retry.wait_min_max.0, retry.wait_min_max.1, retry.times)
	})
}

fn parse_retry(retry_str: &str) -> ClResult<(u16, RetryPolicy)> {
	let (retry_count, retry_min, retry_max, retry_times) = retry_str
		.split(',')
		.collect_tuple()
		.ok_or(Error::Internal("invalid retry policy format".into()))?;
	let retry_count: u16 =
		retry_count.parse().map_err(|_| Error::Internal("retry count must be u16".into()))?;
	let retry = RetryPolicy {
		wait_min_max: (
			retry_min.parse().map_err(|_| Error::Internal("retry_min must be u64".into()))?,
			retry_max.parse().map_err(|_| Error::Internal("retry_max must be u64".into()))?,
		),
		times: retry_times.parse().map_err(|_| Error::Internal("retry times must be u16".into()))?,
	};
	Ok((retry_count, retry))
}

// InMemoryTaskStore
//*******************
#[derive(Debug)]
struct MemTask {
	data: TaskData,
	key: Option<Box<str>>,
	output: Option<Box<str>>,
}

/// Volatile task store, used by tests and by deployments without a persistent queue
pub struct InMemoryTaskStore {
	last_id: Mutex<TaskId>,
	tasks: Mutex<BTreeMap<TaskId, MemTask>>,
}

impl InMemoryTaskStore {
	pub fn new() -> Arc<Self> {
		Arc::new(Self { last_id: Mutex::new(0), tasks: Mutex::new(BTreeMap::new()) })
	}

	/// Status and recorded output/error of a task
	pub fn status(&self, id: TaskId) -> Option<(TaskStatus, Option<Box<str>>)> {
		let tasks = self.tasks.lock().ok()?;
		tasks.get(&id).map(|t| (t.data.status, t.output.clone()))
	}

	pub fn count(&self, kind: &str) -> usize {
		self.tasks.lock().map(|t| t.values().filter(|t| &*t.data.kind == kind).count()).unwrap_or(0)
	}
}

#[async_trait]
impl<S: Clone> TaskStore<S> for InMemoryTaskStore {
	async fn add(&self, task: &TaskMeta<S>, key: Option<&str>) -> ClResult<TaskId> {
		let id = {
			let mut last_id = lock!(self.last_id)?;
			*last_id += 1;
			*last_id
		};
		let data = TaskData {
			id,
			kind: task.task.kind_of().into(),
			status: TaskStatus::Pending,
			input: task.task.serialize().into(),
			retry_data: retry_string(task).map(Into::into),
			next_at: task.next_at,
		};
		lock!(self.tasks)?.insert(id, MemTask { data, key: key.map(Into::into), output: None });
		Ok(id)
	}

	async fn finished(&self, id: TaskId, output: &str) -> ClResult<()> {
		if let Some(task) = lock!(self.tasks)?.get_mut(&id) {
			task.data.status = TaskStatus::Completed;
			task.output = Some(output.into());
		}
		Ok(())
	}

	async fn load(&self) -> ClResult<Vec<TaskData>> {
		// Nothing survives a restart
		Ok(vec![])
	}

	async fn update_task_error(
		&self,
		task_id: TaskId,
		output: &str,
		next_at: Option<Timestamp>,
	) -> ClResult<()> {
		if let Some(task) = lock!(self.tasks)?.get_mut(&task_id) {
			task.output = Some(output.into());
			task.data.next_at = next_at;
			if next_at.is_none() {
				task.data.status = TaskStatus::Failed;
			}
		}
		Ok(())
	}

	async fn find_by_key(&self, key: &str) -> ClResult<Option<(TaskId, TaskData)>> {
		let tasks = lock!(self.tasks)?;
		Ok(tasks
			.values()
			.rev()
			.find(|t| t.key.as_deref() == Some(key) && t.data.status == TaskStatus::Pending)
			.map(|t| (t.data.id, t.data.clone())))
	}

	async fn update_task(&self, id: TaskId, task: &TaskMeta<S>) -> ClResult<()> {
		if let Some(stored) = lock!(self.tasks)?.get_mut(&id) {
			stored.data.input = task.task.serialize().into();
			stored.data.next_at = task.next_at;
			stored.data.retry_data = retry_string(task).map(Into::into);
		}
		Ok(())
	}
}

// AdapterTaskStore
//******************
/// Task store persisting into the configuration adapter's task table
pub struct AdapterTaskStore {
	adapter: Arc<dyn ConfigAdapter>,
}

impl AdapterTaskStore {
	pub fn new(adapter: Arc<dyn ConfigAdapter>) -> Arc<Self> {
		Arc::new(Self { adapter })
	}
}

fn task_data(t: config_adapter::Task) -> TaskData {
	TaskData {
		id: t.task_id,
		kind: t.kind,
		status: TaskStatus::from_char(t.status),
		input: t.input,
		retry_data: t.retry,
		next_at: t.next_at,
	}
}

#[async_trait]
impl<S: Clone> TaskStore<S> for AdapterTaskStore {
	async fn add(&self, task: &TaskMeta<S>, key: Option<&str>) -> ClResult<TaskId> {
		let id = self.adapter.create_task(task.task.kind_of(), key, &task.task.serialize()).await?;

		if task.retry.is_some() || task.next_at.is_some() {
			self.update_task(id, task).await?;
		}

		Ok(id)
	}

	async fn finished(&self, id: TaskId, output: &str) -> ClResult<()> {
		self.adapter.update_task_finished(id, output).await
	}

	async fn load(&self) -> ClResult<Vec<TaskData>> {
		let tasks = self.adapter.list_tasks(config_adapter::ListTaskOptions::default()).await?;
		Ok(tasks.into_iter().map(task_data).collect())
	}

	async fn update_task_error(
		&self,
		task_id: TaskId,
		output: &str,
		next_at: Option<Timestamp>,
	) -> ClResult<()> {
		self.adapter.update_task_error(task_id, output, next_at).await
	}

	async fn find_by_key(&self, key: &str) -> ClResult<Option<(TaskId, TaskData)>> {
		let task = self.adapter.find_task_by_key(key).await?;
		Ok(task.map(|t| (t.task_id, task_data(t))))
	}

	async fn update_task(&self, id: TaskId, task: &TaskMeta<S>) -> ClResult<()> {
		let patch = config_adapter::TaskPatch {
			input: Patch::Value(task.task.serialize()),
			next_at: match task.next_at {
				Some(ts) => Patch::Value(ts),
				None => Patch::Null,
			},
			retry: match retry_string(task) {
				Some(retry) => Patch::Value(retry),
				None => Patch::Undefined,
			},
		};

		self.adapter.update_task(id, &patch).await
	}
}

// Task metadata
type TaskBuilder<S> = dyn Fn(TaskId, &str) -> ClResult<Arc<dyn Task<S>>> + Send + Sync;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
	wait_min_max: (u64, u64),
	times: u16,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self { wait_min_max: (60, 3600), times: 10 }
	}
}

impl RetryPolicy {
	/// Create a new RetryPolicy with custom min/max backoff and number of retries
	pub fn new(wait_min_max: (u64, u64), times: u16) -> Self {
		Self { wait_min_max, times }
	}

	/// Calculate exponential backoff in seconds: min * (2^attempt), capped at max
	pub fn calculate_backoff(&self, attempt_count: u16) -> u64 {
		let (min, max) = self.wait_min_max;
		let backoff = min.saturating_mul(1u64 << u64::from(attempt_count.min(32)));
		backoff.min(max)
	}

	/// Check if we should continue retrying
	pub fn should_retry(&self, attempt_count: u16) -> bool {
		attempt_count < self.times
	}
}

// TaskSchedulerBuilder - Fluent API for task scheduling
//************************************************************
pub struct TaskSchedulerBuilder<'a, S: Clone> {
	scheduler: &'a Scheduler<S>,
	task: Arc<dyn Task<S>>,
	key: Option<String>,
	next_at: Option<Timestamp>,
	retry: Option<RetryPolicy>,
}

impl<'a, S: Clone + Send + Sync + 'static> TaskSchedulerBuilder<'a, S> {
	fn new(scheduler: &'a Scheduler<S>, task: Arc<dyn Task<S>>) -> Self {
		Self { scheduler, task, key: None, next_at: None, retry: None }
	}

	/// Set a string key for deduplication of pending tasks
	pub fn key(mut self, key: impl Into<String>) -> Self {
		self.key = Some(key.into());
		self
	}

	/// Schedule for a specific absolute timestamp
	pub fn schedule_at(mut self, timestamp: Timestamp) -> Self {
		self.next_at = Some(timestamp);
		self
	}

	/// Schedule after a relative delay (in seconds)
	pub fn schedule_after(mut self, seconds: i64) -> Self {
		self.next_at = Some(Timestamp::from_now(seconds));
		self
	}

	/// Enable automatic retry with exponential backoff
	pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
		self.retry = Some(policy);
		self
	}

	/// Execute the scheduled task immediately
	pub async fn now(self) -> ClResult<TaskId> {
		self.schedule().await
	}

	/// Execute the scheduled task after a delay (in seconds)
	pub async fn after(mut self, seconds: i64) -> ClResult<TaskId> {
		self.next_at = Some(Timestamp::from_now(seconds));
		self.schedule().await
	}

	/// Execute the task with all configured options - main terminal method
	pub async fn schedule(self) -> ClResult<TaskId> {
		self.scheduler
			.schedule_task_impl(self.task, self.key.as_deref(), self.next_at, self.retry)
			.await
	}
}

#[derive(Debug, Clone)]
pub struct TaskMeta<S: Clone> {
	pub task: Arc<dyn Task<S>>,
	pub next_at: Option<Timestamp>,
	retry_count: u16,
	pub retry: Option<RetryPolicy>,
}

type TaskBuilderRegistry<S> = HashMap<&'static str, Box<TaskBuilder<S>>>;
type ScheduledTaskMap<S> = BTreeMap<(Timestamp, TaskId), TaskMeta<S>>;
type DeferredTaskMap<S> = HashMap<TaskId, Vec<(TaskId, TaskMeta<S>)>>;

// Scheduler
//***********
/// Persistent task queue with a single timer loop
///
/// Tasks due at `Timestamp(0)` run as soon as the loop wakes up. Finished
/// tasks are reported back over a channel and marked in the store. A keyed
/// task enqueued while its predecessor with the same key runs is held back
/// until that one leaves the running set.
#[derive(Clone)]
pub struct Scheduler<S: Clone> {
	task_builders: Arc<parking_lot::RwLock<TaskBuilderRegistry<S>>>,
	store: Arc<dyn TaskStore<S>>,
	tasks_running: Arc<parking_lot::Mutex<HashMap<TaskId, TaskMeta<S>>>>,
	tasks_scheduled: Arc<parking_lot::Mutex<ScheduledTaskMap<S>>>,
	/// Tasks waiting for a running task, keyed by the running task's id
	tasks_deferred: Arc<parking_lot::Mutex<DeferredTaskMap<S>>>,
	tx_finish: flume::Sender<TaskId>,
	rx_finish: flume::Receiver<TaskId>,
	notify_schedule: Arc<tokio::sync::Notify>,
}

impl<S: Clone> Debug for Scheduler<S> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Scheduler").finish_non_exhaustive()
	}
}

impl<S: Clone + Send + Sync + 'static> Scheduler<S> {
	pub fn new(store: Arc<dyn TaskStore<S>>) -> Arc<Self> {
		let (tx_finish, rx_finish) = flume::unbounded();

		Arc::new(Self {
			task_builders: Arc::default(),
			store,
			tasks_running: Arc::default(),
			tasks_scheduled: Arc::default(),
			tasks_deferred: Arc::default(),
			tx_finish,
			rx_finish,
			notify_schedule: Arc::new(tokio::sync::Notify::new()),
		})
	}

	/// Spawn the finish handler, the timer loop and the restore of pending tasks
	pub fn start(&self, state: S) {
		tokio::spawn(self.clone().finish_loop());
		tokio::spawn(self.clone().schedule_loop(state));

		let scheduler = self.clone();
		tokio::spawn(async move {
			if let Err(e) = scheduler.load().await {
				error!("Failed to load pending tasks: {}", e);
			}
		});
	}

	async fn finish_loop(self) {
		while let Ok(id) = self.rx_finish.recv_async().await {
			debug!("Completed task {} (notified)", id);
			match self.store.finished(id, "").await {
				Ok(()) => self.finish_running(id),
				Err(e) => error!("Cannot mark task {} as finished, it stays running: {}", id, e),
			}
		}
	}

	async fn schedule_loop(self, state: S) {
		loop {
			if self.tasks_scheduled.lock().is_empty() {
				self.notify_schedule.notified().await;
			}
			let Some(next_at) = self.spawn_due(&state) else {
				continue;
			};
			let wait = u64::try_from(next_at.0 - Timestamp::now().0).unwrap_or_default();
			tokio::select! {
				() = tokio::time::sleep(std::time::Duration::from_secs(wait)) => (),
				() = self.notify_schedule.notified() => (),
			}
		}
	}

	/// Start every due task, returns when the next pending one is due
	fn spawn_due(&self, state: &S) -> Option<Timestamp> {
		let now = Timestamp::now();
		loop {
			let (timestamp, id, task) = {
				let mut scheduled = self.tasks_scheduled.lock();
				let &(timestamp, id) = scheduled.keys().next()?;
				if timestamp > now {
					return Some(timestamp);
				}
				let task = scheduled.remove(&(timestamp, id))?;
				(timestamp, id, task)
			};
			debug!("Spawning task {} (due {})", id, timestamp);
			self.tasks_running.lock().insert(id, task.clone());
			self.spawn_task(state.clone(), id, task);
		}
	}

	pub fn register<T: Task<S> + 'static>(&self) -> ClResult<&Self> {
		info!("Registering task type {}", T::kind());
		self.task_builders
			.write()
			.insert(T::kind(), Box::new(|id: TaskId, params: &str| T::build(id, params)));
		Ok(self)
	}

	fn build_task(&self, id: TaskId, kind: &str, input: &str) -> ClResult<Arc<dyn Task<S>>> {
		let builders = self.task_builders.read();
		let builder = builders
			.get(kind)
			.ok_or_else(|| Error::Internal(format!("task builder not registered: {}", kind)))?;
		builder(id, input)
	}

	/// Create a builder for scheduling a task using the fluent API
	pub fn task(&self, task: Arc<dyn Task<S>>) -> TaskSchedulerBuilder<'_, S> {
		TaskSchedulerBuilder::new(self, task)
	}

	/// Enqueue a task by kind and serialized input
	///
	/// The kind must have been registered with `register`. Used by callers that
	/// only know the job queue contract (kind + parameters), not the task types.
	pub async fn enqueue(
		&self,
		kind: &str,
		key: Option<&str>,
		input: &str,
		retry: Option<RetryPolicy>,
	) -> ClResult<TaskId> {
		let task = self.build_task(0, kind, input)?;
		self.schedule_task_impl(task, key, None, retry).await
	}

	async fn schedule_task_impl(
		&self,
		task: Arc<dyn Task<S>>,
		key: Option<&str>,
		next_at: Option<Timestamp>,
		retry: Option<RetryPolicy>,
	) -> ClResult<TaskId> {
		let task_meta = TaskMeta { task: task.clone(), next_at, retry_count: 0, retry };

		// A pending task with the same key absorbs the new one, unless it already started
		if let Some(key) = key
			&& let Some((existing_id, existing)) = self.store.find_by_key(key).await?
		{
			if self.tasks_running.lock().contains_key(&existing_id) {
				let id = self.store.add(&task_meta, Some(key)).await?;
				info!("Task '{}' (id={}) is running, task {} waits for it", key, existing_id, id);
				self.defer(existing_id, id, task_meta);
				return Ok(id);
			}

			let input = task.serialize();
			if input == *existing.input {
				debug!("Task '{}' already pending (id={})", key, existing_id);
				if !self.is_queued(existing_id) {
					self.add_queue(existing_id, task_meta);
				}
			} else {
				info!("Pending task '{}' (id={}) gets new parameters", key, existing_id);
				debug!("  {} -> {}", existing.input, input);
				self.store.update_task(existing_id, &task_meta).await?;
				self.requeue(existing_id, task_meta);
			}
			return Ok(existing_id);
		}

		let id = self.store.add(&task_meta, key).await?;
		Ok(self.add_queue(id, task_meta))
	}

	pub async fn add(&self, task: Arc<dyn Task<S>>) -> ClResult<TaskId> {
		self.task(task).now().await
	}

	fn is_queued(&self, id: TaskId) -> bool {
		self.tasks_running.lock().contains_key(&id)
			|| self.tasks_scheduled.lock().keys().any(|(_, tid)| *tid == id)
			|| self.tasks_deferred.lock().values().flatten().any(|(tid, _)| *tid == id)
	}

	/// Hold `id` back until the running task `after` is done
	fn defer(&self, after: TaskId, id: TaskId, task_meta: TaskMeta<S>) {
		{
			let running = self.tasks_running.lock();
			if running.contains_key(&after) {
				self.tasks_deferred.lock().entry(after).or_default().push((id, task_meta));
				return;
			}
		}
		// Finished in the meantime
		self.add_queue(id, task_meta);
	}

	/// Replace the metadata of a waiting task, or put it on the timer
	fn requeue(&self, id: TaskId, task_meta: TaskMeta<S>) {
		{
			let mut deferred = self.tasks_deferred.lock();
			if let Some(slot) = deferred.values_mut().flatten().find(|(tid, _)| *tid == id) {
				slot.1 = task_meta;
				return;
			}
		}
		self.add_queue(id, task_meta);
	}

	/// Drop a task from the running set and release the tasks waiting for it
	fn finish_running(&self, id: TaskId) {
		let waiting = {
			let mut running = self.tasks_running.lock();
			running.remove(&id);
			self.tasks_deferred.lock().remove(&id).unwrap_or_default()
		};
		for (waiting_id, task_meta) in waiting {
			debug!("Releasing task {} after task {}", waiting_id, id);
			self.add_queue(waiting_id, task_meta);
		}
	}

	/// Put a task on the timer (or update a running task's metadata)
	pub fn add_queue(&self, id: TaskId, task_meta: TaskMeta<S>) -> TaskId {
		// A running task picks up new metadata only on its next retry
		if let Some(running) = self.tasks_running.lock().get_mut(&id) {
			debug!("Task {} is already running, updating metadata", id);
			*running = task_meta;
			return id;
		}

		let mut scheduled = self.tasks_scheduled.lock();
		scheduled.retain(|(_, tid), _| *tid != id);
		let due = match task_meta.next_at {
			Some(next_at) if next_at >= Timestamp::now() => next_at,
			_ => Timestamp(0),
		};
		debug!("Queueing task {} (due {})", id, due);
		scheduled.insert((due, id), task_meta);
		self.notify_schedule.notify_one();
		id
	}

	async fn load(&self) -> ClResult<()> {
		let tasks = self.store.load().await?;
		let pending: Vec<TaskData> =
			tasks.into_iter().filter(|t| t.status == TaskStatus::Pending).collect();
		info!("Restoring {} pending task(s)", pending.len());

		for t in pending {
			let task = match self.build_task(t.id, &t.kind, &t.input) {
				Ok(task) => task,
				Err(e) => {
					error!("Cannot restore task {} ({}): {}", t.id, t.kind, e);
					continue;
				}
			};
			let (retry_count, retry) = match t.retry_data.as_deref().map(parse_retry).transpose()? {
				Some((count, policy)) => (count, Some(policy)),
				None => (0, None),
			};
			self.add_queue(t.id, TaskMeta { task, next_at: t.next_at, retry_count, retry });
		}
		Ok(())
	}

	fn spawn_task(&self, state: S, id: TaskId, task_meta: TaskMeta<S>) {
		let scheduler = self.clone();
		tokio::spawn(async move {
			let err = match task_meta.task.run(&state).await {
				Ok(()) => {
					debug!("Task {} completed", id);
					scheduler.tx_finish.send(id).unwrap_or(());
					return;
				}
				Err(err) => err,
			};
			scheduler.handle_failure(id, task_meta, err).await;
		});
	}

	/// Re-queue a failed task with backoff or mark it failed for good
	async fn handle_failure(&self, id: TaskId, task_meta: TaskMeta<S>, err: Error) {
		let retry = task_meta
			.retry
			.as_ref()
			.filter(|policy| err.is_retryable() && policy.should_retry(task_meta.retry_count));

		let Some(policy) = retry else {
			error!(
				"Task {} ({}) failed after {} retries: {}",
				id,
				task_meta.task.kind_of(),
				task_meta.retry_count,
				err
			);
			if let Err(e) = self.store.update_task_error(id, &err.to_string(), None).await {
				warn!("Cannot record error of task {}: {}", id, e);
			}
			self.finish_running(id);
			return;
		};

		let backoff = policy.calculate_backoff(task_meta.retry_count);
		let next_at = Timestamp::from_now(backoff.cast_signed());
		info!(
			"Task {} failed (attempt {}/{}), retrying in {}s: {}",
			id,
			task_meta.retry_count + 1,
			policy.times,
			backoff,
			err
		);

		let mut retry_meta = task_meta.clone();
		retry_meta.retry_count += 1;
		retry_meta.next_at = Some(next_at);
		if let Err(e) = self.store.update_task_error(id, &err.to_string(), Some(next_at)).await {
			warn!("Cannot record error of task {}: {}", id, e);
		}
		if let Err(e) = self.store.update_task(id, &retry_meta).await {
			warn!("Cannot persist retry state of task {}: {}", id, e);
		}

		// The task stays pending, no finish event. Waiting tasks stay behind it.
		self.tasks_running.lock().remove(&id);
		self.add_queue(id, retry_meta);
	}

	/// Queue counts, logging tasks the timer loop has not picked up
	pub async fn health_check(&self) -> ClResult<SchedulerHealth> {
		let running = self.tasks_running.lock().len();
		let scheduled = self.tasks_scheduled.lock();

		let cutoff = Timestamp::from_now(-60);
		let overdue_tasks: Vec<TaskId> = scheduled
			.keys()
			.filter(|(ts, _)| ts.0 > 0 && *ts < cutoff)
			.map(|(_, id)| *id)
			.collect();
		for id in &overdue_tasks {
			warn!("Task {} is overdue", id);
		}

		Ok(SchedulerHealth { scheduled: scheduled.len(), running, overdue_tasks })
	}
}

/// Health status of the scheduler
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerHealth {
	/// Number of tasks queued for execution
	pub scheduled: usize,
	/// Number of tasks currently running
	pub running: usize,
	/// Scheduled tasks more than a minute past their execution time
	pub overdue_tasks: Vec<TaskId>,
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde::{Deserialize, Serialize};

	type State = Arc<Mutex<Vec<u8>>>;

	#[derive(Debug, Serialize, Deserialize)]
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

		fn build(_id: TaskId, ctx: &str) -> ClResult<Arc<dyn Task<State>>> {
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
			tokio::time::sleep(std::time::Duration::from_millis(100)).await;
			state.lock().unwrap().push(self.num);
			Ok(())
		}
	}

	#[derive(Debug, Clone)]
	struct FailingTask {
		id: u8,
		fail_count: u8,
		retryable: bool,
		attempt: Arc<Mutex<u8>>,
	}

	impl FailingTask {
		pub fn new(id: u8, fail_count: u8, retryable: bool) -> Arc<Self> {
			Arc::new(Self { id, fail_count, retryable, attempt: Arc::new(Mutex::new(0)) })
		}
	}

	#[async_trait]
	impl Task<State> for FailingTask {
		fn kind() -> &'static str {
			"failing"
		}

		fn build(_id: TaskId, ctx: &str) -> ClResult<Arc<dyn Task<State>>> {
			let (id, fail_count) = ctx
				.split(',')
				.collect_tuple()
				.ok_or(Error::Internal("failing task context must have 2 parts".into()))?;
			let id = id.parse().map_err(|_| Error::Parse)?;
			let fail_count = fail_count.parse().map_err(|_| Error::Parse)?;
			Ok(FailingTask::new(id, fail_count, true))
		}

		fn serialize(&self) -> String {
			format!("{},{}", self.id, self.fail_count)
		}

		fn kind_of(&self) -> &'static str {
			"failing"
		}

		async fn run(&self, state: &State) -> ClResult<()> {
			let current_attempt = {
				let mut attempt = self.attempt.lock().unwrap();
				*attempt += 1;
				*attempt
			};

			if current_attempt <= self.fail_count {
				return Err(if self.retryable {
					Error::ServiceUnavailable(format!("Task {} failed", self.id))
				} else {
					Error::MigrationPartial(Box::new([u64::from(self.id)]))
				});
			}

			state.lock().unwrap().push(self.id);
			Ok(())
		}
	}

	fn setup() -> (Arc<InMemoryTaskStore>, Arc<Scheduler<State>>, State) {
		let store = InMemoryTaskStore::new();
		let state: State = Arc::new(Mutex::new(Vec::new()));
		let scheduler = Scheduler::new(store.clone() as Arc<dyn TaskStore<State>>);
		scheduler.start(state.clone());
		scheduler.register::<TestTask>().unwrap();
		scheduler.register::<FailingTask>().unwrap();
		(store, scheduler, state)
	}

	#[tokio::test]
	pub async fn test_scheduler() {
		let _ = tracing_subscriber::fmt().try_init();
		let (_store, scheduler, state) = setup();

		scheduler.task(TestTask::new(2)).schedule_after(2).schedule().await.unwrap();
		scheduler.add(TestTask::new(1)).await.unwrap();

		tokio::time::sleep(std::time::Duration::from_millis(500)).await;
		assert_eq!(*state.lock().unwrap(), vec![1]);

		tokio::time::sleep(std::time::Duration::from_millis(3000)).await;
		assert_eq!(*state.lock().unwrap(), vec![1, 2]);
	}

	#[tokio::test]
	pub async fn test_enqueue_by_kind() {
		let (store, scheduler, state) = setup();

		let id = scheduler.enqueue("test", None, "7", None).await.unwrap();
		assert!(id > 0);
		assert!(scheduler.enqueue("unknown", None, "7", None).await.is_err());

		tokio::time::sleep(std::time::Duration::from_millis(500)).await;
		assert_eq!(*state.lock().unwrap(), vec![7]);
		assert_eq!(store.status(id).map(|s| s.0), Some(TaskStatus::Completed));
	}

	#[tokio::test]
	pub async fn test_key_deduplication() {
		let (store, scheduler, state) = setup();

		let id1 = scheduler.task(TestTask::new(3)).key("dedup").schedule_after(2).schedule().await.unwrap();
		let id2 = scheduler.task(TestTask::new(3)).key("dedup").schedule_after(2).schedule().await.unwrap();
		assert_eq!(id1, id2);
		assert_eq!(store.count("test"), 1);

		tokio::time::sleep(std::time::Duration::from_millis(3500)).await;
		assert_eq!(*state.lock().unwrap(), vec![3]);

		// Once finished, the key is free again
		let id3 = scheduler.task(TestTask::new(3)).key("dedup").now().await.unwrap();
		assert_ne!(id1, id3);
	}

	#[tokio::test]
	pub async fn test_same_key_waits_for_running_task() {
		let (store, scheduler, state) = setup();

		let id1 = scheduler.task(TestTask::new(4)).key("busy").now().await.unwrap();
		tokio::time::sleep(std::time::Duration::from_millis(50)).await;

		// First one is running: a new task is created instead of folding into it
		let id2 = scheduler.task(TestTask::new(4)).key("busy").now().await.unwrap();
		assert_ne!(id1, id2);

		// The waiting one still absorbs later tasks with the same key
		let id3 = scheduler.task(TestTask::new(5)).key("busy").now().await.unwrap();
		assert_eq!(id2, id3);
		assert_eq!(store.count("test"), 2);

		tokio::time::sleep(std::time::Duration::from_millis(100)).await;
		assert_eq!(*state.lock().unwrap(), vec![4]);

		tokio::time::sleep(std::time::Duration::from_millis(400)).await;
		assert_eq!(*state.lock().unwrap(), vec![4, 5]);
		assert_eq!(store.status(id1).map(|s| s.0), Some(TaskStatus::Completed));
		assert_eq!(store.status(id2).map(|s| s.0), Some(TaskStatus::Completed));
	}

	#[tokio::test]
	pub async fn test_retry_with_backoff() {
		let (_store, scheduler, state) = setup();

		// Fails twice: retries after 1s and 2s
		let retry_policy = RetryPolicy::new((1, 3600), 3);
		scheduler.task(FailingTask::new(42, 2, true)).with_retry(retry_policy).schedule().await.unwrap();

		tokio::time::sleep(std::time::Duration::from_secs(5)).await;

		let st = state.lock().unwrap();
		assert_eq!(*st, vec![42], "Task should have succeeded after retries");
	}

	#[tokio::test]
	pub async fn test_no_retry_for_permanent_errors() {
		let (store, scheduler, state) = setup();

		let retry_policy = RetryPolicy::new((1, 3600), 3);
		let id = scheduler
			.task(FailingTask::new(9, 1, false))
			.with_retry(retry_policy)
			.schedule()
			.await
			.unwrap();

		tokio::time::sleep(std::time::Duration::from_millis(2500)).await;

		assert!(state.lock().unwrap().is_empty());
		let (status, output) = store.status(id).unwrap();
		assert_eq!(status, TaskStatus::Failed);
		assert!(output.unwrap().contains("migration incomplete"));
	}

	#[test]
	fn test_backoff() {
		let policy = RetryPolicy::new((30, 600), 5);
		assert_eq!(policy.calculate_backoff(0), 30);
		assert_eq!(policy.calculate_backoff(2), 120);
		assert_eq!(policy.calculate_backoff(10), 600);
		assert!(policy.should_retry(4));
		assert!(!policy.should_retry(5));
	}

	#[test]
	fn test_parse_retry() {
		let (count, policy) = parse_retry("2,10,300,3").unwrap();
		assert_eq!(count, 2);
		assert_eq!(policy, RetryPolicy::new((10, 300), 3));
		assert!(parse_retry("2,10").is_err());
	}
}

// vim: ts=4
