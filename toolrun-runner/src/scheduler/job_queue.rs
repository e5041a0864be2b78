//! Job queue
//!
//! Owns the in-memory job index, the priority queue, the progress callback
//! registry and the worker pool. Every state transition is written through
//! to the [`JobStore`] while the index lock is held, so the store never lags
//! behind memory and two writers never interleave on one record.

use chrono::Utc;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use toolrun_core::domain::execution::ExecutionResult;
use toolrun_core::domain::job::{Job, JobPriority, JobProgress, JobStatus};
use toolrun_core::dto::job::JobStatusReport;
use toolrun_core::dto::stats::QueueStats;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::engine::{ProgressSink, classify};
use crate::registry::ScriptRegistry;
use crate::repository::{FileJobStore, JobStore, StoreError};
use crate::retry::{RetryCoordinator, RetryDecision};
use crate::scheduler::queue::PriorityQueue;

/// Receives progress updates for a submitted job
pub type ProgressCallback = Arc<dyn Fn(Uuid, JobProgress) + Send + Sync>;

#[derive(Debug, Default)]
struct Counters {
    total_submitted: AtomicU64,
    total_completed: AtomicU64,
    total_failed: AtomicU64,
    current_running: AtomicU64,
}

/// Asynchronous job scheduler
pub struct JobQueue {
    config: Config,
    registry: Arc<dyn ScriptRegistry>,
    coordinator: Arc<RetryCoordinator>,
    store: Arc<dyn JobStore>,
    queue: PriorityQueue,
    jobs: Mutex<HashMap<Uuid, Job>>,
    callbacks: Mutex<HashMap<Uuid, ProgressCallback>>,
    counters: Counters,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    maintenance: Mutex<Vec<JoinHandle<()>>>,
}

impl JobQueue {
    /// Opens the queue on the file store at `config.job_dir` and recovers
    /// persisted work
    pub fn open(
        config: Config,
        registry: Arc<dyn ScriptRegistry>,
        coordinator: Arc<RetryCoordinator>,
    ) -> Result<Arc<Self>, StoreError> {
        let store = Arc::new(FileJobStore::open(&config.job_dir)?);
        Self::with_store(config, registry, coordinator, store)
    }

    /// Opens the queue on an arbitrary store and recovers persisted work
    pub fn with_store(
        config: Config,
        registry: Arc<dyn ScriptRegistry>,
        coordinator: Arc<RetryCoordinator>,
        store: Arc<dyn JobStore>,
    ) -> Result<Arc<Self>, StoreError> {
        let (shutdown, _) = watch::channel(false);
        let queue = Arc::new(Self {
            config,
            registry,
            coordinator,
            store,
            queue: PriorityQueue::new(),
            jobs: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(HashMap::new()),
            counters: Counters::default(),
            running: AtomicBool::new(false),
            shutdown,
            workers: Mutex::new(Vec::new()),
            maintenance: Mutex::new(Vec::new()),
        });
        queue.recover()?;
        Ok(queue)
    }

    /// Loads every persisted job; unfinished ones go back to pending and are
    /// enqueued once
    fn recover(&self) -> Result<(), StoreError> {
        let persisted = self.store.list_all()?;
        let mut jobs = self.jobs.lock().unwrap();
        let mut requeued = 0;

        for mut job in persisted {
            let previous = job.status;
            if job.recover() {
                if previous != JobStatus::Pending {
                    info!("Recovered job {} ({} -> pending)", job.id, previous);
                    self.persist(&job);
                }
                self.queue.put(job.id, job.priority);
                requeued += 1;
            }
            jobs.insert(job.id, job);
        }

        if requeued > 0 {
            info!("Re-enqueued {} job(s) from {}", requeued, self.config.job_dir.display());
        }
        Ok(())
    }

    /// Creates, persists and enqueues a job
    ///
    /// Never waits for a worker. The callback, if any, receives progress
    /// until the job reaches a terminal state.
    pub fn submit(
        &self,
        script_id: &str,
        arguments: HashMap<String, JsonValue>,
        priority: JobPriority,
        callback: Option<ProgressCallback>,
        metadata: Option<HashMap<String, JsonValue>>,
    ) -> Uuid {
        let mut job = Job::new(script_id, arguments, priority)
            .with_max_retries(self.config.max_retries)
            .with_metadata(metadata.unwrap_or_default());

        if let Some(callback) = callback {
            let callback_id = Uuid::new_v4();
            self.callbacks.lock().unwrap().insert(callback_id, callback);
            job.callback_id = Some(callback_id);
        }

        let id = job.id;
        {
            let mut jobs = self.jobs.lock().unwrap();
            self.persist(&job);
            jobs.insert(id, job);
        }
        self.counters.total_submitted.fetch_add(1, Ordering::Relaxed);
        self.queue.put(id, priority);

        info!("Job submitted: {} ({}, priority {})", id, script_id, priority);
        id
    }

    /// Starts the worker pool and maintenance tasks; no-op when running
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send_replace(false);

        let mut workers = self.workers.lock().unwrap();
        for worker_id in 0..self.config.concurrency {
            let queue = Arc::clone(self);
            let shutdown = self.shutdown.subscribe();
            workers.push(tokio::spawn(queue.worker_loop(worker_id, shutdown)));
        }

        let mut maintenance = self.maintenance.lock().unwrap();
        maintenance.push(self.spawn_retention_task());
        maintenance.push(self.spawn_intake_task());

        info!("Job queue started with {} workers", self.config.concurrency);
    }

    /// Stops the worker pool
    ///
    /// Graceful stops let in-flight attempts finish; forced stops abort the
    /// workers, which kills their script processes. Either way unfinished
    /// jobs are persisted as pending and callbacks are released.
    pub async fn stop(&self, graceful: bool) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping job queue (graceful: {})", graceful);
        self.shutdown.send_replace(true);

        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        if !graceful {
            for worker in &workers {
                worker.abort();
            }
        }
        for worker in workers {
            if let Err(e) = worker.await {
                if !e.is_cancelled() {
                    warn!("Worker task panicked: {}", e);
                }
            }
        }

        let maintenance = std::mem::take(&mut *self.maintenance.lock().unwrap());
        for task in maintenance {
            task.abort();
        }

        self.persist_unfinished();
        self.callbacks.lock().unwrap().clear();
        self.counters.current_running.store(0, Ordering::Relaxed);
        info!("Job queue stopped");
    }

    /// Writes every unfinished job back as pending
    ///
    /// Jobs whose stored record turned terminal (cancelled from another
    /// process) adopt that record instead. Running and retrying jobs are not
    /// in the queue, so they are enqueued again for the next `start`.
    fn persist_unfinished(&self) {
        let mut jobs = self.jobs.lock().unwrap();
        let mut saved = 0;
        for job in jobs.values_mut() {
            if job.is_terminal() {
                continue;
            }
            let was_owned = job.status != JobStatus::Pending;

            let mut candidate = job.clone();
            candidate.recover();
            if let Some(pending) = self.reconcile(job, candidate) {
                if was_owned {
                    self.queue.put(pending.id, pending.priority);
                }
                saved += 1;
            }
        }
        if saved > 0 {
            info!("Persisted {} unfinished job(s)", saved);
        }
    }

    /// Writes `next` over the stored record of `job` unless the stored
    /// record is already terminal
    ///
    /// Either way `job` ends up holding the authoritative state; returns it
    /// when `next` won. A store failure is logged and `next` is kept.
    fn reconcile<'a>(&self, job: &'a mut Job, next: Job) -> Option<&'a Job> {
        let mut terminal = None;
        let outcome = self.store.update(job.id, &mut |stored| {
            if let Some(stored) = stored.filter(Job::is_terminal) {
                terminal = Some(stored);
                return None;
            }
            Some(next.clone())
        });
        if let Err(e) = outcome {
            error!("Failed to persist job {}: {}", job.id, e);
        }

        if let Some(stored) = terminal {
            info!("Job {} was {} in the store; adopting it", job.id, stored.status);
            *job = stored;
            return None;
        }
        *job = next;
        Some(&*job)
    }

    /// Cancels a pending job; returns false for unknown or non-pending jobs
    pub fn cancel_job(&self, id: Uuid) -> bool {
        let callback_id = {
            let mut jobs = self.jobs.lock().unwrap();
            let Some(job) = jobs.get_mut(&id) else {
                return false;
            };
            if !job.cancel() {
                return false;
            }
            self.persist(job);
            job.callback_id
        };
        self.release_callback(callback_id);
        info!("Job cancelled: {}", id);
        true
    }

    /// Status snapshot from the index, falling back to the store
    pub fn get_status(&self, id: Uuid) -> Option<JobStatusReport> {
        self.get_job(id).map(|job| JobStatusReport::from(&job))
    }

    pub fn get_job(&self, id: Uuid) -> Option<Job> {
        if let Some(job) = self.jobs.lock().unwrap().get(&id) {
            return Some(job.clone());
        }
        match self.store.load(id) {
            Ok(job) => job,
            Err(e) => {
                warn!("Failed to load job {}: {}", id, e);
                None
            }
        }
    }

    pub fn get_stats(&self) -> QueueStats {
        let mut status_counts = HashMap::new();
        for job in self.jobs.lock().unwrap().values() {
            *status_counts.entry(job.status).or_insert(0) += 1;
        }

        QueueStats {
            queue_size: self.queue.qsize(),
            concurrency_limit: self.config.concurrency,
            total_submitted: self.counters.total_submitted.load(Ordering::Relaxed),
            total_completed: self.counters.total_completed.load(Ordering::Relaxed),
            total_failed: self.counters.total_failed.load(Ordering::Relaxed),
            current_running: self.counters.current_running.load(Ordering::Relaxed),
            status_counts,
            active_workers: self.workers.lock().unwrap().len(),
        }
    }

    pub fn coordinator(&self) -> &Arc<RetryCoordinator> {
        &self.coordinator
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        debug!("Worker {} started", worker_id);

        while !*shutdown.borrow() {
            let next = tokio::select! {
                next = self.queue.get(self.config.dequeue_timeout) => next,
                _ = shutdown.changed() => break,
            };
            let Some(id) = next else {
                continue;
            };
            self.run_job(id, &mut shutdown).await;
        }

        debug!("Worker {} stopped", worker_id);
    }

    /// Claims a job; `None` if it is no longer pending (e.g. cancelled)
    ///
    /// The pending-to-running write is checked against the stored record
    /// under the store lock, so a cancellation written by another process
    /// either lands first and wins, or finds the job running and is refused.
    fn claim(&self, id: Uuid) -> Option<Job> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&id)?;
        if job.status != JobStatus::Pending {
            debug!("Skipping job {} in state {}", id, job.status);
            return None;
        }

        let mut next = job.clone();
        next.start().ok()?;
        let claimed = self.reconcile(job, next).cloned();
        if claimed.is_none() {
            let callback_id = job.callback_id;
            drop(jobs);
            self.release_callback(callback_id);
        }
        claimed
    }

    async fn run_job(&self, id: Uuid, shutdown: &mut watch::Receiver<bool>) {
        let Some(job) = self.claim(id) else {
            return;
        };
        info!(
            "Running job {} ({}, attempt {})",
            id,
            job.script_id,
            job.retry_count + 1
        );

        let callback = job
            .callback_id
            .and_then(|cid| self.callbacks.lock().unwrap().get(&cid).cloned());
        let dispatcher = callback.map(|callback| ProgressDispatcher::spawn(id, callback));

        self.update_progress(id, 0, "Starting execution".to_string(), dispatcher.as_ref());

        self.counters.current_running.fetch_add(1, Ordering::Relaxed);
        let mut result = self.execute_attempt(&job, dispatcher.clone()).await;
        self.counters.current_running.fetch_sub(1, Ordering::Relaxed);

        let decision =
            self.coordinator
                .decide_with(&mut result, job.retry_count, job.max_retries);

        match decision {
            RetryDecision::Succeeded => {
                self.update_progress(id, 100, "Completed".to_string(), dispatcher.as_ref());
                self.finish(id, |job| job.complete(result));
                self.counters.total_completed.fetch_add(1, Ordering::Relaxed);
                info!("Job completed: {}", id);
                self.release_callback(job.callback_id);
            }
            RetryDecision::NotRetryable | RetryDecision::Exhausted => {
                let category = result.error_details.as_ref().map(|d| d.category);
                self.finish(id, |job| job.fail(result));
                self.counters.total_failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Job failed: {} ({:?}, {} retries)",
                    id, category, job.retry_count
                );
                self.release_callback(job.callback_id);
            }
            RetryDecision::Retry { delay } => {
                let category = result.error_details.as_ref().map(|d| d.category);
                self.finish(id, |job| job.begin_retry(result));
                warn!(
                    "Job {} failed with {:?}, retrying ({}/{}) in {:?}",
                    id,
                    category,
                    job.retry_count + 1,
                    job.max_retries,
                    delay
                );

                tokio::select! {
                    _ = time::sleep(delay) => {}
                    _ = shutdown.changed() => {
                        debug!("Backoff for job {} interrupted by shutdown", id);
                    }
                }

                self.finish(id, |job| job.requeue());
                self.queue.put(id, job.priority);
            }
        }
    }

    async fn execute_attempt(
        &self,
        job: &Job,
        dispatcher: Option<ProgressDispatcher>,
    ) -> ExecutionResult {
        let Some(descriptor) = self.registry.get_script(&job.script_id) else {
            let details = classify::describe_unknown_script(&job.script_id);
            let mut result = ExecutionResult::rejected(details, Utc::now());
            result.attempt = job.retry_count;
            return result;
        };

        let sink = dispatcher.map(ProgressDispatcher::sink);
        self.coordinator
            .execute_once(&descriptor, &job.arguments, job.retry_count, sink)
            .await
    }

    /// Applies a transition to an indexed job and writes it through
    fn finish<F, E>(&self, id: Uuid, transition: F)
    where
        F: FnOnce(&mut Job) -> Result<(), E>,
        E: std::fmt::Display,
    {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(&id) else {
            warn!("Job {} vanished from the index", id);
            return;
        };
        match transition(job) {
            Ok(()) => self.persist(job),
            Err(e) => error!("Rejected transition for job {}: {}", id, e),
        }
    }

    fn update_progress(
        &self,
        id: Uuid,
        percentage: u8,
        message: String,
        dispatcher: Option<&ProgressDispatcher>,
    ) {
        let progress = {
            let mut jobs = self.jobs.lock().unwrap();
            let Some(job) = jobs.get_mut(&id) else {
                return;
            };
            job.progress.update(percentage as u64, Some(100), Some(message));
            job.progress.clone()
        };
        if let Some(dispatcher) = dispatcher {
            dispatcher.send(progress);
        }
    }

    fn release_callback(&self, callback_id: Option<Uuid>) {
        if let Some(callback_id) = callback_id {
            self.callbacks.lock().unwrap().remove(&callback_id);
        }
    }

    fn persist(&self, job: &Job) {
        if let Err(e) = self.store.save(job) {
            error!("Failed to persist job {}: {}", job.id, e);
        }
    }

    /// Evicts old terminal jobs from memory and expired records from disk
    pub fn sweep_retention(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.memory_retention)
                .unwrap_or_else(|_| chrono::Duration::hours(1));
        let evicted = {
            let mut jobs = self.jobs.lock().unwrap();
            let before = jobs.len();
            jobs.retain(|_, job| {
                !(job.is_terminal() && job.completed_at.is_some_and(|at| at < cutoff))
            });
            before - jobs.len()
        };
        if evicted > 0 {
            debug!("Evicted {} finished job(s) from memory", evicted);
        }

        if let Err(e) = self.store.cleanup_terminal(self.config.retention) {
            warn!("Retention sweep failed: {}", e);
        }
    }

    /// Picks up pending records written by other processes
    ///
    /// Returns the number of adopted jobs.
    pub fn adopt_submitted(&self) -> usize {
        let persisted = match self.store.list_all() {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!("Failed to scan job store: {}", e);
                return 0;
            }
        };

        let mut jobs = self.jobs.lock().unwrap();
        let mut adopted = 0;
        for job in persisted {
            if job.status != JobStatus::Pending || jobs.contains_key(&job.id) {
                continue;
            }
            info!("Adopted job {} ({})", job.id, job.script_id);
            self.queue.put(job.id, job.priority);
            jobs.insert(job.id, job);
            self.counters.total_submitted.fetch_add(1, Ordering::Relaxed);
            adopted += 1;
        }
        adopted
    }

    fn spawn_retention_task(self: &Arc<Self>) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        let period = self.config.retention_sweep_interval;
        tokio::spawn(async move {
            let mut ticker = time::interval(period);
            loop {
                ticker.tick().await;
                queue.sweep_retention();
            }
        })
    }

    fn spawn_intake_task(self: &Arc<Self>) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        let period = self.config.intake_interval;
        tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                queue.adopt_submitted();
            }
        })
    }
}

/// Delivers one job's progress to its callback in order, off the runtime
///
/// Updates go through a channel to a single blocking-pool task, which runs
/// the callback and logs its panics.
#[derive(Clone)]
struct ProgressDispatcher {
    job_id: Uuid,
    tx: mpsc::UnboundedSender<JobProgress>,
    last: Arc<Mutex<JobProgress>>,
}

impl ProgressDispatcher {
    fn spawn(job_id: Uuid, callback: ProgressCallback) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<JobProgress>();
        tokio::task::spawn_blocking(move || {
            while let Some(progress) = rx.blocking_recv() {
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    callback(job_id, progress);
                }));
                if outcome.is_err() {
                    error!("Progress callback for job {} panicked", job_id);
                }
            }
        });
        Self {
            job_id,
            tx,
            last: Arc::new(Mutex::new(JobProgress::default())),
        }
    }

    fn send(&self, progress: JobProgress) {
        *self.last.lock().unwrap() = progress.clone();
        if self.tx.send(progress).is_err() {
            debug!("Progress receiver for job {} is gone", self.job_id);
        }
    }

    /// Sink handed to the execution engine for running updates
    fn sink(self) -> ProgressSink {
        Arc::new(move |percentage: u8, message: String| {
            let mut progress = self.last.lock().unwrap().clone();
            progress.update(percentage as u64, Some(100), Some(message));
            self.send(progress);
        })
    }
}
