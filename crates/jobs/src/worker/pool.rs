//! Worker pool for one queue
//!
//! Runs up to `concurrency` jobs at once with stalled-job detection and
//! graceful shutdown.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::context::JobContext;
use super::poller::{JobPoller, PollerConfig};
use super::processor::{JobInput, Processor, ProcessorError};
use crate::events::{EventBus, JobEvent, JobEventKind};
use crate::persistence::{
    ClaimedJob, FailureOutcome, JobStore, StallOutcome, StoreError, STALLED_FAILURE_REASON,
};
use crate::queue::QueueDefinition;

/// Worker status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Created but never started
    Idle,
    /// Polling and executing jobs
    Running,
    /// Finishing in-flight jobs, not claiming new ones
    Draining,
    /// Closed
    Stopped,
}

/// Worker errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Worker already running
    #[error("worker for queue {0} is already running")]
    AlreadyRunning(String),

    /// Worker was closed and cannot be restarted
    #[error("worker for queue {0} is closed")]
    Closed(String),

    /// No processor attached
    #[error("no processor attached to queue {0}")]
    NoProcessor(String),

    /// In-flight jobs outlived the grace period
    #[error("{abandoned} job(s) still running on queue {queue} after the grace period")]
    ShutdownTimeout { queue: String, abandoned: usize },
}

/// Cancellation tokens of running jobs, keyed by job id and lock token
///
/// A job can be re-claimed by this pool while its previous run is still
/// winding down, so each run is tracked under its own lock token.
#[derive(Clone, Default)]
struct InFlight(Arc<Mutex<HashMap<(Uuid, Uuid), CancellationToken>>>);

impl InFlight {
    fn insert(&self, job_id: Uuid, lock_token: Uuid, cancel: CancellationToken) {
        self.0.lock().insert((job_id, lock_token), cancel);
    }

    fn remove(&self, job_id: Uuid, lock_token: Uuid) {
        self.0.lock().remove(&(job_id, lock_token));
    }

    /// Cancel the run holding `lock_token`, or every run of the job when unknown
    fn cancel_run(&self, job_id: Uuid, lock_token: Option<Uuid>) -> usize {
        let runs = self.0.lock();
        let mut cancelled = 0;
        for ((id, token), cancel) in runs.iter() {
            if *id == job_id && lock_token.map_or(true, |t| t == *token) {
                cancel.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    fn cancel_all(&self) {
        for cancel in self.0.lock().values() {
            cancel.cancel();
        }
    }
}

/// Consumer pool for one queue
///
/// # Example
///
/// ```ignore
/// let worker = Worker::new(definition, store, events);
/// worker.set_processor(processor_fn(|job, ctx| async move {
///     ctx.update_progress(50).await?;
///     Ok(json!({"parsed": true}))
/// }));
///
/// worker.start()?;
///
/// // ... later, graceful shutdown
/// worker.close(Duration::from_secs(30)).await?;
/// ```
pub struct Worker {
    definition: Arc<QueueDefinition>,
    store: Arc<dyn JobStore>,
    events: Arc<EventBus>,
    poller: PollerConfig,
    processor: RwLock<Option<Arc<dyn Processor>>>,
    status: RwLock<WorkerStatus>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    slots: Arc<Semaphore>,
    in_flight: InFlight,
    poll_handle: Mutex<Option<JoinHandle<()>>>,
    stalled_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Create an unstarted worker
    pub fn new(
        definition: Arc<QueueDefinition>,
        store: Arc<dyn JobStore>,
        events: Arc<EventBus>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let slots = Arc::new(Semaphore::new(definition.concurrency));

        Self {
            definition,
            store,
            events,
            poller: PollerConfig::default(),
            processor: RwLock::new(None),
            status: RwLock::new(WorkerStatus::Idle),
            shutdown_tx,
            shutdown_rx,
            slots,
            in_flight: InFlight::default(),
            poll_handle: Mutex::new(None),
            stalled_handle: Mutex::new(None),
        }
    }

    /// Set poller configuration
    pub fn with_poller(mut self, config: PollerConfig) -> Self {
        self.poller = config;
        self
    }

    /// Attach the processor; replaces any previous one for the next start
    pub fn set_processor(&self, processor: Arc<dyn Processor>) {
        *self.processor.write() = Some(processor);
    }

    pub fn has_processor(&self) -> bool {
        self.processor.read().is_some()
    }

    pub fn queue_name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &QueueDefinition {
        &self.definition
    }

    pub fn status(&self) -> WorkerStatus {
        *self.status.read()
    }

    /// Jobs currently holding a slot
    pub fn active_count(&self) -> usize {
        self.definition.concurrency - self.slots.available_permits()
    }

    /// Start polling and stall detection
    #[instrument(skip(self), fields(queue = %self.definition.name))]
    pub fn start(&self) -> Result<(), WorkerError> {
        let processor = self
            .processor
            .read()
            .clone()
            .ok_or_else(|| WorkerError::NoProcessor(self.definition.name.clone()))?;

        {
            let mut status = self.status.write();
            match *status {
                WorkerStatus::Idle => *status = WorkerStatus::Running,
                WorkerStatus::Running | WorkerStatus::Draining => {
                    return Err(WorkerError::AlreadyRunning(self.definition.name.clone()));
                }
                WorkerStatus::Stopped => {
                    return Err(WorkerError::Closed(self.definition.name.clone()));
                }
            }
        }

        info!(
            queue = %self.definition.name,
            concurrency = self.definition.concurrency,
            job_timeout_ms = self.definition.job_timeout.as_millis() as u64,
            "Starting worker"
        );

        self.start_poll_loop(processor);
        self.start_stalled_loop();
        Ok(())
    }

    /// Stop claiming, drain in-flight jobs for up to `grace`, then cancel the rest
    ///
    /// A no-op on a worker that was never started or is already closed.
    #[instrument(skip(self), fields(queue = %self.definition.name))]
    pub async fn close(&self, grace: Duration) -> Result<(), WorkerError> {
        {
            let mut status = self.status.write();
            match *status {
                WorkerStatus::Idle | WorkerStatus::Stopped => {
                    *status = WorkerStatus::Stopped;
                    return Ok(());
                }
                WorkerStatus::Draining => return Ok(()),
                WorkerStatus::Running => *status = WorkerStatus::Draining,
            }
        }

        info!(queue = %self.definition.name, "Closing worker");
        let _ = self.shutdown_tx.send(true);

        let handles = [
            self.poll_handle.lock().take(),
            self.stalled_handle.lock().take(),
        ];
        for handle in handles.into_iter().flatten() {
            if let Err(e) = handle.await {
                error!(queue = %self.definition.name, "Worker loop failed: {}", e);
            }
        }

        let deadline = tokio::time::Instant::now() + grace;
        let result = loop {
            let active = self.active_count();
            if active == 0 {
                debug!("All jobs drained");
                break Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                // Abandoned jobs keep their lock until it expires and are recovered as stalled
                self.in_flight.cancel_all();
                warn!(
                    queue = %self.definition.name,
                    abandoned = active,
                    "Grace period expired, cancelling in-flight jobs"
                );
                break Err(WorkerError::ShutdownTimeout {
                    queue: self.definition.name.clone(),
                    abandoned: active,
                });
            }

            tokio::time::sleep(Duration::from_millis(25)).await;
        };

        *self.status.write() = WorkerStatus::Stopped;
        info!(queue = %self.definition.name, "Worker stopped");
        result
    }

    fn start_poll_loop(&self, processor: Arc<dyn Processor>) {
        let store = Arc::clone(&self.store);
        let events = Arc::clone(&self.events);
        let definition = Arc::clone(&self.definition);
        let slots = Arc::clone(&self.slots);
        let in_flight = self.in_flight.clone();
        let mut poller = JobPoller::new(
            Arc::clone(&self.store),
            definition.name.clone(),
            definition.job_timeout,
            self.poller.clone(),
            self.shutdown_rx.clone(),
        );

        let handle = tokio::spawn(async move {
            loop {
                if poller.is_shutdown() {
                    debug!("Poll loop: shutdown requested");
                    break;
                }

                let available = slots.available_permits();
                if available == 0 {
                    if poller.wait().await {
                        break;
                    }
                    continue;
                }

                match poller.poll(available).await {
                    Ok(jobs) => {
                        for job in jobs {
                            // Only this loop takes permits, so one is free for every claimed job
                            let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
                                break;
                            };
                            let run = JobRun {
                                job,
                                definition: Arc::clone(&definition),
                                store: Arc::clone(&store),
                                events: Arc::clone(&events),
                                processor: Arc::clone(&processor),
                                in_flight: in_flight.clone(),
                            };
                            tokio::spawn(run.execute(permit));
                        }
                    }
                    Err(e) => {
                        error!(queue = %definition.name, "Poll error: {}", e);
                    }
                }

                if poller.wait().await {
                    break;
                }
            }

            debug!("Poll loop exited");
        });

        *self.poll_handle.lock() = Some(handle);
    }

    fn start_stalled_loop(&self) {
        let store = Arc::clone(&self.store);
        let events = Arc::clone(&self.events);
        let definition = Arc::clone(&self.definition);
        let in_flight = self.in_flight.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(definition.stalled_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        check_stalled(&store, &events, &definition, &in_flight).await;
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Stalled loop: shutdown requested");
                        break;
                    }
                }
            }

            debug!("Stalled loop exited");
        });

        *self.stalled_handle.lock() = Some(handle);
    }
}

async fn check_stalled(
    store: &Arc<dyn JobStore>,
    events: &EventBus,
    definition: &QueueDefinition,
    in_flight: &InFlight,
) {
    let stalled = match store
        .recover_stalled(&definition.name, definition.max_stalled_count)
        .await
    {
        Ok(stalled) => stalled,
        Err(e) => {
            error!(queue = %definition.name, "Stalled job check failed: {}", e);
            return;
        }
    };

    for job in stalled {
        // A local run that lost its lock should stop cooperating
        in_flight.cancel_run(job.id, job.lock_token);

        let (stalled_count, failed_after) = match job.outcome {
            StallOutcome::Requeued { stalled_count } => (stalled_count, None),
            StallOutcome::Failed {
                stalled_count,
                attempts_made,
            } => (stalled_count, Some(attempts_made)),
        };
        let requeued = failed_after.is_none();
        warn!(
            queue = %definition.name,
            job_id = %job.id,
            stalled_count,
            requeued,
            "Recovered stalled job"
        );
        events.publish(JobEvent::new(
            definition.name.clone(),
            job.id,
            JobEventKind::Stalled {
                stalled_count,
                requeued,
            },
        ));

        if let Some(attempts_made) = failed_after {
            events.publish(JobEvent::new(
                definition.name.clone(),
                job.id,
                JobEventKind::Failed {
                    attempts_made,
                    reason: STALLED_FAILURE_REASON.to_string(),
                },
            ));
        }
    }
}

/// One claimed job on its way through the processor
struct JobRun {
    job: ClaimedJob,
    definition: Arc<QueueDefinition>,
    store: Arc<dyn JobStore>,
    events: Arc<EventBus>,
    processor: Arc<dyn Processor>,
    in_flight: InFlight,
}

impl JobRun {
    async fn execute(self, permit: OwnedSemaphorePermit) {
        let job_id = self.job.id;
        let lock_token = self.job.lock_token;
        let queue = self.definition.name.clone();
        let cancel = CancellationToken::new();
        self.in_flight.insert(job_id, lock_token, cancel.clone());

        self.events.publish(JobEvent::new(
            queue.clone(),
            job_id,
            JobEventKind::Started {
                attempts_made: self.job.attempts_made,
            },
        ));

        let ctx = JobContext::new(
            &self.job,
            self.definition.job_timeout,
            Arc::clone(&self.store),
            Arc::clone(&self.events),
            cancel.clone(),
        );
        let input = JobInput::from(&self.job);

        let result = AssertUnwindSafe(self.processor.process(input, ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(ProcessorError::retryable("processor panicked")));

        match result {
            Ok(output) => self.report_success(output).await,
            // Shutdown or a lost lock ended the run; stall recovery requeues the job
            Err(err) if cancel.is_cancelled() => {
                warn!(
                    queue = %queue,
                    %job_id,
                    reason = %err.message,
                    "Run cancelled, leaving job to stall recovery"
                );
            }
            Err(err) => self.report_failure(err).await,
        }

        self.in_flight.remove(job_id, lock_token);
        drop(permit);
    }

    async fn report_success(&self, output: serde_json::Value) {
        let job_id = self.job.id;
        let queue = &self.definition.name;

        match self
            .store
            .complete(job_id, self.job.lock_token, output.clone())
            .await
        {
            Ok(()) => {
                self.events.publish(JobEvent::new(
                    queue.clone(),
                    job_id,
                    JobEventKind::Completed { result: output },
                ));
            }
            Err(StoreError::LockLost(_)) => {
                warn!(queue = %queue, %job_id, "Lock lost before completion, dropping result");
            }
            Err(e) => {
                error!(queue = %queue, %job_id, "Failed to complete job: {}", e);
            }
        }
    }

    async fn report_failure(&self, err: ProcessorError) {
        let job_id = self.job.id;
        let queue = &self.definition.name;
        let retryable = err.retryable && self.definition.retry_on.allows(err.code.as_deref());

        match self
            .store
            .fail(job_id, self.job.lock_token, &err.message, retryable)
            .await
        {
            Ok(FailureOutcome::WillRetry {
                attempts_made,
                delay,
            }) => {
                self.events.publish(JobEvent::new(
                    queue.clone(),
                    job_id,
                    JobEventKind::Retrying {
                        attempts_made,
                        delay_ms: delay.as_millis() as u64,
                        reason: err.message,
                    },
                ));
            }
            Ok(FailureOutcome::Failed { attempts_made }) => {
                self.events.publish(JobEvent::new(
                    queue.clone(),
                    job_id,
                    JobEventKind::Failed {
                        attempts_made,
                        reason: err.message,
                    },
                ));
            }
            Err(StoreError::LockLost(_)) => {
                warn!(queue = %queue, %job_id, "Lock lost before failure was recorded, dropping outcome");
            }
            Err(e) => {
                error!(queue = %queue, %job_id, "Failed to record job failure: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{InMemoryJobStore, JobOptions, JobState, NewJob};
    use crate::queue::RetentionPolicy;
    use crate::reliability::{BackoffPolicy, RetryClassification};
    use crate::worker::processor_fn;

    fn fast_poller() -> PollerConfig {
        PollerConfig::new()
            .with_min_interval(Duration::from_millis(5))
            .with_max_interval(Duration::from_millis(20))
    }

    fn setup(definition: QueueDefinition) -> (Arc<InMemoryJobStore>, Arc<EventBus>, Worker) {
        let store = Arc::new(InMemoryJobStore::new());
        let events = Arc::new(EventBus::new([definition.name.clone()], 64));
        let worker = Worker::new(Arc::new(definition), store.clone(), events.clone())
            .with_poller(fast_poller());
        (store, events, worker)
    }

    async fn enqueue(store: &InMemoryJobStore, definition: &QueueDefinition) -> Uuid {
        store
            .enqueue(NewJob {
                queue: definition.name.clone(),
                name: "job".to_string(),
                payload: serde_json::json!({"n": 1}),
                options: JobOptions {
                    attempts: definition.attempts,
                    backoff: definition.backoff,
                    delay: None,
                    retention: RetentionPolicy::keep_all(),
                    job_id: None,
                    priority: None,
                },
            })
            .await
            .unwrap()
            .id
    }

    async fn wait_for_state(store: &InMemoryJobStore, queue: &str, id: Uuid, state: JobState) {
        for _ in 0..400 {
            if let Some(record) = store.get(queue, id).await.unwrap() {
                if record.state == state {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {id} never reached {state}");
    }

    #[test]
    fn test_start_requires_processor() {
        let (_store, _events, worker) = setup(QueueDefinition::new("q"));
        assert!(matches!(worker.start(), Err(WorkerError::NoProcessor(_))));
        assert_eq!(worker.status(), WorkerStatus::Idle);
    }

    #[tokio::test]
    async fn test_close_unstarted_worker_is_noop() {
        let (_store, _events, worker) = setup(QueueDefinition::new("q"));
        worker.close(Duration::from_millis(10)).await.unwrap();
        worker.close(Duration::from_millis(10)).await.unwrap();
        assert_eq!(worker.status(), WorkerStatus::Stopped);
    }

    #[tokio::test]
    async fn test_processes_job_to_completion() {
        let definition = QueueDefinition::new("q");
        let (store, events, worker) = setup(definition.clone());
        let mut rx = events.subscribe("q").unwrap();

        worker.set_processor(processor_fn(|job, ctx| async move {
            ctx.update_progress(50).await?;
            Ok(serde_json::json!({"echo": job.payload}))
        }));
        worker.start().unwrap();
        assert!(matches!(worker.start(), Err(WorkerError::AlreadyRunning(_))));

        let id = enqueue(&store, &definition).await;
        wait_for_state(&store, "q", id, JobState::Completed).await;

        let record = store.get("q", id).await.unwrap().unwrap();
        assert_eq!(record.result, Some(serde_json::json!({"echo": {"n": 1}})));
        assert_eq!(record.attempts_made, 1);
        assert_eq!(record.progress, 50);

        let kinds: Vec<&str> = [
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
        ]
        .iter()
        .map(|e| e.kind.name())
        .collect();
        assert_eq!(kinds, vec!["started", "progress", "completed"]);

        worker.close(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_retryable_code_fails_immediately() {
        let definition = QueueDefinition::new("embeddings")
            .with_attempts(3)
            .with_retry_on(RetryClassification::transient_connection());
        let (store, _events, worker) = setup(definition.clone());

        worker.set_processor(processor_fn(|_job, _ctx| async move {
            Err(ProcessorError::retryable("model not found").with_code("ENOTFOUND"))
        }));
        worker.start().unwrap();

        let id = enqueue(&store, &definition).await;
        wait_for_state(&store, "embeddings", id, JobState::Failed).await;

        let record = store.get("embeddings", id).await.unwrap().unwrap();
        assert_eq!(record.attempts_made, 1);
        assert_eq!(record.failure_reason.as_deref(), Some("model not found"));

        worker.close(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_schedules_backoff() {
        let definition = QueueDefinition::new("q")
            .with_attempts(3)
            .with_backoff(BackoffPolicy::fixed(Duration::from_secs(60)));
        let (store, _events, worker) = setup(definition.clone());

        worker.set_processor(processor_fn(|_job, _ctx| async move {
            Err(ProcessorError::retryable("temporary"))
        }));
        worker.start().unwrap();

        let id = enqueue(&store, &definition).await;
        wait_for_state(&store, "q", id, JobState::Delayed).await;

        let record = store.get("q", id).await.unwrap().unwrap();
        assert_eq!(record.attempts_made, 1);
        assert_eq!(record.failure_reason, None);

        worker.close(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_processor_is_isolated() {
        let definition = QueueDefinition::new("q").with_attempts(1);
        let (store, _events, worker) = setup(definition.clone());

        worker.set_processor(processor_fn(|job, _ctx| async move {
            if job.attempts_made > 0 {
                panic!("processor bug");
            }
            Ok(serde_json::Value::Null)
        }));
        worker.start().unwrap();

        let id = enqueue(&store, &definition).await;
        wait_for_state(&store, "q", id, JobState::Failed).await;

        let record = store.get("q", id).await.unwrap().unwrap();
        assert_eq!(record.failure_reason.as_deref(), Some("processor panicked"));

        worker.close(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_cancels_jobs_after_grace() {
        let definition = QueueDefinition::new("q");
        let (store, _events, worker) = setup(definition.clone());

        worker.set_processor(processor_fn(|_job, ctx| async move {
            ctx.cancelled().await;
            Err(ProcessorError::non_retryable("cancelled"))
        }));
        worker.start().unwrap();

        let id = enqueue(&store, &definition).await;
        wait_for_state(&store, "q", id, JobState::Active).await;

        let result = worker.close(Duration::from_millis(50)).await;
        assert!(matches!(
            result,
            Err(WorkerError::ShutdownTimeout { abandoned: 1, .. })
        ));
        assert_eq!(worker.status(), WorkerStatus::Stopped);
        assert!(matches!(worker.start(), Err(WorkerError::Closed(_))));
    }

    #[tokio::test]
    async fn test_abandoned_job_is_recovered_not_failed() {
        let definition = QueueDefinition::new("q").with_attempts(3);
        let (store, _events, worker) = setup(definition.clone());

        worker.set_processor(processor_fn(|_job, ctx| async move {
            loop {
                ctx.update_progress(10).await?;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }));
        worker.start().unwrap();

        let id = enqueue(&store, &definition).await;
        wait_for_state(&store, "q", id, JobState::Active).await;

        let result = worker.close(Duration::from_millis(50)).await;
        assert!(matches!(
            result,
            Err(WorkerError::ShutdownTimeout { abandoned: 1, .. })
        ));
        for _ in 0..200 {
            if worker.active_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(worker.active_count(), 0);

        // The cancelled run reported nothing, so the job still holds its lock
        let record = store.get("q", id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Active);
        assert_eq!(record.failure_reason, None);

        store.expire_lock(id);
        let stalled = store
            .recover_stalled("q", definition.max_stalled_count)
            .await
            .unwrap();
        assert_eq!(stalled[0].outcome, StallOutcome::Requeued { stalled_count: 1 });

        let record = store.get("q", id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Waiting);
        assert_eq!(record.attempts_made, 0);
    }

    #[test]
    fn test_stall_cancels_only_the_expired_run() {
        let in_flight = InFlight::default();
        let job_id = Uuid::now_v7();
        let (stale_token, fresh_token) = (Uuid::now_v7(), Uuid::now_v7());
        let stale = CancellationToken::new();
        let fresh = CancellationToken::new();
        in_flight.insert(job_id, stale_token, stale.clone());
        in_flight.insert(job_id, fresh_token, fresh.clone());

        assert_eq!(in_flight.cancel_run(job_id, Some(stale_token)), 1);
        assert!(stale.is_cancelled());
        assert!(!fresh.is_cancelled());

        // Finishing the stale run leaves the fresh one tracked
        in_flight.remove(job_id, stale_token);
        assert_eq!(in_flight.cancel_run(job_id, None), 1);
        assert!(fresh.is_cancelled());
    }
}
