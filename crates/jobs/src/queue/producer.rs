//! Queue producer handle

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::definition::{QueueDefinition, MAX_ATTEMPTS, MAX_PRIORITY};
use crate::error::QueueError;
use crate::persistence::{JobOptions, JobState, JobStore, NewJob};
use crate::reliability::BackoffPolicy;

/// Per-job overrides of the queue's default options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    pub attempts: Option<u32>,
    pub backoff: Option<BackoffPolicy>,
    pub delay: Option<Duration>,
    pub job_id: Option<Uuid>,
    pub priority: Option<u32>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the attempt budget (clamped to 1..=100)
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Hold the job back before it becomes claimable
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Use a caller-chosen id; enqueueing the same id twice yields one job
    pub fn with_job_id(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }

    /// Claim ahead of lower-priority and unprioritized jobs; 1 is the most urgent
    /// and 0 means no priority
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Reference to a freshly enqueued job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: Uuid,
    pub queue: String,
    pub name: String,
    pub state: JobState,
    /// 1-based rank among waiting jobs at enqueue time
    pub position: Option<u64>,
}

/// Producer for one named queue
pub struct Queue {
    definition: Arc<QueueDefinition>,
    store: Arc<dyn JobStore>,
    closed: AtomicBool,
}

impl Queue {
    pub fn new(definition: Arc<QueueDefinition>, store: Arc<dyn JobStore>) -> Self {
        Self {
            definition,
            store,
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &QueueDefinition {
        &self.definition
    }

    /// Options every job of this queue starts from
    pub fn default_options(&self) -> JobOptions {
        JobOptions {
            attempts: self.definition.attempts,
            backoff: self.definition.backoff,
            delay: None,
            retention: self.definition.retention,
            job_id: None,
            priority: None,
        }
    }

    /// Merge caller overrides into the queue defaults
    pub fn resolve_options(&self, overrides: &EnqueueOptions) -> JobOptions {
        let defaults = self.default_options();
        JobOptions {
            attempts: overrides
                .attempts
                .map_or(defaults.attempts, |a| a.clamp(1, MAX_ATTEMPTS)),
            backoff: overrides.backoff.unwrap_or(defaults.backoff),
            delay: overrides.delay,
            retention: defaults.retention,
            job_id: overrides.job_id,
            priority: overrides
                .priority
                .filter(|p| *p > 0)
                .map(|p| p.min(MAX_PRIORITY)),
        }
    }

    /// Add a job to the queue
    #[instrument(skip(self, payload, options), fields(queue = %self.definition.name))]
    pub async fn enqueue(
        &self,
        job_name: &str,
        payload: serde_json::Value,
        options: Option<EnqueueOptions>,
    ) -> Result<JobHandle, QueueError> {
        if self.is_closed() {
            return Err(QueueError::QueueClosed(self.definition.name.clone()));
        }

        let options = self.resolve_options(&options.unwrap_or_default());
        let record = self
            .store
            .enqueue(NewJob {
                queue: self.definition.name.clone(),
                name: job_name.to_string(),
                payload,
                options,
            })
            .await?;

        // The job is stored at this point; a failed lookup only loses the rank
        let position = if record.state == JobState::Waiting {
            match self.store.position(&record.queue, record.id).await {
                Ok(position) => position,
                Err(e) => {
                    warn!(job_id = %record.id, error = %e, "Could not determine queue position");
                    None
                }
            }
        } else {
            None
        };

        debug!(
            job_id = %record.id,
            job_name,
            state = %record.state,
            position,
            "Job enqueued"
        );

        Ok(JobHandle {
            id: record.id,
            queue: record.queue,
            name: record.name,
            state: record.state,
            position,
        })
    }

    /// Stop workers from claiming jobs of this queue
    pub async fn pause(&self) -> Result<(), QueueError> {
        self.store.set_paused(&self.definition.name, true).await?;
        info!(queue = %self.definition.name, "Queue paused");
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), QueueError> {
        self.store.set_paused(&self.definition.name, false).await?;
        info!(queue = %self.definition.name, "Queue resumed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Reject further enqueues; idempotent
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(queue = %self.definition.name, "Queue closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{
        ClaimedJob, CleanPolicy, FailureOutcome, InMemoryJobStore, JobCounts, JobRecord,
        StalledJob, StoreError,
    };

    fn queue() -> (Arc<InMemoryJobStore>, Queue) {
        let store = Arc::new(InMemoryJobStore::new());
        let definition = QueueDefinition::new("document-export")
            .with_attempts(3)
            .with_backoff(BackoffPolicy::exponential(Duration::from_secs(2)));
        (store.clone(), Queue::new(Arc::new(definition), store))
    }

    #[test]
    fn test_resolve_options_merges_overrides() {
        let (_store, queue) = queue();

        let defaults = queue.resolve_options(&EnqueueOptions::new());
        assert_eq!(defaults, queue.default_options());
        assert_eq!(defaults.attempts, 3);

        let custom = queue.resolve_options(
            &EnqueueOptions::new()
                .with_attempts(5)
                .with_backoff(BackoffPolicy::fixed(Duration::from_secs(1)))
                .with_delay(Duration::from_secs(10)),
        );
        assert_eq!(custom.attempts, 5);
        assert_eq!(custom.backoff, BackoffPolicy::fixed(Duration::from_secs(1)));
        assert_eq!(custom.delay, Some(Duration::from_secs(10)));
        assert_eq!(custom.retention, defaults.retention);
    }

    #[test]
    fn test_priority_override_is_clamped() {
        let (_store, queue) = queue();

        let options = queue.resolve_options(&EnqueueOptions::new().with_priority(7));
        assert_eq!(options.priority, Some(7));

        let options = queue.resolve_options(&EnqueueOptions::new().with_priority(u32::MAX));
        assert_eq!(options.priority, Some(MAX_PRIORITY));

        let options = queue.resolve_options(&EnqueueOptions::new().with_priority(0));
        assert_eq!(options.priority, None);
    }

    #[test]
    fn test_attempts_override_is_clamped() {
        let (_store, queue) = queue();

        let options = queue.resolve_options(&EnqueueOptions::new().with_attempts(0));
        assert_eq!(options.attempts, 1);

        let options = queue.resolve_options(&EnqueueOptions::new().with_attempts(10_000));
        assert_eq!(options.attempts, MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_enqueue_returns_handle_with_position() {
        let (store, queue) = queue();

        let first = queue
            .enqueue("export-pdf", serde_json::json!({"resume_id": 1}), None)
            .await
            .unwrap();
        let second = queue
            .enqueue("export-pdf", serde_json::json!({"resume_id": 2}), None)
            .await
            .unwrap();

        assert_eq!(first.position, Some(1));
        assert_eq!(second.position, Some(2));
        assert_eq!(second.state, JobState::Waiting);

        let record = store.get("document-export", first.id).await.unwrap().unwrap();
        assert_eq!(record.max_attempts, 3);
        assert_eq!(record.payload, serde_json::json!({"resume_id": 1}));
    }

    #[tokio::test]
    async fn test_delayed_enqueue_has_no_position() {
        let (_store, queue) = queue();

        let handle = queue
            .enqueue(
                "export-pdf",
                serde_json::json!({}),
                Some(EnqueueOptions::new().with_delay(Duration::from_secs(60))),
            )
            .await
            .unwrap();

        assert_eq!(handle.state, JobState::Delayed);
        assert_eq!(handle.position, None);
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_enqueue() {
        let (_store, queue) = queue();
        queue.close();
        queue.close();

        let result = queue.enqueue("export-pdf", serde_json::json!({}), None).await;
        assert!(matches!(result, Err(QueueError::QueueClosed(name)) if name == "document-export"));
    }

    #[tokio::test]
    async fn test_same_job_id_enqueues_once() {
        let (store, queue) = queue();
        let id = Uuid::now_v7();
        let options = EnqueueOptions::new().with_job_id(id);

        let first = queue
            .enqueue("export-pdf", serde_json::json!({"resume_id": 1}), Some(options.clone()))
            .await
            .unwrap();
        let second = queue
            .enqueue("export-pdf", serde_json::json!({"resume_id": 1}), Some(options))
            .await
            .unwrap();

        assert_eq!(first.id, id);
        assert_eq!(second.id, id);
        assert_eq!(second.position, Some(1));
        assert_eq!(store.counts("document-export").await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn test_prioritized_job_ranks_first() {
        let (_store, queue) = queue();
        queue
            .enqueue("export-pdf", serde_json::json!({}), None)
            .await
            .unwrap();

        let urgent = queue
            .enqueue(
                "export-pdf",
                serde_json::json!({}),
                Some(EnqueueOptions::new().with_priority(1)),
            )
            .await
            .unwrap();
        assert_eq!(urgent.position, Some(1));
    }

    /// Store whose position lookup always fails
    struct PositionUnavailable(InMemoryJobStore);

    #[async_trait::async_trait]
    impl JobStore for PositionUnavailable {
        async fn enqueue(&self, job: NewJob) -> Result<JobRecord, StoreError> {
            self.0.enqueue(job).await
        }
        async fn claim(
            &self,
            queue: &str,
            limit: usize,
            lock_duration: Duration,
        ) -> Result<Vec<ClaimedJob>, StoreError> {
            self.0.claim(queue, limit, lock_duration).await
        }
        async fn extend_lock(
            &self,
            job_id: Uuid,
            lock_token: Uuid,
            lock_duration: Duration,
            progress: Option<u8>,
        ) -> Result<(), StoreError> {
            self.0.extend_lock(job_id, lock_token, lock_duration, progress).await
        }
        async fn complete(
            &self,
            job_id: Uuid,
            lock_token: Uuid,
            result: serde_json::Value,
        ) -> Result<(), StoreError> {
            self.0.complete(job_id, lock_token, result).await
        }
        async fn fail(
            &self,
            job_id: Uuid,
            lock_token: Uuid,
            reason: &str,
            retryable: bool,
        ) -> Result<FailureOutcome, StoreError> {
            self.0.fail(job_id, lock_token, reason, retryable).await
        }
        async fn recover_stalled(
            &self,
            queue: &str,
            max_stalled_count: u32,
        ) -> Result<Vec<StalledJob>, StoreError> {
            self.0.recover_stalled(queue, max_stalled_count).await
        }
        async fn get(&self, queue: &str, job_id: Uuid) -> Result<Option<JobRecord>, StoreError> {
            self.0.get(queue, job_id).await
        }
        async fn position(&self, _queue: &str, _job_id: Uuid) -> Result<Option<u64>, StoreError> {
            Err(StoreError::Database("statement timeout".to_string()))
        }
        async fn list(
            &self,
            queue: &str,
            state: JobState,
            limit: usize,
        ) -> Result<Vec<JobRecord>, StoreError> {
            self.0.list(queue, state, limit).await
        }
        async fn counts(&self, queue: &str) -> Result<JobCounts, StoreError> {
            self.0.counts(queue).await
        }
        async fn remove(&self, queue: &str, job_id: Uuid) -> Result<bool, StoreError> {
            self.0.remove(queue, job_id).await
        }
        async fn retry(&self, queue: &str, job_id: Uuid) -> Result<bool, StoreError> {
            self.0.retry(queue, job_id).await
        }
        async fn clean(
            &self,
            queue: &str,
            state: JobState,
            policy: CleanPolicy,
        ) -> Result<u64, StoreError> {
            self.0.clean(queue, state, policy).await
        }
        async fn set_paused(&self, queue: &str, paused: bool) -> Result<(), StoreError> {
            self.0.set_paused(queue, paused).await
        }
        async fn ping(&self) -> Result<(), StoreError> {
            self.0.ping().await
        }
        async fn close(&self) {
            self.0.close().await
        }
    }

    #[tokio::test]
    async fn test_position_failure_still_returns_stored_job() {
        let store = Arc::new(PositionUnavailable(InMemoryJobStore::new()));
        let queue = Queue::new(
            Arc::new(QueueDefinition::new("document-export")),
            store.clone(),
        );

        let handle = queue
            .enqueue("export-pdf", serde_json::json!({"resume_id": 9}), None)
            .await
            .unwrap();

        assert_eq!(handle.state, JobState::Waiting);
        assert_eq!(handle.position, None);
        let stored = store.get("document-export", handle.id).await.unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn test_store_outage_maps_to_connection_error() {
        let (store, queue) = queue();
        store.close().await;

        let result = queue.enqueue("export-pdf", serde_json::json!({}), None).await;
        assert!(matches!(result, Err(QueueError::Connection(_))));
    }
}
