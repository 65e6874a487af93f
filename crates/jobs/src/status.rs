//! Point queries and administrative actions on individual jobs

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::QueueError;
use crate::events::{JobEvent, JobEventKind};
use crate::persistence::{JobRecord, JobState, JobStore};
use crate::queue::QueueManager;

/// Read-only view of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    #[serde(flatten)]
    pub job: JobRecord,

    /// 1-based rank among waiting jobs, only while waiting
    pub position: Option<u64>,
}

/// Job lookups, removal and manual retry
#[derive(Clone)]
pub struct JobStatusService {
    manager: Arc<QueueManager>,
}

impl JobStatusService {
    pub fn new(manager: Arc<QueueManager>) -> Self {
        Self { manager }
    }

    fn store_for(&self, queue: &str) -> Result<Arc<dyn JobStore>, QueueError> {
        self.manager.queue(queue)?;
        Ok(self.manager.store())
    }

    /// Snapshot of a job; `None` if it never existed or was evicted
    #[instrument(skip(self))]
    pub async fn get_status(
        &self,
        queue: &str,
        job_id: Uuid,
    ) -> Result<Option<JobSnapshot>, QueueError> {
        let store = self.store_for(queue)?;
        let Some(job) = store.get(queue, job_id).await? else {
            return Ok(None);
        };

        let position = if job.state == JobState::Waiting {
            store.position(queue, job_id).await?
        } else {
            None
        };

        Ok(Some(JobSnapshot { job, position }))
    }

    /// Delete a job in any state; `false` if it was already gone
    ///
    /// A running processor is not interrupted here. Its next progress update
    /// or heartbeat fails and cancels its token, and its outcome is dropped.
    #[instrument(skip(self))]
    pub async fn remove(&self, queue: &str, job_id: Uuid) -> Result<bool, QueueError> {
        let store = self.store_for(queue)?;
        let removed = store.remove(queue, job_id).await?;

        if removed {
            info!(queue, %job_id, "Job removed");
            self.manager
                .events()
                .publish(JobEvent::new(queue, job_id, JobEventKind::Removed));
        }
        Ok(removed)
    }

    /// Most recently failed jobs of a queue
    pub async fn failed_jobs(&self, queue: &str, limit: usize) -> Result<Vec<JobRecord>, QueueError> {
        let store = self.store_for(queue)?;
        Ok(store.list(queue, JobState::Failed, limit).await?)
    }

    /// Move a failed job back to waiting with a fresh attempt budget
    ///
    /// `false` if the job does not exist; an error if it is not failed.
    #[instrument(skip(self))]
    pub async fn retry(&self, queue: &str, job_id: Uuid) -> Result<bool, QueueError> {
        let store = self.store_for(queue)?;
        let retried = store.retry(queue, job_id).await?;
        if retried {
            info!(queue, %job_id, "Failed job requeued");
        }
        Ok(retried)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{InMemoryJobStore, StoreError};
    use crate::queue::QueueDefinition;
    use std::time::Duration;

    fn service() -> (Arc<InMemoryJobStore>, Arc<QueueManager>, JobStatusService) {
        let store = Arc::new(InMemoryJobStore::new());
        let manager = Arc::new(
            QueueManager::register(
                store.clone(),
                vec![QueueDefinition::new("file-parsing").with_attempts(1)],
            )
            .unwrap(),
        );
        (store, Arc::clone(&manager), JobStatusService::new(manager))
    }

    #[tokio::test]
    async fn test_status_of_waiting_job_has_position() {
        let (_store, manager, service) = service();

        manager
            .enqueue("file-parsing", "parse", serde_json::json!({"n": 1}), None)
            .await
            .unwrap();
        let handle = manager
            .enqueue("file-parsing", "parse", serde_json::json!({"n": 2}), None)
            .await
            .unwrap();

        let snapshot = service
            .get_status("file-parsing", handle.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.job.state, JobState::Waiting);
        assert_eq!(snapshot.job.payload, serde_json::json!({"n": 2}));
        assert_eq!(snapshot.position, Some(2));
    }

    #[tokio::test]
    async fn test_missing_job_is_none_and_unknown_queue_is_error() {
        let (_store, _manager, service) = service();

        assert!(service
            .get_status("file-parsing", Uuid::now_v7())
            .await
            .unwrap()
            .is_none());

        let result = service.get_status("nope", Uuid::now_v7()).await;
        assert!(matches!(result, Err(QueueError::QueueNotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent_and_publishes_event() {
        let (_store, manager, service) = service();
        let mut events = manager.events().subscribe("file-parsing").unwrap();

        let handle = manager
            .enqueue("file-parsing", "parse", serde_json::json!({}), None)
            .await
            .unwrap();

        assert!(service.remove("file-parsing", handle.id).await.unwrap());
        assert!(!service.remove("file-parsing", handle.id).await.unwrap());
        assert!(service
            .get_status("file-parsing", handle.id)
            .await
            .unwrap()
            .is_none());

        let event = events.recv().await.unwrap();
        assert_eq!(event.job_id, handle.id);
        assert_eq!(event.kind, JobEventKind::Removed);
    }

    #[tokio::test]
    async fn test_failed_jobs_and_retry() {
        let (store, manager, service) = service();

        let handle = manager
            .enqueue("file-parsing", "parse", serde_json::json!({}), None)
            .await
            .unwrap();

        // Not failed yet
        let result = service.retry("file-parsing", handle.id).await;
        assert!(matches!(
            result,
            Err(QueueError::Store(StoreError::InvalidState { .. }))
        ));

        let claimed = store
            .claim("file-parsing", 1, Duration::from_secs(30))
            .await
            .unwrap();
        store
            .fail(claimed[0].id, claimed[0].lock_token, "corrupt upload", true)
            .await
            .unwrap();

        let failed = service.failed_jobs("file-parsing", 10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].failure_reason.as_deref(), Some("corrupt upload"));

        assert!(service.retry("file-parsing", handle.id).await.unwrap());
        let snapshot = service
            .get_status("file-parsing", handle.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.job.state, JobState::Waiting);
        assert_eq!(snapshot.job.attempts_made, 0);
        assert!(!service.retry("file-parsing", Uuid::now_v7()).await.unwrap());
    }
}
