//! Queue registry
//!
//! Materializes one producer and one worker per queue definition. Built once
//! at startup and shared by `Arc`; lookups against names that were never
//! registered fail with [`QueueError::QueueNotFound`] before touching the
//! store.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::definition::QueueDefinition;
use super::producer::{EnqueueOptions, JobHandle, Queue};
use crate::error::QueueError;
use crate::events::{EventBus, DEFAULT_EVENT_CAPACITY};
use crate::persistence::JobStore;
use crate::worker::{PollerConfig, Processor, Worker, WorkerError};

/// Registry settings shared by every queue
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub poller: PollerConfig,
    pub event_capacity: usize,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            poller: PollerConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Named queues with their producers and workers
pub struct QueueManager {
    store: Arc<dyn JobStore>,
    events: Arc<EventBus>,
    names: Vec<String>,
    queues: HashMap<String, Arc<Queue>>,
    workers: HashMap<String, Arc<Worker>>,
}

impl QueueManager {
    /// Register queue definitions with default settings
    pub fn register(
        store: Arc<dyn JobStore>,
        definitions: Vec<QueueDefinition>,
    ) -> Result<Self, QueueError> {
        Self::register_with(store, definitions, RegistryOptions::default())
    }

    /// Register queue definitions
    ///
    /// Fails with [`QueueError::InvalidDefinition`] if any definition is
    /// invalid or a name appears twice.
    pub fn register_with(
        store: Arc<dyn JobStore>,
        definitions: Vec<QueueDefinition>,
        options: RegistryOptions,
    ) -> Result<Self, QueueError> {
        let mut names = Vec::with_capacity(definitions.len());
        for definition in &definitions {
            definition.validate().map_err(QueueError::InvalidDefinition)?;
            if names.contains(&definition.name) {
                return Err(QueueError::InvalidDefinition(format!(
                    "queue {} registered twice",
                    definition.name
                )));
            }
            names.push(definition.name.clone());
        }

        let events = Arc::new(EventBus::new(names.iter().cloned(), options.event_capacity));
        let mut queues = HashMap::new();
        let mut workers = HashMap::new();

        for definition in definitions {
            let definition = Arc::new(definition);
            let name = definition.name.clone();

            queues.insert(
                name.clone(),
                Arc::new(Queue::new(Arc::clone(&definition), Arc::clone(&store))),
            );
            workers.insert(
                name,
                Arc::new(
                    Worker::new(definition, Arc::clone(&store), Arc::clone(&events))
                        .with_poller(options.poller.clone()),
                ),
            );
        }

        info!(queues = ?names, "Registered queues");

        Ok(Self {
            store,
            events,
            names,
            queues,
            workers,
        })
    }

    /// Shared store handle
    pub fn store(&self) -> Arc<dyn JobStore> {
        Arc::clone(&self.store)
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Queue names in registration order
    pub fn queue_names(&self) -> Vec<String> {
        self.names.clone()
    }

    pub fn definition(&self, name: &str) -> Option<&QueueDefinition> {
        self.queues.get(name).map(|q| q.definition())
    }

    pub fn get_queue(&self, name: &str) -> Option<Arc<Queue>> {
        self.queues.get(name).cloned()
    }

    pub fn get_worker(&self, name: &str) -> Option<Arc<Worker>> {
        self.workers.get(name).cloned()
    }

    /// Producer for a registered queue
    pub fn queue(&self, name: &str) -> Result<&Arc<Queue>, QueueError> {
        self.queues
            .get(name)
            .ok_or_else(|| QueueError::QueueNotFound(name.to_string()))
    }

    /// Worker for a registered queue
    pub fn worker(&self, name: &str) -> Result<&Arc<Worker>, QueueError> {
        self.workers
            .get(name)
            .ok_or_else(|| QueueError::QueueNotFound(name.to_string()))
    }

    /// Producers in registration order
    pub fn queues(&self) -> impl Iterator<Item = &Arc<Queue>> {
        self.names.iter().filter_map(|name| self.queues.get(name))
    }

    /// Workers in registration order
    pub fn workers(&self) -> impl Iterator<Item = &Arc<Worker>> {
        self.names.iter().filter_map(|name| self.workers.get(name))
    }

    /// Bind a processor to a queue's worker
    pub fn attach_processor(
        &self,
        name: &str,
        processor: Arc<dyn Processor>,
    ) -> Result<(), QueueError> {
        self.worker(name)?.set_processor(processor);
        Ok(())
    }

    /// Start every worker that has a processor; returns how many started
    pub fn start_workers(&self) -> Result<usize, WorkerError> {
        self.events.start_dispatcher();

        let mut started = 0;
        for worker in self.workers() {
            if !worker.has_processor() {
                warn!(queue = %worker.queue_name(), "No processor attached, worker not started");
                continue;
            }
            worker.start()?;
            started += 1;
        }
        info!(started, total = self.names.len(), "Workers started");
        Ok(started)
    }

    /// Enqueue a job on a named queue
    #[instrument(skip(self, payload, options))]
    pub async fn enqueue(
        &self,
        queue: &str,
        job_name: &str,
        payload: serde_json::Value,
        options: Option<EnqueueOptions>,
    ) -> Result<JobHandle, QueueError> {
        self.queue(queue)?.enqueue(job_name, payload, options).await
    }

    pub async fn pause(&self, queue: &str) -> Result<(), QueueError> {
        self.queue(queue)?.pause().await
    }

    pub async fn resume(&self, queue: &str) -> Result<(), QueueError> {
        self.queue(queue)?.resume().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryJobStore;
    use crate::worker::{processor_fn, WorkerStatus};

    fn definitions() -> Vec<QueueDefinition> {
        vec![
            QueueDefinition::new("document-export").with_concurrency(5),
            QueueDefinition::new("file-parsing").with_concurrency(5),
        ]
    }

    #[test]
    fn test_register_materializes_queues_and_workers() {
        let store = Arc::new(InMemoryJobStore::new());
        let manager = QueueManager::register(store, definitions()).unwrap();

        assert_eq!(
            manager.queue_names(),
            vec!["document-export".to_string(), "file-parsing".to_string()]
        );
        assert!(manager.get_queue("document-export").is_some());
        assert!(manager.get_worker("file-parsing").is_some());
        assert!(manager.get_queue("ai-generation").is_none());
        assert_eq!(manager.definition("document-export").unwrap().concurrency, 5);
    }

    #[test]
    fn test_register_rejects_duplicates_and_invalid() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());

        let mut duplicated = definitions();
        duplicated.push(QueueDefinition::new("file-parsing"));
        assert!(matches!(
            QueueManager::register(Arc::clone(&store), duplicated),
            Err(QueueError::InvalidDefinition(_))
        ));

        let invalid = vec![QueueDefinition::new("q").with_concurrency(0)];
        assert!(matches!(
            QueueManager::register(store, invalid),
            Err(QueueError::InvalidDefinition(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_queue_fails_before_store_access() {
        let store = Arc::new(InMemoryJobStore::new());
        let manager = QueueManager::register(store.clone(), definitions()).unwrap();

        let result = manager
            .enqueue("unknown", "job", serde_json::json!({}), None)
            .await;
        assert!(matches!(result, Err(QueueError::QueueNotFound(name)) if name == "unknown"));
        assert_eq!(store.job_count(), 0);

        assert!(matches!(
            manager.attach_processor(
                "unknown",
                processor_fn(|_job, _ctx| async move { Ok(serde_json::Value::Null) })
            ),
            Err(QueueError::QueueNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_start_workers_skips_queues_without_processor() {
        let store = Arc::new(InMemoryJobStore::new());
        let manager = QueueManager::register(store, definitions()).unwrap();

        manager
            .attach_processor(
                "document-export",
                processor_fn(|_job, _ctx| async move { Ok(serde_json::Value::Null) }),
            )
            .unwrap();

        assert_eq!(manager.start_workers().unwrap(), 1);
        assert_eq!(
            manager.get_worker("document-export").unwrap().status(),
            WorkerStatus::Running
        );
        assert_eq!(
            manager.get_worker("file-parsing").unwrap().status(),
            WorkerStatus::Idle
        );

        for worker in manager.workers() {
            worker.close(std::time::Duration::from_secs(1)).await.unwrap();
        }
        manager.events().close().await;
    }
}
