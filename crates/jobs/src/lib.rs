//! # Background Job Orchestration
//!
//! Named work queues backed by a shared job store (PostgreSQL, or in-memory
//! for tests and local development).
//!
//! ## Features
//!
//! - **Bounded worker pools**: Each queue runs at most `concurrency` jobs at once
//! - **Retries with backoff**: Fixed or exponential delays, per-queue retry classification
//! - **Stalled-job detection**: Jobs whose lock lapses are requeued or failed
//! - **Lifecycle events**: Typed per-queue broadcast channels
//! - **Retention**: Completed and failed jobs age out by age and count
//! - **Ordered shutdown**: Workers, then queues, then events, then the connection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       QueueManager                           │
//! │  (one Queue producer and one Worker pool per definition)    │
//! └─────────────────────────────────────────────────────────────┘
//!            │                   │                    │
//!            ▼                   ▼                    ▼
//! ┌──────────────────┐ ┌──────────────────┐ ┌──────────────────┐
//! │ JobStatusService │ │ StatsAggregator  │ │ RetentionSweeper │
//! └──────────────────┘ └──────────────────┘ └──────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         JobStore                             │
//! │  (PostgreSQL: job_queue_jobs, job_queue_state)              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use cvforge_jobs::prelude::*;
//!
//! let connection = Arc::new(ConnectionManager::connect(&StoreConfig::from_env()).await?);
//! let manager = Arc::new(QueueManager::register(
//!     connection.store(),
//!     vec![QueueDefinition::new("document-export").with_concurrency(5)],
//! )?);
//!
//! manager.attach_processor("document-export", processor_fn(|job, ctx| async move {
//!     ctx.update_progress(50).await?;
//!     Ok(json!({"url": format!("/exports/{}.pdf", job.id)}))
//! }))?;
//! manager.start_workers()?;
//!
//! manager.enqueue("document-export", "export-pdf", json!({"resume_id": 7}), None).await?;
//!
//! let report = ShutdownCoordinator::new(manager, connection).shutdown().await;
//! assert!(report.is_clean());
//! ```

pub mod admin;
pub mod config;
pub mod error;
pub mod events;
pub mod persistence;
pub mod queue;
pub mod reliability;
pub mod retention;
pub mod shutdown;
pub mod stats;
pub mod status;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::OrchestratorConfig;
    pub use crate::error::QueueError;
    pub use crate::events::{EventBus, JobEvent, JobEventKind};
    pub use crate::persistence::{
        ConnectionManager, InMemoryJobStore, JobState, JobStore, PostgresJobStore, StoreConfig,
        StoreError,
    };
    pub use crate::queue::{EnqueueOptions, JobHandle, QueueDefinition, QueueManager};
    pub use crate::reliability::{BackoffPolicy, RetryClassification};
    pub use crate::retention::RetentionSweeper;
    pub use crate::shutdown::ShutdownCoordinator;
    pub use crate::stats::StatsAggregator;
    pub use crate::status::JobStatusService;
    pub use crate::worker::{processor_fn, JobContext, JobInput, Processor, ProcessorError};
}

// Re-export key types at crate root
pub use config::OrchestratorConfig;
pub use error::QueueError;
pub use events::{EventBus, JobEvent, JobEventKind};
pub use persistence::{
    ConnectionManager, InMemoryJobStore, JobRecord, JobState, JobStore, PostgresJobStore,
    StoreConfig, StoreError,
};
pub use queue::{
    EnqueueOptions, JobHandle, Queue, QueueDefinition, QueueManager, RetentionPolicy,
};
pub use reliability::{BackoffKind, BackoffPolicy, RetryClassification};
pub use retention::{RetentionSweeper, SweepReport};
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
pub use stats::{HealthThresholds, QueueHealth, QueueStats, StatsAggregator};
pub use status::{JobSnapshot, JobStatusService};
pub use worker::{
    processor_fn, JobContext, JobInput, Processor, ProcessorError, Worker, WorkerError,
    WorkerStatus,
};

/// `Duration` as integer milliseconds
pub(crate) mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// `Option<Duration>` as integer milliseconds or null
pub(crate) mod option_duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
