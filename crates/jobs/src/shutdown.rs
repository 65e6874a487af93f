//! Ordered, idempotent teardown of the orchestration layer
//!
//! Closes, in order: every worker (draining in-flight jobs for the grace
//! period), every queue producer, the event bus, and finally the shared store
//! connection. A failure in one step is logged and the remaining steps still
//! run.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{error, info};

use crate::persistence::ConnectionManager;
use crate::queue::QueueManager;

/// Default time workers get to drain in-flight jobs
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Outcome of a shutdown
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub workers_closed: usize,
    pub queues_closed: usize,
    /// Errors raised while closing components, in order
    pub errors: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Closes every component exactly once
pub struct ShutdownCoordinator {
    manager: Arc<QueueManager>,
    connection: Arc<ConnectionManager>,
    grace: Duration,
    report: OnceCell<ShutdownReport>,
}

impl ShutdownCoordinator {
    pub fn new(manager: Arc<QueueManager>, connection: Arc<ConnectionManager>) -> Self {
        Self {
            manager,
            connection,
            grace: DEFAULT_SHUTDOWN_GRACE,
            report: OnceCell::new(),
        }
    }

    /// Set how long workers may drain
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn is_shut_down(&self) -> bool {
        self.report.initialized()
    }

    /// Shut everything down; later calls return the first report
    pub async fn shutdown(&self) -> ShutdownReport {
        self.report.get_or_init(|| self.run()).await.clone()
    }

    async fn run(&self) -> ShutdownReport {
        info!(grace_secs = self.grace.as_secs(), "Shutting down job orchestration");
        let mut report = ShutdownReport::default();

        // Workers drain concurrently, each within the same grace period
        let closes = self.manager.workers().map(|worker| async move {
            (worker.queue_name().to_string(), worker.close(self.grace).await)
        });
        for (queue, result) in futures::future::join_all(closes).await {
            report.workers_closed += 1;
            if let Err(e) = result {
                error!(queue = %queue, error = %e, "Failed to close worker");
                report.errors.push(e.to_string());
            }
        }

        for queue in self.manager.queues() {
            queue.close();
            report.queues_closed += 1;
        }

        self.manager.events().close().await;
        self.connection.close().await;

        if report.is_clean() {
            info!(
                workers = report.workers_closed,
                queues = report.queues_closed,
                "Shutdown complete"
            );
        } else {
            error!(errors = report.errors.len(), "Shutdown completed with errors");
        }
        report
    }
}
