//! Retention sweeps over terminal jobs
//!
//! Completed and failed jobs are also pruned as they finish, using the
//! retention policy stored on each job. The sweeper catches what that misses,
//! e.g. jobs that aged past the limit while nothing else finished.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::error::QueueError;
use crate::persistence::JobState;
use crate::queue::QueueManager;

/// Daily at 03:00 UTC
pub const DEFAULT_CLEANUP_SCHEDULE: &str = "0 0 3 * * *";

/// Jobs removed by one sweep of one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub completed_removed: u64,
    pub failed_removed: u64,
}

impl SweepReport {
    pub fn total(&self) -> u64 {
        self.completed_removed + self.failed_removed
    }
}

/// Result of sweeping one queue during `sweep_all`
#[derive(Debug, Clone)]
pub struct QueueSweep {
    pub queue: String,
    pub result: Result<SweepReport, QueueError>,
}

/// Prunes completed and failed jobs per queue retention policy
#[derive(Clone)]
pub struct RetentionSweeper {
    manager: Arc<QueueManager>,
}

impl RetentionSweeper {
    pub fn new(manager: Arc<QueueManager>) -> Self {
        Self { manager }
    }

    /// Apply the queue's retention policy to its terminal jobs
    ///
    /// Never touches waiting, active or delayed jobs.
    #[instrument(skip(self))]
    pub async fn sweep(&self, queue: &str) -> Result<SweepReport, QueueError> {
        let retention = self.manager.queue(queue)?.definition().retention;
        let store = self.manager.store();

        let completed_removed = store
            .clean(queue, JobState::Completed, retention.completed())
            .await?;
        let failed_removed = store
            .clean(queue, JobState::Failed, retention.failed())
            .await?;

        let report = SweepReport {
            completed_removed,
            failed_removed,
        };
        debug!(queue, completed_removed, failed_removed, "Queue swept");
        Ok(report)
    }

    /// Sweep every registered queue; one queue failing does not stop the rest
    pub async fn sweep_all(&self) -> Vec<QueueSweep> {
        let mut sweeps = Vec::new();
        let mut removed = 0;

        for queue in self.manager.queue_names() {
            let result = self.sweep(&queue).await;
            match &result {
                Ok(report) => removed += report.total(),
                Err(e) => error!(queue = %queue, error = %e, "Retention sweep failed"),
            }
            sweeps.push(QueueSweep { queue, result });
        }

        info!(queues = sweeps.len(), removed, "Retention sweep finished");
        sweeps
    }

    /// Run `sweep_all` on a cron schedule until `shutdown` is cancelled
    pub fn spawn_schedule(
        &self,
        expression: &str,
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<()>, cron::error::Error> {
        let schedule = cron::Schedule::from_str(expression)?;
        let sweeper = self.clone();
        let expression = expression.to_string();

        info!(schedule = %expression, "Scheduling retention sweeps");

        Ok(tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    info!(schedule = %expression, "Cleanup schedule has no further runs");
                    break;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {
                        sweeper.sweep_all().await;
                    }
                }
            }
            debug!("Retention schedule stopped");
        }))
    }
}
