//! Job polling with adaptive backoff
//!
//! Claims jobs for one queue, backing off while the queue is idle.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, instrument, trace};

use crate::duration_millis;
use crate::persistence::{ClaimedJob, JobStore, StoreError};

/// Polling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerConfig {
    /// Minimum poll interval (when jobs are available)
    #[serde(with = "duration_millis")]
    pub min_interval: Duration,

    /// Maximum poll interval (when idle)
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Backoff multiplier when no jobs found
    pub backoff_multiplier: f64,

    /// Maximum jobs to claim per poll
    pub batch_size: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(2),
            backoff_multiplier: 1.5,
            batch_size: 10,
        }
    }
}

impl PollerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }
}

/// Idle interval that grows while claims come back empty
#[derive(Debug, Clone, Copy)]
struct IdleBackoff {
    floor: Duration,
    ceiling: Duration,
    factor: f64,
    current: Duration,
}

impl IdleBackoff {
    fn new(config: &PollerConfig) -> Self {
        Self {
            floor: config.min_interval,
            ceiling: config.max_interval.max(config.min_interval),
            factor: config.backoff_multiplier,
            current: config.min_interval,
        }
    }

    fn grow(&mut self) {
        self.current = self.current.mul_f64(self.factor).min(self.ceiling);
    }

    fn reset(&mut self) {
        self.current = self.floor;
    }
}

/// Claims jobs for one queue on behalf of a worker's poll loop
pub struct JobPoller {
    store: Arc<dyn JobStore>,
    queue: String,
    lock_duration: Duration,
    batch_size: usize,
    idle: IdleBackoff,
    shutdown_rx: watch::Receiver<bool>,
}

impl JobPoller {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: String,
        lock_duration: Duration,
        config: PollerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            queue,
            lock_duration,
            batch_size: config.batch_size,
            idle: IdleBackoff::new(&config),
            shutdown_rx,
        }
    }

    /// Claim at most `max_jobs` (and at most one batch)
    ///
    /// Empty claims and store errors both lengthen the next wait.
    #[instrument(skip(self), fields(queue = %self.queue))]
    pub async fn poll(&mut self, max_jobs: usize) -> Result<Vec<ClaimedJob>, StoreError> {
        if self.is_shutdown() || max_jobs == 0 {
            return Ok(Vec::new());
        }

        let limit = max_jobs.min(self.batch_size);
        match self.store.claim(&self.queue, limit, self.lock_duration).await {
            Ok(jobs) if jobs.is_empty() => {
                self.idle.grow();
                trace!(next_poll_ms = self.idle.current.as_millis() as u64, "Queue idle");
                Ok(jobs)
            }
            Ok(jobs) => {
                self.idle.reset();
                debug!(claimed = jobs.len(), limit, "Claimed jobs");
                Ok(jobs)
            }
            Err(e) => {
                self.idle.grow();
                Err(e)
            }
        }
    }

    /// Sleep for the current idle interval; `true` when shutdown interrupted it
    pub async fn wait(&mut self) -> bool {
        if self.is_shutdown() {
            return true;
        }
        let interval = self.idle.current;
        tokio::select! {
            _ = tokio::time::sleep(interval) => false,
            _ = self.shutdown_rx.changed() => true,
        }
    }

    pub fn current_interval(&self) -> Duration {
        self.idle.current
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }
}
