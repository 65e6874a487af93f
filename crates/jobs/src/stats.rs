//! Per-queue statistics and health evaluation

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::QueueError;
use crate::persistence::JobCounts;
use crate::queue::QueueManager;

/// Job counts for one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    pub total: u64,
    pub paused: bool,
}

impl From<JobCounts> for QueueStats {
    fn from(counts: JobCounts) -> Self {
        Self {
            waiting: counts.waiting,
            active: counts.active,
            completed: counts.completed,
            failed: counts.failed,
            delayed: counts.delayed,
            total: counts.waiting + counts.active + counts.completed + counts.failed + counts.delayed,
            paused: counts.paused,
        }
    }
}

/// Limits above which a queue is reported unhealthy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthThresholds {
    pub max_failed: u64,
    pub max_waiting: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            max_failed: 100,
            max_waiting: 1000,
        }
    }
}

/// Health verdict for one queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueHealth {
    pub healthy: bool,
    pub issues: Vec<String>,
    pub stats: QueueStats,
}

impl QueueHealth {
    pub fn evaluate(stats: QueueStats, thresholds: &HealthThresholds) -> Self {
        let mut issues = Vec::new();

        if stats.failed > thresholds.max_failed {
            issues.push(format!("high failure count: {}", stats.failed));
        }
        if stats.waiting > thresholds.max_waiting {
            issues.push(format!("large backlog: {} waiting", stats.waiting));
        }
        if stats.waiting > 0 && stats.active == 0 && !stats.paused {
            issues.push("jobs waiting but none active".to_string());
        }

        Self {
            healthy: issues.is_empty(),
            issues,
            stats,
        }
    }
}

/// Read-only view of queue counts
#[derive(Clone)]
pub struct StatsAggregator {
    manager: Arc<QueueManager>,
}

impl StatsAggregator {
    pub fn new(manager: Arc<QueueManager>) -> Self {
        Self { manager }
    }

    #[instrument(skip(self))]
    pub async fn stats_for(&self, queue: &str) -> Result<QueueStats, QueueError> {
        self.manager.queue(queue)?;
        let counts = self.manager.store().counts(queue).await?;
        Ok(counts.into())
    }

    /// Stats of every registered queue, keyed by name
    pub async fn stats_for_all(&self) -> Result<BTreeMap<String, QueueStats>, QueueError> {
        let mut all = BTreeMap::new();
        for name in self.manager.queue_names() {
            let stats = self.stats_for(&name).await?;
            all.insert(name, stats);
        }
        Ok(all)
    }

    /// Health of every registered queue, keyed by name
    pub async fn health_for_all(
        &self,
        thresholds: &HealthThresholds,
    ) -> Result<BTreeMap<String, QueueHealth>, QueueError> {
        Ok(self
            .stats_for_all()
            .await?
            .into_iter()
            .map(|(name, stats)| (name, QueueHealth::evaluate(stats, thresholds)))
            .collect())
    }
}
