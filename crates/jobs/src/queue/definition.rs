//! Queue definitions and retention policies

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::persistence::CleanPolicy;
use crate::reliability::{BackoffPolicy, RetryClassification};
use crate::{duration_millis, option_duration_millis};

/// Upper bound for per-job attempt overrides
pub const MAX_ATTEMPTS: u32 = 100;

/// Largest accepted job priority; higher values are clamped down to it
pub const MAX_PRIORITY: u32 = 2_097_152;

/// Age/count rule governing how long terminal jobs stay queryable
///
/// Completed and failed populations are evaluated independently. A job is
/// evicted when it is older than the max age OR ranks (newest first) past
/// the max count, whichever triggers first. `None` disables that rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    #[serde(with = "option_duration_millis", default)]
    pub completed_max_age: Option<Duration>,

    #[serde(default)]
    pub completed_max_count: Option<usize>,

    #[serde(with = "option_duration_millis", default)]
    pub failed_max_age: Option<Duration>,

    #[serde(default)]
    pub failed_max_count: Option<usize>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            completed_max_age: Some(Duration::from_secs(24 * 3600)),
            completed_max_count: Some(1000),
            failed_max_age: Some(Duration::from_secs(7 * 24 * 3600)),
            failed_max_count: None,
        }
    }
}

impl RetentionPolicy {
    /// Keep terminal jobs forever
    pub fn keep_all() -> Self {
        Self {
            completed_max_age: None,
            completed_max_count: None,
            failed_max_age: None,
            failed_max_count: None,
        }
    }

    /// Set the completed-job rules
    pub fn with_completed(mut self, max_age: Option<Duration>, max_count: Option<usize>) -> Self {
        self.completed_max_age = max_age;
        self.completed_max_count = max_count;
        self
    }

    /// Set the failed-job rules
    pub fn with_failed(mut self, max_age: Option<Duration>, max_count: Option<usize>) -> Self {
        self.failed_max_age = max_age;
        self.failed_max_count = max_count;
        self
    }

    /// Rule for the completed population
    pub fn completed(&self) -> CleanPolicy {
        CleanPolicy {
            max_age: self.completed_max_age,
            max_count: self.completed_max_count,
        }
    }

    /// Rule for the failed population
    pub fn failed(&self) -> CleanPolicy {
        CleanPolicy {
            max_age: self.failed_max_age,
            max_count: self.failed_max_count,
        }
    }
}

/// Immutable description of one named queue
///
/// # Example
///
/// ```
/// use cvforge_jobs::{BackoffPolicy, QueueDefinition};
/// use std::time::Duration;
///
/// let definition = QueueDefinition::new("document-export")
///     .with_concurrency(5)
///     .with_job_timeout(Duration::from_secs(60))
///     .with_attempts(3)
///     .with_backoff(BackoffPolicy::exponential(Duration::from_secs(2)));
///
/// assert!(definition.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDefinition {
    /// Queue name, unique within a registry
    pub name: String,

    /// Maximum jobs one worker executes at once
    pub concurrency: usize,

    /// Liveness timeout: a job without progress for this long is stalled
    #[serde(with = "duration_millis")]
    pub job_timeout: Duration,

    /// Maximum attempts per job, including the first
    pub attempts: u32,

    /// Delay policy between attempts
    pub backoff: BackoffPolicy,

    /// Eviction rules for terminal jobs
    pub retention: RetentionPolicy,

    /// Stalls tolerated before a job is failed
    pub max_stalled_count: u32,

    /// How often the worker looks for stalled jobs
    #[serde(with = "duration_millis")]
    pub stalled_interval: Duration,

    /// Which failures are retried
    #[serde(default)]
    pub retry_on: RetryClassification,
}

impl QueueDefinition {
    /// Create a definition with default settings
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            concurrency: 1,
            job_timeout: Duration::from_secs(60),
            attempts: 3,
            backoff: BackoffPolicy::default(),
            retention: RetentionPolicy::default(),
            max_stalled_count: 2,
            stalled_interval: Duration::from_secs(30),
            retry_on: RetryClassification::AnyError,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_max_stalled_count(mut self, count: u32) -> Self {
        self.max_stalled_count = count;
        self
    }

    pub fn with_stalled_interval(mut self, interval: Duration) -> Self {
        self.stalled_interval = interval;
        self
    }

    pub fn with_retry_on(mut self, retry_on: RetryClassification) -> Self {
        self.retry_on = retry_on;
        self
    }

    /// Check the definition's invariants
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("queue name must not be empty".to_string());
        }
        if self.concurrency == 0 {
            return Err(format!("queue {}: concurrency must be at least 1", self.name));
        }
        if self.attempts == 0 || self.attempts > MAX_ATTEMPTS {
            return Err(format!(
                "queue {}: attempts must be between 1 and {MAX_ATTEMPTS}",
                self.name
            ));
        }
        if self.max_stalled_count == 0 {
            return Err(format!(
                "queue {}: max_stalled_count must be at least 1",
                self.name
            ));
        }
        if self.job_timeout.is_zero() || self.stalled_interval.is_zero() {
            return Err(format!(
                "queue {}: job_timeout and stalled_interval must be non-zero",
                self.name
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_definition() {
        let definition = QueueDefinition::new("file-parsing");

        assert_eq!(definition.concurrency, 1);
        assert_eq!(definition.attempts, 3);
        assert_eq!(definition.max_stalled_count, 2);
        assert_eq!(definition.retry_on, RetryClassification::AnyError);
        assert!(definition.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(QueueDefinition::new("").validate().is_err());
        assert!(QueueDefinition::new("q").with_concurrency(0).validate().is_err());
        assert!(QueueDefinition::new("q").with_attempts(0).validate().is_err());
        assert!(QueueDefinition::new("q")
            .with_attempts(MAX_ATTEMPTS + 1)
            .validate()
            .is_err());
        assert!(QueueDefinition::new("q")
            .with_job_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_retention_defaults() {
        let retention = RetentionPolicy::default();

        assert_eq!(
            retention.completed(),
            CleanPolicy {
                max_age: Some(Duration::from_secs(86_400)),
                max_count: Some(1000),
            }
        );
        assert_eq!(retention.failed().max_age, Some(Duration::from_secs(604_800)));
        assert_eq!(retention.failed().max_count, None);
    }

    #[test]
    fn test_definition_serialization() {
        let definition = QueueDefinition::new("ai-generation")
            .with_concurrency(3)
            .with_retry_on(RetryClassification::transient_connection());

        let json = serde_json::to_string(&definition).unwrap();
        let parsed: QueueDefinition = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, definition);
    }
}
