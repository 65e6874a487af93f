//! JobStore trait definition

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::option_duration_millis;
use crate::queue::RetentionPolicy;
use crate::reliability::BackoffPolicy;

/// Error type for store operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Store unreachable or closed
    #[error("connection error: {0}")]
    Connection(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Job not found
    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    /// The caller no longer owns the job's lock (stalled, requeued or removed)
    #[error("lock lost for job {0}")]
    LockLost(Uuid),

    /// A caller-supplied id is already taken by a job of another queue
    #[error("job id {0} is already used by another queue")]
    DuplicateId(Uuid),

    /// Operation not valid for the job's current state
    #[error("job {id} is {state}, expected {expected}")]
    InvalidState {
        id: Uuid,
        state: JobState,
        expected: JobState,
    },
}

impl StoreError {
    /// Whether this error means the store itself is unavailable
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Database(_))
    }
}

/// Job state in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Eligible to be claimed
    Waiting,

    /// Claimed by a worker
    Active,

    /// Waiting out a backoff or an initial delay
    Delayed,

    /// Processor resolved
    Completed,

    /// Attempts or stalls exhausted, or failure classified permanent
    Failed,

    /// Lock expired without progress; transient on the way to waiting or failed
    Stalled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Delayed => "delayed",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stalled => "stalled",
        }
    }

    /// Terminal states are the only ones retention touches
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "active" => Ok(Self::Active),
            "delayed" => Ok(Self::Delayed),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "stalled" => Ok(Self::Stalled),
            other => Err(StoreError::Serialization(format!(
                "unknown job state: {other}"
            ))),
        }
    }
}

/// Per-job options resolved at enqueue time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Maximum attempts, including the first
    pub attempts: u32,

    /// Delay policy between attempts
    pub backoff: BackoffPolicy,

    /// Initial delay before the job becomes claimable
    #[serde(with = "option_duration_millis", default)]
    pub delay: Option<Duration>,

    /// Eviction rules applied when the job finishes
    pub retention: RetentionPolicy,

    /// Caller-chosen id; enqueueing an id already present in the queue
    /// returns the existing job instead of adding another
    #[serde(default)]
    pub job_id: Option<Uuid>,

    /// Lower values are claimed first; unprioritized jobs come last
    #[serde(default)]
    pub priority: Option<u32>,
}

/// Definition of a job to be enqueued
#[derive(Debug, Clone)]
pub struct NewJob {
    pub queue: String,
    pub name: String,
    pub payload: serde_json::Value,
    pub options: JobOptions,
}

/// Full persisted state of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub queue: String,
    pub name: String,
    pub payload: serde_json::Value,
    pub state: JobState,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub retention: RetentionPolicy,
    #[serde(default)]
    pub priority: Option<u32>,
    pub progress: u8,
    pub result: Option<serde_json::Value>,
    pub failure_reason: Option<String>,
    pub stalled_count: u32,
    pub created_at: DateTime<Utc>,
    /// When the job becomes claimable
    pub run_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A job claimed by a worker, with the lock token for this run
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: Uuid,
    pub queue: String,
    pub name: String,
    pub payload: serde_json::Value,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub lock_token: Uuid,
}

/// Outcome of failing a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Job moved to delayed and will run again after `delay`
    WillRetry { attempts_made: u32, delay: Duration },

    /// Job moved to failed
    Failed { attempts_made: u32 },
}

/// Outcome for one job found stalled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StallOutcome {
    /// Returned to waiting
    Requeued { stalled_count: u32 },

    /// Stalled too many times and moved to failed
    Failed {
        stalled_count: u32,
        attempts_made: u32,
    },
}

/// A job found with an expired lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledJob {
    pub id: Uuid,
    /// Token of the run whose lock expired
    pub lock_token: Option<Uuid>,
    pub outcome: StallOutcome,
}

/// Failure reason recorded when a job exceeds its stall allowance
pub const STALLED_FAILURE_REASON: &str = "job stalled more than allowable limit";

/// Age/count rule for one terminal population
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanPolicy {
    pub max_age: Option<Duration>,
    pub max_count: Option<usize>,
}

impl CleanPolicy {
    pub fn is_noop(&self) -> bool {
        self.max_age.is_none() && self.max_count.is_none()
    }
}

/// Raw per-state counts for one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    pub paused: bool,
}

/// Store backing every queue
///
/// All state transitions are atomic in the implementation. Operations that
/// act on behalf of a running attempt take the lock token handed out by
/// [`JobStore::claim`] and fail with [`StoreError::LockLost`] when the token
/// no longer matches.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    // =========================================================================
    // Producer Operations
    // =========================================================================

    /// Persist a new job as waiting (or delayed when a delay is set)
    ///
    /// When `options.job_id` names a job already in the queue, that job is
    /// returned unchanged.
    async fn enqueue(&self, job: NewJob) -> Result<JobRecord, StoreError>;

    // =========================================================================
    // Worker Operations
    // =========================================================================

    /// Claim up to `limit` claimable jobs, by priority then FIFO
    ///
    /// Increments `attempts_made` on each claimed job. Returns nothing while
    /// the queue is paused.
    async fn claim(
        &self,
        queue: &str,
        limit: usize,
        lock_duration: Duration,
    ) -> Result<Vec<ClaimedJob>, StoreError>;

    /// Extend the lock of a running job, optionally recording progress
    async fn extend_lock(
        &self,
        job_id: Uuid,
        lock_token: Uuid,
        lock_duration: Duration,
        progress: Option<u8>,
    ) -> Result<(), StoreError>;

    /// Mark a running job completed and apply its completed retention
    async fn complete(
        &self,
        job_id: Uuid,
        lock_token: Uuid,
        result: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Record a failed attempt, scheduling a retry when allowed
    async fn fail(
        &self,
        job_id: Uuid,
        lock_token: Uuid,
        reason: &str,
        retryable: bool,
    ) -> Result<FailureOutcome, StoreError>;

    /// Requeue or fail active jobs whose lock expired
    async fn recover_stalled(
        &self,
        queue: &str,
        max_stalled_count: u32,
    ) -> Result<Vec<StalledJob>, StoreError>;

    // =========================================================================
    // Query Operations
    // =========================================================================

    /// Load a job
    async fn get(&self, queue: &str, job_id: Uuid) -> Result<Option<JobRecord>, StoreError>;

    /// 1-based rank among waiting jobs, `None` unless waiting
    async fn position(&self, queue: &str, job_id: Uuid) -> Result<Option<u64>, StoreError>;

    /// List jobs in one state, most recent first
    async fn list(
        &self,
        queue: &str,
        state: JobState,
        limit: usize,
    ) -> Result<Vec<JobRecord>, StoreError>;

    /// Count jobs per state
    async fn counts(&self, queue: &str) -> Result<JobCounts, StoreError>;

    // =========================================================================
    // Administrative Operations
    // =========================================================================

    /// Delete a job in any state; returns whether it existed
    async fn remove(&self, queue: &str, job_id: Uuid) -> Result<bool, StoreError>;

    /// Move a failed job back to waiting with a fresh attempt budget
    async fn retry(&self, queue: &str, job_id: Uuid) -> Result<bool, StoreError>;

    /// Evict terminal jobs violating the policy; returns how many were removed
    async fn clean(
        &self,
        queue: &str,
        state: JobState,
        policy: CleanPolicy,
    ) -> Result<u64, StoreError>;

    /// Toggle the queue's paused flag
    async fn set_paused(&self, queue: &str, paused: bool) -> Result<(), StoreError>;

    // =========================================================================
    // Connection Operations
    // =========================================================================

    /// Check the store is reachable
    async fn ping(&self) -> Result<(), StoreError>;

    /// Release the underlying connection; later calls fail with `Connection`
    async fn close(&self);
}

/// Sort key placing unprioritized jobs after every prioritized one
pub fn priority_rank(priority: Option<u32>) -> u32 {
    priority.unwrap_or(u32::MAX)
}

/// Clamp a raw progress value to 0..=100
pub fn clamp_progress(progress: i64) -> u8 {
    progress.clamp(0, 100) as u8
}
