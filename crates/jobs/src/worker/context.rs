//! Job execution context

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::events::{EventBus, JobEvent, JobEventKind};
use crate::persistence::{ClaimedJob, JobStore, StoreError};

/// Error from progress and heartbeat calls
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// This run no longer owns the job (stalled and requeued, or removed)
    #[error("job lock was lost")]
    LockLost,

    /// Cancellation was requested
    #[error("job was cancelled")]
    Cancelled,

    /// Store error
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<ContextError> for super::ProcessorError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Store(e) if e.is_unavailable() => Self::retryable(e.to_string()),
            other => Self::non_retryable(other.to_string()),
        }
    }
}

/// Context provided to processors while a job runs
///
/// The context provides:
/// - Progress reporting, which also extends the job's lock
/// - Heartbeats for long steps that cannot report progress
/// - Cooperative cancellation
///
/// A job that neither reports progress nor heartbeats within the queue's
/// job timeout is treated as stalled.
///
/// # Example
///
/// ```ignore
/// async fn process(&self, job: JobInput, ctx: JobContext) -> Result<Value, ProcessorError> {
///     for (i, chunk) in chunks.iter().enumerate() {
///         if ctx.is_cancelled() {
///             return Err(ProcessorError::non_retryable("cancelled"));
///         }
///         embed(chunk).await?;
///         ctx.update_progress(((i + 1) * 100 / chunks.len()) as u8).await?;
///     }
///     Ok(json!({}))
/// }
/// ```
#[derive(Clone)]
pub struct JobContext {
    job_id: Uuid,
    queue: String,
    attempts_made: u32,
    max_attempts: u32,
    lock_token: Uuid,
    lock_duration: Duration,
    store: Arc<dyn JobStore>,
    events: Arc<EventBus>,
    cancel: CancellationToken,
    progress: Arc<AtomicU8>,
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job_id)
            .field("queue", &self.queue)
            .field("attempts_made", &self.attempts_made)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl JobContext {
    pub(crate) fn new(
        job: &ClaimedJob,
        lock_duration: Duration,
        store: Arc<dyn JobStore>,
        events: Arc<EventBus>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job_id: job.id,
            queue: job.queue.clone(),
            attempts_made: job.attempts_made,
            max_attempts: job.max_attempts,
            lock_token: job.lock_token,
            lock_duration,
            store,
            events,
            cancel,
            progress: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Current attempt, 1-based
    pub fn attempts_made(&self) -> u32 {
        self.attempts_made
    }

    /// Check if this is the last attempt
    pub fn is_last_attempt(&self) -> bool {
        self.attempts_made >= self.max_attempts
    }

    /// Last progress reported by this run
    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::SeqCst)
    }

    /// Record progress (clamped to 0..=100, never decreasing) and extend the lock
    pub async fn update_progress(&self, progress: u8) -> Result<(), ContextError> {
        let progress = progress.min(100);
        let previous = self.progress.fetch_max(progress, Ordering::SeqCst);
        let current = previous.max(progress);

        self.extend(Some(current)).await?;

        if current > previous {
            self.events.publish(JobEvent::new(
                self.queue.clone(),
                self.job_id,
                JobEventKind::Progress { progress: current },
            ));
        }
        Ok(())
    }

    /// Extend the lock without reporting progress
    pub async fn heartbeat(&self) -> Result<(), ContextError> {
        self.extend(None).await
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when cancellation is requested
    ///
    /// ```ignore
    /// tokio::select! {
    ///     result = generate(&prompt) => result,
    ///     _ = ctx.cancelled() => Err(ProcessorError::non_retryable("cancelled")),
    /// }
    /// ```
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    async fn extend(&self, progress: Option<u8>) -> Result<(), ContextError> {
        if self.is_cancelled() {
            return Err(ContextError::Cancelled);
        }

        match self
            .store
            .extend_lock(self.job_id, self.lock_token, self.lock_duration, progress)
            .await
        {
            Ok(()) => Ok(()),
            Err(StoreError::LockLost(_)) => {
                self.cancel.cancel();
                Err(ContextError::LockLost)
            }
            Err(e) => Err(ContextError::Store(e)),
        }
    }
}
