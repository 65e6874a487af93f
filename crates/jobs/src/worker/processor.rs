//! Processor contract between workers and the domain code doing the work

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::context::JobContext;
use crate::persistence::ClaimedJob;

/// What a processor sees of the job it runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInput {
    pub id: Uuid,
    pub queue: String,
    pub name: String,
    pub payload: serde_json::Value,
    /// Attempt now running, 1-based
    pub attempts_made: u32,
    pub max_attempts: u32,
}

impl From<&ClaimedJob> for JobInput {
    fn from(job: &ClaimedJob) -> Self {
        Self {
            id: job.id,
            queue: job.queue.clone(),
            name: job.name.clone(),
            payload: job.payload.clone(),
            attempts_made: job.attempts_made,
            max_attempts: job.max_attempts,
        }
    }
}

/// Error type for processor failures
///
/// The message is recorded verbatim as the job's failure reason.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessorError {
    /// Error message
    pub message: String,

    /// Error code (e.g. `ECONNRESET`) used by retry classification
    pub code: Option<String>,

    /// Whether this error may be retried
    ///
    /// Non-retryable errors fail the job immediately regardless of the
    /// attempts left.
    pub retryable: bool,
}

impl ProcessorError {
    /// Create a new retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            retryable: true,
        }
    }

    /// Create a non-retryable error
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            retryable: false,
        }
    }

    /// Set the error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl std::fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProcessorError {}

impl From<serde_json::Error> for ProcessorError {
    fn from(err: serde_json::Error) -> Self {
        // Malformed payloads will not get better on retry
        Self::non_retryable(format!("invalid payload: {err}"))
    }
}

impl From<String> for ProcessorError {
    fn from(message: String) -> Self {
        Self::retryable(message)
    }
}

impl From<&str> for ProcessorError {
    fn from(message: &str) -> Self {
        Self::retryable(message)
    }
}

/// Executes jobs of one queue
///
/// # Example
///
/// ```ignore
/// struct ExportProcessor;
///
/// #[async_trait]
/// impl Processor for ExportProcessor {
///     async fn process(&self, job: JobInput, ctx: JobContext) -> Result<Value, ProcessorError> {
///         let request: ExportRequest = serde_json::from_value(job.payload)?;
///         ctx.update_progress(10).await?;
///         let url = render_pdf(&request).await?;
///         ctx.update_progress(100).await?;
///         Ok(json!({ "url": url }))
///     }
/// }
/// ```
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    async fn process(
        &self,
        job: JobInput,
        ctx: JobContext,
    ) -> Result<serde_json::Value, ProcessorError>;
}

struct FnProcessor<F>(F);

#[async_trait]
impl<F, Fut> Processor for FnProcessor<F>
where
    F: Fn(JobInput, JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, ProcessorError>> + Send + 'static,
{
    async fn process(
        &self,
        job: JobInput,
        ctx: JobContext,
    ) -> Result<serde_json::Value, ProcessorError> {
        (self.0)(job, ctx).await
    }
}

/// Adapt an async closure into a processor
pub fn processor_fn<F, Fut>(f: F) -> Arc<dyn Processor>
where
    F: Fn(JobInput, JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, ProcessorError>> + Send + 'static,
{
    Arc::new(FnProcessor(f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let err = ProcessorError::retryable("connection reset").with_code("ECONNRESET");
        assert!(err.retryable);
        assert_eq!(err.code.as_deref(), Some("ECONNRESET"));
        assert_eq!(err.to_string(), "connection reset");

        let err = ProcessorError::non_retryable("unsupported format");
        assert!(!err.retryable);
    }

    #[test]
    fn test_serde_errors_are_permanent() {
        let parse: Result<u32, _> = serde_json::from_str("\"nope\"");
        let err: ProcessorError = parse.unwrap_err().into();
        assert!(!err.retryable);
        assert!(err.message.starts_with("invalid payload"));
    }

    #[test]
    fn test_job_input_from_claimed() {
        let claimed = ClaimedJob {
            id: Uuid::now_v7(),
            queue: "file-parsing".to_string(),
            name: "parse-resume".to_string(),
            payload: serde_json::json!({"file": "cv.pdf"}),
            attempts_made: 2,
            max_attempts: 3,
            lock_token: Uuid::now_v7(),
        };

        let input = JobInput::from(&claimed);
        assert_eq!(input.id, claimed.id);
        assert_eq!(input.attempts_made, 2);
        assert_eq!(input.payload, claimed.payload);
    }
}
