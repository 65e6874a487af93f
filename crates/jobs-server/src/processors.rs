// HTTP-delegating processor
// Decision: Domain work (export, parsing, generation, embeddings) lives in other
// services; the job server forwards each job to the endpoint configured for its queue

use std::time::Duration;

use async_trait::async_trait;
use cvforge_jobs::{JobContext, JobInput, Processor, ProcessorError};
use reqwest::StatusCode;
use serde_json::Value;

const MIN_HEARTBEAT: Duration = Duration::from_secs(1);

/// Posts the job as JSON to a fixed URL and records the JSON response as the result
///
/// While the request is in flight the job's lock is kept alive with
/// heartbeats at a third of the queue's job timeout.
pub struct HttpProcessor {
    client: reqwest::Client,
    url: String,
    heartbeat_every: Duration,
}

impl HttpProcessor {
    pub fn new(client: reqwest::Client, url: impl Into<String>, job_timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            heartbeat_every: (job_timeout / 3).max(MIN_HEARTBEAT),
        }
    }
}

#[async_trait]
impl Processor for HttpProcessor {
    async fn process(&self, job: JobInput, ctx: JobContext) -> Result<Value, ProcessorError> {
        let request = self.client.post(&self.url).json(&job).send();
        tokio::pin!(request);

        let mut heartbeat = tokio::time::interval(self.heartbeat_every);
        // The first tick completes immediately
        heartbeat.tick().await;

        let response = loop {
            tokio::select! {
                result = &mut request => break result.map_err(transport_error)?,
                _ = heartbeat.tick() => ctx.heartbeat().await?,
                // Not recorded as a failure; the job is requeued once its lock expires
                _ = ctx.cancelled() => {
                    return Err(ProcessorError::retryable("cancelled while waiting for processor endpoint"));
                }
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let body = response.bytes().await.map_err(transport_error)?;
        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body)
            .map_err(|e| ProcessorError::non_retryable(format!("invalid response body: {e}")))
    }
}

/// Map a network failure to the codes retry classification understands
fn transport_error(err: reqwest::Error) -> ProcessorError {
    let code = if err.is_timeout() {
        "ETIMEDOUT"
    } else if err.is_connect() {
        "ECONNREFUSED"
    } else {
        "ECONNRESET"
    };
    ProcessorError::retryable(format!("processor endpoint unreachable: {err}")).with_code(code)
}

fn status_error(status: StatusCode, body: &str) -> ProcessorError {
    let message = if body.is_empty() {
        format!("processor endpoint returned {status}")
    } else {
        format!("processor endpoint returned {status}: {}", truncate(body, 500))
    };
    let code = format!("HTTP_{}", status.as_u16());

    let retryable = status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS;
    if retryable {
        ProcessorError::retryable(message).with_code(code)
    } else {
        ProcessorError::non_retryable(message).with_code(code)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
