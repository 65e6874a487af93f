// Monitoring and administrative HTTP routes
// Decision: Unknown queue -> 404, unreachable store -> 503

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::auth::{basic_auth, Credentials};
use crate::error::QueueError;
use crate::persistence::{JobRecord, StoreError};
use crate::queue::QueueManager;
use crate::retention::{RetentionSweeper, SweepReport};
use crate::stats::{HealthThresholds, QueueHealth, QueueStats, StatsAggregator};
use crate::status::{JobSnapshot, JobStatusService};

const DEFAULT_FAILED_LIMIT: usize = 50;
const MAX_FAILED_LIMIT: usize = 1000;

// ============================================
// App State and Routes
// ============================================

/// State shared by the monitoring routes
#[derive(Clone)]
pub struct AdminState {
    pub manager: Arc<QueueManager>,
    pub status: JobStatusService,
    pub stats: StatsAggregator,
    pub sweeper: RetentionSweeper,
    pub thresholds: HealthThresholds,
}

impl AdminState {
    pub fn new(manager: Arc<QueueManager>) -> Self {
        Self {
            status: JobStatusService::new(Arc::clone(&manager)),
            stats: StatsAggregator::new(Arc::clone(&manager)),
            sweeper: RetentionSweeper::new(Arc::clone(&manager)),
            thresholds: HealthThresholds::default(),
            manager,
        }
    }

    pub fn with_thresholds(mut self, thresholds: HealthThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }
}

/// Monitoring router; every route requires Basic auth
pub fn router(state: AdminState, credentials: Credentials) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/queues", get(list_queues))
        .route("/queues/:queue", get(queue_stats))
        .route("/queues/:queue/failed", get(failed_jobs))
        .route("/queues/:queue/jobs/:job_id", get(get_job).delete(remove_job))
        .route("/queues/:queue/jobs/:job_id/retry", post(retry_job))
        .route("/queues/:queue/pause", post(pause_queue))
        .route("/queues/:queue/resume", post(resume_queue))
        .route("/queues/:queue/sweep", post(sweep_queue))
        .route("/sweep", post(sweep_all))
        .layer(middleware::from_fn_with_state(
            Arc::new(credentials),
            basic_auth,
        ))
        .with_state(state)
}

// ============================================
// Errors
// ============================================

/// Error body returned by every route
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip)]
    pub status: StatusCode,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            status: StatusCode::NOT_FOUND,
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        let status = match &err {
            QueueError::QueueNotFound(_) => StatusCode::NOT_FOUND,
            QueueError::Connection(_) | QueueError::QueueClosed(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            QueueError::Store(StoreError::InvalidState { .. } | StoreError::DuplicateId(_)) => {
                StatusCode::CONFLICT
            }
            QueueError::Store(StoreError::JobNotFound(_)) => StatusCode::NOT_FOUND,
            QueueError::InvalidDefinition(_) | QueueError::Store(_) => {
                tracing::error!("Monitoring request failed: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            error: err.to_string(),
            status,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

// ============================================
// HTTP Handlers
// ============================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    healthy: bool,
    queues: BTreeMap<String, QueueHealth>,
}

/// GET /health - Health of every queue
async fn health(State(state): State<AdminState>) -> Result<Json<HealthResponse>, ApiError> {
    let queues = state.stats.health_for_all(&state.thresholds).await?;
    let healthy = queues.values().all(|q| q.healthy);
    Ok(Json(HealthResponse { healthy, queues }))
}

/// GET /queues - Stats of every queue
async fn list_queues(
    State(state): State<AdminState>,
) -> Result<Json<BTreeMap<String, QueueStats>>, ApiError> {
    Ok(Json(state.stats.stats_for_all().await?))
}

/// GET /queues/{queue} - Stats of one queue
async fn queue_stats(
    State(state): State<AdminState>,
    Path(queue): Path<String>,
) -> Result<Json<QueueStats>, ApiError> {
    Ok(Json(state.stats.stats_for(&queue).await?))
}

#[derive(Debug, Deserialize)]
struct FailedQuery {
    limit: Option<usize>,
}

/// GET /queues/{queue}/failed - Most recent failed jobs
async fn failed_jobs(
    State(state): State<AdminState>,
    Path(queue): Path<String>,
    Query(query): Query<FailedQuery>,
) -> Result<Json<Vec<JobRecord>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_FAILED_LIMIT)
        .min(MAX_FAILED_LIMIT);
    Ok(Json(state.status.failed_jobs(&queue, limit).await?))
}

/// GET /queues/{queue}/jobs/{job_id} - Job snapshot
async fn get_job(
    State(state): State<AdminState>,
    Path((queue, job_id)): Path<(String, Uuid)>,
) -> Result<Json<JobSnapshot>, ApiError> {
    state
        .status
        .get_status(&queue, job_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("job {job_id} not found")))
}

#[derive(Debug, Serialize)]
struct RemoveResponse {
    removed: bool,
}

/// DELETE /queues/{queue}/jobs/{job_id} - Remove a job in any state
async fn remove_job(
    State(state): State<AdminState>,
    Path((queue, job_id)): Path<(String, Uuid)>,
) -> Result<Json<RemoveResponse>, ApiError> {
    let removed = state.status.remove(&queue, job_id).await?;
    Ok(Json(RemoveResponse { removed }))
}

/// POST /queues/{queue}/jobs/{job_id}/retry - Requeue a failed job
async fn retry_job(
    State(state): State<AdminState>,
    Path((queue, job_id)): Path<(String, Uuid)>,
) -> Result<StatusCode, ApiError> {
    if state.status.retry(&queue, job_id).await? {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(ApiError::not_found(format!("job {job_id} not found")))
    }
}

#[derive(Debug, Serialize)]
struct PauseResponse {
    queue: String,
    paused: bool,
}

/// POST /queues/{queue}/pause
async fn pause_queue(
    State(state): State<AdminState>,
    Path(queue): Path<String>,
) -> Result<Json<PauseResponse>, ApiError> {
    state.manager.pause(&queue).await?;
    Ok(Json(PauseResponse {
        queue,
        paused: true,
    }))
}

/// POST /queues/{queue}/resume
async fn resume_queue(
    State(state): State<AdminState>,
    Path(queue): Path<String>,
) -> Result<Json<PauseResponse>, ApiError> {
    state.manager.resume(&queue).await?;
    Ok(Json(PauseResponse {
        queue,
        paused: false,
    }))
}

/// POST /queues/{queue}/sweep - Apply retention now
async fn sweep_queue(
    State(state): State<AdminState>,
    Path(queue): Path<String>,
) -> Result<Json<SweepReport>, ApiError> {
    Ok(Json(state.sweeper.sweep(&queue).await?))
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum SweepResult {
    Swept(SweepReport),
    Failed { error: String },
}

/// POST /sweep - Apply retention to every queue
async fn sweep_all(State(state): State<AdminState>) -> Json<BTreeMap<String, SweepResult>> {
    let results = state
        .sweeper
        .sweep_all()
        .await
        .into_iter()
        .map(|sweep| {
            let result = match sweep.result {
                Ok(report) => SweepResult::Swept(report),
                Err(e) => SweepResult::Failed {
                    error: e.to_string(),
                },
            };
            (sweep.queue, result)
        })
        .collect();
    Json(results)
}
