//! PostgreSQL implementation of JobStore
//!
//! Production persistence shared by every process running workers:
//! - Priority then FIFO claiming with `FOR UPDATE SKIP LOCKED`
//! - Per-run lock tokens with lock expiry for stall detection
//! - Retention applied when a job finishes

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use super::store::*;
use crate::queue::RetentionPolicy;
use crate::reliability::BackoffPolicy;

const JOB_COLUMNS: &str = "id, queue, name, payload, state, attempts_made, max_attempts, \
     backoff, retention, priority, progress, result, failure_reason, stalled_count, created_at, \
     run_at, processed_at, finished_at";

/// Sort key for jobs without a priority, matching `priority_rank`
const UNPRIORITIZED: i64 = u32::MAX as i64;

/// PostgreSQL implementation of JobStore
///
/// # Example
///
/// ```ignore
/// use cvforge_jobs::PostgresJobStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/cvforge").await?;
/// PostgresJobStore::migrate(&pool).await?;
/// let store = PostgresJobStore::new(pool);
/// ```
pub struct PostgresJobStore {
    pool: PgPool,
    closed: AtomicBool,
}

impl PostgresJobStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            closed: AtomicBool::new(false),
        }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the job queue schema
    pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(|e| {
                error!("Failed to run job queue migrations: {}", e);
                StoreError::Database(e.to_string())
            })
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) || self.pool.is_closed() {
            Err(StoreError::Connection("job store is closed".to_string()))
        } else {
            Ok(())
        }
    }

    /// Evict terminal jobs by age, then by newest-first rank
    async fn clean_state(
        &self,
        queue: &str,
        state: JobState,
        policy: CleanPolicy,
    ) -> Result<u64, StoreError> {
        let mut removed = 0;

        if let Some(max_age) = policy.max_age {
            let cutoff = Utc::now()
                - chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::zero());
            removed += sqlx::query(
                r#"
                DELETE FROM job_queue_jobs
                WHERE queue = $1
                  AND state = $2
                  AND COALESCE(finished_at, created_at) < $3
                "#,
            )
            .bind(queue)
            .bind(state.as_str())
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(query_error("clean by age"))?
            .rows_affected();
        }

        if let Some(max_count) = policy.max_count {
            removed += sqlx::query(
                r#"
                DELETE FROM job_queue_jobs
                WHERE id IN (
                    SELECT id
                    FROM job_queue_jobs
                    WHERE queue = $1 AND state = $2
                    ORDER BY COALESCE(finished_at, created_at) DESC, seq DESC
                    OFFSET $3
                )
                "#,
            )
            .bind(queue)
            .bind(state.as_str())
            .bind(max_count as i64)
            .execute(&self.pool)
            .await
            .map_err(query_error("clean by count"))?
            .rows_affected();
        }

        Ok(removed)
    }
}

/// Await a retention sweep that follows a committed transition
///
/// The transition already happened, so a failed sweep is logged and counted
/// as nothing removed; the next sweep catches up.
async fn sweep_after_finish(
    queue: &str,
    state: JobState,
    sweep: impl Future<Output = Result<u64, StoreError>>,
) -> u64 {
    match sweep.await {
        Ok(removed) => removed,
        Err(e) => {
            warn!(queue, state = state.as_str(), error = %e, "Retention after finish failed");
            0
        }
    }
}

/// Map a sqlx error, logging it with the failing operation
fn query_error(operation: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| {
        error!(operation, "Job store query failed: {}", e);
        match e {
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                StoreError::Connection(e.to_string())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn row_to_record(row: &PgRow) -> Result<JobRecord, StoreError> {
    let state: String = row.get("state");
    let backoff: BackoffPolicy = serde_json::from_value(row.get("backoff"))
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    let retention: RetentionPolicy = serde_json::from_value(row.get("retention"))
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    Ok(JobRecord {
        id: row.get("id"),
        queue: row.get("queue"),
        name: row.get("name"),
        payload: row.get("payload"),
        state: state.parse()?,
        attempts_made: row.get::<i32, _>("attempts_made") as u32,
        max_attempts: row.get::<i32, _>("max_attempts") as u32,
        backoff,
        retention,
        priority: row
            .get::<Option<i32>, _>("priority")
            .map(|p| p.max(0) as u32),
        progress: clamp_progress(row.get::<i16, _>("progress") as i64),
        result: row.get("result"),
        failure_reason: row.get("failure_reason"),
        stalled_count: row.get::<i32, _>("stalled_count") as u32,
        created_at: row.get("created_at"),
        run_at: row.get("run_at"),
        processed_at: row.get("processed_at"),
        finished_at: row.get("finished_at"),
    })
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(queue = %job.queue, name = %job.name))]
    async fn enqueue(&self, job: NewJob) -> Result<JobRecord, StoreError> {
        self.ensure_open()?;

        let backoff = serde_json::to_value(job.options.backoff)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let retention = serde_json::to_value(job.options.retention)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let delay = job.options.delay.filter(|d| !d.is_zero());
        let state = if delay.is_some() {
            JobState::Delayed
        } else {
            JobState::Waiting
        };

        let id = job.options.job_id.unwrap_or_else(Uuid::now_v7);
        let priority = job
            .options
            .priority
            .map(|p| i32::try_from(p).unwrap_or(i32::MAX));

        let sql = format!(
            r#"
            INSERT INTO job_queue_jobs
                (id, queue, name, payload, state, max_attempts, backoff, retention, priority,
                 run_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9,
                    NOW() + ($10 * INTERVAL '1 millisecond'))
            ON CONFLICT (id) DO NOTHING
            RETURNING {JOB_COLUMNS}
            "#
        );
        let inserted = sqlx::query(&sql)
            .bind(id)
            .bind(&job.queue)
            .bind(&job.name)
            .bind(&job.payload)
            .bind(state.as_str())
            .bind(job.options.attempts as i32)
            .bind(backoff)
            .bind(retention)
            .bind(priority)
            .bind(delay.map(millis).unwrap_or(0))
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error("enqueue"))?;

        if let Some(row) = inserted {
            return row_to_record(&row);
        }

        // The caller-supplied id is taken
        let sql = format!("SELECT {JOB_COLUMNS} FROM job_queue_jobs WHERE id = $1");
        let existing = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error("load duplicate"))?
            .ok_or(StoreError::DuplicateId(id))?;
        let existing = row_to_record(&existing)?;
        if existing.queue != job.queue {
            return Err(StoreError::DuplicateId(id));
        }
        debug!(job_id = %id, "job id already enqueued");
        Ok(existing)
    }

    #[instrument(skip(self))]
    async fn claim(
        &self,
        queue: &str,
        limit: usize,
        lock_duration: Duration,
    ) -> Result<Vec<ClaimedJob>, StoreError> {
        self.ensure_open()?;

        if limit == 0 {
            return Ok(vec![]);
        }

        sqlx::query(
            r#"
            UPDATE job_queue_jobs
            SET state = 'waiting'
            WHERE queue = $1 AND state = 'delayed' AND run_at <= NOW()
            "#,
        )
        .bind(queue)
        .execute(&self.pool)
        .await
        .map_err(query_error("promote delayed"))?;

        // Claims nothing while the queue is paused
        let rows = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id
                FROM job_queue_jobs
                WHERE queue = $1
                  AND state = 'waiting'
                  AND run_at <= NOW()
                  AND NOT EXISTS (
                      SELECT 1 FROM job_queue_state s
                      WHERE s.queue = $1 AND s.paused
                  )
                ORDER BY COALESCE(priority, $4), run_at, seq
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE job_queue_jobs j
            SET state = 'active',
                attempts_made = j.attempts_made + 1,
                processed_at = NOW(),
                lock_token = gen_random_uuid(),
                locked_until = NOW() + ($3 * INTERVAL '1 millisecond')
            FROM claimable c
            WHERE j.id = c.id
            RETURNING j.id, j.queue, j.name, j.payload, j.attempts_made, j.max_attempts,
                      j.lock_token, j.priority, j.run_at, j.seq
            "#,
        )
        .bind(queue)
        .bind(limit as i64)
        .bind(millis(lock_duration))
        .bind(UNPRIORITIZED)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("claim"))?;

        let mut ordered: Vec<((i64, DateTime<Utc>, i64), ClaimedJob)> = rows
            .iter()
            .map(|row| {
                (
                    (
                        row.get::<Option<i32>, _>("priority")
                            .map_or(UNPRIORITIZED, i64::from),
                        row.get("run_at"),
                        row.get("seq"),
                    ),
                    ClaimedJob {
                        id: row.get("id"),
                        queue: row.get("queue"),
                        name: row.get("name"),
                        payload: row.get("payload"),
                        attempts_made: row.get::<i32, _>("attempts_made") as u32,
                        max_attempts: row.get::<i32, _>("max_attempts") as u32,
                        lock_token: row.get("lock_token"),
                    },
                )
            })
            .collect();
        // RETURNING does not preserve the CTE order
        ordered.sort_by(|a, b| a.0.cmp(&b.0));
        let claimed: Vec<ClaimedJob> = ordered.into_iter().map(|(_, job)| job).collect();

        if !claimed.is_empty() {
            debug!(queue, count = claimed.len(), "claimed jobs");
        }

        Ok(claimed)
    }

    #[instrument(skip(self))]
    async fn extend_lock(
        &self,
        job_id: Uuid,
        lock_token: Uuid,
        lock_duration: Duration,
        progress: Option<u8>,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;

        let result = sqlx::query(
            r#"
            UPDATE job_queue_jobs
            SET locked_until = NOW() + ($3 * INTERVAL '1 millisecond'),
                progress = GREATEST(progress, COALESCE($4, progress))
            WHERE id = $1 AND lock_token = $2 AND state = 'active'
            "#,
        )
        .bind(job_id)
        .bind(lock_token)
        .bind(millis(lock_duration))
        .bind(progress.map(|p| p.min(100) as i16))
        .execute(&self.pool)
        .await
        .map_err(query_error("extend lock"))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::LockLost(job_id));
        }
        Ok(())
    }

    #[instrument(skip(self, result))]
    async fn complete(
        &self,
        job_id: Uuid,
        lock_token: Uuid,
        result: serde_json::Value,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;

        let row = sqlx::query(
            r#"
            UPDATE job_queue_jobs
            SET state = 'completed',
                result = $3,
                finished_at = NOW(),
                lock_token = NULL,
                locked_until = NULL
            WHERE id = $1 AND lock_token = $2 AND state = 'active'
            RETURNING queue, retention
            "#,
        )
        .bind(job_id)
        .bind(lock_token)
        .bind(&result)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error("complete"))?
        .ok_or(StoreError::LockLost(job_id))?;

        let queue: String = row.get("queue");
        let retention: RetentionPolicy = serde_json::from_value(row.get("retention"))
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        debug!(%job_id, "job completed");
        sweep_after_finish(
            &queue,
            JobState::Completed,
            self.clean_state(&queue, JobState::Completed, retention.completed()),
        )
        .await;
        Ok(())
    }

    #[instrument(skip(self, reason))]
    async fn fail(
        &self,
        job_id: Uuid,
        lock_token: Uuid,
        reason: &str,
        retryable: bool,
    ) -> Result<FailureOutcome, StoreError> {
        self.ensure_open()?;

        let mut tx = self.pool.begin().await.map_err(query_error("begin"))?;

        let row = sqlx::query(
            r#"
            SELECT queue, attempts_made, max_attempts, backoff, retention
            FROM job_queue_jobs
            WHERE id = $1 AND lock_token = $2 AND state = 'active'
            FOR UPDATE
            "#,
        )
        .bind(job_id)
        .bind(lock_token)
        .fetch_optional(&mut *tx)
        .await
        .map_err(query_error("load failed job"))?
        .ok_or(StoreError::LockLost(job_id))?;

        let queue: String = row.get("queue");
        let attempts_made = row.get::<i32, _>("attempts_made") as u32;
        let max_attempts = row.get::<i32, _>("max_attempts") as u32;
        let backoff: BackoffPolicy = serde_json::from_value(row.get("backoff"))
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let retention: RetentionPolicy = serde_json::from_value(row.get("retention"))
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        if retryable && attempts_made < max_attempts {
            let delay = backoff.delay_for(attempts_made);

            sqlx::query(
                r#"
                UPDATE job_queue_jobs
                SET state = 'delayed',
                    run_at = NOW() + ($2 * INTERVAL '1 millisecond'),
                    lock_token = NULL,
                    locked_until = NULL
                WHERE id = $1
                "#,
            )
            .bind(job_id)
            .bind(millis(delay))
            .execute(&mut *tx)
            .await
            .map_err(query_error("schedule retry"))?;
            tx.commit().await.map_err(query_error("commit"))?;

            debug!(%job_id, attempts_made, ?delay, "job will retry");
            return Ok(FailureOutcome::WillRetry {
                attempts_made,
                delay,
            });
        }

        sqlx::query(
            r#"
            UPDATE job_queue_jobs
            SET state = 'failed',
                failure_reason = $2,
                finished_at = NOW(),
                lock_token = NULL,
                locked_until = NULL
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(reason)
        .execute(&mut *tx)
        .await
        .map_err(query_error("fail"))?;
        tx.commit().await.map_err(query_error("commit"))?;

        sweep_after_finish(
            &queue,
            JobState::Failed,
            self.clean_state(&queue, JobState::Failed, retention.failed()),
        )
        .await;

        Ok(FailureOutcome::Failed { attempts_made })
    }

    #[instrument(skip(self))]
    async fn recover_stalled(
        &self,
        queue: &str,
        max_stalled_count: u32,
    ) -> Result<Vec<StalledJob>, StoreError> {
        self.ensure_open()?;

        // SET expressions read the pre-update row, so stalled_count + 1 is the new count
        let rows = sqlx::query(
            r#"
            WITH stale AS (
                SELECT id, lock_token
                FROM job_queue_jobs
                WHERE queue = $1 AND state = 'active' AND locked_until < NOW()
                FOR UPDATE SKIP LOCKED
            )
            UPDATE job_queue_jobs j
            SET stalled_count = stalled_count + 1,
                state = CASE WHEN stalled_count + 1 >= $2 THEN 'failed' ELSE 'waiting' END,
                attempts_made = CASE
                    WHEN stalled_count + 1 >= $2 THEN attempts_made
                    ELSE GREATEST(attempts_made - 1, 0)
                END,
                failure_reason = CASE WHEN stalled_count + 1 >= $2 THEN $3 ELSE failure_reason END,
                finished_at = CASE WHEN stalled_count + 1 >= $2 THEN NOW() ELSE NULL END,
                lock_token = NULL,
                locked_until = NULL
            FROM stale s
            WHERE j.id = s.id
            RETURNING j.id, j.state, j.stalled_count, j.attempts_made, j.retention,
                      s.lock_token AS stale_token
            "#,
        )
        .bind(queue)
        .bind(max_stalled_count as i32)
        .bind(STALLED_FAILURE_REASON)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("recover stalled"))?;

        let mut stalled = Vec::with_capacity(rows.len());
        let mut failed_policies = Vec::new();
        for row in &rows {
            let state: String = row.get("state");
            let stalled_count = row.get::<i32, _>("stalled_count") as u32;
            let outcome = if state == JobState::Failed.as_str() {
                let retention: RetentionPolicy = serde_json::from_value(row.get("retention"))
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                failed_policies.push(retention.failed());
                StallOutcome::Failed {
                    stalled_count,
                    attempts_made: row.get::<i32, _>("attempts_made") as u32,
                }
            } else {
                StallOutcome::Requeued { stalled_count }
            };
            stalled.push(StalledJob {
                id: row.get("id"),
                lock_token: row.get("stale_token"),
                outcome,
            });
        }

        for policy in failed_policies {
            sweep_after_finish(
                queue,
                JobState::Failed,
                self.clean_state(queue, JobState::Failed, policy),
            )
            .await;
        }

        Ok(stalled)
    }

    #[instrument(skip(self))]
    async fn get(&self, queue: &str, job_id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        self.ensure_open()?;

        let sql = format!("SELECT {JOB_COLUMNS} FROM job_queue_jobs WHERE id = $1 AND queue = $2");
        let row = sqlx::query(&sql)
            .bind(job_id)
            .bind(queue)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error("get"))?;

        row.as_ref().map(row_to_record).transpose()
    }

    #[instrument(skip(self))]
    async fn position(&self, queue: &str, job_id: Uuid) -> Result<Option<u64>, StoreError> {
        self.ensure_open()?;

        let target = sqlx::query(
            r#"
            SELECT COALESCE(priority, $3) AS rank, run_at, seq
            FROM job_queue_jobs
            WHERE id = $1 AND queue = $2 AND state = 'waiting'
            "#,
        )
        .bind(job_id)
        .bind(queue)
        .bind(UNPRIORITIZED)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error("position target"))?;

        let Some(target) = target else {
            return Ok(None);
        };

        let ahead: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM job_queue_jobs
            WHERE queue = $1
              AND state = 'waiting'
              AND (COALESCE(priority, $5), run_at, seq) < ($2, $3, $4)
            "#,
        )
        .bind(queue)
        .bind(target.get::<i64, _>("rank"))
        .bind(target.get::<DateTime<Utc>, _>("run_at"))
        .bind(target.get::<i64, _>("seq"))
        .bind(UNPRIORITIZED)
        .fetch_one(&self.pool)
        .await
        .map_err(query_error("position"))?;

        Ok(Some(ahead as u64 + 1))
    }

    #[instrument(skip(self))]
    async fn list(
        &self,
        queue: &str,
        state: JobState,
        limit: usize,
    ) -> Result<Vec<JobRecord>, StoreError> {
        self.ensure_open()?;

        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM job_queue_jobs
            WHERE queue = $1 AND state = $2
            ORDER BY COALESCE(finished_at, created_at) DESC, seq DESC
            LIMIT $3
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(queue)
            .bind(state.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("list"))?;

        rows.iter().map(row_to_record).collect()
    }

    #[instrument(skip(self))]
    async fn counts(&self, queue: &str) -> Result<JobCounts, StoreError> {
        self.ensure_open()?;

        let rows = sqlx::query(
            r#"
            SELECT state, COUNT(*) AS count
            FROM job_queue_jobs
            WHERE queue = $1
            GROUP BY state
            "#,
        )
        .bind(queue)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("counts"))?;

        let paused: Option<bool> =
            sqlx::query_scalar("SELECT paused FROM job_queue_state WHERE queue = $1")
                .bind(queue)
                .fetch_optional(&self.pool)
                .await
                .map_err(query_error("paused flag"))?;

        let mut counts = JobCounts {
            paused: paused.unwrap_or(false),
            ..JobCounts::default()
        };
        for row in rows {
            let state: String = row.get("state");
            let count = row.get::<i64, _>("count") as u64;
            match state.parse::<JobState>()? {
                JobState::Waiting => counts.waiting = count,
                JobState::Active => counts.active = count,
                JobState::Delayed => counts.delayed = count,
                JobState::Completed => counts.completed = count,
                JobState::Failed => counts.failed = count,
                JobState::Stalled => {}
            }
        }
        Ok(counts)
    }

    #[instrument(skip(self))]
    async fn remove(&self, queue: &str, job_id: Uuid) -> Result<bool, StoreError> {
        self.ensure_open()?;

        let result = sqlx::query("DELETE FROM job_queue_jobs WHERE id = $1 AND queue = $2")
            .bind(job_id)
            .bind(queue)
            .execute(&self.pool)
            .await
            .map_err(query_error("remove"))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn retry(&self, queue: &str, job_id: Uuid) -> Result<bool, StoreError> {
        self.ensure_open()?;

        let result = sqlx::query(
            r#"
            UPDATE job_queue_jobs
            SET state = 'waiting',
                attempts_made = 0,
                stalled_count = 0,
                progress = 0,
                failure_reason = NULL,
                processed_at = NULL,
                finished_at = NULL,
                run_at = NOW(),
                seq = nextval(pg_get_serial_sequence('job_queue_jobs', 'seq'))
            WHERE id = $1 AND queue = $2 AND state = 'failed'
            "#,
        )
        .bind(job_id)
        .bind(queue)
        .execute(&self.pool)
        .await
        .map_err(query_error("retry"))?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        // Distinguish an absent job from one in the wrong state
        match self.get(queue, job_id).await? {
            Some(record) => Err(StoreError::InvalidState {
                id: job_id,
                state: record.state,
                expected: JobState::Failed,
            }),
            None => Ok(false),
        }
    }

    #[instrument(skip(self))]
    async fn clean(
        &self,
        queue: &str,
        state: JobState,
        policy: CleanPolicy,
    ) -> Result<u64, StoreError> {
        self.ensure_open()?;

        if !state.is_terminal() || policy.is_noop() {
            return Ok(0);
        }
        self.clean_state(queue, state, policy).await
    }

    #[instrument(skip(self))]
    async fn set_paused(&self, queue: &str, paused: bool) -> Result<(), StoreError> {
        self.ensure_open()?;

        sqlx::query(
            r#"
            INSERT INTO job_queue_state (queue, paused, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (queue) DO UPDATE
            SET paused = EXCLUDED.paused, updated_at = NOW()
            "#,
        )
        .bind(queue)
        .bind(paused)
        .execute(&self.pool)
        .await
        .map_err(query_error("set paused"))?;

        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.ensure_open()?;

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(query_error("ping"))?;
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.pool.close().await;
        }
    }
}
