//! In-memory implementation of JobStore for testing and local development

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::*;

/// Internal job state
struct JobEntry {
    record: JobRecord,
    seq: u64,
    lock_token: Option<Uuid>,
    locked_until: Option<DateTime<Utc>>,
}

impl JobEntry {
    fn owned_by(&self, lock_token: Uuid) -> bool {
        self.record.state == JobState::Active && self.lock_token == Some(lock_token)
    }

    /// Priority first, then FIFO by due time and insertion
    fn claim_order(&self) -> (u32, DateTime<Utc>, u64) {
        (priority_rank(self.record.priority), self.record.run_at, self.seq)
    }

    fn release_lock(&mut self) {
        self.lock_token = None;
        self.locked_until = None;
    }
}

/// In-memory implementation of JobStore
///
/// Provides the same semantics as the PostgreSQL implementation, with a
/// few extra hooks for tests that need to move the clock.
///
/// # Example
///
/// ```
/// use cvforge_jobs::InMemoryJobStore;
///
/// let store = InMemoryJobStore::new();
/// assert_eq!(store.job_count(), 0);
/// ```
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, JobEntry>>,
    paused: RwLock<HashSet<String>>,
    sequence: AtomicU64,
    closed: AtomicBool,
}

impl InMemoryJobStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            paused: RwLock::new(HashSet::new()),
            sequence: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Total number of stored jobs across all queues
    pub fn job_count(&self) -> usize {
        self.jobs.read().len()
    }

    /// Shift a job's timestamps into the past (for testing retention)
    pub fn backdate(&self, job_id: Uuid, age: Duration) -> bool {
        let Ok(age) = chrono::Duration::from_std(age) else {
            return false;
        };
        let mut jobs = self.jobs.write();
        let Some(entry) = jobs.get_mut(&job_id) else {
            return false;
        };
        let record = &mut entry.record;
        record.created_at -= age;
        record.run_at -= age;
        record.processed_at = record.processed_at.map(|t| t - age);
        record.finished_at = record.finished_at.map(|t| t - age);
        true
    }

    /// Expire the lock of an active job (for testing stall detection)
    pub fn expire_lock(&self, job_id: Uuid) -> bool {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(&job_id) {
            Some(entry) if entry.record.state == JobState::Active => {
                entry.locked_until = Some(Utc::now() - chrono::Duration::seconds(1));
                true
            }
            _ => false,
        }
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.jobs.write().clear();
        self.paused.write().clear();
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StoreError::Connection("job store is closed".to_string()))
        } else {
            Ok(())
        }
    }

    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Evict jobs of one queue and state that violate the policy
fn clean_locked(
    jobs: &mut HashMap<Uuid, JobEntry>,
    queue: &str,
    state: JobState,
    policy: CleanPolicy,
    now: DateTime<Utc>,
) -> u64 {
    if policy.is_noop() {
        return 0;
    }

    let mut candidates: Vec<(Uuid, DateTime<Utc>)> = jobs
        .values()
        .filter(|e| e.record.queue == queue && e.record.state == state)
        .map(|e| {
            let finished = e.record.finished_at.unwrap_or(e.record.created_at);
            (e.record.id, finished)
        })
        .collect();

    // Newest first so count rank is position in the vector
    candidates.sort_by(|a, b| b.1.cmp(&a.1));

    let cutoff = policy
        .max_age
        .and_then(|age| chrono::Duration::from_std(age).ok())
        .map(|age| now - age);

    let mut removed = 0;
    for (rank, (id, finished)) in candidates.into_iter().enumerate() {
        let too_old = cutoff.is_some_and(|cutoff| finished < cutoff);
        let over_count = policy.max_count.is_some_and(|max| rank >= max);
        if too_old || over_count {
            jobs.remove(&id);
            removed += 1;
        }
    }
    removed
}

fn offset(now: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|by| now.checked_add_signed(by))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<JobRecord, StoreError> {
        self.ensure_open()?;

        let now = Utc::now();
        let (state, run_at) = match job.options.delay.filter(|d| !d.is_zero()) {
            Some(delay) => (JobState::Delayed, offset(now, delay)),
            None => (JobState::Waiting, now),
        };

        let mut jobs = self.jobs.write();
        if let Some(id) = job.options.job_id {
            if let Some(existing) = jobs.get(&id) {
                if existing.record.queue != job.queue {
                    return Err(StoreError::DuplicateId(id));
                }
                return Ok(existing.record.clone());
            }
        }

        let record = JobRecord {
            id: job.options.job_id.unwrap_or_else(Uuid::now_v7),
            queue: job.queue,
            name: job.name,
            payload: job.payload,
            state,
            attempts_made: 0,
            max_attempts: job.options.attempts,
            backoff: job.options.backoff,
            retention: job.options.retention,
            priority: job.options.priority,
            progress: 0,
            result: None,
            failure_reason: None,
            stalled_count: 0,
            created_at: now,
            run_at,
            processed_at: None,
            finished_at: None,
        };

        jobs.insert(
            record.id,
            JobEntry {
                record: record.clone(),
                seq: self.next_seq(),
                lock_token: None,
                locked_until: None,
            },
        );
        Ok(record)
    }

    async fn claim(
        &self,
        queue: &str,
        limit: usize,
        lock_duration: Duration,
    ) -> Result<Vec<ClaimedJob>, StoreError> {
        self.ensure_open()?;

        if limit == 0 || self.paused.read().contains(queue) {
            return Ok(vec![]);
        }

        let now = Utc::now();
        let mut jobs = self.jobs.write();

        // Promote delayed jobs whose time has come
        for entry in jobs.values_mut() {
            if entry.record.queue == queue
                && entry.record.state == JobState::Delayed
                && entry.record.run_at <= now
            {
                entry.record.state = JobState::Waiting;
            }
        }

        let mut ready: Vec<((u32, DateTime<Utc>, u64), Uuid)> = jobs
            .values()
            .filter(|e| {
                e.record.queue == queue
                    && e.record.state == JobState::Waiting
                    && e.record.run_at <= now
            })
            .map(|e| (e.claim_order(), e.record.id))
            .collect();
        ready.sort();

        let mut claimed = Vec::new();
        for (_, id) in ready.into_iter().take(limit) {
            let Some(entry) = jobs.get_mut(&id) else {
                continue;
            };
            let token = Uuid::now_v7();
            entry.record.state = JobState::Active;
            entry.record.attempts_made += 1;
            entry.record.processed_at = Some(now);
            entry.lock_token = Some(token);
            entry.locked_until = Some(offset(now, lock_duration));

            claimed.push(ClaimedJob {
                id,
                queue: entry.record.queue.clone(),
                name: entry.record.name.clone(),
                payload: entry.record.payload.clone(),
                attempts_made: entry.record.attempts_made,
                max_attempts: entry.record.max_attempts,
                lock_token: token,
            });
        }

        Ok(claimed)
    }

    async fn extend_lock(
        &self,
        job_id: Uuid,
        lock_token: Uuid,
        lock_duration: Duration,
        progress: Option<u8>,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;

        let mut jobs = self.jobs.write();
        let entry = jobs
            .get_mut(&job_id)
            .filter(|e| e.owned_by(lock_token))
            .ok_or(StoreError::LockLost(job_id))?;

        if let Some(progress) = progress {
            entry.record.progress = entry.record.progress.max(progress.min(100));
        }
        entry.locked_until = Some(offset(Utc::now(), lock_duration));
        Ok(())
    }

    async fn complete(
        &self,
        job_id: Uuid,
        lock_token: Uuid,
        result: serde_json::Value,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;

        let now = Utc::now();
        let mut jobs = self.jobs.write();
        let entry = jobs
            .get_mut(&job_id)
            .filter(|e| e.owned_by(lock_token))
            .ok_or(StoreError::LockLost(job_id))?;

        entry.record.state = JobState::Completed;
        entry.record.result = Some(result);
        entry.record.finished_at = Some(now);
        entry.release_lock();

        let queue = entry.record.queue.clone();
        let policy = entry.record.retention.completed();
        clean_locked(&mut jobs, &queue, JobState::Completed, policy, now);
        Ok(())
    }

    async fn fail(
        &self,
        job_id: Uuid,
        lock_token: Uuid,
        reason: &str,
        retryable: bool,
    ) -> Result<FailureOutcome, StoreError> {
        self.ensure_open()?;

        let now = Utc::now();
        let mut jobs = self.jobs.write();
        let entry = jobs
            .get_mut(&job_id)
            .filter(|e| e.owned_by(lock_token))
            .ok_or(StoreError::LockLost(job_id))?;
        entry.release_lock();

        let attempts_made = entry.record.attempts_made;
        if retryable && attempts_made < entry.record.max_attempts {
            let delay = entry.record.backoff.delay_for(attempts_made);
            entry.record.state = JobState::Delayed;
            entry.record.run_at = offset(now, delay);
            return Ok(FailureOutcome::WillRetry {
                attempts_made,
                delay,
            });
        }

        entry.record.state = JobState::Failed;
        entry.record.failure_reason = Some(reason.to_string());
        entry.record.finished_at = Some(now);

        let queue = entry.record.queue.clone();
        let policy = entry.record.retention.failed();
        clean_locked(&mut jobs, &queue, JobState::Failed, policy, now);
        Ok(FailureOutcome::Failed { attempts_made })
    }

    async fn recover_stalled(
        &self,
        queue: &str,
        max_stalled_count: u32,
    ) -> Result<Vec<StalledJob>, StoreError> {
        self.ensure_open()?;

        let now = Utc::now();
        let mut jobs = self.jobs.write();
        let mut stalled = Vec::new();
        let mut failed_policies = Vec::new();

        for entry in jobs.values_mut() {
            let expired = entry.locked_until.is_some_and(|until| until < now);
            if entry.record.queue != queue || entry.record.state != JobState::Active || !expired
            {
                continue;
            }

            let lock_token = entry.lock_token;
            entry.release_lock();
            entry.record.stalled_count += 1;
            let stalled_count = entry.record.stalled_count;

            let outcome = if stalled_count >= max_stalled_count {
                entry.record.state = JobState::Failed;
                entry.record.failure_reason = Some(STALLED_FAILURE_REASON.to_string());
                entry.record.finished_at = Some(now);
                failed_policies.push(entry.record.retention.failed());
                StallOutcome::Failed {
                    stalled_count,
                    attempts_made: entry.record.attempts_made,
                }
            } else {
                // The stalled run does not count against the attempt budget
                entry.record.state = JobState::Waiting;
                entry.record.attempts_made = entry.record.attempts_made.saturating_sub(1);
                StallOutcome::Requeued { stalled_count }
            };

            stalled.push(StalledJob {
                id: entry.record.id,
                lock_token,
                outcome,
            });
        }

        for policy in failed_policies {
            clean_locked(&mut jobs, queue, JobState::Failed, policy, now);
        }

        Ok(stalled)
    }

    async fn get(&self, queue: &str, job_id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        self.ensure_open()?;

        Ok(self
            .jobs
            .read()
            .get(&job_id)
            .filter(|e| e.record.queue == queue)
            .map(|e| e.record.clone()))
    }

    async fn position(&self, queue: &str, job_id: Uuid) -> Result<Option<u64>, StoreError> {
        self.ensure_open()?;

        let jobs = self.jobs.read();
        let Some(target) = jobs
            .get(&job_id)
            .filter(|e| e.record.queue == queue && e.record.state == JobState::Waiting)
        else {
            return Ok(None);
        };

        let key = target.claim_order();
        let ahead = jobs
            .values()
            .filter(|e| e.record.queue == queue && e.record.state == JobState::Waiting)
            .filter(|e| e.claim_order() < key)
            .count() as u64;
        Ok(Some(ahead + 1))
    }

    async fn list(
        &self,
        queue: &str,
        state: JobState,
        limit: usize,
    ) -> Result<Vec<JobRecord>, StoreError> {
        self.ensure_open()?;

        let jobs = self.jobs.read();
        let mut records: Vec<JobRecord> = jobs
            .values()
            .filter(|e| e.record.queue == queue && e.record.state == state)
            .map(|e| e.record.clone())
            .collect();
        records.sort_by(|a, b| {
            let a_time = a.finished_at.unwrap_or(a.created_at);
            let b_time = b.finished_at.unwrap_or(b.created_at);
            b_time.cmp(&a_time)
        });
        records.truncate(limit);
        Ok(records)
    }

    async fn counts(&self, queue: &str) -> Result<JobCounts, StoreError> {
        self.ensure_open()?;

        let mut counts = JobCounts {
            paused: self.paused.read().contains(queue),
            ..JobCounts::default()
        };
        for entry in self.jobs.read().values() {
            if entry.record.queue != queue {
                continue;
            }
            match entry.record.state {
                JobState::Waiting => counts.waiting += 1,
                JobState::Active => counts.active += 1,
                JobState::Delayed => counts.delayed += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
                JobState::Stalled => {}
            }
        }
        Ok(counts)
    }

    async fn remove(&self, queue: &str, job_id: Uuid) -> Result<bool, StoreError> {
        self.ensure_open()?;

        let mut jobs = self.jobs.write();
        if jobs.get(&job_id).is_some_and(|e| e.record.queue == queue) {
            jobs.remove(&job_id);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn retry(&self, queue: &str, job_id: Uuid) -> Result<bool, StoreError> {
        self.ensure_open()?;

        let seq = self.next_seq();
        let mut jobs = self.jobs.write();
        let Some(entry) = jobs.get_mut(&job_id).filter(|e| e.record.queue == queue) else {
            return Ok(false);
        };
        if entry.record.state != JobState::Failed {
            return Err(StoreError::InvalidState {
                id: job_id,
                state: entry.record.state,
                expected: JobState::Failed,
            });
        }

        let now = Utc::now();
        let record = &mut entry.record;
        record.state = JobState::Waiting;
        record.attempts_made = 0;
        record.stalled_count = 0;
        record.progress = 0;
        record.failure_reason = None;
        record.processed_at = None;
        record.finished_at = None;
        record.run_at = now;
        entry.seq = seq;
        Ok(true)
    }

    async fn clean(
        &self,
        queue: &str,
        state: JobState,
        policy: CleanPolicy,
    ) -> Result<u64, StoreError> {
        self.ensure_open()?;

        if !state.is_terminal() {
            return Ok(0);
        }
        let mut jobs = self.jobs.write();
        Ok(clean_locked(&mut jobs, queue, state, policy, Utc::now()))
    }

    async fn set_paused(&self, queue: &str, paused: bool) -> Result<(), StoreError> {
        self.ensure_open()?;

        let mut set = self.paused.write();
        if paused {
            set.insert(queue.to_string());
        } else {
            set.remove(queue);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.ensure_open()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::RetentionPolicy;
    use crate::reliability::BackoffPolicy;

    const LOCK: Duration = Duration::from_secs(60);

    fn options(attempts: u32) -> JobOptions {
        JobOptions {
            attempts,
            backoff: BackoffPolicy::exponential(Duration::from_millis(2000)),
            delay: None,
            retention: RetentionPolicy::keep_all(),
            job_id: None,
            priority: None,
        }
    }

    fn new_job(queue: &str, name: &str, attempts: u32) -> NewJob {
        NewJob {
            queue: queue.to_string(),
            name: name.to_string(),
            payload: serde_json::json!({"resume_id": name}),
            options: options(attempts),
        }
    }

    #[tokio::test]
    async fn test_job_lifecycle() {
        let store = InMemoryJobStore::new();

        let record = store.enqueue(new_job("q", "a", 3)).await.unwrap();
        assert_eq!(record.state, JobState::Waiting);
        assert_eq!(record.attempts_made, 0);

        let claimed = store.claim("q", 10, LOCK).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempts_made, 1);

        store
            .extend_lock(record.id, claimed[0].lock_token, LOCK, Some(40))
            .await
            .unwrap();
        store
            .complete(record.id, claimed[0].lock_token, serde_json::json!({"url": "x"}))
            .await
            .unwrap();

        let stored = store.get("q", record.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Completed);
        assert_eq!(stored.progress, 40);
        assert_eq!(stored.result, Some(serde_json::json!({"url": "x"})));
        assert!(stored.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_claim_is_fifo_and_bounded() {
        let store = InMemoryJobStore::new();
        let first = store.enqueue(new_job("q", "1", 3)).await.unwrap();
        let second = store.enqueue(new_job("q", "2", 3)).await.unwrap();
        store.enqueue(new_job("q", "3", 3)).await.unwrap();
        store.enqueue(new_job("other", "x", 3)).await.unwrap();

        let claimed = store.claim("q", 2, LOCK).await.unwrap();
        let ids: Vec<Uuid> = claimed.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);

        let counts = store.counts("q").await.unwrap();
        assert_eq!(counts.active, 2);
        assert_eq!(counts.waiting, 1);
    }

    #[tokio::test]
    async fn test_priority_claimed_before_fifo() {
        let store = InMemoryJobStore::new();
        let plain = store.enqueue(new_job("q", "plain", 3)).await.unwrap();

        let mut low = new_job("q", "low", 3);
        low.options.priority = Some(5);
        let low = store.enqueue(low).await.unwrap();

        let mut urgent = new_job("q", "urgent", 3);
        urgent.options.priority = Some(1);
        let urgent = store.enqueue(urgent).await.unwrap();

        assert_eq!(store.position("q", urgent.id).await.unwrap(), Some(1));
        assert_eq!(store.position("q", plain.id).await.unwrap(), Some(3));

        let claimed = store.claim("q", 3, LOCK).await.unwrap();
        let ids: Vec<Uuid> = claimed.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![urgent.id, low.id, plain.id]);
    }

    #[tokio::test]
    async fn test_caller_job_id_deduplicates() {
        let store = InMemoryJobStore::new();
        let id = Uuid::now_v7();

        let mut job = new_job("q", "a", 3);
        job.options.job_id = Some(id);
        let first = store.enqueue(job).await.unwrap();
        assert_eq!(first.id, id);

        let mut again = new_job("q", "b", 3);
        again.options.job_id = Some(id);
        let second = store.enqueue(again).await.unwrap();
        assert_eq!(second.id, id);
        assert_eq!(second.name, "a");
        assert_eq!(store.counts("q").await.unwrap().waiting, 1);

        let mut elsewhere = new_job("other", "c", 3);
        elsewhere.options.job_id = Some(id);
        let err = store.enqueue(elsewhere).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId(dup) if dup == id));
    }

    #[tokio::test]
    async fn test_fail_schedules_retry_then_fails() {
        let store = InMemoryJobStore::new();
        let record = store.enqueue(new_job("q", "a", 2)).await.unwrap();

        let claimed = store.claim("q", 1, LOCK).await.unwrap().remove(0);
        let outcome = store
            .fail(record.id, claimed.lock_token, "boom", true)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            FailureOutcome::WillRetry {
                attempts_made: 1,
                delay: Duration::from_millis(2000),
            }
        );

        let stored = store.get("q", record.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Delayed);
        assert_eq!(stored.failure_reason, None);

        // Not claimable until the backoff elapses
        assert!(store.claim("q", 1, LOCK).await.unwrap().is_empty());
        store.backdate(record.id, Duration::from_secs(3));

        let claimed = store.claim("q", 1, LOCK).await.unwrap().remove(0);
        assert_eq!(claimed.attempts_made, 2);

        let outcome = store
            .fail(record.id, claimed.lock_token, "boom again", true)
            .await
            .unwrap();
        assert_eq!(outcome, FailureOutcome::Failed { attempts_made: 2 });

        let stored = store.get("q", record.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failed);
        assert_eq!(stored.failure_reason.as_deref(), Some("boom again"));
    }

    #[tokio::test]
    async fn test_non_retryable_failure_skips_retries() {
        let store = InMemoryJobStore::new();
        let record = store.enqueue(new_job("q", "a", 5)).await.unwrap();
        let claimed = store.claim("q", 1, LOCK).await.unwrap().remove(0);

        let outcome = store
            .fail(record.id, claimed.lock_token, "bad input", false)
            .await
            .unwrap();
        assert_eq!(outcome, FailureOutcome::Failed { attempts_made: 1 });
    }

    #[tokio::test]
    async fn test_stale_token_is_rejected() {
        let store = InMemoryJobStore::new();
        let record = store.enqueue(new_job("q", "a", 3)).await.unwrap();
        store.claim("q", 1, LOCK).await.unwrap();

        let err = store
            .complete(record.id, Uuid::now_v7(), serde_json::json!(null))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LockLost(id) if id == record.id));
    }

    #[tokio::test]
    async fn test_stalled_job_requeued_then_failed() {
        let store = InMemoryJobStore::new();
        let record = store.enqueue(new_job("q", "a", 3)).await.unwrap();

        let first = store.claim("q", 1, LOCK).await.unwrap().remove(0);
        store.expire_lock(record.id);

        let stalled = store.recover_stalled("q", 2).await.unwrap();
        assert_eq!(
            stalled,
            vec![StalledJob {
                id: record.id,
                lock_token: Some(first.lock_token),
                outcome: StallOutcome::Requeued { stalled_count: 1 },
            }]
        );
        let stored = store.get("q", record.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Waiting);
        assert_eq!(stored.attempts_made, 0);

        // The original run lost its lock
        assert!(store
            .extend_lock(record.id, first.lock_token, LOCK, None)
            .await
            .is_err());

        store.claim("q", 1, LOCK).await.unwrap();
        store.expire_lock(record.id);
        let stalled = store.recover_stalled("q", 2).await.unwrap();
        assert_eq!(
            stalled[0].outcome,
            StallOutcome::Failed {
                stalled_count: 2,
                attempts_made: 1,
            }
        );

        let stored = store.get("q", record.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failed);
        assert_eq!(stored.failure_reason.as_deref(), Some(STALLED_FAILURE_REASON));
    }

    #[tokio::test]
    async fn test_paused_queue_claims_nothing() {
        let store = InMemoryJobStore::new();
        store.set_paused("q", true).await.unwrap();
        store.enqueue(new_job("q", "a", 3)).await.unwrap();

        assert!(store.claim("q", 5, LOCK).await.unwrap().is_empty());
        let counts = store.counts("q").await.unwrap();
        assert!(counts.paused);
        assert_eq!(counts.waiting, 1);

        store.set_paused("q", false).await.unwrap();
        assert_eq!(store.claim("q", 5, LOCK).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_position_and_remove() {
        let store = InMemoryJobStore::new();
        let a = store.enqueue(new_job("q", "a", 3)).await.unwrap();
        let b = store.enqueue(new_job("q", "b", 3)).await.unwrap();

        assert_eq!(store.position("q", a.id).await.unwrap(), Some(1));
        assert_eq!(store.position("q", b.id).await.unwrap(), Some(2));

        assert!(store.remove("q", a.id).await.unwrap());
        assert!(!store.remove("q", a.id).await.unwrap());
        assert_eq!(store.position("q", b.id).await.unwrap(), Some(1));

        // Queue mismatch behaves like absence
        assert!(!store.remove("other", b.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_retry_failed_job() {
        let store = InMemoryJobStore::new();
        let record = store.enqueue(new_job("q", "a", 1)).await.unwrap();
        let claimed = store.claim("q", 1, LOCK).await.unwrap().remove(0);
        store
            .fail(record.id, claimed.lock_token, "boom", true)
            .await
            .unwrap();

        assert!(store.retry("q", record.id).await.unwrap());
        let stored = store.get("q", record.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Waiting);
        assert_eq!(stored.attempts_made, 0);
        assert_eq!(stored.failure_reason, None);

        // Only failed jobs can be retried
        assert!(matches!(
            store.retry("q", record.id).await,
            Err(StoreError::InvalidState { .. })
        ));
        assert!(!store.retry("q", Uuid::now_v7()).await.unwrap());
    }

    #[tokio::test]
    async fn test_clean_by_age_and_count() {
        let store = InMemoryJobStore::new();
        let mut ids = Vec::new();
        for i in 0..4 {
            let record = store.enqueue(new_job("q", &i.to_string(), 3)).await.unwrap();
            let claimed = store.claim("q", 1, LOCK).await.unwrap().remove(0);
            store
                .complete(record.id, claimed.lock_token, serde_json::json!(i))
                .await
                .unwrap();
            ids.push(record.id);
        }
        store.backdate(ids[0], Duration::from_secs(8 * 86_400));

        let removed = store
            .clean(
                "q",
                JobState::Completed,
                CleanPolicy {
                    max_age: Some(Duration::from_secs(7 * 86_400)),
                    max_count: Some(2),
                },
            )
            .await
            .unwrap();

        assert_eq!(removed, 2);
        assert_eq!(store.counts("q").await.unwrap().completed, 2);
        assert!(store.get("q", ids[0]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_completion_applies_retention() {
        let store = InMemoryJobStore::new();
        let mut job = new_job("q", "a", 3);
        job.options.retention = RetentionPolicy::keep_all().with_completed(None, Some(1));

        for _ in 0..3 {
            let record = store.enqueue(job.clone()).await.unwrap();
            let claimed = store.claim("q", 1, LOCK).await.unwrap().remove(0);
            store
                .complete(record.id, claimed.lock_token, serde_json::json!(null))
                .await
                .unwrap();
        }

        assert_eq!(store.counts("q").await.unwrap().completed, 1);
    }

    #[tokio::test]
    async fn test_delayed_enqueue() {
        let store = InMemoryJobStore::new();
        let mut job = new_job("q", "a", 3);
        job.options.delay = Some(Duration::from_secs(30));

        let record = store.enqueue(job).await.unwrap();
        assert_eq!(record.state, JobState::Delayed);
        assert!(store.claim("q", 1, LOCK).await.unwrap().is_empty());
        assert_eq!(store.counts("q").await.unwrap().delayed, 1);
    }

    #[tokio::test]
    async fn test_closed_store_rejects_operations() {
        let store = InMemoryJobStore::new();
        store.close().await;

        assert!(matches!(
            store.enqueue(new_job("q", "a", 3)).await,
            Err(StoreError::Connection(_))
        ));
        assert!(store.ping().await.is_err());
    }
}
