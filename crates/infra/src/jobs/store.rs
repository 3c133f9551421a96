//! Job storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::types::{DeadLetterEntry, Job, JobError, JobId, JobStatus};

/// Job store abstraction.
///
/// A store hands each ready job to at most one claimer at a time. The claim
/// carries a lease; a job whose lease runs out is treated as a failed attempt
/// by [`JobStore::reap_expired_leases`].
pub trait JobStore: Send + Sync {
    /// Enqueue a new job.
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError>;

    /// Get a queued job by ID. Completed and dead-lettered jobs are no longer queued.
    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Update a queued job.
    fn update(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Claim the oldest ready job, marking it running under a lease.
    /// Returns None if no jobs are available.
    fn claim_next(&self, lease: Duration) -> Result<Option<Job>, JobStoreError>;

    /// Remove a successfully completed job from the queue.
    fn complete(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Move a job to the dead-letter queue.
    fn dead_letter(&self, job: Job, reason: String) -> Result<(), JobStoreError>;

    /// Fail every running job whose lease expired before `now`.
    /// Returns the jobs that were dead-lettered as a result.
    fn reap_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Job>, JobStoreError>;

    /// List dead-lettered jobs, oldest first.
    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, JobStoreError>;

    /// Retry a dead-lettered job (move back to pending with a fresh attempt budget).
    fn retry_dead_letter(&self, job_id: JobId) -> Result<Job, JobStoreError>;

    /// Get job statistics.
    fn stats(&self) -> Result<JobStats, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

impl<T> From<PoisonError<T>> for JobStoreError {
    fn from(_: PoisonError<T>) -> Self {
        JobStoreError::Storage("job store lock poisoned".to_string())
    }
}

/// Job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub running: usize,
    /// Waiting for a retry after a failed attempt
    pub failed: usize,
    pub completed: u64,
    pub dead_lettered: usize,
}

/// The error recorded against a job whose lease ran out.
pub(crate) fn lease_expired_error() -> JobError {
    JobError::retryable("lease expired")
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    dead_letters: RwLock<HashMap<JobId, DeadLetterEntry>>,
    completed: RwLock<u64>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl JobStore for InMemoryJobStore {
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        let mut jobs = self.jobs.write()?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.jobs.read()?.get(&job_id).cloned())
    }

    fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write()?;
        if !jobs.contains_key(&job.id) {
            return Err(JobStoreError::NotFound(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn claim_next(&self, lease: Duration) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = self.jobs.write()?;
        let now = Utc::now();

        // Oldest ready job first
        let next = jobs
            .values()
            .filter(|j| {
                matches!(j.status, JobStatus::Pending | JobStatus::Failed { .. })
                    && j.is_ready_at(now)
            })
            .min_by_key(|j| (j.created_at, j.id.0))
            .map(|j| j.id);

        Ok(next.and_then(|id| {
            jobs.get_mut(&id).map(|job| {
                job.mark_running(lease);
                job.clone()
            })
        }))
    }

    fn complete(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write()?;
        if jobs.remove(&job.id).is_none() {
            return Err(JobStoreError::NotFound(job.id));
        }
        *self.completed.write()? += 1;
        Ok(())
    }

    fn dead_letter(&self, mut job: Job, reason: String) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write()?;
        let mut dls = self.dead_letters.write()?;

        job.status = JobStatus::DeadLettered {
            error: reason.clone(),
            attempts: job.attempt,
        };
        job.updated_at = Utc::now();
        job.lease_expires_at = None;

        jobs.remove(&job.id);
        dls.insert(job.id, DeadLetterEntry::new(job, reason));

        Ok(())
    }

    fn reap_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Job>, JobStoreError> {
        let mut jobs = self.jobs.write()?;
        let mut dls = self.dead_letters.write()?;

        let expired: Vec<JobId> = jobs
            .values()
            .filter(|j| j.lease_expired(now))
            .map(|j| j.id)
            .collect();

        let error = lease_expired_error();
        let mut abandoned = Vec::new();
        for id in expired {
            let Some(mut job) = jobs.remove(&id) else {
                continue;
            };
            let started = job.updated_at;
            job.mark_failed(&error, started);
            if matches!(job.status, JobStatus::DeadLettered { .. }) {
                dls.insert(job.id, DeadLetterEntry::new(job.clone(), error.message.clone()));
                abandoned.push(job);
            } else {
                jobs.insert(job.id, job);
            }
        }

        Ok(abandoned)
    }

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, JobStoreError> {
        let dls = self.dead_letters.read()?;
        let mut result: Vec<_> = dls.values().cloned().collect();

        result.sort_by_key(|e| e.dead_lettered_at);
        result.truncate(limit);
        Ok(result)
    }

    fn retry_dead_letter(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        let mut jobs = self.jobs.write()?;
        let mut dls = self.dead_letters.write()?;

        let entry = dls.remove(&job_id).ok_or(JobStoreError::NotFound(job_id))?;

        let mut job = entry.job;
        job.status = JobStatus::Pending;
        job.attempt = 0;
        job.scheduled_at = None;
        job.lease_expires_at = None;
        job.updated_at = Utc::now();
        job.history.clear();

        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.jobs.read()?;
        let dls = self.dead_letters.read()?;

        let mut stats = JobStats {
            completed: *self.completed.read()?,
            dead_lettered: dls.len(),
            ..JobStats::default()
        };

        for job in jobs.values() {
            match &job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Failed { .. } => stats.failed += 1,
                JobStatus::Completed | JobStatus::DeadLettered { .. } => {}
            }
        }

        Ok(stats)
    }
}

impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        (**self).enqueue(job)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        (**self).get(job_id)
    }

    fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        (**self).update(job)
    }

    fn claim_next(&self, lease: Duration) -> Result<Option<Job>, JobStoreError> {
        (**self).claim_next(lease)
    }

    fn complete(&self, job: &Job) -> Result<(), JobStoreError> {
        (**self).complete(job)
    }

    fn dead_letter(&self, job: Job, reason: String) -> Result<(), JobStoreError> {
        (**self).dead_letter(job, reason)
    }

    fn reap_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Job>, JobStoreError> {
        (**self).reap_expired_leases(now)
    }

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, JobStoreError> {
        (**self).list_dead_letters(limit)
    }

    fn retry_dead_letter(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        (**self).retry_dead_letter(job_id)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        (**self).stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::{JobKind, RetryPolicy};

    const LEASE: Duration = Duration::from_secs(60);

    fn job() -> Job {
        Job::new(JobKind::custom("test"), serde_json::json!({}))
    }

    #[test]
    fn enqueue_and_claim() {
        let store = InMemoryJobStore::new();

        let job_id = store.enqueue(job()).unwrap();

        let claimed = store.claim_next(LEASE).unwrap().unwrap();
        assert_eq!(claimed.id, job_id);
        assert!(matches!(claimed.status, JobStatus::Running));
        assert_eq!(claimed.attempt, 1);

        // A running job is not handed out twice
        assert!(store.claim_next(LEASE).unwrap().is_none());
    }

    #[test]
    fn duplicate_enqueue_is_rejected() {
        let store = InMemoryJobStore::new();
        let j = job();
        store.enqueue(j.clone()).unwrap();
        assert!(matches!(
            store.enqueue(j),
            Err(JobStoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn delayed_job_is_not_claimable_early() {
        let store = InMemoryJobStore::new();
        store.enqueue(job().delayed(Duration::from_secs(3600))).unwrap();

        assert!(store.claim_next(LEASE).unwrap().is_none());
        assert_eq!(store.stats().unwrap().pending, 1);
    }

    #[test]
    fn claims_oldest_first() {
        let store = InMemoryJobStore::new();
        let first = job();
        let mut second = job();
        second.created_at = first.created_at + chrono::Duration::milliseconds(5);
        store.enqueue(second.clone()).unwrap();
        store.enqueue(first.clone()).unwrap();

        assert_eq!(store.claim_next(LEASE).unwrap().unwrap().id, first.id);
        assert_eq!(store.claim_next(LEASE).unwrap().unwrap().id, second.id);
    }

    #[test]
    fn complete_removes_job_and_counts_it() {
        let store = InMemoryJobStore::new();
        let job_id = store.enqueue(job()).unwrap();

        let mut claimed = store.claim_next(LEASE).unwrap().unwrap();
        claimed.mark_completed(Utc::now());
        store.complete(&claimed).unwrap();

        assert!(store.get(job_id).unwrap().is_none());
        let stats = store.stats().unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending + stats.running, 0);
    }

    #[test]
    fn dead_letter_flow() {
        let store = InMemoryJobStore::new();

        let j = job();
        let job_id = j.id;
        store.enqueue(j).unwrap();

        let mut claimed = store.claim_next(LEASE).unwrap().unwrap();
        claimed.mark_failed(&JobError::terminal("test error"), Utc::now());

        store
            .dead_letter(claimed, "test error".to_string())
            .unwrap();

        // Job is no longer in main queue
        assert!(store.get(job_id).unwrap().is_none());

        // Job is in DLQ
        let dls = store.list_dead_letters(10).unwrap();
        assert_eq!(dls.len(), 1);
        assert_eq!(dls[0].job.id, job_id);
        assert_eq!(dls[0].reason, "test error");

        // Retry the job
        let retried = store.retry_dead_letter(job_id).unwrap();
        assert!(matches!(retried.status, JobStatus::Pending));
        assert_eq!(retried.attempt, 0);

        // DLQ is now empty and the job is claimable again
        assert!(store.list_dead_letters(10).unwrap().is_empty());
        assert_eq!(store.claim_next(LEASE).unwrap().unwrap().id, job_id);
    }

    #[test]
    fn retry_unknown_dead_letter_is_not_found() {
        let store = InMemoryJobStore::new();
        let id = JobId::new();
        assert!(matches!(
            store.retry_dead_letter(id),
            Err(JobStoreError::NotFound(found)) if found == id
        ));
    }

    #[test]
    fn expired_lease_is_requeued_while_attempts_remain() {
        let store = InMemoryJobStore::new();
        let job_id = store
            .enqueue(job().with_retry_policy(RetryPolicy::fixed(2, Duration::ZERO)))
            .unwrap();

        store.claim_next(Duration::ZERO).unwrap().unwrap();
        let later = Utc::now() + chrono::Duration::seconds(1);

        let abandoned = store.reap_expired_leases(later).unwrap();
        assert!(abandoned.is_empty());

        let requeued = store.get(job_id).unwrap().unwrap();
        assert!(matches!(requeued.status, JobStatus::Failed { attempt: 1, .. }));
        assert_eq!(requeued.history[0].error.as_deref(), Some("lease expired"));

        // Second lease also expires: attempts exhausted
        store.claim_next(Duration::ZERO).unwrap().unwrap();
        let later = Utc::now() + chrono::Duration::seconds(1);
        let abandoned = store.reap_expired_leases(later).unwrap();
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].id, job_id);
        assert!(store.get(job_id).unwrap().is_none());
        assert_eq!(store.stats().unwrap().dead_lettered, 1);
    }

    #[test]
    fn live_lease_is_not_reaped() {
        let store = InMemoryJobStore::new();
        store.enqueue(job()).unwrap();
        store.claim_next(LEASE).unwrap().unwrap();

        assert!(store.reap_expired_leases(Utc::now()).unwrap().is_empty());
        assert_eq!(store.stats().unwrap().running, 1);
    }

    #[test]
    fn stats_tracking() {
        let store = InMemoryJobStore::new();

        for i in 0..5 {
            let job = Job::new(JobKind::custom("test"), serde_json::json!({"i": i}));
            store.enqueue(job).unwrap();
        }

        let stats = store.stats().unwrap();
        assert_eq!(stats.pending, 5);

        store.claim_next(LEASE).unwrap();
        store.claim_next(LEASE).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.pending, 3);
        assert_eq!(stats.running, 2);
    }
}
