//! Core job types and policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job kind/type for routing to appropriate handlers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Render an offer document and attach it to its offer record
    GenerateOffer,
    /// Generic/custom job
    Custom { kind: String },
}

impl JobKind {
    pub const GENERATE_OFFER: &'static str = "offers.generate";

    pub fn custom(kind: impl Into<String>) -> Self {
        Self::Custom { kind: kind.into() }
    }

    pub fn type_name(&self) -> &str {
        match self {
            JobKind::GenerateOffer => Self::GENERATE_OFFER,
            JobKind::Custom { kind } => kind,
        }
    }
}

/// Job execution status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, waiting to be picked up
    Pending,
    /// Currently being executed (holds a lease)
    Running,
    /// Completed successfully
    Completed,
    /// Failed, will be retried
    Failed { error: String, attempt: u32 },
    /// Exhausted retries or hit a terminal error, moved to DLQ
    DeadLettered { error: String, attempts: u32 },
}

impl JobStatus {
    pub fn label(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed { .. } => "failed",
            JobStatus::DeadLettered { .. } => "dead_lettered",
        }
    }
}

/// Whether another attempt could change the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    /// Transient: consumes one attempt and is retried with backoff.
    Retryable,
    /// Permanent: the job is abandoned immediately.
    Terminal,
}

/// Error returned by a job handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
}

impl JobError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: JobErrorKind::Retryable,
            message: message.into(),
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            kind: JobErrorKind::Terminal,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == JobErrorKind::Retryable
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^attempt
    #[default]
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one (at least 1)
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0) to add randomness
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Create a policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Create a policy with fixed delays.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi((attempt - 1).min(30) as i32);
                (base_ms * exp).min(max_ms)
            }
            BackoffStrategy::Linear => (base_ms * attempt as f64).min(max_ms),
        };

        // Deterministic "jitter" based on attempt
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }

    /// Check if another attempt is allowed after `attempt` attempts have run.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Longest delay, lease or backoff a job timestamp may be pushed by.
pub const MAX_SCHEDULE_OFFSET: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Per-job enqueue options. Only constructible through [`EnqueueOptions::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueOptions {
    delay: Duration,
    max_attempts: u32,
}

/// Rejected enqueue options.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidEnqueueOptions {
    #[error("max_attempts must be at least 1")]
    NoAttempts,
    #[error("delay of {0:?} exceeds the maximum of {MAX_SCHEDULE_OFFSET:?}")]
    DelayTooLong(Duration),
}

impl EnqueueOptions {
    pub const fn new(delay: Duration, max_attempts: u32) -> Result<Self, InvalidEnqueueOptions> {
        if max_attempts == 0 {
            return Err(InvalidEnqueueOptions::NoAttempts);
        }
        if delay.as_nanos() > MAX_SCHEDULE_OFFSET.as_nanos() {
            return Err(InvalidEnqueueOptions::DelayTooLong(delay));
        }
        Ok(Self { delay, max_attempts })
    }

    /// The job is not eligible before `enqueue time + delay`.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// `at + offset`, clamped to the latest representable instant.
///
/// Clamping keeps "not before `at + offset`" true for offsets chrono cannot represent.
fn offset_from(at: DateTime<Utc>, offset: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(offset)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// A background job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,
    /// Job kind for routing
    pub kind: JobKind,
    /// JSON payload
    pub payload: serde_json::Value,
    /// Current status
    pub status: JobStatus,
    /// Retry policy
    pub retry_policy: RetryPolicy,
    /// Current attempt number (starts at 0)
    pub attempt: u32,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// When the job was last updated
    pub updated_at: DateTime<Utc>,
    /// When the job should next be executed (for scheduled/delayed jobs)
    pub scheduled_at: Option<DateTime<Utc>>,
    /// While running: when the current attempt is considered lost
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Execution history (errors from previous attempts)
    pub history: Vec<JobAttemptRecord>,
}

/// Record of a job execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl Job {
    /// Create a new job.
    pub fn new(kind: JobKind, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            kind,
            payload,
            status: JobStatus::Pending,
            retry_policy: RetryPolicy::default(),
            attempt: 0,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            lease_expires_at: None,
            history: Vec::new(),
        }
    }

    /// Set a custom retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Apply enqueue options (delay + attempt bound) on top of the current policy.
    pub fn with_options(mut self, options: EnqueueOptions) -> Self {
        self.retry_policy.max_attempts = options.max_attempts();
        if !options.delay().is_zero() {
            self = self.delayed(options.delay());
        }
        self
    }

    /// Schedule the job with a delay from its creation time.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.scheduled_at = Some(offset_from(self.created_at, delay));
        self
    }

    /// Check if the job is ready to execute.
    pub fn is_ready(&self) -> bool {
        self.is_ready_at(Utc::now())
    }

    pub fn is_ready_at(&self, now: DateTime<Utc>) -> bool {
        match self.scheduled_at {
            Some(at) => now >= at,
            None => true,
        }
    }

    /// True when the job is running and its lease ran out.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, JobStatus::Running)
            && self.lease_expires_at.is_some_and(|at| now >= at)
    }

    /// Mark job as running for a new attempt, holding a lease for `lease`.
    pub fn mark_running(&mut self, lease: Duration) {
        let now = Utc::now();
        self.status = JobStatus::Running;
        self.attempt += 1;
        self.updated_at = now;
        self.lease_expires_at = Some(offset_from(now, lease));
    }

    /// Mark job as completed.
    pub fn mark_completed(&mut self, started_at: DateTime<Utc>) {
        let now = Utc::now();
        self.status = JobStatus::Completed;
        self.updated_at = now;
        self.lease_expires_at = None;
        self.history.push(JobAttemptRecord {
            attempt: self.attempt,
            started_at,
            finished_at: now,
            success: true,
            error: None,
            duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
        });
    }

    /// Mark job as failed; retries only for retryable errors with attempts left.
    pub fn mark_failed(&mut self, error: &JobError, started_at: DateTime<Utc>) {
        let now = Utc::now();
        self.updated_at = now;
        self.lease_expires_at = None;
        self.history.push(JobAttemptRecord {
            attempt: self.attempt,
            started_at,
            finished_at: now,
            success: false,
            error: Some(error.message.clone()),
            duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
        });

        if error.is_retryable() && self.retry_policy.should_retry(self.attempt) {
            let delay = self.retry_policy.delay_for_attempt(self.attempt);
            self.scheduled_at = Some(offset_from(now, delay));
            self.status = JobStatus::Failed {
                error: error.message.clone(),
                attempt: self.attempt,
            };
        } else {
            self.status = JobStatus::DeadLettered {
                error: error.message.clone(),
                attempts: self.attempt,
            };
        }
    }
}

/// Result of job execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    /// Job completed successfully
    Success,
    /// Job failed; the error kind decides between retry and abandonment
    Failure(JobError),
}

impl From<Result<(), JobError>> for JobResult {
    fn from(value: Result<(), JobError>) -> Self {
        match value {
            Ok(()) => JobResult::Success,
            Err(e) => JobResult::Failure(e),
        }
    }
}

/// Entry in the dead-letter queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub job: Job,
    pub dead_lettered_at: DateTime<Utc>,
    pub reason: String,
}

impl DeadLetterEntry {
    pub fn new(job: Job, reason: String) -> Self {
        Self {
            job,
            dead_lettered_at: Utc::now(),
            reason,
        }
    }
}
