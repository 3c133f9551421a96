//! Background job system with retry, backoff, leases and dead-letter handling.
//!
//! ## Design
//!
//! - Jobs are typed by [`JobKind`] and carry a JSON payload
//! - Handlers return [`JobResult`]; the retry decision depends only on the
//!   error kind and the attempt count
//! - Claimed jobs hold a lease; an expired lease counts as a failed attempt
//! - Jobs that are given up on move to a dead-letter queue for inspection/replay
//!
//! ## Components
//!
//! - `Job`: Core job abstraction with payload and metadata
//! - `JobStore`: Persistence for jobs (in-memory or Postgres)
//! - `JobExecutor`: Runs jobs on a dedicated thread

pub mod executor;
pub mod postgres;
pub mod store;
pub mod types;

pub use executor::{ExecutionOutcome, ExecutorStats, JobExecutor, JobExecutorConfig, JobExecutorHandle, JobHandler};
pub use postgres::PostgresJobStore;
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{
    BackoffStrategy, DeadLetterEntry, EnqueueOptions, InvalidEnqueueOptions, Job, JobAttemptRecord, JobError,
    JobErrorKind, JobId, JobKind, JobResult, JobStatus, RetryPolicy, MAX_SCHEDULE_OFFSET,
};
