//! Job executor with retry and backoff logic.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobError, JobKind, JobResult, JobStatus};

/// Handles one kind of job.
///
/// `handle` may be invoked more than once for the same job (at-least-once
/// delivery), so implementations must tolerate duplicates.
pub trait JobHandler: Send + Sync {
    fn handle(&self, job: &Job) -> JobResult;

    /// Called once a job is given up on: terminal error, exhausted attempts
    /// or an expired final lease.
    fn on_abandoned(&self, _job: &Job, _reason: &str) {}
}

struct FnHandler<F>(F);

impl<F> JobHandler for FnHandler<F>
where
    F: Fn(&Job) -> JobResult + Send + Sync,
{
    fn handle(&self, job: &Job) -> JobResult {
        (self.0)(job)
    }
}

/// Job executor configuration.
#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// How often to poll for new jobs
    pub poll_interval: Duration,
    /// How long a claimed job may run before it counts as a failed attempt
    pub lease_timeout: Duration,
    /// Name for logging and the worker thread
    pub name: String,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            lease_timeout: Duration::from_secs(300),
            name: "job-executor".to_string(),
        }
    }
}

impl JobExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_lease_timeout(mut self, lease: Duration) -> Self {
        self.lease_timeout = lease;
        self
    }
}

/// Handle to control a running executor.
#[derive(Debug)]
pub struct JobExecutorHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<ExecutorStats>>,
}

impl JobExecutorHandle {
    /// Request graceful shutdown. Waits for the in-flight job to finish.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            if j.join().is_err() {
                error!("job executor thread panicked");
            }
        }
    }

    /// Get current executor statistics.
    pub fn stats(&self) -> ExecutorStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_dead_lettered: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

/// What happened to a job after one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Succeeded,
    RetryScheduled,
    Abandoned,
}

/// Background job executor.
///
/// Polls a job store for ready jobs, executes them with registered handlers,
/// and handles retries and dead-lettering. Jobs run one at a time.
pub struct JobExecutor<S: JobStore> {
    store: S,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    config: JobExecutorConfig,
    stats: Arc<Mutex<ExecutorStats>>,
}

impl<S: JobStore + 'static> JobExecutor<S> {
    /// Create a new executor with the given store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
            config: JobExecutorConfig::default(),
            stats: Arc::new(Mutex::new(ExecutorStats::default())),
        }
    }

    pub fn with_config(mut self, config: JobExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a handler for a job kind.
    ///
    /// The pattern is an exact kind name, a category such as `"offers.*"`,
    /// or `"*"` for everything else.
    pub fn register(&mut self, kind_pattern: impl Into<String>, handler: impl JobHandler + 'static) {
        self.handlers.insert(kind_pattern.into(), Arc::new(handler));
    }

    /// Register a closure as the handler for a job kind.
    pub fn register_handler<F>(&mut self, kind_pattern: impl Into<String>, handler: F)
    where
        F: Fn(&Job) -> JobResult + Send + Sync + 'static,
    {
        self.register(kind_pattern, FnHandler(handler));
    }

    /// Get the handler for a job kind.
    fn get_handler(&self, kind: &JobKind) -> Option<Arc<dyn JobHandler>> {
        let type_name = kind.type_name();
        if let Some(h) = self.handlers.get(type_name) {
            return Some(h.clone());
        }

        // Category match (e.g. "offers.*" matches "offers.generate")
        for (pattern, handler) in &self.handlers {
            if let Some(prefix) = pattern.strip_suffix(".*") {
                if type_name.starts_with(prefix) {
                    return Some(handler.clone());
                }
            }
        }

        self.handlers.get("*").cloned()
    }

    pub fn stats(&self) -> ExecutorStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Spawn the executor on a dedicated thread.
    pub fn spawn(self) -> std::io::Result<JobExecutorHandle>
    where
        S: Send,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = self.stats.clone();

        let join = thread::Builder::new()
            .name(self.config.name.clone())
            .spawn(move || executor_loop(self, shutdown_rx))?;

        Ok(JobExecutorHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }

    /// Run every job that is ready now, including retries that become ready
    /// immediately. Returns the number of attempts made.
    pub fn run_pending(&self) -> Result<usize, JobStoreError> {
        let mut attempts = 0;
        loop {
            self.reap_expired()?;
            match self.store.claim_next(self.config.lease_timeout)? {
                Some(mut job) => {
                    self.execute_one(&mut job)?;
                    attempts += 1;
                }
                None => return Ok(attempts),
            }
        }
    }

    /// Execute one claimed job and record the outcome in the store.
    pub fn execute_one(&self, job: &mut Job) -> Result<ExecutionOutcome, JobStoreError> {
        let started = Utc::now();
        self.update_stats(|s| s.current_running += 1);

        let handler = self.get_handler(&job.kind);
        let result = match &handler {
            Some(handler) => run_guarded(&**handler, job),
            None => {
                warn!(job_id = %job.id, kind = job.kind.type_name(), "no handler for job");
                JobResult::Failure(JobError::terminal(format!(
                    "no handler for job kind: {}",
                    job.kind.type_name()
                )))
            }
        };

        let outcome = match result {
            JobResult::Success => {
                job.mark_completed(started);
                self.store.complete(job)?;
                debug!(job_id = %job.id, attempt = job.attempt, "job completed successfully");
                ExecutionOutcome::Succeeded
            }
            JobResult::Failure(error) => {
                job.mark_failed(&error, started);
                if matches!(job.status, JobStatus::DeadLettered { .. }) {
                    self.store.dead_letter(job.clone(), error.message.clone())?;
                    warn!(
                        job_id = %job.id,
                        attempts = job.attempt,
                        error = %error,
                        "job dead-lettered"
                    );
                    if let Some(handler) = &handler {
                        handler.on_abandoned(job, &error.message);
                    }
                    ExecutionOutcome::Abandoned
                } else {
                    self.store.update(job)?;
                    debug!(
                        job_id = %job.id,
                        attempt = job.attempt,
                        error = %error,
                        retry_at = ?job.scheduled_at,
                        "job failed, retry scheduled"
                    );
                    ExecutionOutcome::RetryScheduled
                }
            }
        };

        self.update_stats(|s| {
            s.current_running = s.current_running.saturating_sub(1);
            s.jobs_processed += 1;
            match outcome {
                ExecutionOutcome::Succeeded => s.jobs_succeeded += 1,
                ExecutionOutcome::RetryScheduled => s.jobs_failed += 1,
                ExecutionOutcome::Abandoned => {
                    s.jobs_failed += 1;
                    s.jobs_dead_lettered += 1;
                }
            }
        });

        Ok(outcome)
    }

    /// Fail jobs whose lease ran out and notify handlers of the ones given up on.
    fn reap_expired(&self) -> Result<(), JobStoreError> {
        for job in self.store.reap_expired_leases(Utc::now())? {
            let reason = match &job.status {
                JobStatus::DeadLettered { error, .. } => error.clone(),
                _ => "lease expired".to_string(),
            };
            warn!(job_id = %job.id, attempts = job.attempt, "job lease expired, dead-lettered");
            self.update_stats(|s| s.jobs_dead_lettered += 1);
            if let Some(handler) = self.get_handler(&job.kind) {
                handler.on_abandoned(&job, &reason);
            }
        }
        Ok(())
    }

    fn update_stats(&self, f: impl FnOnce(&mut ExecutorStats)) {
        f(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

/// Run a handler, turning a panic into a retryable failure.
fn run_guarded(handler: &dyn JobHandler, job: &Job) -> JobResult {
    match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(job))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(job_id = %job.id, panic = %message, "job handler panicked");
            JobResult::Failure(JobError::retryable(format!("handler panicked: {message}")))
        }
    }
}

fn executor_loop<S: JobStore + 'static>(executor: JobExecutor<S>, shutdown_rx: mpsc::Receiver<()>) {
    let name = executor.config.name.clone();
    let poll_interval = executor.config.poll_interval;
    info!(executor = %name, "job executor started");
    let start_time = Instant::now();

    loop {
        executor.update_stats(|s| s.uptime_secs = start_time.elapsed().as_secs());

        if let Err(e) = executor.reap_expired() {
            error!(executor = %name, error = %e, "failed to reap expired leases");
        }

        let idle = match executor.store.claim_next(executor.config.lease_timeout) {
            Ok(Some(mut job)) => {
                debug!(
                    executor = %name,
                    job_id = %job.id,
                    kind = job.kind.type_name(),
                    attempt = job.attempt,
                    "claimed job"
                );
                if let Err(e) = executor.execute_one(&mut job) {
                    // The lease is still held; the job comes back once it expires.
                    error!(executor = %name, job_id = %job.id, error = %e, "failed to record job outcome");
                }
                false
            }
            Ok(None) => true,
            Err(e) => {
                error!(executor = %name, error = %e, "failed to claim job");
                true
            }
        };

        let stop = if idle {
            !matches!(
                shutdown_rx.recv_timeout(poll_interval),
                Err(mpsc::RecvTimeoutError::Timeout)
            )
        } else {
            !matches!(shutdown_rx.try_recv(), Err(mpsc::TryRecvError::Empty))
        };
        if stop {
            break;
        }
    }

    info!(executor = %name, "job executor stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::RetryPolicy;

    fn fast_job(kind: &str, max_attempts: u32) -> Job {
        Job::new(JobKind::custom(kind), serde_json::json!({}))
            .with_retry_policy(RetryPolicy::fixed(max_attempts, Duration::ZERO))
    }

    #[test]
    fn execute_successful_job() {
        let store = Arc::new(InMemoryJobStore::new());
        let mut executor = JobExecutor::new(store.clone());

        executor.register_handler("test", |_job: &Job| JobResult::Success);

        store.enqueue(fast_job("test", 1)).unwrap();

        let mut claimed = store.claim_next(Duration::from_secs(60)).unwrap().unwrap();
        let outcome = executor.execute_one(&mut claimed).unwrap();

        assert_eq!(outcome, ExecutionOutcome::Succeeded);
        assert!(matches!(claimed.status, JobStatus::Completed));
        assert_eq!(store.stats().unwrap().completed, 1);
    }

    #[test]
    fn always_failing_job_is_attempted_exactly_max_attempts() {
        let store = Arc::new(InMemoryJobStore::new());
        let mut executor = JobExecutor::new(store.clone());
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        executor.register_handler("test", move |_job: &Job| {
            counter.fetch_add(1, Ordering::SeqCst);
            JobResult::Failure(JobError::retryable("disk full"))
        });

        let job_id = store.enqueue(fast_job("test", 3)).unwrap();

        assert_eq!(executor.run_pending().unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let dls = store.list_dead_letters(10).unwrap();
        assert_eq!(dls.len(), 1);
        assert_eq!(dls[0].job.id, job_id);
        assert_eq!(dls[0].job.attempt, 3);
        assert_eq!(dls[0].job.history.len(), 3);

        let stats = executor.stats();
        assert_eq!(stats.jobs_processed, 3);
        assert_eq!(stats.jobs_dead_lettered, 1);
    }

    #[test]
    fn terminal_failure_is_not_retried() {
        let store = Arc::new(InMemoryJobStore::new());
        let mut executor = JobExecutor::new(store.clone());
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        executor.register_handler("test", move |_job: &Job| {
            counter.fetch_add(1, Ordering::SeqCst);
            JobResult::Failure(JobError::terminal("project not found"))
        });

        store.enqueue(fast_job("test", 3)).unwrap();

        assert_eq!(executor.run_pending().unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.list_dead_letters(10).unwrap()[0].job.attempt, 1);
    }

    #[test]
    fn retry_then_success() {
        let store = Arc::new(InMemoryJobStore::new());
        let mut executor = JobExecutor::new(store.clone());

        executor.register_handler("test", |job: &Job| {
            if job.attempt < 2 {
                JobResult::Failure(JobError::retryable("flaky"))
            } else {
                JobResult::Success
            }
        });

        store.enqueue(fast_job("test", 3)).unwrap();

        assert_eq!(executor.run_pending().unwrap(), 2);
        let stats = store.stats().unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.dead_lettered, 0);
    }

    #[test]
    fn panicking_handler_counts_as_retryable_failure() {
        let store = Arc::new(InMemoryJobStore::new());
        let mut executor = JobExecutor::new(store.clone());

        executor.register_handler("test", |_job: &Job| -> JobResult { panic!("boom") });

        store.enqueue(fast_job("test", 2)).unwrap();

        assert_eq!(executor.run_pending().unwrap(), 2);
        let dls = store.list_dead_letters(10).unwrap();
        assert_eq!(dls[0].reason, "handler panicked: boom");
    }

    #[test]
    fn on_abandoned_is_called_once_for_dead_lettered_jobs() {
        struct Recording(Arc<Mutex<Vec<String>>>);

        impl JobHandler for Recording {
            fn handle(&self, _job: &Job) -> JobResult {
                JobResult::Failure(JobError::retryable("nope"))
            }

            fn on_abandoned(&self, _job: &Job, reason: &str) {
                self.0.lock().unwrap().push(reason.to_string());
            }
        }

        let store = Arc::new(InMemoryJobStore::new());
        let mut executor = JobExecutor::new(store.clone());
        let reasons = Arc::new(Mutex::new(Vec::new()));
        executor.register("test", Recording(reasons.clone()));

        store.enqueue(fast_job("test", 2)).unwrap();
        executor.run_pending().unwrap();

        assert_eq!(*reasons.lock().unwrap(), vec!["nope".to_string()]);
    }

    #[test]
    fn missing_handler_dead_letters_immediately() {
        let store = Arc::new(InMemoryJobStore::new());
        let executor = JobExecutor::new(store.clone());

        store.enqueue(fast_job("unknown", 3)).unwrap();

        assert_eq!(executor.run_pending().unwrap(), 1);
        assert!(
            store.list_dead_letters(10).unwrap()[0]
                .reason
                .contains("no handler")
        );
    }

    #[test]
    fn wildcard_handler() {
        let store = Arc::new(InMemoryJobStore::new());
        let mut executor = JobExecutor::new(store.clone());

        executor.register_handler("*", |_job: &Job| JobResult::Success);

        store.enqueue(fast_job("anything", 1)).unwrap();

        assert_eq!(executor.run_pending().unwrap(), 1);
        assert_eq!(store.stats().unwrap().completed, 1);
    }

    #[test]
    fn category_handler() {
        let store = Arc::new(InMemoryJobStore::new());
        let mut executor = JobExecutor::new(store.clone());

        executor.register_handler("offers.*", |_job: &Job| JobResult::Success);

        store
            .enqueue(Job::new(JobKind::GenerateOffer, serde_json::json!({})))
            .unwrap();

        assert_eq!(executor.run_pending().unwrap(), 1);
        assert_eq!(store.stats().unwrap().completed, 1);
    }

    #[test]
    fn spawned_executor_processes_jobs_and_shuts_down() {
        let store = Arc::new(InMemoryJobStore::new());
        let mut executor = JobExecutor::new(store.clone()).with_config(
            JobExecutorConfig::default()
                .with_name("test-executor")
                .with_poll_interval(Duration::from_millis(5)),
        );
        executor.register_handler("test", |_job: &Job| JobResult::Success);

        store.enqueue(fast_job("test", 1)).unwrap();
        let handle = executor.spawn().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.stats().jobs_succeeded == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(handle.stats().jobs_succeeded, 1);
        assert_eq!(store.stats().unwrap().completed, 1);
        handle.shutdown();
    }
}
