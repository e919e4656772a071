use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::context::ExecContext;
use crate::error::AppError;
use crate::handler::JobHandler;
use crate::job::{Job, JobStatus, JobType, NewJob, SchedulerConfig};
use crate::job_queue::JobQueue;

/// Events emitted by the scheduler for monitoring/logging.
#[derive(Debug, Clone)]
pub enum SchedulerEvent<'a> {
    Started {
        workers: usize,
        recovered: u64,
    },
    WorkerStarted {
        worker_id: usize,
    },
    JobClaimed {
        worker_id: usize,
        job: &'a Job,
    },
    JobCompleted {
        job_id: &'a str,
        attempts: u32,
        elapsed: Duration,
    },
    JobFailed {
        job_id: &'a str,
        error: &'a str,
        attempts: u32,
        validation: bool,
        retry_at: Option<DateTime<Utc>>,
    },
    ClaimFailed {
        worker_id: usize,
        error: &'a str,
    },
    Maintenance {
        purged: u64,
        recovered: u64,
    },
    MaintenanceFailed {
        error: &'a str,
    },
    WorkerStopped {
        worker_id: usize,
    },
    Stopped,
}

/// Trait for receiving scheduler events (decoupled logging).
pub trait SchedulerReporter: Send + Sync {
    fn report(&self, event: SchedulerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSchedulerReporter;

impl SchedulerReporter for TracingSchedulerReporter {
    fn report(&self, event: SchedulerEvent<'_>) {
        match event {
            SchedulerEvent::Started { workers, recovered } => {
                tracing::info!(%workers, %recovered, "Scheduler started");
            }
            SchedulerEvent::WorkerStarted { worker_id } => {
                tracing::debug!(%worker_id, "Worker started");
            }
            SchedulerEvent::JobClaimed { worker_id, job } => {
                tracing::info!(
                    %worker_id,
                    job_id = %job.id,
                    job_type = %job.job_type,
                    attempt = job.attempts,
                    "Job claimed"
                );
            }
            SchedulerEvent::JobCompleted {
                job_id,
                attempts,
                elapsed,
            } => {
                tracing::info!(%job_id, %attempts, elapsed_ms = elapsed.as_millis() as u64, "Job completed");
            }
            SchedulerEvent::JobFailed {
                job_id,
                error,
                attempts,
                validation,
                retry_at,
            } => match retry_at {
                Some(at) => {
                    tracing::warn!(%job_id, %error, %attempts, %validation, retry_at = %at, "Job failed, rescheduled");
                }
                None => {
                    tracing::error!(%job_id, %error, %attempts, %validation, "Job failed permanently");
                }
            },
            SchedulerEvent::ClaimFailed { worker_id, error } => {
                tracing::error!(%worker_id, %error, "Failed to claim job");
            }
            SchedulerEvent::Maintenance { purged, recovered } => {
                tracing::info!(%purged, %recovered, "Queue maintenance finished");
            }
            SchedulerEvent::MaintenanceFailed { error } => {
                tracing::warn!(%error, "Queue maintenance failed");
            }
            SchedulerEvent::WorkerStopped { worker_id } => {
                tracing::debug!(%worker_id, "Worker stopped");
            }
            SchedulerEvent::Stopped => {
                tracing::info!("Scheduler stopped");
            }
        }
    }
}

/// Counts from one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub purged: u64,
    pub recovered: u64,
}

struct Inner<Q> {
    queue: Q,
    config: SchedulerConfig,
    handlers: RwLock<HashMap<JobType, Arc<dyn JobHandler>>>,
    reporter: Arc<dyn SchedulerReporter>,
    /// Handler executions, tracked apart from the workers so `stop` does not wait on them.
    in_flight: TaskTracker,
}

struct RunScope {
    cancel: CancellationToken,
    workers: TaskTracker,
}

/// Worker pool that polls a [`JobQueue`] and dispatches claimed jobs to handlers.
///
/// Holds no job state of its own: everything needed to resume after a restart
/// lives in the queue.
pub struct Scheduler<Q: JobQueue + 'static> {
    inner: Arc<Inner<Q>>,
    run: Mutex<Option<RunScope>>,
}

impl<Q: JobQueue + 'static> Scheduler<Q> {
    pub fn new(queue: Q, config: SchedulerConfig) -> Self {
        Self::with_reporter(queue, config, Arc::new(TracingSchedulerReporter))
    }

    pub fn with_reporter(
        queue: Q,
        config: SchedulerConfig,
        reporter: Arc<dyn SchedulerReporter>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue,
                config,
                handlers: RwLock::new(HashMap::new()),
                reporter,
                in_flight: TaskTracker::new(),
            }),
            run: Mutex::new(None),
        }
    }

    pub fn queue(&self) -> &Q {
        &self.inner.queue
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    fn run_scope(&self) -> MutexGuard<'_, Option<RunScope>> {
        self.run.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned scheduler mutex");
            poisoned.into_inner()
        })
    }

    pub fn is_running(&self) -> bool {
        self.run_scope().is_some()
    }

    /// Register the handler for its job type, replacing any previous one.
    pub fn register_handler(&self, handler: Arc<dyn JobHandler>) {
        let job_type = handler.job_type();
        let mut handlers = self.inner.handlers.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned handler map lock");
            poisoned.into_inner()
        });
        if handlers.insert(job_type, handler).is_some() {
            tracing::warn!(%job_type, "Replaced existing job handler");
        }
    }

    pub async fn add_job(&self, job: NewJob) -> Result<Job, AppError> {
        let job = self.inner.queue.enqueue(job).await?;
        tracing::debug!(job_id = %job.id, job_type = %job.job_type, "Job enqueued");
        Ok(job)
    }

    /// Delete a job. A running job cannot be removed out from under its worker.
    pub async fn remove_job(&self, id: &str) -> Result<(), AppError> {
        let job = self
            .inner
            .queue
            .get_job(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {id}")))?;
        if job.status == JobStatus::Running {
            return Err(AppError::InvalidState(format!(
                "cannot remove running job {id}"
            )));
        }
        self.inner.queue.delete_job(id).await
    }

    pub async fn cancel_job(&self, id: &str) -> Result<Job, AppError> {
        self.inner.queue.cancel_job(id).await
    }

    /// Enqueue a fresh copy of a failed job as `retry_<id>_<unix>`.
    pub async fn retry_job(&self, id: &str) -> Result<Job, AppError> {
        let original = self
            .inner
            .queue
            .get_job(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {id}")))?;
        if original.status != JobStatus::Failed {
            return Err(AppError::InvalidState(format!(
                "only failed jobs can be retried (job {id} is {})",
                original.status
            )));
        }

        let retry = NewJob::new(
            format!("retry_{}_{}", original.id, Utc::now().timestamp()),
            original.job_type,
            original.payload,
        )
        .with_priority(original.priority)
        .with_max_attempts(original.max_attempts);
        self.add_job(retry).await
    }

    /// Recover stale runs, then launch the worker pool and the maintenance task
    /// under a child of `parent`.
    pub async fn start(&self, parent: &CancellationToken) -> Result<(), AppError> {
        if self.is_running() {
            return Err(AppError::InvalidState("scheduler already running".into()));
        }

        let now = Utc::now();
        let recovered = self
            .inner
            .queue
            .recover_stale(self.inner.config.stale_cutoff(now))
            .await?;

        let cancel = parent.child_token();
        let workers = TaskTracker::new();
        for worker_id in 0..self.inner.config.workers.max(1) {
            workers.spawn(worker_loop(self.inner.clone(), worker_id, cancel.clone()));
        }
        workers.spawn(maintenance_loop(self.inner.clone(), cancel.clone()));
        workers.close();

        self.inner.reporter.report(SchedulerEvent::Started {
            workers: self.inner.config.workers.max(1),
            recovered,
        });

        let mut run = self.run_scope();
        if run.is_some() {
            cancel.cancel();
            return Err(AppError::InvalidState("scheduler already running".into()));
        }
        *run = Some(RunScope { cancel, workers });
        Ok(())
    }

    /// Cancel the poll loops and wait for every worker to exit.
    ///
    /// Handler executions already in progress keep running until they finish or
    /// hit the job timeout; use [`Scheduler::wait_in_flight`] to wait for them.
    pub async fn stop(&self) -> Result<(), AppError> {
        let scope = self.run_scope().take();
        let Some(scope) = scope else {
            return Ok(());
        };
        scope.cancel.cancel();
        scope.workers.wait().await;
        self.inner.reporter.report(SchedulerEvent::Stopped);
        Ok(())
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Wait up to `timeout` for detached handler executions. Returns whether they all finished.
    pub async fn wait_in_flight(&self, timeout: Duration) -> bool {
        let tracker = &self.inner.in_flight;
        tracker.close();
        let drained = tokio::time::timeout(timeout, tracker.wait()).await.is_ok();
        tracker.reopen();
        drained
    }

    /// Claim and execute one job inline. Returns `false` when nothing was claimable.
    pub async fn process_next(&self, worker_id: usize) -> Result<bool, AppError> {
        match self.inner.queue.claim_next().await? {
            Some(job) => {
                self.inner.reporter.report(SchedulerEvent::JobClaimed {
                    worker_id,
                    job: &job,
                });
                execute_job(self.inner.clone(), job).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Purge expired terminal jobs and recover stale runs.
    pub async fn run_maintenance(&self) -> Result<MaintenanceReport, AppError> {
        self.inner.maintain().await
    }
}

impl<Q: JobQueue> Inner<Q> {
    fn handler_for(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        let handlers = self.handlers.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned handler map lock");
            poisoned.into_inner()
        });
        handlers.get(&job_type).cloned()
    }

    async fn maintain(&self) -> Result<MaintenanceReport, AppError> {
        let now = Utc::now();
        let purged = self.queue.purge_terminal(self.config.purge_cutoff(now)).await?;
        let recovered = self
            .queue
            .recover_stale(self.config.stale_cutoff(now))
            .await?;
        Ok(MaintenanceReport { purged, recovered })
    }

    async fn finalize(&self, mut job: Job, outcome: Result<(), AppError>, elapsed: Duration) {
        let now = Utc::now();
        match outcome {
            Ok(()) => {
                job.mark_completed(now);
                self.reporter.report(SchedulerEvent::JobCompleted {
                    job_id: &job.id,
                    attempts: job.attempts,
                    elapsed,
                });
            }
            Err(e) => {
                let message = e.to_string();
                let retry_at = job
                    .mark_attempt_failed(&message, &self.config.retry_policy, now)
                    .map(|_| job.scheduled_at);
                self.reporter.report(SchedulerEvent::JobFailed {
                    job_id: &job.id,
                    error: &message,
                    attempts: job.attempts,
                    validation: e.is_validation(),
                    retry_at,
                });
            }
        }

        if let Err(e) = self.queue.update_job(&job).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to persist job outcome");
        }
    }
}

async fn execute_job<Q: JobQueue>(inner: Arc<Inner<Q>>, mut job: Job) {
    let started = tokio::time::Instant::now();
    let outcome = match inner.handler_for(job.job_type) {
        Some(handler) => {
            let ctx = ExecContext::background().with_timeout(inner.config.job_timeout);
            AssertUnwindSafe(ctx.run(handler.handle(&ctx, &mut job)))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(AppError::Generic("job handler panicked".into())))
        }
        None => Err(AppError::NoHandler(job.job_type.to_string())),
    };
    inner.finalize(job, outcome, started.elapsed()).await;
}

async fn worker_loop<Q: JobQueue + 'static>(
    inner: Arc<Inner<Q>>,
    worker_id: usize,
    cancel: CancellationToken,
) {
    inner
        .reporter
        .report(SchedulerEvent::WorkerStarted { worker_id });
    let poll_interval = inner.config.poll_interval;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match inner.queue.claim_next().await {
            Ok(Some(job)) => {
                inner.reporter.report(SchedulerEvent::JobClaimed {
                    worker_id,
                    job: &job,
                });
                let execution = inner.in_flight.spawn(execute_job(inner.clone(), job));
                tokio::select! {
                    joined = execution => {
                        if let Err(e) = joined {
                            tracing::error!(%worker_id, error = %e, "Job task aborted");
                        }
                    }
                    () = cancel.cancelled() => break,
                }
            }
            Ok(None) => {
                tokio::select! {
                    () = tokio::time::sleep(poll_interval) => {}
                    () = cancel.cancelled() => break,
                }
            }
            Err(e) => {
                let error = e.to_string();
                inner.reporter.report(SchedulerEvent::ClaimFailed {
                    worker_id,
                    error: &error,
                });
                tokio::select! {
                    () = tokio::time::sleep(poll_interval * 2) => {}
                    () = cancel.cancelled() => break,
                }
            }
        }
    }

    inner
        .reporter
        .report(SchedulerEvent::WorkerStopped { worker_id });
}

async fn maintenance_loop<Q: JobQueue + 'static>(inner: Arc<Inner<Q>>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            () = tokio::time::sleep(inner.config.maintenance_interval) => {}
            () = cancel.cancelled() => break,
        }
        match inner.maintain().await {
            Ok(report) => inner.reporter.report(SchedulerEvent::Maintenance {
                purged: report.purged,
                recovered: report.recovered,
            }),
            Err(e) => {
                let error = e.to_string();
                inner
                    .reporter
                    .report(SchedulerEvent::MaintenanceFailed { error: &error });
            }
        }
    }
}
