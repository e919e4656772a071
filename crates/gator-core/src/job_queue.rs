use std::future::Future;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::error::AppError;
use crate::job::{Job, JobStatus, NewJob};

/// Durable job queue.
///
/// Implementations must support atomic claiming via `SELECT FOR UPDATE SKIP LOCKED`
/// or equivalent so no two workers ever hold the same job concurrently.
pub trait JobQueue: Send + Sync + Clone {
    /// Apply defaults and persist a new job.
    fn enqueue(&self, job: NewJob) -> impl Future<Output = Result<Job, AppError>> + Send;

    /// Atomically claim the next eligible job, transitioning it to `Running`.
    ///
    /// Returns `None` if no jobs are available.
    fn claim_next(&self) -> impl Future<Output = Result<Option<Job>, AppError>> + Send;

    /// Full-state overwrite keyed by job ID.
    fn update_job(&self, job: &Job) -> impl Future<Output = Result<(), AppError>> + Send;

    fn get_job(&self, id: &str) -> impl Future<Output = Result<Option<Job>, AppError>> + Send;

    fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Job>, AppError>> + Send;

    fn delete_job(&self, id: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Cancel a pending job. Running and terminal jobs are rejected.
    fn cancel_job(&self, id: &str) -> impl Future<Output = Result<Job, AppError>> + Send;

    fn count_by_status(
        &self,
        status: JobStatus,
    ) -> impl Future<Output = Result<i64, AppError>> + Send;

    /// Delete terminal jobs last updated before `before`. Returns the number removed.
    fn purge_terminal(
        &self,
        before: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Return `Running` jobs started before `started_before` to `Pending`, or to
    /// `Failed` when their attempts are exhausted. Returns the number touched.
    fn recover_stale(
        &self,
        started_before: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;
}

/// Enqueue-only view of a queue that can be stored as `Arc<dyn JobSink>`.
pub trait JobSink: Send + Sync {
    fn submit(&self, job: NewJob) -> BoxFuture<'_, Result<Job, AppError>>;
}

impl<Q: JobQueue + 'static> JobSink for Q {
    fn submit(&self, job: NewJob) -> BoxFuture<'_, Result<Job, AppError>> {
        Box::pin(self.enqueue(job))
    }
}
