use futures::future::BoxFuture;

use crate::context::ExecContext;
use crate::error::AppError;
use crate::job::{Job, JobType};

/// Executor bound to exactly one [`JobType`].
///
/// Handlers are shared across workers and may run distinct jobs of the same type
/// in parallel, so they must not keep per-call mutable state. `handle` may write
/// `job.result`; the scheduler persists it after the call returns.
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> JobType;

    fn handle<'a>(
        &'a self,
        ctx: &'a ExecContext,
        job: &'a mut Job,
    ) -> BoxFuture<'a, Result<(), AppError>>;
}
