//! In-process [`JobQueue`] for tests and single-process deployments.
//!
//! All state sits behind one mutex, so every claim is serialized through a
//! single claimer. That gives the same at-most-one-in-flight guarantee the
//! PostgreSQL queue gets from `FOR UPDATE SKIP LOCKED`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::job::{Job, JobStatus, NewJob};
use crate::job_queue::JobQueue;

pub const STALE_RECOVERY_NOTE: &str = "recovered after worker lost its claim";

#[derive(Debug, Clone, Default)]
pub struct MemoryJobQueue {
    jobs: Arc<Mutex<HashMap<String, Job>>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Job>> {
        self.jobs.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned job queue mutex");
            poisoned.into_inner()
        })
    }

    /// Snapshot of every stored job, for assertions.
    pub fn snapshot(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.lock().values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        jobs
    }
}

/// Claim order: priority DESC, scheduled_at ASC, created_at ASC, id ASC.
fn claim_order(a: &Job, b: &Job) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.scheduled_at.cmp(&b.scheduled_at))
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: NewJob) -> Result<Job, AppError> {
        let job = job.into_job(Utc::now())?;
        let mut jobs = self.lock();
        if jobs.contains_key(&job.id) {
            return Err(AppError::InvalidState(format!(
                "job {} already exists",
                job.id
            )));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn claim_next(&self) -> Result<Option<Job>, AppError> {
        let now = Utc::now();
        let mut jobs = self.lock();
        let next = jobs
            .values()
            .filter(|j| j.is_claimable(now))
            .min_by(|a, b| claim_order(a, b))
            .map(|j| j.id.clone());

        Ok(next.and_then(|id| {
            jobs.get_mut(&id).map(|job| {
                job.mark_running(now);
                job.clone()
            })
        }))
    }

    async fn update_job(&self, job: &Job) -> Result<(), AppError> {
        let mut jobs = self.lock();
        match jobs.get_mut(&job.id) {
            Some(stored) => {
                *stored = job.clone();
                Ok(())
            }
            None => Err(AppError::NotFound(format!("job {}", job.id))),
        }
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>, AppError> {
        Ok(self.lock().get(id).cloned())
    }

    async fn list_jobs(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, AppError> {
        let mut jobs: Vec<Job> = self
            .lock()
            .values()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn delete_job(&self, id: &str) -> Result<(), AppError> {
        self.lock()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("job {id}")))
    }

    async fn cancel_job(&self, id: &str) -> Result<Job, AppError> {
        let mut jobs = self.lock();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("job {id}")))?;
        job.mark_cancelled(Utc::now())?;
        Ok(job.clone())
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<i64, AppError> {
        Ok(self.lock().values().filter(|j| j.status == status).count() as i64)
    }

    async fn purge_terminal(&self, before: DateTime<Utc>) -> Result<u64, AppError> {
        let mut jobs = self.lock();
        let initial = jobs.len();
        jobs.retain(|_, j| !(j.status.is_terminal() && j.updated_at < before));
        Ok((initial - jobs.len()) as u64)
    }

    async fn recover_stale(&self, started_before: DateTime<Utc>) -> Result<u64, AppError> {
        let now = Utc::now();
        let mut recovered = 0u64;
        for job in self.lock().values_mut() {
            let stale = job.status == JobStatus::Running
                && job.started_at.is_some_and(|s| s < started_before);
            if !stale {
                continue;
            }
            job.error = Some(STALE_RECOVERY_NOTE.to_string());
            job.started_at = None;
            job.updated_at = now;
            if job.can_retry() {
                job.status = JobStatus::Pending;
                job.scheduled_at = now;
            } else {
                job.status = JobStatus::Failed;
                job.completed_at = Some(now);
            }
            recovered += 1;
        }
        Ok(recovered)
    }
}
