use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Status of a job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Kind of work a job represents. Each type is executed by exactly one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Scrape one reseller source and persist its products.
    ScrapeProducts,
    /// Suggest tags for one stored product (handled outside this workspace).
    TagProduct,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::ScrapeProducts => "scrape_products",
            JobType::TagProduct => "tag_product",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scrape_products" => Ok(JobType::ScrapeProducts),
            "tag_product" => Ok(JobType::TagProduct),
            _ => Err(format!("Unknown job type: {}", s)),
        }
    }
}

/// Claim priority. Higher values are claimed first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    Urgent = 4,
}

impl Priority {
    pub fn as_i16(&self) -> i16 {
        *self as i16
    }

    /// Map a stored value back to a priority, clamping anything out of range.
    pub fn from_i16(value: i16) -> Self {
        match value {
            i16::MIN..=1 => Priority::Low,
            2 => Priority::Normal,
            3 => Priority::High,
            _ => Priority::Urgent,
        }
    }
}

/// Retry backoff: `attempts² × base_delay`, capped at `max_delay`.
///
/// With the defaults a job waits 1min, 4min, 9min, ... up to 60min.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: TimeDelta,
    pub max_delay: TimeDelta,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: TimeDelta::minutes(1),
            max_delay: TimeDelta::minutes(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before a job that has been attempted `attempts` times becomes eligible again.
    pub fn backoff(&self, attempts: u32) -> TimeDelta {
        let attempts = i32::try_from(attempts.max(1)).unwrap_or(i32::MAX);
        let factor = attempts.saturating_mul(attempts);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay);
        std::cmp::min(delay, self.max_delay)
    }
}

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// A durable unit of scheduled work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub priority: Priority,
    pub status: JobStatus,
    /// Handler-specific input, opaque to the queue and scheduler.
    pub payload: serde_json::Value,
    /// Handler-specific output, opaque to the queue and scheduler.
    pub result: serde_json::Value,
    pub error: Option<String>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Whether a claimer may take this job at `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.scheduled_at <= now && self.can_retry()
    }

    /// Transition a freshly claimed job to `Running`.
    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.attempts += 1;
        self.started_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(now);
        self.error = None;
        self.updated_at = now;
    }

    /// Record a failed attempt.
    ///
    /// Returns the backoff applied when the job goes back to `Pending`, or
    /// `None` when the attempt budget is exhausted and the job is now `Failed`.
    pub fn mark_attempt_failed(
        &mut self,
        error: &str,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Option<TimeDelta> {
        self.error = Some(error.to_string());
        self.updated_at = now;

        if self.can_retry() {
            let backoff = policy.backoff(self.attempts);
            self.status = JobStatus::Pending;
            self.scheduled_at = now + backoff;
            self.started_at = None;
            Some(backoff)
        } else {
            self.status = JobStatus::Failed;
            self.completed_at = Some(now);
            None
        }
    }

    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) -> Result<(), AppError> {
        match self.status {
            JobStatus::Pending => {
                self.status = JobStatus::Cancelled;
                self.completed_at = Some(now);
                self.updated_at = now;
                Ok(())
            }
            JobStatus::Running => Err(AppError::InvalidState(format!(
                "cannot cancel running job {}",
                self.id
            ))),
            other => Err(AppError::InvalidState(format!(
                "job {} is not pending (status: {})",
                self.id, other
            ))),
        }
    }

    /// Decode the opaque payload into a handler-specific type.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, AppError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            AppError::ValidationError(format!("invalid payload for job {}: {e}", self.id))
        })
    }
}

/// Request to enqueue a new job. Unset fields receive queue defaults.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: String,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub priority: Option<Priority>,
    pub status: Option<JobStatus>,
    pub max_attempts: Option<u32>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl NewJob {
    pub fn new(id: impl Into<String>, job_type: JobType, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            job_type,
            payload,
            priority: None,
            status: None,
            max_attempts: None,
            scheduled_at: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max);
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Apply defaults and validate, producing the job exactly as it will be stored.
    pub fn into_job(self, now: DateTime<Utc>) -> Result<Job, AppError> {
        if self.id.trim().is_empty() {
            return Err(AppError::ValidationError("job ID is required".into()));
        }
        let max_attempts = match self.max_attempts {
            None | Some(0) => DEFAULT_MAX_ATTEMPTS,
            Some(n) => n,
        };

        Ok(Job {
            id: self.id,
            job_type: self.job_type,
            priority: self.priority.unwrap_or_default(),
            status: self.status.unwrap_or(JobStatus::Pending),
            payload: self.payload,
            result: serde_json::Value::Null,
            error: None,
            attempts: 0,
            max_attempts,
            scheduled_at: self.scheduled_at.unwrap_or(now),
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Configuration for the scheduler's worker pool.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub poll_interval: Duration,
    /// Upper bound on a single handler execution.
    pub job_timeout: Duration,
    /// Terminal jobs older than this are purged by the maintenance task.
    pub retention: TimeDelta,
    pub maintenance_interval: Duration,
    /// Extra time past `job_timeout` before a `Running` job is considered orphaned.
    pub stale_grace: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            poll_interval: Duration::from_secs(5),
            job_timeout: Duration::from_secs(30 * 60),
            retention: TimeDelta::days(7),
            maintenance_interval: Duration::from_secs(60 * 60),
            stale_grace: Duration::from_secs(5 * 60),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_retention(mut self, retention: TimeDelta) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Cutoff before which a `Running` job cannot still have a live handler.
    pub fn stale_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let window = TimeDelta::from_std(self.job_timeout.saturating_add(self.stale_grace))
            .unwrap_or(TimeDelta::MAX);
        now.checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Terminal jobs last updated before this instant are due for purging.
    pub fn purge_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cutoffs_saturate_for_huge_windows() {
        let now = Utc::now();
        let config = SchedulerConfig::default()
            .with_job_timeout(Duration::MAX)
            .with_retention(TimeDelta::MAX);
        assert_eq!(config.stale_cutoff(now), DateTime::<Utc>::MIN_UTC);
        assert_eq!(config.purge_cutoff(now), DateTime::<Utc>::MIN_UTC);

        let config = SchedulerConfig::default();
        assert_eq!(config.stale_cutoff(now), now - TimeDelta::minutes(35));
        assert_eq!(config.purge_cutoff(now), now - TimeDelta::days(7));
    }

    fn new_job() -> Job {
        NewJob::new("job-1", JobType::ScrapeProducts, serde_json::json!({}))
            .into_job(Utc::now())
            .unwrap()
    }

    #[test]
    fn test_job_status_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            let parsed: JobStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert_eq!(
            "scrape_products".parse::<JobType>().unwrap(),
            JobType::ScrapeProducts
        );
        assert!("nope".parse::<JobType>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), TimeDelta::minutes(1));
        assert_eq!(policy.backoff(2), TimeDelta::minutes(4));
        assert_eq!(policy.backoff(3), TimeDelta::minutes(9));
        assert_eq!(policy.backoff(100), TimeDelta::minutes(60));
    }

    #[test]
    fn test_backoff_is_non_decreasing() {
        let policy = RetryPolicy::default();
        let mut previous = TimeDelta::zero();
        for attempts in 0..50 {
            let delay = policy.backoff(attempts);
            assert!(delay >= previous, "attempt {attempts}: {delay} < {previous}");
            previous = delay;
        }
    }

    #[test]
    fn test_new_job_defaults() {
        let now = Utc::now();
        let job = NewJob::new("a", JobType::ScrapeProducts, serde_json::json!({"x": 1}))
            .into_job(now)
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.priority, Priority::Normal);
        assert_eq!(job.scheduled_at, now);
        assert_eq!(job.attempts, 0);
    }

    #[test]
    fn test_new_job_rejects_empty_id() {
        let err = NewJob::new("  ", JobType::ScrapeProducts, serde_json::json!({}))
            .into_job(Utc::now())
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[test]
    fn test_failed_attempt_reschedules_with_backoff() {
        let now = Utc::now();
        let mut job = new_job();
        job.mark_running(now);

        let backoff = job
            .mark_attempt_failed("boom", &RetryPolicy::default(), now)
            .unwrap();
        assert_eq!(backoff, TimeDelta::minutes(1));
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.scheduled_at, now + backoff);
        assert!(job.started_at.is_none());
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert!(job.attempts <= job.max_attempts);
    }

    #[test]
    fn test_last_attempt_failure_is_terminal() {
        let now = Utc::now();
        let mut job = new_job();
        job.attempts = job.max_attempts - 1;
        job.mark_running(now);

        assert!(
            job.mark_attempt_failed("boom", &RetryPolicy::default(), now)
                .is_none()
        );
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.completed_at, Some(now));
    }

    #[test]
    fn test_cancel_rules() {
        let now = Utc::now();
        let mut pending = new_job();
        pending.mark_cancelled(now).unwrap();
        assert_eq!(pending.status, JobStatus::Cancelled);
        assert!(!pending.is_claimable(now));

        let mut running = new_job();
        running.mark_running(now);
        let err = running.mark_cancelled(now).unwrap_err();
        assert!(err.to_string().contains("cannot cancel running job"));
    }

    #[test]
    fn test_future_job_not_claimable() {
        let now = Utc::now();
        let job = NewJob::new("later", JobType::ScrapeProducts, serde_json::json!({}))
            .scheduled_at(now + TimeDelta::minutes(5))
            .into_job(now)
            .unwrap();
        assert!(!job.is_claimable(now));
        assert!(job.is_claimable(now + TimeDelta::minutes(5)));
    }

    #[test]
    fn test_priority_storage_mapping() {
        assert_eq!(Priority::from_i16(Priority::High.as_i16()), Priority::High);
        assert_eq!(Priority::from_i16(0), Priority::Low);
        assert_eq!(Priority::from_i16(9), Priority::Urgent);
    }
}
