//! Deadline propagation for job and scrape execution.
//!
//! An [`ExecContext`] travels from the scheduler through the handler and
//! manager into each plugin. Deriving a child with [`ExecContext::with_timeout`]
//! never extends an existing deadline, only tightens it.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecContext {
    deadline: Option<Instant>,
    budget: Option<Duration>,
}

impl ExecContext {
    /// A context without a deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context whose deadline is at most `timeout` from now.
    ///
    /// A timeout too large to represent leaves the context unchanged.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let Some(candidate) = Instant::now().checked_add(timeout) else {
            return *self;
        };
        match self.deadline {
            Some(existing) if existing <= candidate => *self,
            _ => Self {
                deadline: Some(candidate),
                budget: Some(timeout),
            },
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn has_deadline(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn timeout_error(&self) -> AppError {
        AppError::Timeout(self.budget.map(|b| b.as_secs()).unwrap_or_default())
    }

    /// Drive `fut` to completion, failing with [`AppError::Timeout`] once the deadline passes.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| self.timeout_error())?,
            None => fut.await,
        }
    }

    /// Sleep for `duration`, or fail early if the deadline would pass first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), AppError> {
        let wake = Instant::now() + duration;
        match self.deadline {
            Some(deadline) if deadline < wake => {
                tokio::time::sleep_until(deadline).await;
                Err(self.timeout_error())
            }
            _ => {
                tokio::time::sleep_until(wake).await;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn background_has_no_deadline() {
        let ctx = ExecContext::background();
        assert!(!ctx.has_deadline());
        assert!(ctx.remaining().is_none());
        assert!(!ctx.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn child_timeout_never_extends_parent() {
        let parent = ExecContext::background().with_timeout(Duration::from_secs(10));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());

        let tighter = parent.with_timeout(Duration::from_secs(1));
        assert!(tighter.deadline() < parent.deadline());
    }

    #[tokio::test]
    async fn unrepresentable_timeout_keeps_context() {
        assert!(!ExecContext::background().with_timeout(Duration::MAX).has_deadline());

        let parent = ExecContext::background().with_timeout(Duration::from_secs(10));
        assert_eq!(parent.with_timeout(Duration::MAX).deadline(), parent.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn run_times_out_past_deadline() {
        let ctx = ExecContext::background().with_timeout(Duration::from_secs(2));
        let err = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, AppError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Timeout(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_fails_when_deadline_is_sooner() {
        let ctx = ExecContext::background().with_timeout(Duration::from_secs(1));
        assert!(ctx.sleep(Duration::from_secs(3)).await.is_err());

        let roomy = ExecContext::background().with_timeout(Duration::from_secs(10));
        assert!(roomy.sleep(Duration::from_secs(3)).await.is_ok());
    }
}
