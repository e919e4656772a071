use std::collections::HashSet;

use chrono::{TimeDelta, Utc};
use gator_core::job::{JobStatus, JobType, NewJob, Priority, RetryPolicy};
use gator_core::job_queue::JobQueue;
use gator_core::memory_queue::STALE_RECOVERY_NOTE;
use gator_db::PgJobQueue;

use crate::integration::common::setup_test_db;

fn new_job(id: &str) -> NewJob {
    NewJob::new(
        id,
        JobType::ScrapeProducts,
        serde_json::json!({
            "reseller_id": "r1",
            "url": "https://shop.test",
            "source_type": "SHOPIFY"
        }),
    )
}

#[tokio::test]
async fn enqueue_applies_defaults() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);

    let job = queue.enqueue(new_job("job-1")).await.unwrap();

    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.priority, Priority::Normal);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.max_attempts, 3);
    assert!(job.result.is_null());
    assert!(job.started_at.is_none());

    let stored = queue.get_job("job-1").await.unwrap().unwrap();
    assert_eq!(stored.job_type, JobType::ScrapeProducts);
    assert_eq!(stored.payload["source_type"], "SHOPIFY");
}

#[tokio::test]
async fn enqueue_rejects_duplicate_id() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);

    queue.enqueue(new_job("dup")).await.unwrap();
    let err = queue.enqueue(new_job("dup")).await.unwrap_err();
    assert!(matches!(err, gator_core::AppError::InvalidState(_)));
}

#[tokio::test]
async fn update_job_rejects_out_of_range_counters() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);

    let mut job = queue.enqueue(new_job("job-1")).await.unwrap();
    job.attempts = u32::MAX;
    let err = queue.update_job(&job).await.unwrap_err();
    assert!(err.is_validation());

    let stored = queue.get_job("job-1").await.unwrap().unwrap();
    assert_eq!(stored.attempts, 0);
}

#[tokio::test]
async fn claim_next_marks_running_and_counts_attempt() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);

    queue.enqueue(new_job("job-1")).await.unwrap();

    let claimed = queue
        .claim_next()
        .await
        .unwrap()
        .expect("Should claim the job");
    assert_eq!(claimed.status, JobStatus::Running);
    assert_eq!(claimed.attempts, 1);
    assert!(claimed.started_at.is_some());

    assert!(queue.claim_next().await.unwrap().is_none());
}

#[tokio::test]
async fn claim_next_orders_by_priority_then_schedule() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);
    let earlier = Utc::now() - TimeDelta::minutes(5);

    queue
        .enqueue(new_job("low").with_priority(Priority::Low).scheduled_at(earlier))
        .await
        .unwrap();
    queue.enqueue(new_job("normal-late")).await.unwrap();
    queue
        .enqueue(new_job("normal-early").scheduled_at(earlier))
        .await
        .unwrap();
    queue
        .enqueue(new_job("urgent").with_priority(Priority::Urgent))
        .await
        .unwrap();

    let mut order = Vec::new();
    while let Some(job) = queue.claim_next().await.unwrap() {
        order.push(job.id);
    }
    assert_eq!(order, vec!["urgent", "normal-early", "normal-late", "low"]);
}

#[tokio::test]
async fn claim_next_skips_future_and_exhausted_jobs() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);

    queue
        .enqueue(new_job("future").scheduled_at(Utc::now() + TimeDelta::hours(1)))
        .await
        .unwrap();

    queue
        .enqueue(new_job("exhausted").with_max_attempts(1))
        .await
        .unwrap();
    let mut job = queue.claim_next().await.unwrap().unwrap();
    assert_eq!(job.id, "exhausted");
    // Put it back as pending with its only attempt spent.
    job.status = JobStatus::Pending;
    job.started_at = None;
    queue.update_job(&job).await.unwrap();

    assert!(queue.claim_next().await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_claimers_never_share_a_job() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);

    for i in 0..20 {
        queue.enqueue(new_job(&format!("job-{i:02}"))).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..8 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(job) = queue.claim_next().await.unwrap() {
                claimed.push(job.id);
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    let unique: HashSet<_> = all.iter().cloned().collect();
    assert_eq!(all.len(), 20);
    assert_eq!(unique.len(), 20);
    assert_eq!(queue.count_by_status(JobStatus::Running).await.unwrap(), 20);
}

#[tokio::test]
async fn update_job_persists_retry_reschedule() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);

    queue.enqueue(new_job("job-1")).await.unwrap();
    let mut job = queue.claim_next().await.unwrap().unwrap();

    let backoff = job
        .mark_attempt_failed("source unavailable", &RetryPolicy::default(), Utc::now())
        .expect("first failure is retried");
    queue.update_job(&job).await.unwrap();

    let stored = queue.get_job("job-1").await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Pending);
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.error.as_deref(), Some("source unavailable"));
    assert!(stored.started_at.is_none());
    assert!(stored.scheduled_at > Utc::now() + backoff - TimeDelta::seconds(5));

    // Not claimable until the backoff elapses.
    assert!(queue.claim_next().await.unwrap().is_none());
}

#[tokio::test]
async fn update_job_round_trips_result() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);

    queue.enqueue(new_job("job-1")).await.unwrap();
    let mut job = queue.claim_next().await.unwrap().unwrap();
    job.result = serde_json::json!({"products_saved": 4});
    job.mark_completed(Utc::now());
    queue.update_job(&job).await.unwrap();

    let stored = queue.get_job("job-1").await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.result["products_saved"], 4);
    assert!(stored.completed_at.is_some());
    assert!(stored.error.is_none());
}

#[tokio::test]
async fn update_and_delete_missing_job_is_not_found() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);

    let ghost = new_job("ghost").into_job(Utc::now()).unwrap();
    assert!(matches!(
        queue.update_job(&ghost).await.unwrap_err(),
        gator_core::AppError::NotFound(_)
    ));
    assert!(matches!(
        queue.delete_job("ghost").await.unwrap_err(),
        gator_core::AppError::NotFound(_)
    ));
}

#[tokio::test]
async fn cancel_job_rules() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);

    queue.enqueue(new_job("pending")).await.unwrap();
    let cancelled = queue.cancel_job("pending").await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());
    let stored = queue.get_job("pending").await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);

    // Terminal jobs cannot be cancelled again.
    assert!(matches!(
        queue.cancel_job("pending").await.unwrap_err(),
        gator_core::AppError::InvalidState(_)
    ));

    queue.enqueue(new_job("running")).await.unwrap();
    queue.claim_next().await.unwrap().unwrap();
    assert!(matches!(
        queue.cancel_job("running").await.unwrap_err(),
        gator_core::AppError::InvalidState(_)
    ));

    assert!(matches!(
        queue.cancel_job("missing").await.unwrap_err(),
        gator_core::AppError::NotFound(_)
    ));
}

#[tokio::test]
async fn list_jobs_with_status_filter() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool);

    queue.enqueue(new_job("a")).await.unwrap();
    queue.enqueue(new_job("b")).await.unwrap();
    queue.enqueue(new_job("c")).await.unwrap();
    queue.claim_next().await.unwrap();

    let pending = queue.list_jobs(Some(JobStatus::Pending), 10).await.unwrap();
    assert_eq!(pending.len(), 2);

    let running = queue.list_jobs(Some(JobStatus::Running), 10).await.unwrap();
    assert_eq!(running.len(), 1);

    assert_eq!(queue.list_jobs(None, 10).await.unwrap().len(), 3);
    assert_eq!(queue.list_jobs(None, 2).await.unwrap().len(), 2);
}

#[tokio::test]
async fn purge_terminal_removes_only_old_terminal_jobs() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool.clone());

    queue.enqueue(new_job("done")).await.unwrap();
    queue.enqueue(new_job("cancelled")).await.unwrap();
    queue.enqueue(new_job("pending")).await.unwrap();

    let mut done = queue.claim_next().await.unwrap().unwrap();
    done.mark_completed(Utc::now());
    queue.update_job(&done).await.unwrap();
    queue.cancel_job("cancelled").await.unwrap();

    sqlx::query("UPDATE jobs SET updated_at = NOW() - INTERVAL '8 days'")
        .execute(&pool)
        .await
        .unwrap();

    let purged = queue
        .purge_terminal(Utc::now() - TimeDelta::days(7))
        .await
        .unwrap();
    assert_eq!(purged, 2);
    assert!(queue.get_job("pending").await.unwrap().is_some());
    assert!(queue.get_job(&done.id).await.unwrap().is_none());
}

#[tokio::test]
async fn recover_stale_requeues_or_fails() {
    let (pool, _container) = setup_test_db().await;
    let queue = PgJobQueue::new(pool.clone());

    queue.enqueue(new_job("retryable")).await.unwrap();
    queue
        .enqueue(new_job("exhausted").with_max_attempts(1))
        .await
        .unwrap();
    queue.enqueue(new_job("fresh")).await.unwrap();

    queue.claim_next().await.unwrap().unwrap();
    queue.claim_next().await.unwrap().unwrap();
    sqlx::query("UPDATE jobs SET started_at = NOW() - INTERVAL '2 hours' WHERE status = 'running'")
        .execute(&pool)
        .await
        .unwrap();
    queue.claim_next().await.unwrap().unwrap();

    let recovered = queue
        .recover_stale(Utc::now() - TimeDelta::hours(1))
        .await
        .unwrap();
    assert_eq!(recovered, 2);

    let retryable = queue.get_job("retryable").await.unwrap().unwrap();
    assert_eq!(retryable.status, JobStatus::Pending);
    assert!(retryable.started_at.is_none());
    assert_eq!(retryable.error.as_deref(), Some(STALE_RECOVERY_NOTE));

    let exhausted = queue.get_job("exhausted").await.unwrap().unwrap();
    assert_eq!(exhausted.status, JobStatus::Failed);
    assert!(exhausted.completed_at.is_some());

    let fresh = queue.get_job("fresh").await.unwrap().unwrap();
    assert_eq!(fresh.status, JobStatus::Running);
}
