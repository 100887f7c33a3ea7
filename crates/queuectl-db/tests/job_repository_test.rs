//! Integration tests for the SQLite job store.
//!
//! Covers:
//! - create/get round trip and duplicate id rejection
//! - listing order and eligibility filtering
//! - compare-and-swap exclusivity across tasks and separate handles
//! - durability across reopen

use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::future::join_all;

use queuectl_core::lifecycle::{self, JobEvent};
use queuectl_core::{atomic_update, Error, Job, JobRepository, JobState, NewJob, QueueConfig};
use queuectl_db::test_fixtures::TestDatabase;

fn new_job(id: &str, offset_ms: i64) -> Job {
    let now = Utc::now() + Duration::milliseconds(offset_ms);
    lifecycle::create(&NewJob::new(id, "echo hi"), &QueueConfig::default(), now).unwrap()
}

#[tokio::test]
async fn test_create_and_get_round_trip() {
    let test_db = TestDatabase::new().await;
    let job = new_job("job-1", 0);

    let stored = test_db.db.jobs.create(&job).await.unwrap();
    let fetched = test_db.db.jobs.get("job-1").await.unwrap().unwrap();

    assert_eq!(stored, job);
    assert_eq!(fetched, job);
    assert_eq!(fetched.state, JobState::Pending);
    assert_eq!(fetched.attempts, 0);
    assert_eq!(fetched.max_retries, 3);
    assert!(fetched.scheduled_at.is_none());
}

#[tokio::test]
async fn test_get_missing_returns_none() {
    let test_db = TestDatabase::new().await;
    assert!(test_db.db.jobs.get("nope").await.unwrap().is_none());
}

#[tokio::test]
async fn test_duplicate_id_rejected() {
    let test_db = TestDatabase::new().await;
    test_db.db.jobs.create(&new_job("dup", 0)).await.unwrap();

    let mut other = new_job("dup", 10);
    other.command = "echo other".to_string();
    let err = test_db.db.jobs.create(&other).await.unwrap_err();

    assert!(matches!(err, Error::DuplicateId(ref id) if id == "dup"));
    let kept = test_db.db.jobs.get("dup").await.unwrap().unwrap();
    assert_eq!(kept.command, "echo hi");
}

#[tokio::test]
async fn test_list_by_state_and_all_in_insertion_order() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;
    for id in ["a", "b", "c"] {
        jobs.create(&new_job(id, 0)).await.unwrap();
    }

    let config = QueueConfig::default();
    atomic_update(jobs, "b", |j| {
        lifecycle::apply(j, &JobEvent::Claim, &config, Utc::now())
    })
    .await
    .unwrap();

    let pending: Vec<String> = jobs
        .list_by_state(JobState::Pending)
        .await
        .unwrap()
        .into_iter()
        .map(|j| j.id)
        .collect();
    let all: Vec<String> = jobs
        .list_all()
        .await
        .unwrap()
        .into_iter()
        .map(|j| j.id)
        .collect();

    assert_eq!(pending, vec!["a", "c"]);
    assert_eq!(all, vec!["a", "b", "c"]);
    assert!(jobs.list_by_state(JobState::Dead).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_eligible_orders_by_created_at() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;
    // Inserted newest first; eligibility order follows created_at.
    jobs.create(&new_job("late", 2_000)).await.unwrap();
    jobs.create(&new_job("early", -2_000)).await.unwrap();
    jobs.create(&new_job("middle", 0)).await.unwrap();

    let ids: Vec<String> = jobs
        .list_eligible(Utc::now() + Duration::seconds(5))
        .await
        .unwrap()
        .into_iter()
        .map(|j| j.id)
        .collect();

    assert_eq!(ids, vec!["early", "middle", "late"]);
}

#[tokio::test]
async fn test_list_eligible_respects_schedule() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;
    let config = QueueConfig::default();
    jobs.create(&new_job("retry", 0)).await.unwrap();

    let t0 = Utc::now();
    atomic_update(jobs, "retry", |j| {
        lifecycle::apply(j, &JobEvent::Claim, &config, t0)
    })
    .await
    .unwrap();
    let failed = atomic_update(jobs, "retry", |j| {
        let fail = JobEvent::Fail {
            diagnostic: "exit 1".to_string(),
        };
        lifecycle::apply(j, &fail, &config, t0)
    })
    .await
    .unwrap();

    let due = failed.scheduled_at.unwrap();
    assert_eq!(due, t0 + Duration::seconds(2));

    let before = jobs.list_eligible(due - Duration::milliseconds(1)).await.unwrap();
    let at = jobs.list_eligible(due).await.unwrap();

    assert!(before.is_empty());
    assert_eq!(at.len(), 1);
    assert_eq!(at[0].state, JobState::Failed);
    assert_eq!(at[0].last_error.as_deref(), Some("exit 1"));
}

#[tokio::test]
async fn test_count_by_state() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;
    let config = QueueConfig::default();
    for id in ["a", "b", "c"] {
        jobs.create(&new_job(id, 0)).await.unwrap();
    }
    atomic_update(jobs, "a", |j| {
        lifecycle::apply(j, &JobEvent::Claim, &config, Utc::now())
    })
    .await
    .unwrap();

    let counts = jobs.count_by_state().await.unwrap();

    assert!(counts.contains(&(JobState::Pending, 2)));
    assert!(counts.contains(&(JobState::Processing, 1)));
    assert_eq!(counts.iter().map(|(_, n)| n).sum::<i64>(), 3);
}

#[tokio::test]
async fn test_compare_and_swap_rejects_stale_version() {
    let test_db = TestDatabase::new().await;
    let jobs = &test_db.db.jobs;
    let config = QueueConfig::default();
    let job = jobs.create(&new_job("cas", 0)).await.unwrap();
    let claimed = lifecycle::apply(&job, &JobEvent::Claim, &config, Utc::now()).unwrap();

    let first = jobs.compare_and_swap(&job, &claimed).await.unwrap();
    let second = jobs.compare_and_swap(&job, &claimed).await.unwrap();

    let first = first.unwrap();
    assert_eq!(first.version, 1);
    assert_eq!(first.state, JobState::Processing);
    assert!(second.is_none());
    assert_eq!(jobs.get("cas").await.unwrap().unwrap(), first);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_swaps_have_one_winner() {
    let test_db = TestDatabase::new().await;
    let repo = Arc::new(test_db.db.jobs.clone());
    let config = QueueConfig::default();
    let job = repo.create(&new_job("race", 0)).await.unwrap();
    let claimed = lifecycle::apply(&job, &JobEvent::Claim, &config, Utc::now()).unwrap();

    let attempts = (0..8).map(|_| {
        let repo = repo.clone();
        let job = job.clone();
        let claimed = claimed.clone();
        tokio::spawn(async move { repo.compare_and_swap(&job, &claimed).await })
    });
    let results = join_all(attempts).await;

    let winners = results
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .filter(Option::is_some)
        .count();
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_separate_handles_share_state() {
    let test_db = TestDatabase::new().await;
    let other = test_db.reopen().await;
    let config = QueueConfig::default();
    let job = test_db.db.jobs.create(&new_job("shared", 0)).await.unwrap();

    let claimed = lifecycle::apply(&job, &JobEvent::Claim, &config, Utc::now()).unwrap();
    let won = other.jobs.compare_and_swap(&job, &claimed).await.unwrap();
    let lost = test_db.db.jobs.compare_and_swap(&job, &claimed).await.unwrap();

    assert!(won.is_some());
    assert!(lost.is_none());
}

#[tokio::test]
async fn test_jobs_survive_reopen() {
    let test_db = TestDatabase::new().await;
    test_db.db.jobs.create(&new_job("durable", 0)).await.unwrap();
    test_db.db.close().await;

    let reopened = test_db.reopen().await;
    let job = reopened.jobs.get("durable").await.unwrap().unwrap();

    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.command, "echo hi");
}

#[tokio::test]
async fn test_create_wakes_waiters() {
    let test_db = TestDatabase::new().await;
    let notify = test_db.db.jobs.job_notify();
    let notified = notify.notified();
    tokio::pin!(notified);
    // Register interest before the job lands.
    notified.as_mut().enable();

    test_db.db.jobs.create(&new_job("wake", 0)).await.unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(1), notified)
        .await
        .expect("create should wake waiters");
}
