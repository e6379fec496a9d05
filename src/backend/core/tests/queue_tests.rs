//! Job queue tests over the in-memory backend.
//!
//! Tests cover:
//! - Priority ordering with FIFO inside a priority
//! - Capacity limits
//! - Expiry of stale jobs on poll
//! - Acks, dead letters and stats

use jobflow_core::error::ErrorCode;
use jobflow_core::jobs::{
    InMemoryQueueBackend, JobId, JobOutcome, JobPriority, JobQueue, QueueConfig, QueueJob,
    QueueJobState,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn queue(config: QueueConfig) -> JobQueue {
    JobQueue::new(Arc::new(InMemoryQueueBackend::new()), config)
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn test_priority_then_fifo() {
    let queue = JobQueue::in_memory();
    queue.enqueue(QueueJob::new("a", json!(1)).with_priority(JobPriority::Low)).await.unwrap();
    queue.enqueue(QueueJob::new("b", json!(2))).await.unwrap();
    queue.enqueue(QueueJob::new("c", json!(3)).with_priority(JobPriority::Critical)).await.unwrap();
    queue.enqueue(QueueJob::new("d", json!(4))).await.unwrap();

    let mut polled = Vec::new();
    while let Some(job) = queue.poll().await.unwrap() {
        assert_eq!(job.state, QueueJobState::Active);
        assert!(job.started_at.is_some());
        polled.push(job.name);
    }
    assert_eq!(polled, vec!["c", "b", "d", "a"]);
}

// ============================================================================
// Capacity
// ============================================================================

#[tokio::test]
async fn test_full_queue_rejects_enqueue() {
    let queue = queue(QueueConfig {
        max_size: 2,
        ..Default::default()
    });
    queue.enqueue(QueueJob::new("a", json!(null))).await.unwrap();
    queue.enqueue(QueueJob::new("b", json!(null))).await.unwrap();

    let err = queue.enqueue(QueueJob::new("c", json!(null))).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::QueueFull);

    // Polling frees a slot.
    queue.poll().await.unwrap().unwrap();
    queue.enqueue(QueueJob::new("c", json!(null))).await.unwrap();
}

#[tokio::test]
async fn test_zero_max_size_is_unlimited() {
    let queue = queue(QueueConfig {
        max_size: 0,
        ..Default::default()
    });
    for i in 0..50 {
        queue.enqueue(QueueJob::new("bulk", json!(i))).await.unwrap();
    }
    assert_eq!(queue.stats().await.unwrap().pending, 50);
}

// ============================================================================
// Expiry
// ============================================================================

#[tokio::test]
async fn test_stale_jobs_expire_on_poll() {
    let queue = queue(QueueConfig {
        max_age: Some(Duration::from_millis(10)),
        ..Default::default()
    });
    queue.enqueue(QueueJob::new("stale", json!(null))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(queue.poll().await.unwrap().is_none());

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.expired, 1);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.active, 0);
    assert!(queue.dead_letters().is_empty());
}

#[tokio::test]
async fn test_no_max_age_never_expires() {
    let queue = queue(QueueConfig {
        max_age: None,
        ..Default::default()
    });
    queue.enqueue(QueueJob::new("old", json!(null))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(queue.poll().await.unwrap().is_some());
}

// ============================================================================
// Acks and Dead Letters
// ============================================================================

#[tokio::test]
async fn test_failed_jobs_go_to_dead_letter() {
    let queue = JobQueue::in_memory();
    let ok = queue.enqueue(QueueJob::new("ok", json!(null))).await.unwrap();
    let bad = queue.enqueue(QueueJob::new("bad", json!(null))).await.unwrap();
    queue.poll().await.unwrap();
    queue.poll().await.unwrap();

    let completed = queue.ack(ok, JobOutcome::Completed).await.unwrap();
    assert_eq!(completed.state, QueueJobState::Completed);
    assert!(completed.completed_at.is_some());

    let failed = queue
        .ack(
            bad,
            JobOutcome::Failed {
                error: "boom".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(failed.error.as_deref(), Some("boom"));

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.dead_letter, 1);

    let dead = queue.drain_dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, bad);
    assert!(queue.dead_letters().is_empty());
}

#[tokio::test]
async fn test_dead_letter_disabled() {
    let queue = queue(QueueConfig {
        enable_dead_letter: false,
        ..Default::default()
    });
    let id = queue.enqueue(QueueJob::new("bad", json!(null))).await.unwrap();
    queue.poll().await.unwrap();
    queue
        .ack(id, JobOutcome::Failed { error: "boom".into() })
        .await
        .unwrap();
    assert!(queue.dead_letters().is_empty());
}

#[tokio::test]
async fn test_ack_requires_active_job() {
    let queue = JobQueue::in_memory();
    let id = queue.enqueue(QueueJob::new("pending", json!(null))).await.unwrap();

    // Not polled yet.
    assert_err!(queue.ack(id, JobOutcome::Completed).await);
    assert_err!(queue.ack(JobId::new(), JobOutcome::Completed).await);

    assert_ok!(queue.poll().await);
    assert_ok!(queue.ack(id, JobOutcome::Completed).await);
    // Second ack finds nothing active.
    assert_err!(queue.ack(id, JobOutcome::Completed).await);
}

#[tokio::test]
async fn test_enqueue_rejects_non_created_job() {
    let queue = JobQueue::in_memory();
    let mut job = QueueJob::new("moved", json!(null));
    job.transition(QueueJobState::Active).unwrap();

    let err = queue.enqueue(job).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidStateTransition);
}
