//! Version registry tests over the in-memory repositories.
//!
//! Tests cover:
//! - Version history ordering and lookups
//! - Upsert semantics for a repeated (job, version) key
//! - Rollback, including idempotence and missing versions
//! - Syncing job definitions into storage

use jobflow_core::error::ErrorCode;
use jobflow_core::jobs::{
    CircuitBreakerConfig, IntervalUnit, JobConfig, JobHandlers, JobPriority, JobSnapshot,
    ScheduleConfig, VersionRegistry, VersionSync,
};
use std::time::Duration;

fn snapshot(version: &str) -> JobSnapshot {
    JobConfig::new(
        "news_links",
        version,
        JobHandlers::new(|items: Vec<String>, _h| async move { Ok(items) }),
    )
    .with_change(format!("release {}", version))
    .snapshot()
}

async fn pause() {
    // Keeps created_at strictly increasing between writes.
    tokio::time::sleep(Duration::from_millis(5)).await;
}

// ============================================================================
// History
// ============================================================================

#[tokio::test]
async fn test_versions_listed_newest_first() {
    let registry = VersionRegistry::in_memory();
    for version in ["1.0.0", "1.1.0", "2.0.0"] {
        registry
            .create_version("news_links", version, vec![], &snapshot(version))
            .await
            .unwrap();
        pause().await;
    }

    let versions = registry.get_job_versions("news_links").await.unwrap();
    let names: Vec<_> = versions.iter().map(|v| v.version.as_str()).collect();
    assert_eq!(names, vec!["2.0.0", "1.1.0", "1.0.0"]);

    let latest = registry.get_latest_version("news_links").await.unwrap().unwrap();
    assert_eq!(latest.version, "2.0.0");

    let exact = registry.get_version("news_links", "1.1.0").await.unwrap().unwrap();
    assert_eq!(exact.snapshot().unwrap().version, "1.1.0");
}

#[tokio::test]
async fn test_unknown_job_has_no_versions() {
    let registry = VersionRegistry::in_memory();
    assert!(registry.get_job_versions("missing").await.unwrap().is_empty());
    assert!(registry.get_latest_version("missing").await.unwrap().is_none());
    assert!(registry.get_version("missing", "1.0.0").await.unwrap().is_none());
}

#[tokio::test]
async fn test_repeated_version_is_upserted() {
    let registry = VersionRegistry::in_memory();
    let snap = snapshot("1.0.0");

    let first = registry
        .create_version("news_links", "1.0.0", vec!["initial".into()], &snap)
        .await
        .unwrap();
    pause().await;
    let second = registry
        .create_version("news_links", "1.0.0", vec!["corrected notes".into()], &snap)
        .await
        .unwrap();

    let versions = registry.get_job_versions("news_links").await.unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].changes, vec!["corrected notes".to_string()]);
    assert_eq!(second.created_at, first.created_at);
    assert!(second.updated_at > first.updated_at);
}

// ============================================================================
// Rollback
// ============================================================================

#[tokio::test]
async fn test_rollback_restores_stored_fields() {
    let registry = VersionRegistry::in_memory();

    let v1 = JobConfig::new(
        "news_links",
        "1.0.0",
        JobHandlers::new(|items: Vec<String>, _h| async move { Ok(items) }),
    )
    .with_priority(JobPriority::Low)
    .with_retry_limit(1)
    .with_schedule(ScheduleConfig::interval(15, IntervalUnit::Minutes))
    .with_circuit_breaker(CircuitBreakerConfig::enabled(2, Duration::from_secs(60)))
    .snapshot();
    let v2 = JobConfig::new(
        "news_links",
        "2.0.0",
        JobHandlers::new(|items: Vec<String>, _h| async move { Ok(items) }),
    )
    .with_priority(JobPriority::High)
    .with_retry_limit(5)
    .snapshot();

    registry.sync_job(&v1).await.unwrap();
    pause().await;
    registry.sync_job(&v2).await.unwrap();

    let live = registry.live_config("news_links").await.unwrap().unwrap();
    assert_eq!(live.priority, JobPriority::High);
    assert_eq!(live.circuit_breaker_threshold, None);

    let restored = registry.rollback_version("news_links", "1.0.0").await.unwrap();
    assert_eq!(restored.priority, JobPriority::Low);
    assert_eq!(restored.retry_limit, Some(1));
    assert_eq!(restored.circuit_breaker_threshold, Some(2));
    assert_eq!(restored.circuit_breaker_timeout_ms, Some(60_000));
    assert!(restored.schedule.is_some());

    // History is untouched by a rollback.
    assert_eq!(registry.get_job_versions("news_links").await.unwrap().len(), 2);
    assert_eq!(
        registry.get_latest_version("news_links").await.unwrap().unwrap().version,
        "2.0.0"
    );
}

#[tokio::test]
async fn test_rollback_is_idempotent() {
    let registry = VersionRegistry::in_memory();
    registry.sync_job(&snapshot("1.0.0")).await.unwrap();
    registry.sync_job(&snapshot("2.0.0")).await.unwrap();

    let first = registry.rollback_version("news_links", "1.0.0").await.unwrap();
    pause().await;
    let second = registry.rollback_version("news_links", "1.0.0").await.unwrap();

    assert!(first.same_config(&second));
    assert!(second.updated_at >= first.updated_at);
}

#[tokio::test]
async fn test_rollback_to_missing_version_fails() {
    let registry = VersionRegistry::in_memory();
    registry.sync_job(&snapshot("1.0.0")).await.unwrap();

    let err = registry.rollback_version("news_links", "0.9.0").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::VersionNotFound);

    // The live record is unchanged.
    let live = registry.live_config("news_links").await.unwrap().unwrap();
    assert_eq!(live.name, "news_links");
}

// ============================================================================
// Sync
// ============================================================================

#[tokio::test]
async fn test_sync_job_outcomes() {
    let registry = VersionRegistry::in_memory();
    let snap = snapshot("1.0.0");

    assert_eq!(registry.sync_job(&snap).await.unwrap(), VersionSync::Created);
    assert_eq!(registry.sync_job(&snap).await.unwrap(), VersionSync::Unchanged);

    let edited = JobSnapshot {
        batch_size: Some(50),
        ..snap
    };
    assert_eq!(registry.sync_job(&edited).await.unwrap(), VersionSync::Updated);

    let stored = registry.get_version("news_links", "1.0.0").await.unwrap().unwrap();
    assert_eq!(stored.snapshot().unwrap().batch_size, Some(50));
}
