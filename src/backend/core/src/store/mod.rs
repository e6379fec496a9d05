//! Persistence layer for job configuration.
//!
//! Two logical tables back the version registry:
//!
//! - `job_configs`: the live configuration of each job, keyed by name
//! - `job_versions`: configuration snapshots keyed by `(job_name, version)`
//!
//! Components only use the three repository verbs (`upsert`, `find_one`,
//! `find_many`); storage technology stays behind [`Repository`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::hash::Hash;

use crate::error::{JobflowError, Result};
use crate::jobs::{JobPriority, JobSnapshot, ScheduleConfig};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryRepository;
pub use postgres::PostgresStore;

// ═══════════════════════════════════════════════════════════════════════════════
// Repository Contract
// ═══════════════════════════════════════════════════════════════════════════════

/// Ordering for `find_many`, applied to [`Record::sort_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Ascending,
    /// Newest first
    #[default]
    Descending,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// A persisted row type.
pub trait Record: Clone + Send + Sync + 'static {
    type Key: Eq + Hash + Clone + Send + Sync + std::fmt::Debug;
    type Filter: Send + Sync;

    fn key(&self) -> Self::Key;

    fn matches(&self, filter: &Self::Filter) -> bool;

    fn sort_key(&self) -> DateTime<Utc>;

    /// Combine an incoming upsert with the row already stored under its key.
    fn merge(_existing: &Self, incoming: Self) -> Self {
        incoming
    }
}

/// Storage-agnostic access to one table.
#[async_trait]
pub trait Repository<T: Record>: Send + Sync {
    /// Insert, or update the row with the same key. Returns the stored row.
    async fn upsert(&self, record: T) -> Result<T>;

    async fn find_one(&self, filter: &T::Filter) -> Result<Option<T>>;

    async fn find_many(&self, filter: &T::Filter, order: SortOrder) -> Result<Vec<T>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Versions
// ═══════════════════════════════════════════════════════════════════════════════

/// One recorded version of a job's configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobVersion {
    pub job_name: String,
    pub version: String,
    pub changes: Vec<String>,
    /// Serialized [`JobSnapshot`]
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobVersion {
    pub fn new(
        job_name: impl Into<String>,
        version: impl Into<String>,
        changes: Vec<String>,
        snapshot: &JobSnapshot,
    ) -> Result<Self> {
        let now = Utc::now();
        Ok(Self {
            job_name: job_name.into(),
            version: version.into(),
            changes,
            config: serde_json::to_value(snapshot)?,
            created_at: now,
            updated_at: now,
        })
    }

    /// Decode the stored snapshot. A row that no longer decodes is a schema
    /// problem, not a data problem.
    pub fn snapshot(&self) -> Result<JobSnapshot> {
        serde_json::from_value(self.config.clone()).map_err(|e| {
            JobflowError::schema_mismatch(format!(
                "Stored snapshot for {}@{} does not decode: {}",
                self.job_name, self.version, e
            ))
            .with_context("job", &self.job_name)
            .with_context("version", &self.version)
        })
    }
}

/// Filter for [`JobVersion`] lookups. `version: None` matches every version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionFilter {
    pub job_name: String,
    pub version: Option<String>,
}

impl VersionFilter {
    pub fn job(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            version: None,
        }
    }

    pub fn exact(job_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            version: Some(version.into()),
        }
    }
}

impl Record for JobVersion {
    type Key = (String, String);
    type Filter = VersionFilter;

    fn key(&self) -> Self::Key {
        (self.job_name.clone(), self.version.clone())
    }

    fn matches(&self, filter: &VersionFilter) -> bool {
        self.job_name == filter.job_name
            && filter
                .version
                .as_deref()
                .map(|v| v == self.version)
                .unwrap_or(true)
    }

    fn sort_key(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// A repeated write to the same version is a correction: history keeps
    /// the original `created_at`.
    fn merge(existing: &Self, incoming: Self) -> Self {
        Self {
            created_at: existing.created_at,
            ..incoming
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Live Job Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// The live configuration record of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfigRecord {
    pub name: String,
    pub priority: JobPriority,
    /// Serialized `JobMetadata`, `null` when the job has none
    pub metadata: serde_json::Value,
    pub retry_limit: Option<u32>,
    pub schedule: Option<ScheduleConfig>,
    pub circuit_breaker_threshold: Option<u32>,
    pub circuit_breaker_timeout_ms: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

impl JobConfigRecord {
    /// Project the live-record fields out of a snapshot. A disabled breaker
    /// leaves both breaker columns empty.
    pub fn from_snapshot(snapshot: &JobSnapshot, updated_at: DateTime<Utc>) -> Result<Self> {
        let priority = snapshot
            .priority
            .or_else(|| snapshot.metadata.as_ref().map(|m| m.priority))
            .unwrap_or_default();
        let breaker = snapshot.circuit_breaker.as_ref().filter(|cb| cb.enabled);

        Ok(Self {
            name: snapshot.name.clone(),
            priority,
            metadata: serde_json::to_value(&snapshot.metadata)?,
            retry_limit: snapshot.retry_limit,
            schedule: snapshot.schedule.clone(),
            circuit_breaker_threshold: breaker.map(|cb| cb.failure_threshold),
            circuit_breaker_timeout_ms: breaker.map(|cb| cb.reset_timeout.as_millis() as u64),
            updated_at,
        })
    }

    /// Equal apart from `updated_at`.
    pub fn same_config(&self, other: &Self) -> bool {
        Self {
            updated_at: other.updated_at,
            ..self.clone()
        } == *other
    }
}

/// Filter for [`JobConfigRecord`] lookups. `name: None` matches every job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFilter {
    pub name: Option<String>,
}

impl ConfigFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

impl Record for JobConfigRecord {
    type Key = String;
    type Filter = ConfigFilter;

    fn key(&self) -> Self::Key {
        self.name.clone()
    }

    fn matches(&self, filter: &ConfigFilter) -> bool {
        filter
            .name
            .as_deref()
            .map(|n| n == self.name)
            .unwrap_or(true)
    }

    fn sort_key(&self) -> DateTime<Utc> {
        self.updated_at
    }
}
