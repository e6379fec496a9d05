//! Job version registry.
//!
//! Every version of a job's configuration is recorded as a snapshot keyed by
//! `(job_name, version)`. Writing the same key again corrects that entry
//! instead of adding history. Rollback replays a stored snapshot onto the
//! live configuration record; newer versions stay in the history.
//!
//! Failures are logged here and returned to the caller unchanged.

use chrono::Utc;
use std::sync::Arc;

use super::job::JobSnapshot;
use crate::error::{JobflowError, Result};
use crate::store::{
    ConfigFilter, InMemoryRepository, JobConfigRecord, JobVersion, PostgresStore, Repository,
    SortOrder, VersionFilter,
};

/// What [`VersionRegistry::sync_job`] did with the version history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSync {
    /// First time this version was seen
    Created,
    /// The version existed with a different snapshot and was rewritten
    Updated,
    /// The stored snapshot already matched
    Unchanged,
}

/// Version history and live configuration, behind injected repositories.
#[derive(Clone)]
pub struct VersionRegistry {
    versions: Arc<dyn Repository<JobVersion>>,
    configs: Arc<dyn Repository<JobConfigRecord>>,
}

impl std::fmt::Debug for VersionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionRegistry").finish_non_exhaustive()
    }
}

impl VersionRegistry {
    pub fn new(
        versions: Arc<dyn Repository<JobVersion>>,
        configs: Arc<dyn Repository<JobConfigRecord>>,
    ) -> Self {
        Self { versions, configs }
    }

    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryRepository::<JobVersion>::new()),
            Arc::new(InMemoryRepository::<JobConfigRecord>::new()),
        )
    }

    pub fn postgres(store: PostgresStore) -> Self {
        let store = Arc::new(store);
        Self::new(store.clone(), store)
    }

    /// Record a version, or correct it if `(job_name, version)` already exists.
    pub async fn create_version(
        &self,
        job_name: &str,
        version: &str,
        changes: Vec<String>,
        snapshot: &JobSnapshot,
    ) -> Result<JobVersion> {
        let result = async {
            let record = JobVersion::new(job_name, version, changes, snapshot)?;
            self.versions.upsert(record).await
        }
        .await;

        match &result {
            Ok(stored) => tracing::info!(
                job = %job_name,
                version = %version,
                changes = stored.changes.len(),
                "Job version recorded"
            ),
            Err(error) => log_failure("create_version", job_name, error),
        }
        result
    }

    /// All versions of a job, newest first.
    pub async fn get_job_versions(&self, job_name: &str) -> Result<Vec<JobVersion>> {
        self.versions
            .find_many(&VersionFilter::job(job_name), SortOrder::Descending)
            .await
            .inspect_err(|e| log_failure("get_job_versions", job_name, e))
    }

    pub async fn get_latest_version(&self, job_name: &str) -> Result<Option<JobVersion>> {
        self.versions
            .find_one(&VersionFilter::job(job_name))
            .await
            .inspect_err(|e| log_failure("get_latest_version", job_name, e))
    }

    pub async fn get_version(&self, job_name: &str, version: &str) -> Result<Option<JobVersion>> {
        self.versions
            .find_one(&VersionFilter::exact(job_name, version))
            .await
            .inspect_err(|e| log_failure("get_version", job_name, e))
    }

    /// The live configuration record of a job.
    pub async fn live_config(&self, job_name: &str) -> Result<Option<JobConfigRecord>> {
        self.configs
            .find_one(&ConfigFilter::name(job_name))
            .await
            .inspect_err(|e| log_failure("live_config", job_name, e))
    }

    /// Overwrite the live configuration with the fields stored in
    /// `target_version`. Applying the same rollback twice leaves the same
    /// configuration.
    pub async fn rollback_version(
        &self,
        job_name: &str,
        target_version: &str,
    ) -> Result<JobConfigRecord> {
        let result = async {
            let version = self
                .versions
                .find_one(&VersionFilter::exact(job_name, target_version))
                .await?
                .ok_or_else(|| JobflowError::version_not_found(job_name, target_version))?;

            let snapshot = version.snapshot()?;
            let record = JobConfigRecord::from_snapshot(&snapshot, Utc::now())?;
            self.configs.upsert(record).await
        }
        .await;

        match &result {
            Ok(record) => tracing::info!(
                job = %job_name,
                version = %target_version,
                priority = %record.priority,
                "Job configuration rolled back"
            ),
            Err(error) => log_failure("rollback_version", job_name, error),
        }
        result
    }

    /// Bring storage in line with a job definition: the live record is
    /// rewritten, and the version is recorded when its stored snapshot is
    /// missing or different.
    pub async fn sync_job(&self, snapshot: &JobSnapshot) -> Result<VersionSync> {
        let job_name = snapshot.name.as_str();
        let result: Result<VersionSync> = async {
            let record = JobConfigRecord::from_snapshot(snapshot, Utc::now())?;
            self.configs.upsert(record).await?;

            let stored = self
                .versions
                .find_one(&VersionFilter::exact(job_name, &snapshot.version))
                .await?;
            let outcome = match stored {
                None => VersionSync::Created,
                Some(existing) if existing.snapshot().ok().as_ref() == Some(snapshot) => {
                    return Ok(VersionSync::Unchanged)
                }
                Some(_) => VersionSync::Updated,
            };

            let version = JobVersion::new(job_name, &snapshot.version, snapshot.changes.clone(), snapshot)?;
            self.versions.upsert(version).await?;
            Ok(outcome)
        }
        .await;

        match &result {
            Ok(outcome) => tracing::debug!(
                job = %job_name,
                version = %snapshot.version,
                outcome = ?outcome,
                "Job definition synced"
            ),
            Err(error) => log_failure("sync_job", job_name, error),
        }
        result
    }
}

fn log_failure(operation: &'static str, job_name: &str, error: &JobflowError) {
    tracing::error!(
        operation,
        job = %job_name,
        error_code = %error.code(),
        schema_error = error.is_schema_error(),
        error = %error,
        "Version registry operation failed"
    );
}
