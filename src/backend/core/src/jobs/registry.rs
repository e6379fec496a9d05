//! Registry of runnable jobs keyed by name.
//!
//! Typed [`JobConfig`]s are erased behind [`JobRunner`], which speaks JSON:
//! the queue payload decodes into the job's input items and the output is
//! encoded back to JSON.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use super::batch::BatchProcessor;
use super::job::{JobConfig, JobHandle, JobPriority, JobSnapshot};
use super::schedule::ScheduleConfig;
use crate::error::{JobflowError, Result};

/// A registered job, independent of its item types.
#[async_trait]
pub trait JobRunner: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn priority(&self) -> JobPriority;

    fn retry_limit(&self) -> Option<u32>;

    fn schedule(&self) -> Option<&ScheduleConfig>;

    fn snapshot(&self) -> JobSnapshot;

    /// Run once. A `null` payload means "no external input".
    async fn run(
        &self,
        processor: &BatchProcessor,
        payload: serde_json::Value,
        handle: JobHandle,
    ) -> Result<serde_json::Value>;
}

struct TypedJob<I, P, O> {
    config: JobConfig<I, P, O>,
}

#[async_trait]
impl<I, P, O> JobRunner for TypedJob<I, P, O>
where
    I: DeserializeOwned + Send + 'static,
    P: Send + 'static,
    O: Serialize + Send + 'static,
{
    fn name(&self) -> &str {
        &self.config.name
    }

    fn version(&self) -> &str {
        &self.config.version
    }

    fn priority(&self) -> JobPriority {
        self.config.priority_or_default()
    }

    fn retry_limit(&self) -> Option<u32> {
        self.config.retry_limit
    }

    fn schedule(&self) -> Option<&ScheduleConfig> {
        self.config.schedule.as_ref()
    }

    fn snapshot(&self) -> JobSnapshot {
        self.config.snapshot()
    }

    async fn run(
        &self,
        processor: &BatchProcessor,
        payload: serde_json::Value,
        handle: JobHandle,
    ) -> Result<serde_json::Value> {
        let input: Option<Vec<I>> = if payload.is_null() {
            None
        } else {
            Some(
                serde_json::from_value(payload)
                    .map_err(|e| JobflowError::from(e).with_context("job", &self.config.name))?,
            )
        };

        let output = processor.execute(&self.config, input, handle).await?;
        Ok(serde_json::to_value(output)?)
    }
}

/// Erase a typed job definition.
pub fn runner<I, P, O>(config: JobConfig<I, P, O>) -> Arc<dyn JobRunner>
where
    I: DeserializeOwned + Send + 'static,
    P: Send + 'static,
    O: Serialize + Send + 'static,
{
    Arc::new(TypedJob { config })
}

/// Jobs by name. Registering a name again replaces the previous definition.
#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<String, Arc<dyn JobRunner>>,
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.names())
            .finish()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a typed job.
    pub fn register<I, P, O>(&self, config: JobConfig<I, P, O>) -> Result<Arc<dyn JobRunner>>
    where
        I: DeserializeOwned + Send + 'static,
        P: Send + 'static,
        O: Serialize + Send + 'static,
    {
        config.validate()?;
        let job = runner(config);
        self.insert(job.clone());
        Ok(job)
    }

    /// Register an already-erased job.
    pub fn insert(&self, job: Arc<dyn JobRunner>) {
        let name = job.name().to_string();
        if let Some(previous) = self.jobs.insert(name.clone(), job.clone()) {
            tracing::info!(
                job = %name,
                previous_version = %previous.version(),
                version = %job.version(),
                "Job definition replaced"
            );
        } else {
            tracing::info!(job = %name, version = %job.version(), "Job registered");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JobRunner>> {
        self.jobs.get(name).map(|j| j.clone())
    }

    /// Like [`get`](Self::get) but a missing job is a `JobNotFound` error.
    pub fn require(&self, name: &str) -> Result<Arc<dyn JobRunner>> {
        self.get(name).ok_or_else(|| JobflowError::job_not_found(name))
    }

    pub fn remove(&self, name: &str) -> Option<Arc<dyn JobRunner>> {
        self.jobs.remove(name).map(|(_, job)| job)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
