//! Workflow coordinator.
//!
//! A workflow is a group of job runs tracked as one aggregate status. All of
//! its jobs are queued up front; at most `concurrency` of them are active at
//! a time and a finished job frees its slot for the next pending one. One
//! failing job never cancels its siblings.
//!
//! ```text
//!   pending ──admit──▶ active ──▶ completed
//!                          └────▶ failed ──▶ on_fail
//!
//!   pending + active == 0 && failed == 0  ──▶ on_complete (once)
//! ```

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use super::batch::BatchProcessor;
use super::handlers::{panic_message, run_hook};
use super::job::{BackoffStrategy, JobId, JobPriority};
use super::queue::{InMemoryQueueBackend, JobOutcome, QueueBackend, QueueJob, QueueJobState};
use super::registry::JobRegistry;
use super::worker::run_with_retries;
use crate::config::WorkflowDefaults;
use crate::error::{JobflowError, Result};
use crate::telemetry::events::names;
use crate::telemetry::{default_sink, JobMetrics, SharedEventSink};

// ═══════════════════════════════════════════════════════════════════════════════
// Workflow Definition
// ═══════════════════════════════════════════════════════════════════════════════

/// One job run inside a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowJob {
    /// Registered job name
    pub name: String,
    /// Queue payload. `null` lets the job fetch its own input.
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub priority: JobPriority,
}

impl WorkflowJob {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Value::Null,
            priority: JobPriority::default(),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }
}

pub type OnCompleteFn = Arc<dyn Fn(&WorkflowStatus) + Send + Sync>;
pub type OnFailFn = Arc<dyn Fn(&QueueJob, &JobflowError) + Send + Sync>;

/// A named group of job runs.
#[derive(Clone)]
pub struct Workflow {
    pub name: String,
    pub jobs: Vec<WorkflowJob>,
    /// Maximum simultaneously active jobs. `None` falls back to the
    /// coordinator default, which is unbounded unless configured.
    pub concurrency: Option<usize>,
    on_complete: Option<OnCompleteFn>,
    on_fail: Option<OnFailFn>,
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("jobs", &self.jobs.len())
            .field("concurrency", &self.concurrency)
            .field("has_on_complete", &self.on_complete.is_some())
            .field("has_on_fail", &self.on_fail.is_some())
            .finish()
    }
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            jobs: Vec::new(),
            concurrency: None,
            on_complete: None,
            on_fail: None,
        }
    }

    pub fn with_job(mut self, job: WorkflowJob) -> Self {
        self.jobs.push(job);
        self
    }

    pub fn with_jobs(mut self, jobs: impl IntoIterator<Item = WorkflowJob>) -> Self {
        self.jobs.extend(jobs);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Called once, after every job finished, if none failed.
    pub fn on_complete<F>(mut self, hook: F) -> Self
    where
        F: Fn(&WorkflowStatus) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(hook));
        self
    }

    /// Called for every failed job.
    pub fn on_fail<F>(mut self, hook: F) -> Self
    where
        F: Fn(&QueueJob, &JobflowError) + Send + Sync + 'static,
    {
        self.on_fail = Some(Arc::new(hook));
        self
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(JobflowError::configuration("Workflow name must not be empty"));
        }
        if self.concurrency == Some(0) {
            return Err(JobflowError::configuration("Workflow concurrency must be at least 1")
                .with_context("workflow", &self.name));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Live counts for a workflow run.
///
/// `completed + failed + pending + active == total` at every observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    pub active: usize,
}

impl WorkflowStatus {
    fn new(total: usize) -> Self {
        Self {
            total,
            pending: total,
            ..Default::default()
        }
    }

    /// Every job reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.completed + self.failed == self.total
    }

    pub fn is_success(&self) -> bool {
        self.is_finished() && self.failed == 0
    }
}

/// Shared, read-only view of a running workflow's status.
#[derive(Debug, Clone)]
pub struct WorkflowStatusHandle {
    inner: Arc<Mutex<WorkflowStatus>>,
}

impl WorkflowStatusHandle {
    fn new(total: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(WorkflowStatus::new(total))),
        }
    }

    /// Current snapshot.
    pub fn get(&self) -> WorkflowStatus {
        *self.inner.lock()
    }

    fn admit(&self) -> WorkflowStatus {
        let mut status = self.inner.lock();
        status.pending = status.pending.saturating_sub(1);
        status.active += 1;
        *status
    }

    fn finish(&self, succeeded: bool) -> WorkflowStatus {
        let mut status = self.inner.lock();
        status.active = status.active.saturating_sub(1);
        if succeeded {
            status.completed += 1;
        } else {
            status.failed += 1;
        }
        *status
    }
}

/// Final result of a workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowReport {
    pub name: String,
    pub status: WorkflowStatus,
    /// Terminal queue entries, in the order the jobs were declared
    pub jobs: Vec<QueueJob>,
    pub duration: Duration,
}

impl WorkflowReport {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn failed_jobs(&self) -> impl Iterator<Item = &QueueJob> {
        self.jobs.iter().filter(|job| job.state == QueueJobState::Failed)
    }
}

/// Handle to a workflow started in the background.
pub struct WorkflowHandle {
    status: WorkflowStatusHandle,
    task: JoinHandle<Result<WorkflowReport>>,
}

impl fmt::Debug for WorkflowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowHandle")
            .field("status", &self.status.get())
            .finish_non_exhaustive()
    }
}

impl WorkflowHandle {
    pub fn status(&self) -> WorkflowStatus {
        self.status.get()
    }

    pub fn status_handle(&self) -> WorkflowStatusHandle {
        self.status.clone()
    }

    /// Wait for every job to finish.
    pub async fn wait(self) -> Result<WorkflowReport> {
        self.task
            .await
            .map_err(|e| JobflowError::internal(format!("Workflow task failed: {}", e)))?
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Coordinator
// ═══════════════════════════════════════════════════════════════════════════════

/// Runs workflows against registered jobs.
#[derive(Clone)]
pub struct WorkflowCoordinator {
    registry: Arc<JobRegistry>,
    processor: BatchProcessor,
    events: SharedEventSink,
    defaults: WorkflowDefaults,
    backoff: BackoffStrategy,
}

impl fmt::Debug for WorkflowCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowCoordinator")
            .field("registry", &self.registry)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl WorkflowCoordinator {
    pub fn new(registry: Arc<JobRegistry>, processor: BatchProcessor) -> Self {
        Self {
            registry,
            processor,
            events: default_sink(),
            defaults: WorkflowDefaults::default(),
            backoff: BackoffStrategy::default(),
        }
    }

    pub fn with_events(mut self, events: SharedEventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_defaults(mut self, defaults: WorkflowDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Delay between retries of a job that allows them.
    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run a workflow to completion.
    pub async fn run(&self, workflow: Workflow) -> Result<WorkflowReport> {
        self.start(workflow)?.wait().await
    }

    /// Start a workflow in the background. Status is readable immediately.
    pub fn start(&self, workflow: Workflow) -> Result<WorkflowHandle> {
        workflow.validate()?;

        let status = WorkflowStatusHandle::new(workflow.jobs.len());
        let coordinator = self.clone();
        let task_status = status.clone();
        let task = tokio::spawn(async move { coordinator.drive(workflow, task_status).await });

        Ok(WorkflowHandle { status, task })
    }

    async fn drive(self, workflow: Workflow, status: WorkflowStatusHandle) -> Result<WorkflowReport> {
        let started = Instant::now();
        let workflow = Arc::new(workflow);
        let total = workflow.jobs.len();
        let limit = workflow
            .concurrency
            .or(self.defaults.concurrency)
            .unwrap_or(total)
            .max(1);

        tracing::info!(
            workflow = %workflow.name,
            jobs = total,
            concurrency = limit,
            "Workflow started"
        );

        let backend: Arc<dyn QueueBackend> = Arc::new(InMemoryQueueBackend::new());
        let mut order: Vec<JobId> = Vec::with_capacity(total);
        for job in &workflow.jobs {
            let entry = QueueJob::new(job.name.clone(), job.data.clone()).with_priority(job.priority);
            order.push(entry.id);
            backend.enqueue(entry).await?;
        }

        let semaphore = Arc::new(Semaphore::new(limit));
        let mut tasks = Vec::with_capacity(total);

        loop {
            let permit = semaphore.clone().acquire_owned().await?;
            let Some(job) = backend.poll().await? else {
                break;
            };

            let snapshot = status.admit();
            JobMetrics::set_workflow_active(&workflow.name, snapshot.active);
            tracing::debug!(
                workflow = %workflow.name,
                job = %job.name,
                job_id = %job.id,
                active = snapshot.active,
                pending = snapshot.pending,
                "Workflow job admitted"
            );

            let coordinator = self.clone();
            let task_workflow = workflow.clone();
            let task_status = status.clone();
            let task_backend = backend.clone();
            let admitted = job.clone();
            let task = tokio::spawn(async move {
                let _permit = permit;
                coordinator
                    .run_job(&task_workflow, &task_status, task_backend.as_ref(), job)
                    .await
            });
            tasks.push((admitted, task));
        }

        let mut finished = Vec::with_capacity(total);
        for (admitted, task) in tasks {
            match task.await {
                Ok(job) => finished.push(job),
                Err(join_error) => {
                    // The job still counts: settle it as failed so the status stays whole.
                    let error = JobflowError::internal(format!("Workflow job task aborted: {}", join_error))
                        .with_context("workflow", &workflow.name)
                        .with_context("job", &admitted.name);
                    let job = self
                        .settle(&workflow, &status, backend.as_ref(), admitted, Err(error))
                        .await;
                    finished.push(job);
                }
            }
        }
        finished.sort_by_key(|job| order.iter().position(|id| *id == job.id));

        let final_status = status.get();
        JobMetrics::set_workflow_active(&workflow.name, 0);
        self.events.emit(
            names::WORKFLOW_COMPLETED,
            json!({
                "workflow": workflow.name,
                "total": final_status.total,
                "completed": final_status.completed,
                "failed": final_status.failed,
            }),
        );

        if final_status.failed == 0 {
            if let Some(hook) = &workflow.on_complete {
                run_hook("on_complete", || hook(&final_status));
            }
            tracing::info!(workflow = %workflow.name, completed = final_status.completed, "Workflow completed");
        } else {
            tracing::warn!(
                workflow = %workflow.name,
                completed = final_status.completed,
                failed = final_status.failed,
                "Workflow finished with failures"
            );
        }

        Ok(WorkflowReport {
            name: workflow.name.clone(),
            status: final_status,
            jobs: finished,
            duration: started.elapsed(),
        })
    }

    async fn run_job(
        &self,
        workflow: &Workflow,
        status: &WorkflowStatusHandle,
        backend: &dyn QueueBackend,
        job: QueueJob,
    ) -> QueueJob {
        let result = match self.registry.require(&job.name) {
            Ok(runner) => {
                let run = run_with_retries(runner.as_ref(), &self.processor, &job, &self.backoff);
                match AssertUnwindSafe(run).catch_unwind().await {
                    Ok(run) => run.result,
                    Err(payload) => Err(JobflowError::internal(format!(
                        "Job {} panicked: {}",
                        job.name,
                        panic_message(payload.as_ref())
                    ))),
                }
            }
            Err(error) => Err(error),
        };

        self.settle(workflow, status, backend, job, result).await
    }

    /// Ack a finished job, update the status and fire failure notifications.
    async fn settle(
        &self,
        workflow: &Workflow,
        status: &WorkflowStatusHandle,
        backend: &dyn QueueBackend,
        job: QueueJob,
        result: Result<Value>,
    ) -> QueueJob {
        let outcome = match &result {
            Ok(_) => JobOutcome::Completed,
            Err(error) => JobOutcome::Failed {
                error: error.to_string(),
            },
        };

        let acked = match backend.ack(job.id, outcome.clone()).await {
            Ok(acked) => acked,
            Err(error) => {
                error.log();
                let mut local = job;
                if let Err(transition) = local.finish(&outcome) {
                    tracing::debug!(job_id = %local.id, error = %transition, "Local job state not updated");
                }
                local
            }
        };

        let snapshot = status.finish(result.is_ok());
        JobMetrics::set_workflow_active(&workflow.name, snapshot.active);

        if let Err(error) = &result {
            tracing::warn!(
                workflow = %workflow.name,
                job = %acked.name,
                job_id = %acked.id,
                error_code = %error.code(),
                error = %error,
                "Workflow job failed"
            );
            let payload = json!({
                "workflow": workflow.name,
                "job": acked.name,
                "job_id": acked.id.to_string(),
                "error": error.to_string(),
            });
            run_hook("event_sink", || self.events.emit(names::WORKFLOW_JOB_FAILED, payload));
            if let Some(hook) = &workflow.on_fail {
                run_hook("on_fail", || hook(&acked, error));
            }
        }

        acked
    }
}
