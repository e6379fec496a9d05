//! Job worker: polls the queue and runs registered jobs.
//!
//! Up to `concurrency` jobs run at once. A failed run is retried with backoff
//! while the job's `retry_limit` allows and the failure is retryable, then the
//! queue entry is acked with its final outcome.

use serde::{Deserialize, Serialize};
use std::error::Error as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

use super::batch::BatchProcessor;
use super::job::{BackoffStrategy, JobError, JobHandle};
use super::queue::{JobOutcome, JobQueue, QueueJob};
use super::registry::{JobRegistry, JobRunner};
use crate::error::{JobflowError, Result};

/// Configuration for the job worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum concurrent job executions
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Sleep between polls when the queue is empty
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// How long shutdown waits for in-flight jobs
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Worker name/identifier
    #[serde(default = "default_worker_name")]
    pub name: String,
    /// Delay between retries of a failed run
    #[serde(default)]
    pub backoff: BackoffStrategy,
}

fn default_concurrency() -> usize {
    4
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_worker_name() -> String {
    "jobflow-worker".to_string()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval: default_poll_interval(),
            shutdown_timeout: default_shutdown_timeout(),
            name: default_worker_name(),
            backoff: BackoffStrategy::default(),
        }
    }
}

/// Statistics for the job worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    /// Queue jobs taken
    pub processed: Arc<AtomicU64>,
    pub succeeded: Arc<AtomicU64>,
    pub failed: Arc<AtomicU64>,
    /// Retry attempts made (not counting first attempts)
    pub retried: Arc<AtomicU64>,
    /// Currently running jobs
    pub active: Arc<AtomicU64>,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    stats: WorkerStats,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to stop polling. In-flight jobs keep running.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Stop polling and wait for in-flight jobs (bounded by `shutdown_timeout`).
    pub async fn stop(self) {
        self.shutdown();
        let _ = self.task.await;
    }
}

/// Whether a failed run is worth another attempt.
///
/// Handler failures carry their own retry flag; everything else goes by
/// error code. Circuit-open rejections are never retried in-line.
pub fn should_retry(error: &JobflowError) -> bool {
    if error.is_circuit_open() {
        return false;
    }
    if error.is_processing_error() {
        return error
            .source()
            .and_then(|source| source.downcast_ref::<JobError>())
            .map(|cause| cause.retryable)
            .unwrap_or(false);
    }
    error.is_retryable()
}

/// Job worker that processes jobs from a queue.
#[derive(Clone)]
pub struct JobWorker {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    registry: Arc<JobRegistry>,
    processor: BatchProcessor,
    stats: WorkerStats,
}

impl JobWorker {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<JobQueue>,
        registry: Arc<JobRegistry>,
        processor: BatchProcessor,
    ) -> Self {
        Self {
            config,
            queue,
            registry,
            processor,
            stats: WorkerStats::new(),
        }
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Start the poll loop, returning a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let stats = self.stats.clone();

        let task = tokio::spawn(async move {
            let config = self.config.clone();
            let semaphore = Arc::new(Semaphore::new(config.concurrency));

            tracing::info!(
                worker = %config.name,
                concurrency = config.concurrency,
                "Job worker started"
            );

            loop {
                let permit = tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    permit = semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };
                if *shutdown_rx.borrow() {
                    break;
                }

                match self.queue.poll().await {
                    Ok(Some(job)) => {
                        let worker = self.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            worker.process(job).await;
                        });
                    }
                    Ok(None) => {
                        drop(permit);
                        tokio::select! {
                            _ = shutdown_rx.changed() => break,
                            _ = tokio::time::sleep(config.poll_interval) => {}
                        }
                    }
                    Err(error) => {
                        drop(permit);
                        error.log();
                        tokio::select! {
                            _ = shutdown_rx.changed() => break,
                            _ = tokio::time::sleep(config.poll_interval) => {}
                        }
                    }
                }
            }

            tracing::info!(worker = %config.name, "Worker shutting down");
            let drained = tokio::time::timeout(
                config.shutdown_timeout,
                semaphore.acquire_many(config.concurrency as u32),
            )
            .await;
            if drained.is_err() {
                tracing::warn!(
                    worker = %config.name,
                    active = self.stats.active(),
                    "Shutdown timeout elapsed with jobs still running"
                );
            }
            tracing::info!(worker = %config.name, "Worker stopped");
        });

        WorkerHandle {
            shutdown: shutdown_tx,
            stats,
            task,
        }
    }

    /// Poll and process a single job in the current task.
    pub async fn run_once(&self) -> Result<Option<QueueJob>> {
        match self.queue.poll().await? {
            Some(job) => Ok(Some(self.process(job).await)),
            None => Ok(None),
        }
    }

    /// Run a polled job to completion and ack it. Returns the acked entry, or
    /// the polled one if the ack itself failed.
    pub async fn process(&self, job: QueueJob) -> QueueJob {
        self.stats.processed.fetch_add(1, Ordering::Relaxed);
        self.stats.active.fetch_add(1, Ordering::Relaxed);

        let outcome = self.execute(&job).await;
        match &outcome {
            JobOutcome::Completed => self.stats.succeeded.fetch_add(1, Ordering::Relaxed),
            _ => self.stats.failed.fetch_add(1, Ordering::Relaxed),
        };
        self.stats.active.fetch_sub(1, Ordering::Relaxed);

        match self.queue.ack(job.id, outcome).await {
            Ok(acked) => acked,
            Err(error) => {
                error.log();
                job
            }
        }
    }

    async fn execute(&self, job: &QueueJob) -> JobOutcome {
        let Some(runner) = self.registry.get(&job.name) else {
            let error = JobflowError::job_not_found(&job.name);
            error.log();
            return JobOutcome::Failed {
                error: error.to_string(),
            };
        };

        let run = run_with_retries(runner.as_ref(), &self.processor, job, &self.config.backoff).await;
        self.stats
            .retried
            .fetch_add(u64::from(run.attempts.saturating_sub(1)), Ordering::Relaxed);
        run.outcome()
    }
}

/// Result of running a queue job, retries included.
#[derive(Debug)]
pub struct JobRun {
    pub result: Result<serde_json::Value>,
    /// Attempts made, at least 1
    pub attempts: u32,
}

impl JobRun {
    pub fn outcome(&self) -> JobOutcome {
        match &self.result {
            Ok(_) => JobOutcome::Completed,
            Err(error) => JobOutcome::Failed {
                error: error.to_string(),
            },
        }
    }
}

/// Run a queue job, retrying retryable failures up to the job's retry limit.
pub async fn run_with_retries(
    runner: &dyn JobRunner,
    processor: &BatchProcessor,
    job: &QueueJob,
    backoff: &BackoffStrategy,
) -> JobRun {
    let retry_limit = runner.retry_limit().unwrap_or(0);
    let mut attempt = 1u32;

    loop {
        let handle = JobHandle::new(runner.name(), runner.version())
            .with_run_id(job.id)
            .with_attempt(attempt);

        match runner.run(processor, job.data.clone(), handle).await {
            Err(error) if attempt <= retry_limit && should_retry(&error) => {
                let delay = backoff.delay_for_attempt(attempt - 1);
                tracing::info!(
                    job = %job.name,
                    job_id = %job.id,
                    attempt,
                    retry_limit,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying job"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => {
                return JobRun {
                    result,
                    attempts: attempt,
                }
            }
        }
    }
}
