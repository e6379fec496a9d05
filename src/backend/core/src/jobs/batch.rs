//! Batch processor: drives a job's handler pipeline.
//!
//! A run is gated by the job's circuit breaker, fetches its input, splits it
//! into chunks of `batch_size`, and pushes the chunks through `process` with at
//! most `process_size` in flight. A slot frees as soon as any chunk finishes.
//! Output keeps the original chunk order whatever order chunks finish in.
//!
//! Runs are at-least-once, not atomic: a failing chunk does not undo what
//! earlier chunks wrote.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use super::circuit_breaker::CircuitBreakerRegistry;
use super::handlers::guard_panics;
use super::job::{JobConfig, JobError, JobHandle, JobProgress, JobResult};
use crate::config::JobDefaults;
use crate::error::{JobflowError, Result};
use crate::telemetry::events::names;
use crate::telemetry::{default_sink, JobMetrics, RunTimer, SharedEventSink};

// ═══════════════════════════════════════════════════════════════════════════════
// Batch Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Batch limits for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum items per `process` invocation
    pub batch_size: usize,
    /// Maximum concurrent `process` invocations
    pub process_size: usize,
    /// Upper bound on pages `before_process` should fetch
    #[serde(default)]
    pub max_pages: Option<u32>,
    /// Input is truncated to this many items before chunking
    #[serde(default)]
    pub max_items: Option<usize>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            process_size: 4,
            max_pages: None,
            max_items: None,
        }
    }
}

impl BatchConfig {
    pub fn new(batch_size: usize, process_size: usize) -> Self {
        Self {
            batch_size,
            process_size,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(JobflowError::configuration("batch_size must be at least 1"));
        }
        if self.process_size == 0 {
            return Err(JobflowError::configuration("process_size must be at least 1"));
        }
        Ok(())
    }

    /// Number of `process` invocations for `items` input items.
    pub fn chunk_count(&self, items: usize) -> usize {
        let items = self.max_items.map_or(items, |max| items.min(max));
        items.div_ceil(self.batch_size.max(1))
    }
}

/// Split `items` into consecutive chunks of at most `size`, keeping order.
pub fn partition<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut chunks = Vec::with_capacity(items.len().div_ceil(size));
    let mut iter = items.into_iter();
    loop {
        let chunk: Vec<T> = iter.by_ref().take(size).collect();
        if chunk.is_empty() {
            break;
        }
        chunks.push(chunk);
    }
    chunks
}

// ═══════════════════════════════════════════════════════════════════════════════
// Batch Processor
// ═══════════════════════════════════════════════════════════════════════════════

/// Runs job pipelines. Cheap to clone; clones share breakers and the event sink.
#[derive(Clone)]
pub struct BatchProcessor {
    breakers: Arc<CircuitBreakerRegistry>,
    events: SharedEventSink,
    defaults: JobDefaults,
}

impl std::fmt::Debug for BatchProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl Default for BatchProcessor {
    fn default() -> Self {
        Self::new(Arc::new(CircuitBreakerRegistry::new()))
    }
}

impl BatchProcessor {
    pub fn new(breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            breakers,
            events: default_sink(),
            defaults: JobDefaults::default(),
        }
    }

    pub fn with_events(mut self, events: SharedEventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_defaults(mut self, defaults: JobDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn defaults(&self) -> &JobDefaults {
        &self.defaults
    }

    /// Run a job whose input comes from `before_process`.
    pub async fn run<I, P, O>(&self, config: &JobConfig<I, P, O>, handle: JobHandle) -> Result<Vec<O>>
    where
        I: Send + 'static,
        P: Send + 'static,
        O: Send + 'static,
    {
        self.execute(config, None, handle).await
    }

    /// Run a job, optionally with externally supplied input.
    ///
    /// `before_process`, when defined, takes precedence over `input`.
    pub async fn execute<I, P, O>(
        &self,
        config: &JobConfig<I, P, O>,
        input: Option<Vec<I>>,
        handle: JobHandle,
    ) -> Result<Vec<O>>
    where
        I: Send + 'static,
        P: Send + 'static,
        O: Send + 'static,
    {
        let batch = config.batch_config(&self.defaults);
        batch
            .validate()
            .map_err(|e| e.with_context("job", &config.name))?;

        let handle = handle.with_batch(batch.clone()).with_domain(config.domain());
        let breaker = self
            .breakers
            .get_or_create(&config.name, &config.circuit_breaker_config(&self.defaults));

        if !breaker.allow() {
            let error = JobflowError::circuit_open(&config.name, breaker.retry_after());
            tracing::warn!(
                job = %config.name,
                version = %config.version,
                run_id = %handle.run_id(),
                "Run rejected: circuit breaker open"
            );
            self.events.emit(
                names::JOB_REJECTED,
                json!({ "job": config.name, "version": config.version, "run_id": handle.run_id() }),
            );
            JobMetrics::record_run(&config.name, "rejected", 0.0);
            return Err(error);
        }

        tracing::info!(
            job = %config.name,
            version = %config.version,
            run_id = %handle.run_id(),
            attempt = handle.attempt(),
            batch_size = batch.batch_size,
            process_size = batch.process_size,
            "Job run started"
        );
        self.events.emit(
            names::JOB_STARTED,
            json!({
                "job": config.name,
                "version": config.version,
                "run_id": handle.run_id(),
                "attempt": handle.attempt(),
            }),
        );

        let timer = RunTimer::start(&config.name);
        let pipeline = self.pipeline(config, input, handle.clone(), &batch);

        let outcome = match config.effective_timeout(&self.defaults) {
            Some(timeout) => match tokio::time::timeout(timeout, pipeline).await {
                Ok(result) => result,
                Err(_) => {
                    // Chunks already spawned keep running; their results are dropped.
                    handle.cancel();
                    Err(JobflowError::job_timeout(&config.name, timeout))
                }
            },
            None => pipeline.await,
        };

        match outcome {
            Ok(output) => {
                breaker.record_success();
                config.handlers.notify_success(&output);
                let duration = timer.finish("completed");
                tracing::info!(
                    job = %config.name,
                    run_id = %handle.run_id(),
                    items = output.len(),
                    duration_ms = duration.as_millis() as u64,
                    "Job run completed"
                );
                self.events.emit(
                    names::JOB_COMPLETED,
                    json!({
                        "job": config.name,
                        "run_id": handle.run_id(),
                        "items": output.len(),
                        "duration_ms": duration.as_millis() as u64,
                    }),
                );
                Ok(output)
            }
            Err(error) => {
                breaker.record_failure();
                error.log();
                config.handlers.notify_error(&error);

                let (event, outcome) = if error.is_timeout() {
                    (names::JOB_TIMED_OUT, "timed_out")
                } else {
                    (names::JOB_FAILED, "failed")
                };
                let duration = timer.finish(outcome);
                tracing::warn!(
                    job = %config.name,
                    run_id = %handle.run_id(),
                    error = %error,
                    duration_ms = duration.as_millis() as u64,
                    "Job run failed"
                );
                self.events.emit(
                    event,
                    json!({
                        "job": config.name,
                        "run_id": handle.run_id(),
                        "error": error.to_string(),
                        "code": error.code().to_string(),
                    }),
                );
                Err(error)
            }
        }
    }

    async fn pipeline<I, P, O>(
        &self,
        config: &JobConfig<I, P, O>,
        input: Option<Vec<I>>,
        handle: JobHandle,
        batch: &BatchConfig,
    ) -> Result<Vec<O>>
    where
        I: Send + 'static,
        P: Send + 'static,
        O: Send + 'static,
    {
        let handlers = &config.handlers;

        let mut items = match &handlers.before_process {
            Some(before) => guard_panics("before_process", before(handle.clone()))
                .await
                .map_err(|e| JobflowError::processing_failed(&config.name, "before_process", e))?,
            None => input.unwrap_or_default(),
        };

        if let Some(max) = batch.max_items {
            if items.len() > max {
                tracing::debug!(job = %config.name, total = items.len(), max, "Truncating input");
                items.truncate(max);
            }
        }

        let chunks = partition(items, batch.batch_size);
        let chunks_total = chunks.len();
        let semaphore = Arc::new(Semaphore::new(batch.process_size));
        let mut tasks: Vec<JoinHandle<JobResult<Vec<P>>>> = Vec::with_capacity(chunks_total);

        for (chunk_index, chunk) in chunks.into_iter().enumerate() {
            let permit = semaphore.clone().acquire_owned().await?;
            let process = handlers.process.clone();
            let handle = handle.clone();
            let events = self.events.clone();
            let job_name = config.name.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                let chunk_items = chunk.len();
                let started = Instant::now();
                let result = guard_panics("process", process(chunk, handle.clone())).await;
                let succeeded = result.is_ok();
                let elapsed = started.elapsed();

                JobMetrics::record_chunk(&job_name, succeeded, elapsed.as_secs_f64());
                tracing::debug!(
                    job = %job_name,
                    run_id = %handle.run_id(),
                    chunk = chunk_index,
                    chunks_total,
                    items = chunk_items,
                    succeeded,
                    "Chunk finished"
                );
                events.emit(
                    names::JOB_CHUNK_COMPLETED,
                    json!({
                        "job": job_name,
                        "run_id": handle.run_id(),
                        "chunk": chunk_index,
                        "chunks_total": chunks_total,
                        "items": chunk_items,
                        "succeeded": succeeded,
                    }),
                );
                handle
                    .report_progress(JobProgress {
                        run_id: handle.run_id(),
                        job_name: job_name.clone(),
                        chunk_index,
                        chunks_total,
                        chunk_items,
                        succeeded,
                        timestamp: Utc::now(),
                    });

                result
            }));
        }

        let mut processed = Vec::new();
        let mut first_failure: Option<(usize, JobError)> = None;

        for (chunk_index, task) in tasks.into_iter().enumerate() {
            let result = task.await.unwrap_or_else(|join_error| {
                Err(JobError::fatal(format!("chunk task aborted: {}", join_error)))
            });
            match result {
                Ok(mut chunk_output) if first_failure.is_none() => processed.append(&mut chunk_output),
                Ok(_) => {}
                Err(error) => {
                    if first_failure.is_none() {
                        first_failure = Some((chunk_index, error));
                    }
                }
            }
        }

        if let Some((chunk_index, error)) = first_failure {
            return Err(JobflowError::processing_failed(&config.name, "process", error)
                .with_context("chunk", chunk_index)
                .with_context("chunks_total", chunks_total));
        }

        guard_panics("after_process", handlers.finish(processed, handle))
            .await
            .map_err(|e| JobflowError::processing_failed(&config.name, "after_process", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobHandlers;

    #[test]
    fn test_partition_preserves_order() {
        let chunks = partition((1..=23).collect::<Vec<_>>(), 5);
        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[4], vec![21, 22, 23]);
        assert_eq!(chunks.concat(), (1..=23).collect::<Vec<_>>());
        assert!(partition(Vec::<u8>::new(), 5).is_empty());
    }

    #[test]
    fn test_chunk_count_respects_max_items() {
        let mut batch = BatchConfig::new(10, 2);
        assert_eq!(batch.chunk_count(25), 3);
        batch.max_items = Some(12);
        assert_eq!(batch.chunk_count(25), 2);
    }

    #[test]
    fn test_batch_config_validate() {
        assert!(BatchConfig::new(0, 1).validate().is_err());
        assert!(BatchConfig::new(1, 0).validate().is_err());
        assert!(BatchConfig::default().validate().is_ok());
    }

    #[tokio::test]
    async fn test_external_input_used_without_before_process() {
        let processor = BatchProcessor::default();
        let config = JobConfig::new(
            "squares",
            "1.0.0",
            JobHandlers::new(|items: Vec<u64>, _h| async move {
                Ok(items.into_iter().map(|n| n * n).collect())
            }),
        )
        .with_batch_size(2);

        let output = processor
            .execute(&config, Some(vec![1, 2, 3]), JobHandle::new("squares", "1.0.0"))
            .await
            .unwrap();
        assert_eq!(output, vec![1, 4, 9]);
    }

    #[tokio::test]
    async fn test_max_items_truncates_input() {
        let processor = BatchProcessor::default();
        let config = JobConfig::new(
            "capped",
            "1.0.0",
            JobHandlers::new(|items: Vec<u32>, _h| async move { Ok(items) }),
        )
        .with_max_items(3);

        let output = processor
            .execute(&config, Some((0..10).collect()), JobHandle::new("capped", "1.0.0"))
            .await
            .unwrap();
        assert_eq!(output, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_handle_exposes_batch_limits() {
        let processor = BatchProcessor::default();
        let config = JobConfig::new(
            "paged",
            "1.0.0",
            JobHandlers::new(|items: Vec<u32>, _h| async move { Ok(items) })
                .with_before_process(|handle: JobHandle| async move {
                    let pages = handle.batch().max_pages.unwrap_or(1);
                    Ok((0..pages).collect())
                }),
        )
        .with_max_pages(4);

        let output = processor
            .run(&config, JobHandle::new("paged", "1.0.0"))
            .await
            .unwrap();
        assert_eq!(output, vec![0, 1, 2, 3]);
    }
}
