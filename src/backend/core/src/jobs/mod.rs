//! Background Job System for Jobflow Core.
//!
//! This module provides the declarative job framework:
//!
//! - **Job Definitions**: versioned [`JobConfig`]s with a typed handler pipeline
//! - **Schedules**: interval / daily / weekly / monthly / cron schedules resolved in UTC
//! - **Circuit Breakers**: per-job failure gating
//! - **Batch Processor**: chunked execution with bounded concurrency
//! - **Queue**: priority queue with in-memory and Redis backends and dead letters
//! - **Worker**: concurrent queue consumption with retries and graceful shutdown
//! - **Workflows**: bounded-concurrency groups of runs with live status
//! - **Versions**: configuration history with rollback
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                         Background Job System                                │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐    ┌─────────────┐  │
//! │  │  JobConfig  │    │  Scheduler  │    │    Queue    │    │   Worker /  │  │
//! │  │  (registry) │───▶│  (schedule  │───▶│  (Redis/    │───▶│  Workflow   │  │
//! │  │             │    │   resolver) │    │  in-memory) │    │             │  │
//! │  └─────────────┘    └─────────────┘    └─────────────┘    └─────────────┘  │
//! │         │                                                        │         │
//! │         ▼                                                        ▼         │
//! │  ┌─────────────┐                                   ┌─────────────────────┐ │
//! │  │  Version    │                                   │  Circuit Breaker ─▶ │ │
//! │  │  Registry   │                                   │  Batch Processor    │ │
//! │  └─────────────┘                                   └─────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use jobflow_core::jobs::{
//!     JobConfig, JobHandlers, JobRegistry, BatchProcessor, JobQueue,
//!     JobWorker, WorkerConfig, ScheduleConfig,
//! };
//!
//! let handlers = JobHandlers::new(|urls: Vec<String>, handle| async move {
//!     handle.logger().info("processing chunk", serde_json::json!({ "items": urls.len() }));
//!     Ok(urls.into_iter().map(|u| u.len()).collect::<Vec<_>>())
//! });
//!
//! let registry = Arc::new(JobRegistry::new());
//! registry.register(
//!     JobConfig::new("news_links", "1.0.0", handlers)
//!         .with_batch_size(10)
//!         .with_schedule(ScheduleConfig::daily("06:00")),
//! )?;
//!
//! let queue = Arc::new(JobQueue::in_memory());
//! let worker = JobWorker::new(WorkerConfig::default(), queue, registry, BatchProcessor::default());
//! let handle = worker.start();
//! ```

pub mod batch;
pub mod circuit_breaker;
pub mod handlers;
pub mod job;
pub mod queue;
pub mod registry;
pub mod schedule;
pub mod scheduler;
pub mod version;
pub mod worker;
pub mod workflow;

pub use batch::{partition, BatchConfig, BatchProcessor};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerRegistry,
    CircuitBreakerState, CircuitState,
};
pub use handlers::{HandlerPresence, JobHandlers};
pub use job::{
    BackoffStrategy, JobConfig, JobError, JobHandle, JobId, JobMetadata, JobPriority,
    JobProgress, JobResult, JobSnapshot,
};
pub use queue::{
    DeadLetterQueue, InMemoryQueueBackend, JobOutcome, JobQueue, QueueBackend, QueueConfig,
    QueueJob, QueueJobState, QueueStats, RedisQueueBackend,
};
pub use registry::{runner, JobRegistry, JobRunner};
pub use schedule::{DayOfMonth, IntervalSpec, IntervalUnit, ScheduleConfig, ScheduleKind};
pub use scheduler::{JobScheduler, ScheduledJob};
pub use version::{VersionRegistry, VersionSync};
pub use worker::{run_with_retries, should_retry, JobRun, JobWorker, WorkerConfig, WorkerHandle, WorkerStats};
pub use workflow::{
    Workflow, WorkflowCoordinator, WorkflowHandle, WorkflowJob, WorkflowReport, WorkflowStatus,
    WorkflowStatusHandle,
};
