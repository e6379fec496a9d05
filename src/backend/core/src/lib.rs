#![allow(clippy::result_large_err)]
//! # Jobflow Core
//!
//! Declarative background job orchestration.
//!
//! ## Architecture
//!
//! - **Jobs**: versioned job definitions with a typed handler pipeline
//!   (`before_process → process (chunked) → after_process → on_success | on_error`)
//! - **Schedules**: interval, daily, weekly, monthly and cron schedules
//! - **Circuit Breakers**: per-job failure gating with half-open probing
//! - **Batch Processor**: chunked execution with sliding-window concurrency
//! - **Queue**: priority job queue with in-memory and Redis backends
//! - **Workflows**: bounded-concurrency job groups with live status
//! - **Versions**: configuration history and rollback over PostgreSQL or memory
//! - **Telemetry**: structured logging, Prometheus metrics and job events

pub mod config;
pub mod error;
pub mod jobs;
pub mod store;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, JobflowError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, DatabaseConfig, JobDefaults, WorkflowDefaults};
    pub use crate::error::{
        ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, JobflowError, Result,
    };
    pub use crate::jobs::{
        BatchConfig, BatchProcessor, CircuitBreaker, CircuitBreakerConfig,
        CircuitBreakerRegistry, CircuitState, DayOfMonth, IntervalUnit, JobConfig, JobError,
        JobHandle, JobHandlers, JobId, JobMetadata, JobPriority, JobQueue, JobRegistry,
        JobResult, JobScheduler, JobWorker, QueueConfig, QueueJob, QueueJobState,
        ScheduleConfig, VersionRegistry, WorkerConfig, Workflow, WorkflowCoordinator,
        WorkflowJob, WorkflowStatus,
    };
    pub use crate::store::{
        InMemoryRepository, JobConfigRecord, JobVersion, PostgresStore, Repository, SortOrder,
    };
    pub use crate::telemetry::{
        init_telemetry, EventSink, JobLogger, RecordingEventSink, TelemetryConfig,
    };
}
