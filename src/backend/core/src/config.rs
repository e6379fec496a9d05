//! Configuration management.
//!
//! Values come from an optional file, then from `JOBFLOW__*` environment
//! variables (`JOBFLOW__WORKER__CONCURRENCY=8`). A `.env` file is read first
//! when present.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{JobflowError, Result};
use crate::jobs::{CircuitBreakerConfig, QueueConfig, WorkerConfig};
use crate::telemetry::{LoggingConfig, MetricsConfig, TelemetryConfig};

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Database configuration. Without it, job configuration lives in memory.
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Defaults applied to jobs that leave a setting unset
    #[serde(default)]
    pub jobs: JobDefaults,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub workflow: WorkflowDefaults,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_acquire_timeout", with = "humantime_serde")]
    pub acquire_timeout: Duration,

    /// Apply the bundled migrations on connect
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout: default_acquire_timeout(),
            run_migrations: default_run_migrations(),
        }
    }
}

/// Fallbacks for settings a job definition leaves unset.
#[derive(Debug, Clone, Deserialize)]
pub struct JobDefaults {
    /// Items per `process` invocation
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Chunks in flight at once
    #[serde(default = "default_process_size")]
    pub process_size: usize,

    /// Run timeout. `None` lets runs take as long as they need.
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            process_size: default_process_size(),
            timeout: None,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowDefaults {
    /// Jobs admitted at once when a workflow sets no limit. `None` is unbounded.
    #[serde(default)]
    pub concurrency: Option<usize>,
}

// Default value functions
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 5 }
fn default_acquire_timeout() -> Duration { Duration::from_secs(5) }
fn default_run_migrations() -> bool { true }
fn default_batch_size() -> usize { 100 }
fn default_process_size() -> usize { 4 }

impl Config {
    /// Load configuration from environment and config files.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("JOBFLOW").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("JOBFLOW").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values no component can run with.
    pub fn validate(&self) -> Result<()> {
        if self.jobs.batch_size == 0 {
            return Err(JobflowError::configuration("jobs.batch_size must be at least 1"));
        }
        if self.jobs.process_size == 0 {
            return Err(JobflowError::configuration("jobs.process_size must be at least 1"));
        }
        if self.worker.concurrency == 0 {
            return Err(JobflowError::configuration("worker.concurrency must be at least 1"));
        }
        if self.workflow.concurrency == Some(0) {
            return Err(JobflowError::configuration("workflow.concurrency must be at least 1"));
        }
        self.jobs.circuit_breaker.validate()?;
        if let Some(database) = &self.database {
            if database.url.trim().is_empty() {
                return Err(JobflowError::configuration("database.url must not be empty"));
            }
            if database.min_connections > database.max_connections {
                return Err(JobflowError::configuration(
                    "database.min_connections exceeds database.max_connections",
                ));
            }
        }
        Ok(())
    }

    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            logging: self.logging.clone(),
            metrics: self.metrics.clone(),
        }
    }
}
