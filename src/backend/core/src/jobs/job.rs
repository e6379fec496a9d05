//! Job identification, classification and the per-run handle.
//!
//! - **JobId**: identifier of one queued job / one run
//! - **JobPriority**: low / normal / high / critical
//! - **JobError**: the error type job handlers return
//! - **JobMetadata**: immutable descriptive metadata captured at registration
//! - **JobConfig**: the live, executable definition of a job
//! - **JobSnapshot**: the serializable projection of a `JobConfig`
//! - **JobHandle**: what every handler receives while a run is in flight

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::batch::BatchConfig;
use super::circuit_breaker::CircuitBreakerConfig;
use super::handlers::{HandlerPresence, JobHandlers};
use super::schedule::ScheduleConfig;
use crate::config::JobDefaults;
use crate::error::{JobflowError, Result};
use crate::telemetry::JobLogger;

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a job run or queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Priority
// ═══════════════════════════════════════════════════════════════════════════════

/// Priority level for jobs.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    /// Processed when nothing else is waiting
    Low = 0,
    /// Default for most jobs
    #[default]
    Normal = 1,
    /// Processed before normal jobs
    High = 2,
    /// Processed first
    Critical = 3,
}

impl JobPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Parse the stored representation. Unknown values fall back to `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Error
// ═══════════════════════════════════════════════════════════════════════════════

/// Error type returned by job handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    /// Error message
    pub message: String,
    /// Whether a retry may succeed
    pub retryable: bool,
    /// Optional error code
    pub code: Option<String>,
    /// Additional context
    pub context: Option<serde_json::Value>,
}

impl JobError {
    /// Create a new retryable error.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            code: None,
            context: None,
        }
    }

    /// Create a new non-retryable (fatal) error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            code: None,
            context: None,
        }
    }

    /// Add an error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Add context.
    pub fn with_context(mut self, context: impl Serialize) -> Self {
        self.context = serde_json::to_value(context).ok();
        self
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (code: {})", code)?;
        }
        Ok(())
    }
}

impl std::error::Error for JobError {}

impl From<JobflowError> for JobError {
    fn from(error: JobflowError) -> Self {
        Self {
            message: error.user_message().to_string(),
            retryable: error.is_retryable(),
            code: Some(error.code().to_string()),
            context: None,
        }
    }
}

impl From<serde_json::Error> for JobError {
    fn from(error: serde_json::Error) -> Self {
        Self::fatal(error.to_string()).with_code("INVALID_PAYLOAD")
    }
}

/// Result type for job handlers.
pub type JobResult<T> = std::result::Result<T, JobError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Backoff Strategy
// ═══════════════════════════════════════════════════════════════════════════════

/// Strategy for calculating the delay before a retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed { delay_ms: u64 },
    /// Exponential increase in delay (initial * multiplier^attempt)
    Exponential {
        initial_delay_ms: u64,
        max_delay_ms: u64,
        multiplier: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential {
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
        }
    }
}

impl BackoffStrategy {
    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let millis = match self {
            Self::Fixed { delay_ms } => *delay_ms,
            Self::Exponential {
                initial_delay_ms,
                max_delay_ms,
                multiplier,
            } => {
                let delay = (*initial_delay_ms as f64) * multiplier.powi(attempt as i32);
                delay.min(*max_delay_ms as f64) as u64
            }
        };

        Duration::from_millis(millis)
    }

    /// Create a fixed backoff strategy.
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed {
            delay_ms: delay.as_millis() as u64,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Metadata
// ═══════════════════════════════════════════════════════════════════════════════

/// Descriptive metadata for a job, fixed at registration time.
///
/// Changing any of it means registering a new version rather than mutating
/// this value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub name: String,
    pub domain: String,
    pub description: String,
    pub priority: JobPriority,
    pub schedule: ScheduleConfig,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl JobMetadata {
    /// Create metadata with normal priority.
    pub fn new(
        name: impl Into<String>,
        domain: impl Into<String>,
        description: impl Into<String>,
        schedule: ScheduleConfig,
    ) -> Self {
        Self {
            name: name.into(),
            domain: domain.into(),
            description: description.into(),
            priority: JobPriority::default(),
            schedule,
            timeout: None,
            retry_limit: None,
            tags: Vec::new(),
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the retry limit.
    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = Some(limit);
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Definition
// ═══════════════════════════════════════════════════════════════════════════════

/// The live, executable definition of a job.
///
/// Optional fields fall back to [`JobDefaults`] at run time.
pub struct JobConfig<I, P = I, O = P> {
    pub name: String,
    pub version: String,
    /// Human-readable change notes for this version
    pub changes: Vec<String>,
    pub handlers: JobHandlers<I, P, O>,
    pub schedule: Option<ScheduleConfig>,
    pub priority: Option<JobPriority>,
    pub batch_size: Option<usize>,
    pub process_size: Option<usize>,
    pub max_pages: Option<u32>,
    pub max_items: Option<usize>,
    pub timeout: Option<Duration>,
    pub retry_limit: Option<u32>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub tags: Vec<String>,
    pub metadata: Option<JobMetadata>,
}

impl<I, P, O> Clone for JobConfig<I, P, O> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            version: self.version.clone(),
            changes: self.changes.clone(),
            handlers: self.handlers.clone(),
            schedule: self.schedule.clone(),
            priority: self.priority,
            batch_size: self.batch_size,
            process_size: self.process_size,
            max_pages: self.max_pages,
            max_items: self.max_items,
            timeout: self.timeout,
            retry_limit: self.retry_limit,
            circuit_breaker: self.circuit_breaker.clone(),
            tags: self.tags.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

impl<I, P, O> fmt::Debug for JobConfig<I, P, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobConfig")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("handlers", &self.handlers)
            .field("schedule", &self.schedule)
            .field("batch_size", &self.batch_size)
            .field("process_size", &self.process_size)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<I, P, O> JobConfig<I, P, O> {
    pub fn new(name: impl Into<String>, version: impl Into<String>, handlers: JobHandlers<I, P, O>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            changes: Vec::new(),
            handlers,
            schedule: None,
            priority: None,
            batch_size: None,
            process_size: None,
            max_pages: None,
            max_items: None,
            timeout: None,
            retry_limit: None,
            circuit_breaker: None,
            tags: Vec::new(),
            metadata: None,
        }
    }

    pub fn with_change(mut self, change: impl Into<String>) -> Self {
        self.changes.push(change.into());
        self
    }

    pub fn with_schedule(mut self, schedule: ScheduleConfig) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_process_size(mut self, process_size: usize) -> Self {
        self.process_size = Some(process_size);
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = Some(max_items);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = Some(limit);
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Attach metadata. Its priority, schedule, timeout and retry limit fill
    /// any of those fields not already set on the config.
    pub fn with_metadata(mut self, metadata: JobMetadata) -> Self {
        self.priority = self.priority.or(Some(metadata.priority));
        if self.schedule.is_none() {
            self.schedule = Some(metadata.schedule.clone());
        }
        self.timeout = self.timeout.or(metadata.timeout);
        self.retry_limit = self.retry_limit.or(metadata.retry_limit);
        self.metadata = Some(metadata);
        self
    }

    /// Log domain: the metadata domain, else the job name.
    pub fn domain(&self) -> &str {
        self.metadata
            .as_ref()
            .map(|m| m.domain.as_str())
            .unwrap_or(self.name.as_str())
    }

    pub fn priority_or_default(&self) -> JobPriority {
        self.priority.unwrap_or_default()
    }

    /// Batch limits with defaults applied.
    pub fn batch_config(&self, defaults: &JobDefaults) -> BatchConfig {
        BatchConfig {
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            process_size: self.process_size.unwrap_or(defaults.process_size),
            max_pages: self.max_pages,
            max_items: self.max_items,
        }
    }

    pub fn effective_timeout(&self, defaults: &JobDefaults) -> Option<Duration> {
        self.timeout.or(defaults.timeout)
    }

    pub fn circuit_breaker_config(&self, defaults: &JobDefaults) -> CircuitBreakerConfig {
        self.circuit_breaker
            .clone()
            .unwrap_or_else(|| defaults.circuit_breaker.clone())
    }

    /// Reject definitions that can never run.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(JobflowError::configuration("Job name must not be empty"));
        }
        if self.version.trim().is_empty() {
            return Err(JobflowError::configuration("Job version must not be empty")
                .with_context("job", &self.name));
        }
        if self.batch_size == Some(0) {
            return Err(JobflowError::configuration("batch_size must be at least 1")
                .with_context("job", &self.name));
        }
        if self.process_size == Some(0) {
            return Err(JobflowError::configuration("process_size must be at least 1")
                .with_context("job", &self.name));
        }
        if let Some(schedule) = &self.schedule {
            schedule
                .validate()
                .map_err(|e| e.with_context("job", &self.name))?;
        }
        if let Some(breaker) = &self.circuit_breaker {
            breaker
                .validate()
                .map_err(|e| e.with_context("job", &self.name))?;
        }
        Ok(())
    }

    /// Serializable projection. Handlers become presence flags.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            name: self.name.clone(),
            version: self.version.clone(),
            changes: self.changes.clone(),
            handlers: self.handlers.presence(),
            schedule: self.schedule.clone(),
            priority: self.priority,
            batch_size: self.batch_size,
            process_size: self.process_size,
            max_pages: self.max_pages,
            max_items: self.max_items,
            timeout_ms: self.timeout.map(|t| t.as_millis() as u64),
            retry_limit: self.retry_limit,
            circuit_breaker: self.circuit_breaker.clone(),
            tags: self.tags.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Serialized form of a [`JobConfig`], stored with every version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub changes: Vec<String>,
    pub handlers: HandlerPresence,
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
    #[serde(default)]
    pub priority: Option<JobPriority>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub process_size: Option<usize>,
    #[serde(default)]
    pub max_pages: Option<u32>,
    #[serde(default)]
    pub max_items: Option<usize>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry_limit: Option<u32>,
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: Option<JobMetadata>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Handle
// ═══════════════════════════════════════════════════════════════════════════════

/// Progress update emitted after each chunk completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgress {
    pub run_id: JobId,
    pub job_name: String,
    /// Zero-based index of the chunk that just finished
    pub chunk_index: usize,
    pub chunks_total: usize,
    /// Items that went into the finished chunk
    pub chunk_items: usize,
    pub succeeded: bool,
    pub timestamp: DateTime<Utc>,
}

impl JobProgress {
    /// Percentage of chunks finished, assuming chunks finish in order.
    pub fn percent(&self) -> u8 {
        if self.chunks_total == 0 {
            return 100;
        }
        (((self.chunk_index + 1) * 100) / self.chunks_total).min(100) as u8
    }
}

/// Handle passed to every handler of a run.
///
/// Cancellation is cooperative: when a run times out the token is cancelled,
/// but work already in flight keeps running unless the handler checks
/// [`JobHandle::is_cancelled`]. Side effects of an abandoned run may still land.
#[derive(Clone)]
pub struct JobHandle {
    run_id: JobId,
    job_name: Arc<str>,
    version: Arc<str>,
    attempt: u32,
    batch: BatchConfig,
    cancellation: CancellationToken,
    progress_sender: Option<mpsc::Sender<JobProgress>>,
    logger: JobLogger,
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("run_id", &self.run_id)
            .field("job_name", &self.job_name)
            .field("version", &self.version)
            .field("attempt", &self.attempt)
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}

impl JobHandle {
    /// Create a handle for a new run.
    pub fn new(job_name: &str, version: &str) -> Self {
        Self {
            run_id: JobId::new(),
            job_name: Arc::from(job_name),
            version: Arc::from(version),
            attempt: 1,
            batch: BatchConfig::default(),
            cancellation: CancellationToken::new(),
            progress_sender: None,
            logger: JobLogger::new(job_name),
        }
    }

    /// Reuse an existing run id (e.g. the queue job id).
    pub fn with_run_id(mut self, run_id: JobId) -> Self {
        self.run_id = run_id;
        self
    }

    /// Set the attempt number (1-indexed).
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Set a progress sender.
    pub fn with_progress_sender(mut self, sender: mpsc::Sender<JobProgress>) -> Self {
        self.progress_sender = Some(sender);
        self
    }

    /// Set the log domain used by [`JobHandle::logger`].
    pub fn with_domain(mut self, domain: &str) -> Self {
        self.logger.set_domain(domain);
        self
    }

    pub(crate) fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    pub fn run_id(&self) -> JobId {
        self.run_id
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Current attempt number (1-indexed).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Batch limits in effect for this run. `before_process` can use
    /// `max_pages` to bound how much it fetches.
    pub fn batch(&self) -> &BatchConfig {
        &self.batch
    }

    pub fn logger(&self) -> &JobLogger {
        &self.logger
    }

    /// Check if the run has been abandoned.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the run has been abandoned.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    /// Run `future` unless the run is abandoned first.
    pub async fn cancellable<F, T>(&self, future: F) -> Option<T>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::select! {
            result = future => Some(result),
            _ = self.cancellation.cancelled() => None,
        }
    }

    pub(crate) fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Never waits on the receiver: a full or closed channel drops the update.
    pub(crate) fn report_progress(&self, progress: JobProgress) {
        let Some(ref sender) = self.progress_sender else {
            return;
        };
        match sender.try_send(progress) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(progress)) => {
                tracing::trace!(
                    run_id = %self.run_id,
                    chunk = progress.chunk_index,
                    "Progress channel full; dropping update"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::trace!(run_id = %self.run_id, "Progress receiver dropped");
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id() {
        let id1 = JobId::new();
        let id2 = JobId::new();
        assert_ne!(id1, id2);

        let uuid = Uuid::new_v4();
        let id = JobId::from_uuid(uuid);
        assert_eq!(id.0, uuid);
    }

    #[test]
    fn test_job_priority_ordering() {
        assert!(JobPriority::Critical > JobPriority::High);
        assert!(JobPriority::High > JobPriority::Normal);
        assert!(JobPriority::Normal > JobPriority::Low);
        assert_eq!(JobPriority::parse("critical"), Some(JobPriority::Critical));
        assert_eq!(JobPriority::parse("urgent"), None);
    }

    #[test]
    fn test_backoff_exponential() {
        let backoff = BackoffStrategy::Exponential {
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            multiplier: 2.0,
        };
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(backoff.delay_for_attempt(10), Duration::from_millis(1000));
    }

    #[test]
    fn test_job_metadata_builder() {
        let metadata = JobMetadata::new(
            "news_links",
            "news",
            "Collects article links",
            ScheduleConfig::daily("06:30"),
        )
        .with_priority(JobPriority::High)
        .with_retry_limit(3)
        .with_tag("scraper");

        assert_eq!(metadata.priority, JobPriority::High);
        assert_eq!(metadata.retry_limit, Some(3));
        assert!(metadata.tags.contains(&"scraper".to_string()));
    }

    #[test]
    fn test_job_error() {
        let error = JobError::retryable("network timeout")
            .with_code("TIMEOUT")
            .with_context(serde_json::json!({"attempt": 3}));

        assert!(error.retryable);
        assert_eq!(error.code, Some("TIMEOUT".to_string()));
        assert!(error.context.is_some());
        assert_eq!(error.to_string(), "network timeout (code: TIMEOUT)");
    }

    #[test]
    fn test_progress_percent() {
        let progress = JobProgress {
            run_id: JobId::new(),
            job_name: "x".into(),
            chunk_index: 1,
            chunks_total: 4,
            chunk_items: 10,
            succeeded: true,
            timestamp: Utc::now(),
        };
        assert_eq!(progress.percent(), 50);
    }

    #[tokio::test]
    async fn test_handle_cancellation() {
        let handle = JobHandle::new("job", "1.0.0");
        let clone = handle.clone();
        assert!(!clone.is_cancelled());

        handle.cancel();
        assert!(clone.is_cancelled());
        let outcome = clone
            .cancellable(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert!(outcome.is_none());
    }
}
