//! Error handling for Jobflow Core.
//!
//! This module provides:
//! - A single error type with machine-readable codes and error chaining
//! - Classification helpers matching the framework's failure taxonomy
//!   (configuration, circuit open, processing, timeout, persistence/schema, not found)
//! - User-facing vs internal messages
//! - Error logging with tracing integration
//! - Metrics integration for error tracking
//!
//! # Usage
//!
//! ```rust,ignore
//! use jobflow_core::error::{JobflowError, Result, ErrorContext, ErrorCode};
//!
//! fn load_snapshot(raw: &str) -> Result<serde_json::Value> {
//!     serde_json::from_str(raw).with_error_code(ErrorCode::DeserializationError)
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Jobflow operations.
pub type Result<T> = std::result::Result<T, JobflowError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Execution Errors (1000-1099)
    CircuitOpen,
    ProcessingFailed,
    JobTimeout,
    InvalidStateTransition,
    JobNotFound,

    // Versioning Errors (1100-1199)
    VersionNotFound,

    // Persistence Errors (2000-2099)
    DatabaseError,
    DatabaseConnectionFailed,
    DatabaseQueryFailed,
    SchemaMismatch,
    RecordNotFound,
    DuplicateRecord,

    // Queue Errors (2100-2199)
    QueueError,
    QueueConnectionFailed,
    QueueFull,

    // Serialization Errors (2200-2299)
    SerializationError,
    DeserializationError,
    InvalidJson,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,
    InvalidSchedule,

    // Internal Errors (9000-9099)
    InternalError,
    UnknownError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::CircuitOpen => 1000,
            Self::ProcessingFailed => 1001,
            Self::JobTimeout => 1002,
            Self::InvalidStateTransition => 1003,
            Self::JobNotFound => 1004,

            Self::VersionNotFound => 1100,

            Self::DatabaseError => 2000,
            Self::DatabaseConnectionFailed => 2001,
            Self::DatabaseQueryFailed => 2002,
            Self::SchemaMismatch => 2003,
            Self::RecordNotFound => 2004,
            Self::DuplicateRecord => 2005,

            Self::QueueError => 2100,
            Self::QueueConnectionFailed => 2101,
            Self::QueueFull => 2102,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,
            Self::InvalidJson => 2202,

            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,
            Self::InvalidConfiguration => 5002,
            Self::InvalidSchedule => 5003,

            Self::InternalError => 9000,
            Self::UnknownError => 9099,
        }
    }

    /// Check if this error is retryable.
    ///
    /// A circuit-open rejection is retryable once the caller has backed off.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen
                | Self::JobTimeout
                | Self::DatabaseConnectionFailed
                | Self::DatabaseQueryFailed
                | Self::QueueError
                | Self::QueueConnectionFailed
                | Self::QueueFull
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "execution",
            1100..=1199 => "versioning",
            2000..=2099 => "persistence",
            2100..=2199 => "queue",
            2200..=2299 => "serialization",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (missing records, bad transitions)
    Low,
    /// Operational issues (open circuits, timeouts, failing handlers)
    Medium,
    /// System errors (database failures, bad configuration)
    High,
    /// Critical errors requiring operator attention
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::JobNotFound
            | ErrorCode::VersionNotFound
            | ErrorCode::RecordNotFound
            | ErrorCode::DuplicateRecord
            | ErrorCode::InvalidStateTransition => Self::Low,

            ErrorCode::CircuitOpen
            | ErrorCode::ProcessingFailed
            | ErrorCode::JobTimeout
            | ErrorCode::QueueFull => Self::Medium,

            ErrorCode::DatabaseError
            | ErrorCode::DatabaseQueryFailed
            | ErrorCode::QueueError
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::InvalidJson
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidConfiguration
            | ErrorCode::InvalidSchedule => Self::High,

            ErrorCode::DatabaseConnectionFailed
            | ErrorCode::QueueConnectionFailed
            | ErrorCode::SchemaMismatch
            | ErrorCode::InternalError
            | ErrorCode::UnknownError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (job name, version, queue job id)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Retry information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,

    /// Suggested action for resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_secs = Some(seconds);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_action = Some(suggestion.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Jobflow Core.
///
/// This error type supports:
/// - Structured error codes
/// - Error chaining with context (the original handler failure is kept as `source`)
/// - User-friendly vs internal messages
/// - Metrics integration
#[derive(Error, Debug)]
pub struct JobflowError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for JobflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl JobflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "An internal error occurred",
            message,
        )
    }

    /// Create a not found error.
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();
        Self::new(
            ErrorCode::RecordNotFound,
            format!("{} not found: {}", entity_type, entity_id),
        )
        .with_details(ErrorDetails::new().with_entity(&entity_type, &entity_id))
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message.into())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        let context = std::mem::take(&mut self.details.context);
        self.details = details;
        for (key, value) in context {
            self.details.context.entry(key).or_insert(value);
        }
        self
    }

    /// Add internal message.
    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-friendly message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Classification
    // ─────────────────────────────────────────────────────────────────────────

    /// Malformed schedule or job configuration.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::ConfigurationError
                | ErrorCode::MissingConfiguration
                | ErrorCode::InvalidConfiguration
                | ErrorCode::InvalidSchedule
        )
    }

    /// Execution refused by an open circuit breaker.
    pub fn is_circuit_open(&self) -> bool {
        self.code == ErrorCode::CircuitOpen
    }

    /// A job handler failed.
    pub fn is_processing_error(&self) -> bool {
        self.code == ErrorCode::ProcessingFailed
    }

    /// A run exceeded its timeout.
    pub fn is_timeout(&self) -> bool {
        self.code == ErrorCode::JobTimeout
    }

    /// A repository call failed. Schema mismatches are persistence errors too.
    pub fn is_persistence_error(&self) -> bool {
        self.code.category() == "persistence"
    }

    /// The storage schema does not match what the framework expects.
    pub fn is_schema_error(&self) -> bool {
        self.code == ErrorCode::SchemaMismatch
    }

    /// A job, version or record does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::JobNotFound | ErrorCode::VersionNotFound | ErrorCode::RecordNotFound
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    source = ?self.source,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    fn record_metrics(&self) {
        counter!(
            "jobflow_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| JobflowError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| JobflowError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| JobflowError::new(ErrorCode::RecordNotFound, message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| JobflowError::new(code, "Resource not found"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Postgres SQLSTATE codes that indicate the schema is not what we expect.
const SCHEMA_SQLSTATES: &[&str] = &[
    "42703", // undefined_column
    "42P01", // undefined_table
    "42804", // datatype_mismatch
    "42P10", // invalid_column_reference (ON CONFLICT target without unique index)
];

impl From<sqlx::Error> for JobflowError {
    fn from(error: sqlx::Error) -> Self {
        let (code, user_msg) = match &error {
            sqlx::Error::RowNotFound => (
                ErrorCode::RecordNotFound,
                "The requested record was not found",
            ),
            sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnIndexOutOfBounds { .. }
            | sqlx::Error::TypeNotFound { .. } => (
                ErrorCode::SchemaMismatch,
                "Stored records do not match the expected schema",
            ),
            sqlx::Error::Database(db_err) => {
                let sqlstate = db_err.code();
                if sqlstate
                    .as_deref()
                    .map(|c| SCHEMA_SQLSTATES.contains(&c))
                    .unwrap_or(false)
                {
                    (
                        ErrorCode::SchemaMismatch,
                        "Stored records do not match the expected schema",
                    )
                } else if let Some(constraint) = db_err.constraint() {
                    if constraint.contains("unique") || constraint.contains("pkey") {
                        return Self::with_internal(
                            ErrorCode::DuplicateRecord,
                            "A record with this identifier already exists",
                            format!("Constraint violation: {}", constraint),
                        )
                        .with_source(error);
                    }
                    (ErrorCode::DatabaseQueryFailed, "A database error occurred")
                } else {
                    (ErrorCode::DatabaseQueryFailed, "A database error occurred")
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => (
                ErrorCode::DatabaseConnectionFailed,
                "Unable to connect to the database",
            ),
            _ => (ErrorCode::DatabaseError, "A database error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<sqlx::migrate::MigrateError> for JobflowError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        Self::with_internal(
            ErrorCode::SchemaMismatch,
            "Database migrations could not be applied",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<redis::RedisError> for JobflowError {
    fn from(error: redis::RedisError) -> Self {
        let (code, user_msg) = if error.is_connection_refusal() || error.is_connection_dropped() {
            (ErrorCode::QueueConnectionFailed, "Unable to connect to the queue")
        } else if error.is_timeout() {
            (ErrorCode::QueueError, "Queue operation timed out")
        } else {
            (ErrorCode::QueueError, "A queue error occurred")
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for JobflowError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() {
            ErrorCode::DeserializationError
        } else if error.is_eof() {
            ErrorCode::InvalidJson
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string())
            .with_source(error)
    }
}

impl From<cron::error::Error> for JobflowError {
    fn from(error: cron::error::Error) -> Self {
        Self::with_internal(
            ErrorCode::InvalidSchedule,
            "Cron expression could not be parsed",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<tokio::sync::AcquireError> for JobflowError {
    fn from(error: tokio::sync::AcquireError) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "Resource acquisition failed",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<tokio::time::error::Elapsed> for JobflowError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::with_internal(ErrorCode::JobTimeout, "Operation timed out", error.to_string())
            .with_source(error)
    }
}

impl From<anyhow::Error> for JobflowError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<JobflowError>() {
            Ok(jobflow_error) => jobflow_error,
            Err(error) => Self::with_internal(
                ErrorCode::InternalError,
                "An internal error occurred",
                error.to_string(),
            ),
        }
    }
}

impl From<config::ConfigError> for JobflowError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_) => (
                ErrorCode::MissingConfiguration,
                "Required configuration not found",
            ),
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => (
                ErrorCode::InvalidConfiguration,
                "Configuration file is invalid",
            ),
            _ => (ErrorCode::ConfigurationError, "Configuration error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors for Domain Errors
// ═══════════════════════════════════════════════════════════════════════════════

impl JobflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Execution Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Execution refused because the job's circuit breaker is open.
    pub fn circuit_open(job_name: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let name = job_name.into();
        let mut details = ErrorDetails::new()
            .with_entity("job", &name)
            .with_suggestion("Back off until the breaker's reset timeout has elapsed");
        if let Some(after) = retry_after {
            details = details.with_retry_after(after.as_secs().max(1));
        }
        Self::new(
            ErrorCode::CircuitOpen,
            format!("Circuit breaker is open for job: {}", name),
        )
        .with_details(details)
    }

    /// A job handler failed. The handler's error is kept as the source.
    pub fn processing_failed(
        job_name: impl Into<String>,
        stage: &'static str,
        cause: crate::jobs::JobError,
    ) -> Self {
        let name = job_name.into();
        Self::with_internal(
            ErrorCode::ProcessingFailed,
            format!("Job {} failed during {}", name, stage),
            cause.to_string(),
        )
        .with_context("stage", stage)
        .with_details(ErrorDetails::new().with_entity("job", &name))
        .with_source(cause)
    }

    /// A run exceeded its configured timeout.
    pub fn job_timeout(job_name: impl Into<String>, timeout: Duration) -> Self {
        let name = job_name.into();
        Self::new(
            ErrorCode::JobTimeout,
            format!("Job {} exceeded its timeout of {}ms", name, timeout.as_millis()),
        )
        .with_context("timeout_ms", timeout.as_millis() as u64)
        .with_details(ErrorDetails::new().with_entity("job", &name))
    }

    /// A queue job attempted to leave a terminal state or skip a state.
    pub fn invalid_state_transition(
        from: crate::jobs::QueueJobState,
        to: crate::jobs::QueueJobState,
    ) -> Self {
        Self::new(
            ErrorCode::InvalidStateTransition,
            format!("Invalid queue job state transition: {} -> {}", from, to),
        )
        .with_context("from_state", from.to_string())
        .with_context("to_state", to.to_string())
    }

    /// No job with this name is registered.
    pub fn job_not_found(job_name: impl Into<String>) -> Self {
        let name = job_name.into();
        Self::new(ErrorCode::JobNotFound, format!("Job not found: {}", name))
            .with_details(ErrorDetails::new().with_entity("job", &name))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Versioning Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// The requested version of a job has never been recorded.
    pub fn version_not_found(job_name: impl Into<String>, version: impl Into<String>) -> Self {
        let name = job_name.into();
        let version = version.into();
        Self::new(
            ErrorCode::VersionNotFound,
            format!("Version {} not found for job {}", version, name),
        )
        .with_context("version", &version)
        .with_details(ErrorDetails::new().with_entity("job", &name))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// A schedule definition is malformed.
    pub fn invalid_schedule(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidSchedule, message.into())
    }

    /// The persistence layer does not have the columns/tables we expect.
    pub fn schema_mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SchemaMismatch, message.into()).with_details(
            ErrorDetails::new().with_suggestion("Run the job table migrations"),
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_is_retryable() {
        assert!(ErrorCode::CircuitOpen.is_retryable());
        assert!(ErrorCode::DatabaseConnectionFailed.is_retryable());
        assert!(!ErrorCode::InvalidSchedule.is_retryable());
        assert!(!ErrorCode::VersionNotFound.is_retryable());
        assert!(!ErrorCode::SchemaMismatch.is_retryable());
    }

    #[test]
    fn test_error_code_category() {
        assert_eq!(ErrorCode::CircuitOpen.category(), "execution");
        assert_eq!(ErrorCode::SchemaMismatch.category(), "persistence");
        assert_eq!(ErrorCode::InvalidSchedule.category(), "configuration");
        assert_eq!(ErrorCode::QueueFull.category(), "queue");
    }

    #[test]
    fn test_classification_helpers() {
        assert!(JobflowError::invalid_schedule("bad").is_config_error());
        assert!(JobflowError::circuit_open("news_links", None).is_circuit_open());
        assert!(JobflowError::job_timeout("x", Duration::from_secs(1)).is_timeout());

        let schema = JobflowError::schema_mismatch("column retry_limit missing");
        assert!(schema.is_schema_error());
        assert!(schema.is_persistence_error());

        let missing = JobflowError::version_not_found("jobX", "9.9");
        assert!(missing.is_not_found());
        assert!(!missing.is_persistence_error());
    }

    #[test]
    fn test_processing_error_keeps_cause() {
        let cause = crate::jobs::JobError::retryable("upstream 503");
        let error = JobflowError::processing_failed("news_links", "process", cause);

        assert!(error.is_processing_error());
        let source = std::error::Error::source(&error).expect("source");
        assert_eq!(source.to_string(), "upstream 503");
        assert_eq!(error.details().entity_id.as_deref(), Some("news_links"));
        assert!(error.details().context.contains_key("stage"));
    }

    #[test]
    fn test_circuit_open_retry_hint() {
        let error = JobflowError::circuit_open("feeds", Some(Duration::from_secs(60)));
        assert_eq!(error.details().retry_after_secs, Some(60));
    }

    #[test]
    fn test_error_context() {
        let error = JobflowError::new(ErrorCode::InvalidConfiguration, "Invalid batch size")
            .with_context("field", "batch_size")
            .with_context("value", 0);

        assert!(error.details().context.contains_key("field"));
        assert!(error.details().context.contains_key("value"));
    }

    #[test]
    fn test_option_context() {
        let missing: Option<u32> = None;
        let error = missing.context("no such row").unwrap_err();
        assert_eq!(error.code(), ErrorCode::RecordNotFound);
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::VersionNotFound),
            ErrorSeverity::Low
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::CircuitOpen),
            ErrorSeverity::Medium
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::InvalidSchedule),
            ErrorSeverity::High
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::SchemaMismatch),
            ErrorSeverity::Critical
        );
    }

    #[test]
    fn test_from_json_error() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error: JobflowError = err.into();
        assert_eq!(error.code(), ErrorCode::DeserializationError);
    }

    #[test]
    fn test_error_display() {
        let error = JobflowError::with_internal(
            ErrorCode::DatabaseError,
            "Database write failed",
            "Connection refused: localhost:5432",
        );

        let display = format!("{}", error);
        assert!(display.contains("DatabaseError"));
        assert!(display.contains("Database write failed"));
        assert!(display.contains("Connection refused"));
    }
}
