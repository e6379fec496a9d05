//! Structured logging with JSON/pretty/compact formats.
//!
//! - `init_logging` installs the global `tracing` subscriber
//! - `JobLogger` is the per-job logger handed to handlers: a domain label plus
//!   fire-and-forget `debug/info/warn/error(message, context)` calls

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty or compact)
    #[serde(default)]
    pub format: LogFormat,

    /// Per-module log levels
    #[serde(default)]
    pub module_levels: HashMap<String, String>,

    /// Whether to include file/line information
    #[serde(default = "default_include_location")]
    pub include_location: bool,

    /// Whether to include thread information
    #[serde(default)]
    pub include_thread: bool,

    /// Whether to include target (module path)
    #[serde(default = "default_include_target")]
    pub include_target: bool,

    /// Span event configuration
    #[serde(default)]
    pub span_events: SpanEventConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            module_levels: HashMap::new(),
            include_location: default_include_location(),
            include_thread: false,
            include_target: default_include_target(),
            span_events: SpanEventConfig::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON lines for log shippers
    #[default]
    Json,
    /// Multi-line human readable output
    Pretty,
    /// Compact single-line format
    Compact,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub on_new: bool,

    #[serde(default)]
    pub on_enter: bool,

    #[serde(default)]
    pub on_exit: bool,

    #[serde(default = "default_on_close")]
    pub on_close: bool,
}

impl Default for SpanEventConfig {
    fn default() -> Self {
        Self {
            on_new: false,
            on_enter: false,
            on_exit: false,
            on_close: default_on_close(),
        }
    }
}

impl SpanEventConfig {
    fn to_fmt_span(&self) -> FmtSpan {
        let mut span = FmtSpan::NONE;
        if self.on_new {
            span |= FmtSpan::NEW;
        }
        if self.on_enter {
            span |= FmtSpan::ENTER;
        }
        if self.on_exit {
            span |= FmtSpan::EXIT;
        }
        if self.on_close {
            span |= FmtSpan::CLOSE;
        }
        span
    }
}

fn default_log_level() -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
}

fn default_include_location() -> bool {
    true
}

fn default_include_target() -> bool {
    true
}

fn default_on_close() -> bool {
    true
}

/// Build the env filter from the global level plus per-module overrides.
pub fn build_filter(config: &LoggingConfig) -> anyhow::Result<EnvFilter> {
    let mut filter = EnvFilter::try_new(&config.level)?;
    for (module, level) in &config.module_levels {
        let directive = format!("{}={}", module, level);
        filter = filter.add_directive(directive.parse()?);
    }
    Ok(filter)
}

/// Initialize the logging subsystem.
///
/// # Errors
///
/// Returns an error if the filter is malformed or a global subscriber is
/// already installed.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = build_filter(config)?;

    match config.format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_span_events(config.span_events.to_fmt_span())
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_thread_ids(config.include_thread)
                .with_thread_names(config.include_thread)
                .with_target(config.include_target);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_span_events(config.span_events.to_fmt_span())
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_thread_ids(config.include_thread)
                .with_thread_names(config.include_thread)
                .with_target(config.include_target);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_span_events(config.span_events.to_fmt_span())
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_thread_ids(config.include_thread)
                .with_thread_names(config.include_thread)
                .with_target(config.include_target);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()?;
        }
    }

    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Logger
// ═══════════════════════════════════════════════════════════════════════════════

/// Logger handed to job handlers.
///
/// Every call becomes a `tracing` event carrying the job name, the domain and
/// the JSON context. Logging never fails and never affects control flow.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job: Arc<str>,
    domain: Arc<str>,
}

impl JobLogger {
    /// Create a logger for `job`. The domain defaults to the job name.
    pub fn new(job: &str) -> Self {
        let job: Arc<str> = Arc::from(job);
        Self {
            domain: job.clone(),
            job,
        }
    }

    pub fn set_domain(&mut self, domain: &str) {
        self.domain = Arc::from(domain);
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn debug(&self, message: &str, context: serde_json::Value) {
        tracing::debug!(job = %self.job, domain = %self.domain, context = %context, "{}", message);
    }

    pub fn info(&self, message: &str, context: serde_json::Value) {
        tracing::info!(job = %self.job, domain = %self.domain, context = %context, "{}", message);
    }

    pub fn warn(&self, message: &str, context: serde_json::Value) {
        tracing::warn!(job = %self.job, domain = %self.domain, context = %context, "{}", message);
    }

    pub fn error(&self, message: &str, context: serde_json::Value) {
        tracing::error!(job = %self.job, domain = %self.domain, context = %context, "{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.include_location);
        assert!(config.span_events.on_close);
    }

    #[test]
    fn test_build_filter_with_modules() {
        let mut config = LoggingConfig {
            level: "warn".to_string(),
            ..Default::default()
        };
        config
            .module_levels
            .insert("jobflow_core::jobs".to_string(), "debug".to_string());
        assert!(build_filter(&config).is_ok());

        config.level = "not a level[".to_string();
        assert!(build_filter(&config).is_err());
    }

    #[test]
    fn test_job_logger_domain() {
        let mut logger = JobLogger::new("news_links");
        assert_eq!(logger.domain(), "news_links");

        logger.set_domain("news");
        assert_eq!(logger.domain(), "news");
        assert_eq!(logger.job(), "news_links");

        // No subscriber installed: must be a silent no-op.
        logger.info("fetched page", serde_json::json!({"page": 1}));
    }
}
