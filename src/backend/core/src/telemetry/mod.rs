//! Telemetry: logging, metrics and job events.
//!
//! - **Logging**: structured JSON/pretty/compact output via `tracing-subscriber`,
//!   plus the per-job [`JobLogger`]
//! - **Metrics**: Prometheus recorder and job-system recording helpers
//! - **Events**: the best-effort [`EventSink`] used by the batch processor and
//!   the workflow coordinator
//!
//! # Example
//!
//! ```rust,no_run
//! use jobflow_core::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let handle = init_telemetry(&TelemetryConfig::default()).expect("telemetry");
//! println!("{}", handle.metrics.render());
//! ```

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{
    default_sink, EventSink, FanoutEventSink, MetricsEventSink, NoopEventSink,
    RecordingEventSink, SharedEventSink, TracingEventSink,
};
pub use logging::{init_logging, JobLogger, LogFormat, LoggingConfig, SpanEventConfig};
pub use metrics::{init_metrics, JobMetrics, MetricsConfig, MetricsRegistry, RunTimer};

use serde::Deserialize;

/// Logging plus metrics configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Handle returned by [`init_telemetry`].
#[derive(Debug)]
pub struct TelemetryHandle {
    pub metrics: MetricsRegistry,
}

/// Install the metrics recorder and the global subscriber.
///
/// # Errors
///
/// Returns an error if either component fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<TelemetryHandle> {
    let metrics = init_metrics(&config.metrics)?;
    init_logging(&config.logging)?;

    ::tracing::info!(
        metrics_enabled = metrics.is_enabled(),
        format = ?config.logging.format,
        "Telemetry initialized"
    );

    Ok(TelemetryHandle { metrics })
}
