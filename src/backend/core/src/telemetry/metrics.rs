//! Prometheus metrics for job runs, chunks, breakers, queues and workflows.
//!
//! Recording goes through the `metrics` facade, so every helper here is a
//! no-op until [`init_metrics`] installs a recorder.
//!
//! # Example
//!
//! ```rust,no_run
//! use jobflow_core::telemetry::metrics::JobMetrics;
//!
//! JobMetrics::record_run("news_links", "completed", 1.25);
//! JobMetrics::set_queue_depth(12);
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::jobs::CircuitState;

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Address the host should expose `render()` on (informational)
    #[serde(default = "default_metrics_endpoint")]
    pub endpoint: String,

    /// Histogram buckets for run/chunk durations (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,

    /// Labels added to every metric
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            endpoint: default_metrics_endpoint(),
            duration_buckets: default_duration_buckets(),
            global_labels: HashMap::new(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_endpoint() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_duration_buckets() -> Vec<f64> {
    vec![
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0,
    ]
}

/// Handle to the installed Prometheus recorder.
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// Registry without a recorder; `render` returns an empty string.
    pub fn disabled() -> Self {
        Self {
            prometheus_handle: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.prometheus_handle.is_some()
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }
}

/// Initialize the metrics subsystem.
///
/// # Errors
///
/// Returns an error if the buckets are invalid or a recorder is already
/// installed.
pub fn init_metrics(config: &MetricsConfig) -> anyhow::Result<MetricsRegistry> {
    if !config.enabled {
        return Ok(MetricsRegistry::disabled());
    }

    let mut builder = PrometheusBuilder::new();
    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }
    builder = builder.set_buckets(&config.duration_buckets)?;

    let handle = builder.install_recorder()?;
    register_metric_descriptions();

    tracing::info!(endpoint = %config.endpoint, "Metrics initialized");

    Ok(MetricsRegistry {
        prometheus_handle: Some(handle),
    })
}

fn register_metric_descriptions() {
    describe_counter!("jobflow_job_runs_total", "Job runs by outcome");
    describe_histogram!(
        "jobflow_job_duration_seconds",
        "Wall-clock duration of a job run"
    );
    describe_counter!("jobflow_chunks_total", "Processed chunks by outcome");
    describe_histogram!(
        "jobflow_chunk_duration_seconds",
        "Duration of a single process_function invocation"
    );
    describe_gauge!(
        "jobflow_circuit_breaker_state",
        "Breaker state per job (0=closed, 1=half_open, 2=open)"
    );
    describe_counter!(
        "jobflow_circuit_breaker_transitions_total",
        "Breaker state transitions"
    );
    describe_gauge!("jobflow_queue_depth", "Jobs waiting in the queue");
    describe_counter!("jobflow_queue_jobs_total", "Queue jobs by final state");
    describe_gauge!("jobflow_workflow_active_jobs", "Jobs active per workflow");
    describe_counter!("jobflow_events_total", "Emitted job events by name");
    describe_counter!("jobflow_errors_total", "Errors by code and category");
}

/// Recording helpers for the job system.
pub struct JobMetrics;

impl JobMetrics {
    /// Record a finished run. `outcome` is completed / failed / rejected / timed_out.
    pub fn record_run(job: &str, outcome: &'static str, duration_seconds: f64) {
        counter!(
            "jobflow_job_runs_total",
            "job" => job.to_string(),
            "outcome" => outcome,
        )
        .increment(1);

        histogram!("jobflow_job_duration_seconds", "job" => job.to_string())
            .record(duration_seconds);
    }

    pub fn record_chunk(job: &str, succeeded: bool, duration_seconds: f64) {
        counter!(
            "jobflow_chunks_total",
            "job" => job.to_string(),
            "success" => succeeded.to_string(),
        )
        .increment(1);

        histogram!("jobflow_chunk_duration_seconds", "job" => job.to_string())
            .record(duration_seconds);
    }

    pub fn record_breaker_state(job: &str, state: CircuitState) {
        let value = match state {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        };
        gauge!("jobflow_circuit_breaker_state", "job" => job.to_string()).set(value);
    }

    pub fn record_breaker_transition(job: &str, from: CircuitState, to: CircuitState) {
        counter!(
            "jobflow_circuit_breaker_transitions_total",
            "job" => job.to_string(),
            "from" => from.as_str(),
            "to" => to.as_str(),
        )
        .increment(1);
        Self::record_breaker_state(job, to);
    }

    pub fn set_queue_depth(depth: u64) {
        gauge!("jobflow_queue_depth").set(depth as f64);
    }

    pub fn record_queue_outcome(job: &str, state: &'static str) {
        counter!(
            "jobflow_queue_jobs_total",
            "job" => job.to_string(),
            "state" => state,
        )
        .increment(1);
    }

    pub fn set_workflow_active(workflow: &str, active: usize) {
        gauge!("jobflow_workflow_active_jobs", "workflow" => workflow.to_string())
            .set(active as f64);
    }

    pub fn record_event(event: &str) {
        counter!("jobflow_events_total", "event" => event.to_string()).increment(1);
    }
}

/// Measures one run and records it on `finish`.
pub struct RunTimer {
    start: Instant,
    job: String,
}

impl RunTimer {
    pub fn start(job: &str) -> Self {
        Self {
            start: Instant::now(),
            job: job.to_string(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn finish(self, outcome: &'static str) -> Duration {
        let duration = self.start.elapsed();
        JobMetrics::record_run(&self.job, outcome, duration.as_secs_f64());
        duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_config_defaults() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert_eq!(config.endpoint, "0.0.0.0:9090");
        assert!(!config.duration_buckets.is_empty());
    }

    #[test]
    fn test_disabled_registry_renders_nothing() {
        let config = MetricsConfig {
            enabled: false,
            ..Default::default()
        };
        let registry = init_metrics(&config).unwrap();
        assert!(!registry.is_enabled());
        assert_eq!(registry.render(), "");
    }

    #[test]
    fn test_run_timer() {
        let timer = RunTimer::start("job");
        std::thread::sleep(Duration::from_millis(10));
        let duration = timer.finish("completed");
        assert!(duration.as_millis() >= 10);
    }

    #[test]
    fn test_helpers_without_recorder() {
        JobMetrics::record_chunk("job", true, 0.01);
        JobMetrics::record_breaker_transition("job", CircuitState::Closed, CircuitState::Open);
        JobMetrics::set_queue_depth(3);
        JobMetrics::record_event("job.started");
    }
}
