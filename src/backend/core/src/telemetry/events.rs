//! Best-effort job event emission.
//!
//! Emitting never returns an error and never blocks on I/O; a sink that
//! cannot deliver an event drops it.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

use super::metrics::JobMetrics;

/// Event names emitted by the job system.
pub mod names {
    pub const JOB_STARTED: &str = "job.started";
    pub const JOB_CHUNK_COMPLETED: &str = "job.chunk_completed";
    pub const JOB_COMPLETED: &str = "job.completed";
    pub const JOB_FAILED: &str = "job.failed";
    pub const JOB_REJECTED: &str = "job.rejected";
    pub const JOB_TIMED_OUT: &str = "job.timed_out";
    pub const WORKFLOW_COMPLETED: &str = "workflow.completed";
    pub const WORKFLOW_JOB_FAILED: &str = "workflow.job_failed";
}

/// Receiver of job events.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: &str, payload: Value);
}

/// Shared sink handle.
pub type SharedEventSink = Arc<dyn EventSink>;

/// Logs every event at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &str, payload: Value) {
        tracing::debug!(event = %event, payload = %payload, "Job event");
    }
}

/// Counts events in `jobflow_events_total`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsEventSink;

impl EventSink for MetricsEventSink {
    fn emit(&self, event: &str, _payload: Value) {
        JobMetrics::record_event(event);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: &str, _payload: Value) {}
}

/// Forwards every event to each inner sink in order.
#[derive(Default, Clone)]
pub struct FanoutEventSink {
    sinks: Vec<SharedEventSink>,
}

impl FanoutEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl EventSink) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }
}

impl EventSink for FanoutEventSink {
    fn emit(&self, event: &str, payload: Value) {
        for sink in &self.sinks {
            sink.emit(event, payload.clone());
        }
    }
}

/// Default sink: tracing plus metrics.
pub fn default_sink() -> SharedEventSink {
    Arc::new(
        FanoutEventSink::new()
            .with(TracingEventSink)
            .with(MetricsEventSink),
    )
}

/// In-memory sink for tests and dev.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().clone()
    }

    /// Names in emission order.
    pub fn names(&self) -> Vec<String> {
        self.events.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|(name, _)| name == event).count()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &str, payload: Value) {
        self.events.lock().push((event.to_string(), payload));
    }
}

impl<T: EventSink> EventSink for Arc<T> {
    fn emit(&self, event: &str, payload: Value) {
        (**self).emit(event, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_recording_sink() {
        let sink = RecordingEventSink::new();
        sink.emit(names::JOB_STARTED, json!({"job": "a"}));
        sink.emit(names::JOB_COMPLETED, json!({"job": "a"}));
        sink.emit(names::JOB_STARTED, json!({"job": "b"}));

        assert_eq!(sink.count(names::JOB_STARTED), 2);
        assert_eq!(
            sink.names(),
            vec!["job.started", "job.completed", "job.started"]
        );
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let first = Arc::new(RecordingEventSink::new());
        let second = Arc::new(RecordingEventSink::new());
        let fanout = FanoutEventSink::new()
            .with(first.clone())
            .with(NoopEventSink)
            .with(second.clone());

        fanout.emit(names::JOB_FAILED, json!({}));
        assert_eq!(first.count(names::JOB_FAILED), 1);
        assert_eq!(second.count(names::JOB_FAILED), 1);
    }
}
