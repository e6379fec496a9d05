//! Per-job circuit breaker.
//!
//! Stops invoking a job's handlers after `failure_threshold` consecutive
//! failed runs, then lets a bounded number of trial runs through once
//! `reset_timeout` has elapsed.
//!
//! ```text
//!   CLOSED ──(threshold consecutive failures)──▶ OPEN
//!     ▲                                           │
//!     │ success                      reset_timeout elapsed
//!     │                                           ▼
//!     └──────────────────────────────────────  HALF_OPEN ──(failure)──▶ OPEN (fresh window)
//! ```

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{JobflowError, Result};
use crate::telemetry::JobMetrics;

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Breaker settings for one job. Disabled unless a job opts in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Consecutive failed runs before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long the breaker stays open before probing
    #[serde(default = "default_reset_timeout", with = "humantime_serde")]
    pub reset_timeout: Duration,

    /// Trial runs admitted per half-open window
    #[serde(default = "default_half_open_retries")]
    pub half_open_retries: u32,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_half_open_retries() -> u32 {
    1
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            failure_threshold: default_failure_threshold(),
            reset_timeout: default_reset_timeout(),
            half_open_retries: default_half_open_retries(),
        }
    }
}

impl CircuitBreakerConfig {
    /// An enabled breaker with one half-open trial.
    pub fn enabled(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            enabled: true,
            failure_threshold,
            reset_timeout,
            half_open_retries: default_half_open_retries(),
        }
    }

    pub fn with_half_open_retries(mut self, retries: u32) -> Self {
        self.half_open_retries = retries;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.failure_threshold == 0 {
            return Err(JobflowError::configuration(
                "circuit_breaker.failure_threshold must be at least 1",
            ));
        }
        if self.half_open_retries == 0 {
            return Err(JobflowError::configuration(
                "circuit_breaker.half_open_retries must be at least 1",
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// State
// ═══════════════════════════════════════════════════════════════════════════════

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Runs allowed
    Closed,
    /// Runs rejected until the reset timeout elapses
    Open,
    /// A limited number of trial runs allowed
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerState {
    pub status: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub trials_remaining: u32,
}

/// Counters for one breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    pub job_name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
}

#[derive(Debug)]
struct Inner {
    config: CircuitBreakerConfig,
    status: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    opened_at_wall: Option<DateTime<Utc>>,
    trials_remaining: u32,
    /// When the most recent half-open trial was handed out
    last_trial_at: Option<Instant>,
}

impl Inner {
    fn open(&mut self) {
        self.status = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.opened_at_wall = Some(Utc::now());
        self.trials_remaining = 0;
        self.last_trial_at = None;
    }

    fn close(&mut self) {
        self.status = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.opened_at_wall = None;
        self.trials_remaining = 0;
        self.last_trial_at = None;
    }

    /// Start a trial window: the caller gets the first trial.
    fn arm_trials(&mut self) {
        self.trials_remaining = self.config.half_open_retries.saturating_sub(1);
        self.last_trial_at = Some(Instant::now());
    }

    /// Trials that never reported an outcome (a dropped run) stop blocking
    /// the breaker once `reset_timeout` has passed since the last one.
    fn trials_abandoned(&self) -> bool {
        self.last_trial_at
            .map(|at| at.elapsed() >= self.config.reset_timeout)
            .unwrap_or(true)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Circuit Breaker
// ═══════════════════════════════════════════════════════════════════════════════

/// Failure-tracking state machine for one job.
///
/// All transitions happen under a single lock, so concurrent workers recording
/// outcomes for the same job never interleave a read-modify-write.
pub struct CircuitBreaker {
    job_name: String,
    inner: Mutex<Inner>,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("job_name", &self.job_name)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(job_name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            job_name: job_name.into(),
            inner: Mutex::new(Inner {
                config,
                status: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                opened_at_wall: None,
                trials_remaining: 0,
                last_trial_at: None,
            }),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.inner.lock().config.clone()
    }

    /// Swap in new settings. Current state and counters are kept.
    pub fn reconfigure(&self, config: CircuitBreakerConfig) {
        let mut inner = self.inner.lock();
        if inner.config != config {
            tracing::debug!(job = %self.job_name, ?config, "Circuit breaker reconfigured");
            inner.config = config;
        }
    }

    /// Check whether a run may start.
    ///
    /// Moving OPEN → HALF_OPEN and consuming a half-open trial both happen
    /// here.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.config.enabled {
            return true;
        }

        let status = inner.status;
        let allowed = match status {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed() >= inner.config.reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    inner.status = CircuitState::HalfOpen;
                    inner.arm_trials();
                    tracing::info!(
                        job = %self.job_name,
                        trials = inner.config.half_open_retries,
                        "Circuit breaker transitioning to half-open"
                    );
                    JobMetrics::record_breaker_transition(
                        &self.job_name,
                        CircuitState::Open,
                        CircuitState::HalfOpen,
                    );
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.trials_remaining > 0 {
                    inner.trials_remaining -= 1;
                    inner.last_trial_at = Some(Instant::now());
                    true
                } else if inner.trials_abandoned() {
                    tracing::warn!(
                        job = %self.job_name,
                        "Half-open trials went unanswered; issuing a fresh trial window"
                    );
                    inner.arm_trials();
                    true
                } else {
                    false
                }
            }
        };

        if !allowed {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
        }
        allowed
    }

    /// Record a successful run.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if !inner.config.enabled {
            return;
        }
        self.total_successes.fetch_add(1, Ordering::Relaxed);

        let status = inner.status;
        match status {
            CircuitState::HalfOpen => {
                inner.close();
                tracing::info!(job = %self.job_name, "Circuit breaker closed after successful trial");
                JobMetrics::record_breaker_transition(
                    &self.job_name,
                    CircuitState::HalfOpen,
                    CircuitState::Closed,
                );
            }
            CircuitState::Closed | CircuitState::Open => {
                inner.consecutive_failures = 0;
            }
        }
    }

    /// Record a failed run.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        if !inner.config.enabled {
            return;
        }
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        let status = inner.status;
        match status {
            CircuitState::HalfOpen => {
                inner.open();
                tracing::warn!(
                    job = %self.job_name,
                    "Circuit breaker re-opened after failed trial"
                );
                JobMetrics::record_breaker_transition(
                    &self.job_name,
                    CircuitState::HalfOpen,
                    CircuitState::Open,
                );
            }
            CircuitState::Closed => {
                if inner.consecutive_failures >= inner.config.failure_threshold {
                    inner.open();
                    tracing::warn!(
                        job = %self.job_name,
                        failures = inner.consecutive_failures,
                        threshold = inner.config.failure_threshold,
                        "Circuit breaker opened due to consecutive failures"
                    );
                    JobMetrics::record_breaker_transition(
                        &self.job_name,
                        CircuitState::Closed,
                        CircuitState::Open,
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().status
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        let inner = self.inner.lock();
        CircuitBreakerState {
            status: inner.status,
            consecutive_failures: inner.consecutive_failures,
            opened_at: inner.opened_at_wall,
            trials_remaining: inner.trials_remaining,
        }
    }

    /// Time left until an open breaker admits a trial.
    pub fn retry_after(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        match (inner.status, inner.opened_at) {
            (CircuitState::Open, Some(at)) => {
                Some(inner.config.reset_timeout.saturating_sub(at.elapsed()))
            }
            _ => None,
        }
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        CircuitBreakerMetrics {
            job_name: self.job_name.clone(),
            state: inner.status,
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: inner.config.failure_threshold,
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }

    /// Force the breaker closed.
    pub fn reset(&self) {
        self.inner.lock().close();
        JobMetrics::record_breaker_state(&self.job_name, CircuitState::Closed);
        tracing::info!(job = %self.job_name, "Circuit breaker manually reset");
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════════════

/// One breaker per job name, shared by every worker in the process.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Breaker for `job_name`, created on first use. An existing breaker picks
    /// up `config` if it changed.
    pub fn get_or_create(&self, job_name: &str, config: &CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let breaker = self
            .breakers
            .entry(job_name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(job_name, config.clone())))
            .clone();
        breaker.reconfigure(config.clone());
        breaker
    }

    pub fn get(&self, job_name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(job_name).map(|b| b.clone())
    }

    pub fn reset(&self, job_name: &str) -> bool {
        match self.breakers.get(job_name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.iter() {
            breaker.reset();
        }
    }

    pub fn metrics(&self) -> Vec<CircuitBreakerMetrics> {
        let mut metrics: Vec<_> = self.breakers.iter().map(|b| b.metrics()).collect();
        metrics.sort_by(|a, b| a.job_name.cmp(&b.job_name));
        metrics
    }
}
