//! Job queue with priority ordering, validated state transitions and dead
//! letter retention.
//!
//! ```text
//! created ──poll──▶ active ──ack──▶ completed | failed | expired
//! ```
//!
//! Delivery is at-least-once; handlers must tolerate seeing a payload twice.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::job::{JobId, JobPriority};
use crate::error::{ErrorCode, JobflowError, Result};
use crate::telemetry::JobMetrics;

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration for the job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum pending jobs (0 = unlimited)
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// Jobs older than this when polled are expired instead of run
    #[serde(default = "default_max_age", with = "humantime_serde")]
    pub max_age: Option<Duration>,
    /// Whether failed jobs are kept in the dead letter queue
    #[serde(default = "default_enable_dead_letter")]
    pub enable_dead_letter: bool,
    /// Maximum items in the dead letter queue
    #[serde(default = "default_dead_letter_max_size")]
    pub dead_letter_max_size: usize,
    /// Redis URL; the in-memory backend is used when absent
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Key prefix for the Redis backend
    #[serde(default = "default_queue_key")]
    pub queue_key: String,
    /// How long a Redis poll blocks waiting for work
    #[serde(default = "default_poll_timeout", with = "humantime_serde")]
    pub poll_timeout: Duration,
}

fn default_max_size() -> usize {
    10_000
}

fn default_max_age() -> Option<Duration> {
    Some(Duration::from_secs(86_400))
}

fn default_enable_dead_letter() -> bool {
    true
}

fn default_dead_letter_max_size() -> usize {
    1_000
}

fn default_queue_key() -> String {
    "jobflow:jobs".to_string()
}

fn default_poll_timeout() -> Duration {
    Duration::from_secs(1)
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            max_age: default_max_age(),
            enable_dead_letter: default_enable_dead_letter(),
            dead_letter_max_size: default_dead_letter_max_size(),
            redis_url: None,
            queue_key: default_queue_key(),
            poll_timeout: default_poll_timeout(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Queue Job
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle state of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueJobState {
    Created,
    Active,
    Completed,
    Failed,
    Expired,
}

impl QueueJobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired)
    }

    /// Whether `self → next` is a legal step.
    pub fn can_transition_to(&self, next: QueueJobState) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Active)
                | (Self::Created, Self::Expired)
                | (Self::Active, Self::Completed)
                | (Self::Active, Self::Failed)
                | (Self::Active, Self::Expired)
        )
    }
}

impl fmt::Display for QueueJobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a polled job ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    Failed { error: String },
    Expired,
}

impl JobOutcome {
    pub fn state(&self) -> QueueJobState {
        match self {
            Self::Completed => QueueJobState::Completed,
            Self::Failed { .. } => QueueJobState::Failed,
            Self::Expired => QueueJobState::Expired,
        }
    }
}

/// A unit of work on the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJob {
    pub id: JobId,
    /// Registered job name this entry runs
    pub name: String,
    /// JSON payload handed to the job
    pub data: serde_json::Value,
    pub priority: JobPriority,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub state: QueueJobState,
    /// Last failure message
    #[serde(default)]
    pub error: Option<String>,
}

impl QueueJob {
    pub fn new(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: JobId::new(),
            name: name.into(),
            data,
            priority: JobPriority::default(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            state: QueueJobState::Created,
            error: None,
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Move to `next`, stamping `started_at` / `completed_at`.
    pub fn transition(&mut self, next: QueueJobState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(JobflowError::invalid_state_transition(self.state, next)
                .with_context("job_id", self.id.to_string())
                .with_context("job", &self.name));
        }

        let now = Utc::now();
        if next == QueueJobState::Active {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.state = next;
        Ok(())
    }

    /// Apply an ack outcome.
    pub fn finish(&mut self, outcome: &JobOutcome) -> Result<()> {
        self.transition(outcome.state())?;
        if let JobOutcome::Failed { error } = outcome {
            self.error = Some(error.clone());
        }
        Ok(())
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or_default()
    }
}

/// Queue statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
    pub expired: u64,
    pub dead_letter: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Backends
// ═══════════════════════════════════════════════════════════════════════════════

/// Storage behind a [`JobQueue`].
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Store a `created` job.
    async fn enqueue(&self, job: QueueJob) -> Result<()>;

    /// Take the highest-priority job (FIFO within a priority) and mark it
    /// `active`. `None` when nothing is waiting.
    async fn poll(&self) -> Result<Option<QueueJob>>;

    /// Finish an `active` job.
    async fn ack(&self, id: JobId, outcome: JobOutcome) -> Result<QueueJob>;

    async fn stats(&self) -> Result<QueueStats>;

    /// Pending (not yet polled) jobs.
    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

#[derive(Debug)]
struct HeapEntry {
    job: QueueJob,
    seq: u64,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.job
            .priority
            .cmp(&other.job.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    pending: BinaryHeap<HeapEntry>,
    active: HashMap<JobId, QueueJob>,
    next_seq: u64,
    completed: u64,
    failed: u64,
    expired: u64,
}

/// In-memory backend for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryQueueBackend {
    state: Mutex<MemoryState>,
}

impl InMemoryQueueBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueueBackend {
    async fn enqueue(&self, job: QueueJob) -> Result<()> {
        if job.state != QueueJobState::Created {
            return Err(JobflowError::invalid_state_transition(job.state, QueueJobState::Created));
        }
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.push(HeapEntry { job, seq });
        Ok(())
    }

    async fn poll(&self) -> Result<Option<QueueJob>> {
        let mut state = self.state.lock();
        let Some(HeapEntry { mut job, .. }) = state.pending.pop() else {
            return Ok(None);
        };
        job.transition(QueueJobState::Active)?;
        state.active.insert(job.id, job.clone());
        Ok(Some(job))
    }

    async fn ack(&self, id: JobId, outcome: JobOutcome) -> Result<QueueJob> {
        let mut state = self.state.lock();
        let mut job = state.active.remove(&id).ok_or_else(|| {
            JobflowError::not_found("queue_job", id.to_string())
                .with_internal_message("ack for a job that is not active")
        })?;

        if let Err(e) = job.finish(&outcome) {
            state.active.insert(id, job);
            return Err(e);
        }
        match outcome.state() {
            QueueJobState::Completed => state.completed += 1,
            QueueJobState::Failed => state.failed += 1,
            QueueJobState::Expired => state.expired += 1,
            _ => {}
        }
        Ok(job)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let state = self.state.lock();
        Ok(QueueStats {
            pending: state.pending.len(),
            active: state.active.len(),
            completed: state.completed,
            failed: state.failed,
            expired: state.expired,
            dead_letter: 0,
        })
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.state.lock().pending.len())
    }
}

/// Pops the head of the first non-empty priority list and files it in the
/// active hash under its id, in one step. A worker that dies after the claim
/// leaves the job visible in the active hash instead of losing it.
const CLAIM_SCRIPT: &str = r#"
local active = KEYS[#KEYS]
for i = 1, #KEYS - 1 do
    local raw = redis.call('LPOP', KEYS[i])
    if raw then
        local id = cjson.decode(raw)['id']
        redis.call('HSET', active, id, raw)
        return raw
    end
end
return false
"#;

/// Interval between claim attempts while `poll` waits for work.
const CLAIM_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Redis backend: one list per priority, active jobs in a hash.
///
/// Claims go through a Lua script that scans the priority lists highest
/// first, which gives priority ordering with FIFO inside each list.
pub struct RedisQueueBackend {
    client: redis::Client,
    queue_key: String,
    poll_timeout: Duration,
}

impl RedisQueueBackend {
    pub fn new(client: redis::Client, config: &QueueConfig) -> Self {
        Self {
            client,
            queue_key: config.queue_key.clone(),
            poll_timeout: config.poll_timeout,
        }
    }

    /// Connect using `config.redis_url`.
    pub fn connect(config: &QueueConfig) -> Result<Self> {
        let url = config.redis_url.as_deref().ok_or_else(|| {
            JobflowError::new(ErrorCode::MissingConfiguration, "queue.redis_url is not set")
        })?;
        let client = redis::Client::open(url)?;
        Ok(Self::new(client, config))
    }

    fn pending_key(&self, priority: JobPriority) -> String {
        format!("{}:pending:{}", self.queue_key, priority.as_str())
    }

    fn pending_keys(&self) -> Vec<String> {
        [
            JobPriority::Critical,
            JobPriority::High,
            JobPriority::Normal,
            JobPriority::Low,
        ]
        .into_iter()
        .map(|p| self.pending_key(p))
        .collect()
    }

    fn active_key(&self) -> String {
        format!("{}:active", self.queue_key)
    }

    fn stats_key(&self) -> String {
        format!("{}:stats", self.queue_key)
    }

    async fn get_conn(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                JobflowError::with_internal(
                    ErrorCode::QueueConnectionFailed,
                    "Failed to get Redis connection for job queue",
                    e.to_string(),
                )
            })
    }
}

#[async_trait]
impl QueueBackend for RedisQueueBackend {
    async fn enqueue(&self, job: QueueJob) -> Result<()> {
        let serialized = serde_json::to_string(&job)?;
        let mut conn = self.get_conn().await?;
        redis::cmd("RPUSH")
            .arg(self.pending_key(job.priority))
            .arg(&serialized)
            .query_async::<_, i64>(&mut conn)
            .await?;

        tracing::debug!(queue = %self.queue_key, job_id = %job.id, job = %job.name, "Job enqueued");
        Ok(())
    }

    async fn poll(&self) -> Result<Option<QueueJob>> {
        let mut conn = self.get_conn().await?;
        let script = redis::Script::new(CLAIM_SCRIPT);
        let deadline = tokio::time::Instant::now() + self.poll_timeout;

        let value = loop {
            let mut invocation = script.prepare_invoke();
            for key in self.pending_keys() {
                invocation.key(key);
            }
            invocation.key(self.active_key());
            let claimed: Option<String> = invocation.invoke_async(&mut conn).await?;
            if let Some(value) = claimed {
                break value;
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(CLAIM_RETRY_INTERVAL.min(deadline - now)).await;
        };

        // The claim already holds the job in the active hash; this write only
        // records the state change.
        let mut job: QueueJob = serde_json::from_str(&value)?;
        job.transition(QueueJobState::Active)?;
        redis::cmd("HSET")
            .arg(self.active_key())
            .arg(job.id.to_string())
            .arg(serde_json::to_string(&job)?)
            .query_async::<_, i64>(&mut conn)
            .await?;

        tracing::debug!(queue = %self.queue_key, job_id = %job.id, "Job polled");
        Ok(Some(job))
    }

    async fn ack(&self, id: JobId, outcome: JobOutcome) -> Result<QueueJob> {
        let mut conn = self.get_conn().await?;
        let raw: Option<String> = redis::cmd("HGET")
            .arg(self.active_key())
            .arg(id.to_string())
            .query_async(&mut conn)
            .await?;
        let raw = raw.ok_or_else(|| JobflowError::not_found("queue_job", id.to_string()))?;

        let mut job: QueueJob = serde_json::from_str(&raw)?;
        if job.state == QueueJobState::Created {
            // Claimed, but the claiming worker never recorded the state change.
            job.transition(QueueJobState::Active)?;
        }
        job.finish(&outcome)?;

        redis::cmd("HDEL")
            .arg(self.active_key())
            .arg(id.to_string())
            .query_async::<_, i64>(&mut conn)
            .await?;
        redis::cmd("HINCRBY")
            .arg(self.stats_key())
            .arg(job.state.as_str())
            .arg(1)
            .query_async::<_, i64>(&mut conn)
            .await?;

        Ok(job)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let mut conn = self.get_conn().await?;
        let mut pending = 0usize;
        for key in self.pending_keys() {
            let len: usize = redis::cmd("LLEN").arg(key).query_async(&mut conn).await?;
            pending += len;
        }
        let active: usize = redis::cmd("HLEN")
            .arg(self.active_key())
            .query_async(&mut conn)
            .await?;
        let counters: HashMap<String, u64> = redis::cmd("HGETALL")
            .arg(self.stats_key())
            .query_async(&mut conn)
            .await?;

        let count = |state: QueueJobState| counters.get(state.as_str()).copied().unwrap_or(0);
        Ok(QueueStats {
            pending,
            active,
            completed: count(QueueJobState::Completed),
            failed: count(QueueJobState::Failed),
            expired: count(QueueJobState::Expired),
            dead_letter: 0,
        })
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.stats().await?.pending)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Dead Letter Queue
// ═══════════════════════════════════════════════════════════════════════════════

/// Bounded retention of failed jobs. The oldest entry is dropped when full.
#[derive(Debug)]
pub struct DeadLetterQueue {
    jobs: VecDeque<QueueJob>,
    max_size: usize,
}

impl DeadLetterQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            jobs: VecDeque::new(),
            max_size,
        }
    }

    pub fn push(&mut self, job: QueueJob) {
        if self.max_size == 0 {
            return;
        }
        if self.jobs.len() >= self.max_size {
            self.jobs.pop_front();
        }
        self.jobs.push_back(job);
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn snapshot(&self) -> Vec<QueueJob> {
        self.jobs.iter().cloned().collect()
    }

    pub fn drain(&mut self) -> Vec<QueueJob> {
        self.jobs.drain(..).collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Queue
// ═══════════════════════════════════════════════════════════════════════════════

/// Queue front-end: size limit, expiry, dead letters and depth metrics on top
/// of a [`QueueBackend`].
pub struct JobQueue {
    backend: Arc<dyn QueueBackend>,
    dead_letter: Mutex<DeadLetterQueue>,
    config: QueueConfig,
}

impl fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueue")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl JobQueue {
    pub fn new(backend: Arc<dyn QueueBackend>, config: QueueConfig) -> Self {
        let dlq = DeadLetterQueue::new(config.dead_letter_max_size);
        Self {
            backend,
            dead_letter: Mutex::new(dlq),
            config,
        }
    }

    /// In-memory queue with default settings.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryQueueBackend::new()), QueueConfig::default())
    }

    /// Redis when `redis_url` is configured, otherwise in-memory.
    pub fn from_config(config: QueueConfig) -> Result<Self> {
        let backend: Arc<dyn QueueBackend> = if config.redis_url.is_some() {
            Arc::new(RedisQueueBackend::connect(&config)?)
        } else {
            Arc::new(InMemoryQueueBackend::new())
        };
        Ok(Self::new(backend, config))
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub async fn enqueue(&self, job: QueueJob) -> Result<JobId> {
        if self.config.max_size > 0 && self.backend.len().await? >= self.config.max_size {
            return Err(JobflowError::new(ErrorCode::QueueFull, "Job queue is full")
                .with_context("max_size", self.config.max_size)
                .with_context("job", &job.name));
        }

        let id = job.id;
        tracing::debug!(job_id = %id, job = %job.name, priority = %job.priority, "Enqueueing job");
        self.backend.enqueue(job).await?;
        self.update_depth().await;
        Ok(id)
    }

    /// Next runnable job, now `active`. Jobs older than `max_age` are expired
    /// on the way.
    pub async fn poll(&self) -> Result<Option<QueueJob>> {
        loop {
            let Some(job) = self.backend.poll().await? else {
                return Ok(None);
            };

            let stale = self
                .config
                .max_age
                .is_some_and(|max_age| job.age(Utc::now()) > max_age);
            if !stale {
                self.update_depth().await;
                return Ok(Some(job));
            }

            tracing::warn!(job_id = %job.id, job = %job.name, "Expiring stale queue job");
            self.ack(job.id, JobOutcome::Expired).await?;
        }
    }

    /// Finish an active job. Failed jobs go to the dead letter queue.
    pub async fn ack(&self, id: JobId, outcome: JobOutcome) -> Result<QueueJob> {
        let job = self.backend.ack(id, outcome).await?;
        JobMetrics::record_queue_outcome(&job.name, job.state.as_str());
        tracing::debug!(job_id = %id, job = %job.name, state = %job.state, "Queue job finished");

        if job.state == QueueJobState::Failed && self.config.enable_dead_letter {
            self.dead_letter.lock().push(job.clone());
        }
        Ok(job)
    }

    pub fn dead_letters(&self) -> Vec<QueueJob> {
        self.dead_letter.lock().snapshot()
    }

    pub fn drain_dead_letters(&self) -> Vec<QueueJob> {
        self.dead_letter.lock().drain()
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let mut stats = self.backend.stats().await?;
        stats.dead_letter = self.dead_letter.lock().len();
        Ok(stats)
    }

    async fn update_depth(&self) {
        if let Ok(depth) = self.backend.len().await {
            JobMetrics::set_queue_depth(depth as u64);
        }
    }
}
