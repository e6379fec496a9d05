//! Recurring job scheduling.
//!
//! The scheduler owns no job logic. On each tick it turns schedules that have
//! come due into queue entries with a `null` payload, so jobs fetch their own
//! input through `before_process`.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use super::job::{JobId, JobPriority};
use super::queue::{JobQueue, QueueJob};
use super::registry::{JobRegistry, JobRunner};
use super::schedule::ScheduleConfig;
use crate::error::Result;

/// A job that has been scheduled.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    /// Unique identifier
    pub id: JobId,
    /// The job name
    pub job_name: String,
    /// Schedule specification
    pub schedule: ScheduleConfig,
    /// Priority for scheduled executions
    pub priority: JobPriority,
    /// Next scheduled execution time. `None` for disabled schedules.
    pub next_run: Option<DateTime<Utc>>,
    /// Last execution time
    pub last_run: Option<DateTime<Utc>>,
    /// Number of times this schedule has fired
    pub run_count: u64,
}

impl ScheduledJob {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run.map(|at| at <= now).unwrap_or(false)
    }
}

/// Job scheduler managing recurring jobs.
pub struct JobScheduler {
    scheduled_jobs: Arc<RwLock<Vec<ScheduledJob>>>,
    shutdown: watch::Sender<bool>,
    tick: Duration,
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl JobScheduler {
    /// Create a new job scheduler that checks for due jobs every second.
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            scheduled_jobs: Arc::new(RwLock::new(Vec::new())),
            shutdown,
            tick: Duration::from_secs(1),
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Schedule a job starting from now.
    pub async fn schedule(
        &self,
        job_name: &str,
        schedule: ScheduleConfig,
        priority: JobPriority,
    ) -> Result<JobId> {
        self.schedule_from(job_name, schedule, priority, Utc::now())
            .await
    }

    /// Schedule a job with its first run computed relative to `from`.
    pub async fn schedule_from(
        &self,
        job_name: &str,
        schedule: ScheduleConfig,
        priority: JobPriority,
        from: DateTime<Utc>,
    ) -> Result<JobId> {
        schedule.validate()?;
        let next_run = schedule.next_run(from)?;
        let id = JobId::new();

        tracing::info!(
            job = %job_name,
            schedule_id = %id,
            next_run = ?next_run,
            enabled = schedule.enabled,
            "Job scheduled"
        );

        self.scheduled_jobs.write().await.push(ScheduledJob {
            id,
            job_name: job_name.to_string(),
            schedule,
            priority,
            next_run,
            last_run: None,
            run_count: 0,
        });
        Ok(id)
    }

    /// Schedule a registered job from its own schedule, if it has one.
    pub async fn schedule_runner(&self, runner: &dyn JobRunner) -> Result<Option<JobId>> {
        match runner.schedule() {
            Some(schedule) => self
                .schedule(runner.name(), schedule.clone(), runner.priority())
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    /// Schedule every registered job that declares a schedule.
    pub async fn schedule_registry(&self, registry: &JobRegistry) -> Result<usize> {
        let mut scheduled = 0;
        for name in registry.names() {
            if let Some(runner) = registry.get(&name) {
                if self.schedule_runner(runner.as_ref()).await?.is_some() {
                    scheduled += 1;
                }
            }
        }
        Ok(scheduled)
    }

    /// Cancel a scheduled job, removing it from the scheduler.
    pub async fn cancel(&self, id: JobId) -> bool {
        let mut jobs = self.scheduled_jobs.write().await;
        let before = jobs.len();
        jobs.retain(|j| j.id != id);
        let removed = jobs.len() < before;
        if removed {
            tracing::info!(schedule_id = %id, "Schedule cancelled");
        }
        removed
    }

    /// List all schedules.
    pub async fn list(&self) -> Vec<ScheduledJob> {
        self.scheduled_jobs.read().await.clone()
    }

    pub async fn get(&self, id: JobId) -> Option<ScheduledJob> {
        self.scheduled_jobs
            .read()
            .await
            .iter()
            .find(|j| j.id == id)
            .cloned()
    }

    /// Collect queue entries for every schedule due at `now` and advance
    /// those schedules to their next occurrence.
    ///
    /// A schedule whose next occurrence cannot be computed still fires this
    /// time, is logged, and stops firing; the other schedules are unaffected.
    pub async fn due(&self, now: DateTime<Utc>) -> Result<Vec<QueueJob>> {
        let mut jobs = self.scheduled_jobs.write().await;
        let mut due = Vec::new();

        for job in jobs.iter_mut().filter(|j| j.is_due(now)) {
            job.last_run = Some(now);
            job.run_count += 1;
            job.next_run = match job.schedule.next_run(now) {
                Ok(next) => next,
                Err(error) => {
                    tracing::error!(
                        job = %job.job_name,
                        schedule_id = %job.id,
                        error = %error,
                        "Cannot compute next run; schedule stops firing"
                    );
                    None
                }
            };
            due.push(QueueJob::new(job.job_name.clone(), serde_json::Value::Null).with_priority(job.priority));
        }

        Ok(due)
    }

    /// Run the tick loop, enqueueing due jobs until [`shutdown`](Self::shutdown).
    pub fn start(self: Arc<Self>, queue: Arc<JobQueue>) -> JoinHandle<()> {
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            tracing::info!(tick_ms = self.tick.as_millis() as u64, "Job scheduler started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(self.tick) => {}
                }
                if *shutdown_rx.borrow() {
                    break;
                }

                let due = match self.due(Utc::now()).await {
                    Ok(due) => due,
                    Err(error) => {
                        error.log();
                        continue;
                    }
                };
                for job in due {
                    let name = job.name.clone();
                    match queue.enqueue(job).await {
                        Ok(id) => tracing::debug!(job = %name, job_id = %id, "Scheduled job enqueued"),
                        Err(error) => error.log(),
                    }
                }
            }
            tracing::info!("Job scheduler stopped");
        })
    }

    /// Shutdown the scheduler.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::IntervalUnit;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0).unwrap()
    }

    #[tokio::test]
    async fn test_schedule_interval() {
        let scheduler = JobScheduler::new();
        let id = scheduler
            .schedule_from(
                "digest",
                ScheduleConfig::interval(15, IntervalUnit::Minutes),
                JobPriority::Normal,
                at(10, 0),
            )
            .await
            .unwrap();

        let job = scheduler.get(id).await.unwrap();
        assert_eq!(job.next_run, Some(at(10, 15)));
        assert_eq!(scheduler.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_due_advances_schedule() {
        let scheduler = JobScheduler::new();
        let id = scheduler
            .schedule_from(
                "digest",
                ScheduleConfig::interval(15, IntervalUnit::Minutes),
                JobPriority::High,
                at(10, 0),
            )
            .await
            .unwrap();

        assert!(scheduler.due(at(10, 10)).await.unwrap().is_empty());

        let due = scheduler.due(at(10, 15)).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].name, "digest");
        assert_eq!(due[0].priority, JobPriority::High);
        assert!(due[0].data.is_null());

        let job = scheduler.get(id).await.unwrap();
        assert_eq!(job.run_count, 1);
        assert_eq!(job.last_run, Some(at(10, 15)));
        assert_eq!(job.next_run, Some(at(10, 30)));
    }

    #[tokio::test]
    async fn test_disabled_schedule_never_due() {
        let scheduler = JobScheduler::new();
        scheduler
            .schedule_from(
                "paused",
                ScheduleConfig::daily("09:00").disabled(),
                JobPriority::Normal,
                at(0, 0),
            )
            .await
            .unwrap();
        assert!(scheduler.due(at(23, 59)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_schedule() {
        let scheduler = JobScheduler::new();
        let id = scheduler
            .schedule_from(
                "digest",
                ScheduleConfig::daily("09:00"),
                JobPriority::Normal,
                at(0, 0),
            )
            .await
            .unwrap();

        assert!(scheduler.cancel(id).await);
        assert!(scheduler.list().await.is_empty());
        assert!(scheduler.get(id).await.is_none());
        assert!(scheduler.due(at(9, 0)).await.unwrap().is_empty());
        assert!(!scheduler.cancel(JobId::new()).await);
    }

    #[tokio::test]
    async fn test_unresolvable_schedule_does_not_drop_other_due_jobs() {
        let scheduler = JobScheduler::new();
        let edge = DateTime::<Utc>::MAX_UTC - chrono::Duration::weeks(1500);
        let far = scheduler
            .schedule_from(
                "far_future",
                ScheduleConfig::interval(1000, IntervalUnit::Weeks),
                JobPriority::Normal,
                edge,
            )
            .await
            .unwrap();
        let near = scheduler
            .schedule_from(
                "digest",
                ScheduleConfig::interval(15, IntervalUnit::Minutes),
                JobPriority::Normal,
                at(10, 0),
            )
            .await
            .unwrap();

        // Past both next runs; the far schedule's following run is out of range.
        let now = DateTime::<Utc>::MAX_UTC - chrono::Duration::weeks(100);
        let due = scheduler.due(now).await.unwrap();
        let mut names: Vec<_> = due.iter().map(|j| j.name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["digest", "far_future"]);

        assert_eq!(scheduler.get(far).await.unwrap().next_run, None);
        assert!(scheduler.get(near).await.unwrap().next_run.is_some());
        assert_eq!(scheduler.due(now).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_invalid_schedule_rejected() {
        let scheduler = JobScheduler::new();
        let err = scheduler
            .schedule("broken", ScheduleConfig::daily("25:00"), JobPriority::Normal)
            .await
            .unwrap_err();
        assert!(err.is_config_error());
    }
}
