//! In-process job scheduler: cron expressions, one-shot timers and the
//! `[[cron.jobs]]` message jobs from settings.

use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ::cron::Schedule;
use futures::future::BoxFuture;
use relay_core::CronSettings;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::discord::send::split_message;
use crate::discord::webhooks::{DispatchOutcome, DispatchTarget, WebhookDispatcher, WebhookPayload};

/// A recurring job this late is skipped to its next occurrence instead of run.
pub const MISSED_GRACE: Duration = Duration::from_secs(60);

pub type JobId = Uuid;

type Task = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum CronError {
    #[error("invalid cron expression `{expr}`: {reason}")]
    InvalidExpression { expr: String, reason: String },
    #[error("cron expression `{0}` never fires")]
    NoUpcoming(String),
}

enum JobKind {
    Recurring(Box<Schedule>),
    Once,
}

struct Job {
    name: String,
    kind: JobKind,
    next_due: DateTime<Utc>,
    task: Task,
}

/// Snapshot of a scheduled job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub id: JobId,
    pub name: String,
    pub recurring: bool,
    pub next_due: DateTime<Utc>,
}

/// Parse a cron expression. Five fields mean minute precision (seconds
/// fixed at 0); six or seven fields are passed through.
pub fn parse_schedule(expr: &str) -> Result<Schedule, CronError> {
    let trimmed = expr.trim();
    let full = match trimmed.split_whitespace().count() {
        5 => format!("0 {trimmed}"),
        6 | 7 => trimmed.to_string(),
        n => {
            return Err(CronError::InvalidExpression {
                expr: expr.to_string(),
                reason: format!("expected 5 to 7 fields, got {n}"),
            });
        }
    };
    Schedule::from_str(&full).map_err(|e| CronError::InvalidExpression {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

/// Job table shared by handles; cheap to clone.
#[derive(Clone, Default)]
pub struct Scheduler {
    jobs: Arc<Mutex<HashMap<JobId, Job>>>,
}

fn boxed_task<F, Fut>(task: F) -> Task
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || -> BoxFuture<'static, ()> { Box::pin(task()) })
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, job: Job) -> JobId {
        let id = Uuid::new_v4();
        debug!(job = %job.name, %id, next_due = %job.next_due, "Job scheduled");
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, job);
        id
    }

    /// Run `task` on every occurrence of `expr`.
    pub fn schedule_cron<F, Fut>(
        &self,
        name: impl Into<String>,
        expr: &str,
        task: F,
    ) -> Result<JobId, CronError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let schedule = parse_schedule(expr)?;
        let next_due = schedule
            .after(&Utc::now())
            .next()
            .ok_or_else(|| CronError::NoUpcoming(expr.to_string()))?;
        Ok(self.insert(Job {
            name: name.into(),
            kind: JobKind::Recurring(Box::new(schedule)),
            next_due,
            task: boxed_task(task),
        }))
    }

    /// Run `task` once at `at`. A time in the past fires on the next tick.
    pub fn schedule_at<F, Fut>(&self, name: impl Into<String>, at: DateTime<Utc>, task: F) -> JobId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.insert(Job {
            name: name.into(),
            kind: JobKind::Once,
            next_due: at,
            task: boxed_task(task),
        })
    }

    pub fn schedule_after<F, Fut>(&self, name: impl Into<String>, delay: Duration, task: F) -> JobId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        let at = Utc::now().checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.schedule_at(name, at, task)
    }

    pub fn cancel(&self, id: JobId) -> bool {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// All jobs, soonest first.
    pub fn jobs(&self) -> Vec<JobInfo> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let mut infos: Vec<JobInfo> = jobs
            .iter()
            .map(|(id, job)| JobInfo {
                id: *id,
                name: job.name.clone(),
                recurring: matches!(job.kind, JobKind::Recurring(_)),
                next_due: job.next_due,
            })
            .collect();
        infos.sort_by_key(|info| info.next_due);
        infos
    }

    pub fn next_run(&self, id: JobId) -> Option<DateTime<Utc>> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(|job| job.next_due)
    }

    /// Run every job due at `now` and return how many were started.
    pub fn tick(&self, now: DateTime<Utc>) -> usize {
        let grace = chrono::Duration::from_std(MISSED_GRACE).unwrap_or(chrono::Duration::MAX);
        let mut due: Vec<(String, Task)> = Vec::new();

        {
            let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
            let mut finished = Vec::new();

            for (id, job) in jobs.iter_mut() {
                if job.next_due > now {
                    continue;
                }
                match &job.kind {
                    JobKind::Once => {
                        due.push((job.name.clone(), Arc::clone(&job.task)));
                        finished.push(*id);
                    }
                    JobKind::Recurring(schedule) => {
                        if now - job.next_due > grace {
                            warn!(job = %job.name, due = %job.next_due, "Missed cron run skipped");
                        } else {
                            due.push((job.name.clone(), Arc::clone(&job.task)));
                        }
                        match schedule.after(&now).next() {
                            Some(next) => job.next_due = next,
                            None => finished.push(*id),
                        }
                    }
                }
            }

            for id in finished {
                jobs.remove(&id);
            }
        }

        let started = due.len();
        for (name, task) in due {
            debug!(job = %name, "Running scheduled job");
            tokio::spawn(task());
        }
        started
    }

    /// Call [`Scheduler::tick`] every `period` until the handle is aborted.
    pub fn start(&self, period: Duration) -> tokio::task::JoinHandle<()> {
        let scheduler = self.clone();
        let mut interval = interval_at(Instant::now() + period, period);
        let handle = tokio::spawn(async move {
            loop {
                interval.tick().await;
                scheduler.tick(Utc::now());
            }
        });
        info!(period_ms = period.as_millis() as u64, "cron runner started");
        handle
    }
}

/// Schedule the `[[cron.jobs]]` messages; returns how many were registered.
///
/// Every expression is checked before anything is scheduled.
pub fn register_message_jobs(
    scheduler: &Scheduler,
    settings: &CronSettings,
    dispatcher: &WebhookDispatcher,
) -> Result<usize, CronError> {
    for job in &settings.jobs {
        parse_schedule(&job.schedule)?;
    }

    for job in &settings.jobs {
        let payloads: Vec<WebhookPayload> = split_message(&job.content)
            .into_iter()
            .map(|chunk| {
                let payload = WebhookPayload::text(chunk);
                match &job.username {
                    Some(username) => payload.with_username(username.clone()),
                    None => payload,
                }
            })
            .collect();
        let target = DispatchTarget::new(job.channel_id, None);
        let dispatcher = dispatcher.clone();
        let name = job.name.clone();

        scheduler.schedule_cron(job.name.clone(), &job.schedule, move || {
            let dispatcher = dispatcher.clone();
            let payloads = payloads.clone();
            let name = name.clone();
            async move {
                // Chunks go out one at a time so they keep their order.
                for payload in payloads {
                    match dispatcher.send(target, payload).await {
                        DispatchOutcome::Sent(_) => debug!(job = %name, "Cron message posted"),
                        outcome => {
                            warn!(job = %name, ?outcome, "Cron message not posted");
                            break;
                        }
                    }
                }
            }
        })?;
    }

    info!(count = settings.jobs.len(), "Registered cron message jobs");
    Ok(settings.jobs.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_task(
        counter: &Arc<AtomicUsize>,
    ) -> impl Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static {
        let counter = Arc::clone(counter);
        move || {
            let counter = Arc::clone(&counter);
            let fut: BoxFuture<'static, ()> = Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            fut
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[test]
    fn five_field_expressions_fire_on_the_minute() {
        let schedule = parse_schedule("*/5 * * * *").unwrap();
        let base = DateTime::parse_from_rfc3339("2024-01-01T10:02:30Z")
            .unwrap()
            .with_timezone(&Utc);
        let next = schedule.after(&base).next().unwrap();
        assert_eq!(next.to_rfc3339(), "2024-01-01T10:05:00+00:00");
    }

    #[test]
    fn six_field_expressions_keep_seconds() {
        let schedule = parse_schedule("30 * * * * *").unwrap();
        let base = DateTime::parse_from_rfc3339("2024-01-01T10:02:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let next = schedule.after(&base).next().unwrap();
        assert_eq!(next.to_rfc3339(), "2024-01-01T10:02:30+00:00");
    }

    #[test]
    fn invalid_expressions_are_rejected() {
        assert!(matches!(
            parse_schedule("* *"),
            Err(CronError::InvalidExpression { .. })
        ));
        assert!(parse_schedule("61 * * * *").is_err());
    }

    #[tokio::test]
    async fn one_shot_runs_once_and_is_removed() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let now = Utc::now();
        let id = scheduler.schedule_at("once", now, counter_task(&counter));

        assert_eq!(scheduler.tick(now), 1);
        assert_eq!(scheduler.tick(now), 0);
        settle().await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(scheduler.next_run(id).is_none());
        assert!(scheduler.jobs().is_empty());
    }

    #[tokio::test]
    async fn future_jobs_wait() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.schedule_after("later", Duration::from_secs(3600), counter_task(&counter));

        assert_eq!(scheduler.tick(Utc::now()), 0);
        assert_eq!(scheduler.jobs().len(), 1);
    }

    #[tokio::test]
    async fn recurring_job_is_rescheduled() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = scheduler
            .schedule_cron("every-second", "* * * * * *", counter_task(&counter))
            .unwrap();

        let due = scheduler.next_run(id).unwrap();
        assert_eq!(scheduler.tick(due), 1);
        let next = scheduler.next_run(id).unwrap();
        assert!(next > due);
        settle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn late_recurring_job_is_skipped_forward() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = scheduler
            .schedule_cron("minutely", "* * * * *", counter_task(&counter))
            .unwrap();

        let due = scheduler.next_run(id).unwrap();
        let late = due + chrono::Duration::minutes(5);
        assert_eq!(scheduler.tick(late), 0);
        assert!(scheduler.next_run(id).unwrap() > late);
    }

    #[tokio::test]
    async fn cancel_removes_job() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = scheduler.schedule_after("x", Duration::ZERO, counter_task(&counter));
        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));
        assert_eq!(scheduler.tick(Utc::now()), 0);
    }

    #[test]
    fn jobs_are_listed_soonest_first() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let now = Utc::now();
        scheduler.schedule_at("b", now + chrono::Duration::hours(2), counter_task(&counter));
        scheduler.schedule_at("a", now + chrono::Duration::hours(1), counter_task(&counter));
        let names: Vec<_> = scheduler.jobs().into_iter().map(|j| j.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
