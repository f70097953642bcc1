//! Periodic task scheduling
//!
//! Agents never own timers directly. The host hands a [`Scheduler`] to
//! [`launch`], which starts the agent and attaches a cancellable periodic job:
//! - [`TokioScheduler`]: real interval timers, first tick after one period
//! - [`ManualScheduler`]: jobs run only when the host calls `tick_all`
//!
//! Cancelling a [`PeriodicHandle`] prevents future ticks; a tick already in
//! flight runs to completion.

use crate::agent::Agent;
use crate::context::ExecutionContext;
use crate::error::AgentError;
use crate::types::AgentResult;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Job run on every tick
pub type TickJob = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Source of periodic execution
pub trait Scheduler: Send + Sync {
    /// Run `job` every `period` until the returned handle is cancelled or dropped
    fn spawn_periodic(&self, label: &str, period: Duration, job: TickJob) -> PeriodicHandle;
}

/// Cancellation handle for a periodic job
#[derive(Debug)]
pub struct PeriodicHandle {
    label: String,
    period: Duration,
    cancel: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PeriodicHandle {
    /// Create handle plus the receiver the job loop watches
    #[must_use]
    pub fn new(label: impl Into<String>, period: Duration) -> (Self, watch::Receiver<bool>) {
        let (cancel, rx) = watch::channel(false);
        (
            Self {
                label: label.into(),
                period,
                cancel,
                task: None,
            },
            rx,
        )
    }

    /// With backing task
    #[inline]
    #[must_use]
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }

    /// Stop future ticks
    pub fn cancel(&self) {
        if !self.cancel.send_replace(true) {
            tracing::debug!(label = %self.label, "periodic job cancelled");
        }
    }

    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    #[inline]
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Whether the backing task has exited (always false for manual jobs)
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_some_and(JoinHandle::is_finished)
    }
}

impl Drop for PeriodicHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Interval-driven scheduler on the current tokio runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl TokioScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for TokioScheduler {
    fn spawn_periodic(&self, label: &str, period: Duration, job: TickJob) -> PeriodicHandle {
        let (handle, mut cancelled) = PeriodicHandle::new(label, period);
        let label = label.to_string();

        let task = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    changed = cancelled.changed() => {
                        if changed.is_err() || *cancelled.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if *cancelled.borrow() {
                            break;
                        }
                        job().await;
                    }
                }
            }
            tracing::debug!(label = %label, "periodic task exited");
        });

        handle.with_task(task)
    }
}

struct ManualJob {
    label: String,
    cancelled: watch::Receiver<bool>,
    job: TickJob,
}

/// Scheduler driven explicitly by the host
#[derive(Default)]
pub struct ManualScheduler {
    jobs: Mutex<Vec<ManualJob>>,
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let labels: Vec<String> = self.jobs.lock().iter().map(|j| j.label.clone()).collect();
        f.debug_struct("ManualScheduler").field("jobs", &labels).finish()
    }
}

impl ManualScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every live job once, in registration order; returns how many ran
    pub async fn tick_all(&self) -> usize {
        let due: Vec<TickJob> = {
            let mut jobs = self.jobs.lock();
            jobs.retain(|j| !*j.cancelled.borrow());
            jobs.iter().map(|j| Arc::clone(&j.job)).collect()
        };
        for job in &due {
            job().await;
        }
        due.len()
    }

    /// Live job count
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.lock().iter().filter(|j| !*j.cancelled.borrow()).count()
    }
}

impl Scheduler for ManualScheduler {
    fn spawn_periodic(&self, label: &str, period: Duration, job: TickJob) -> PeriodicHandle {
        let (handle, cancelled) = PeriodicHandle::new(label, period);
        self.jobs.lock().push(ManualJob {
            label: label.to_string(),
            cancelled,
            job,
        });
        handle
    }
}

/// Run one scheduled tick; skipped unless the agent is active
///
/// The result is fed back through `learn_from_result`, then the agent adapts
/// its strategy.
pub async fn run_tick(agent: &dyn Agent) -> Option<AgentResult> {
    if !agent.runtime().is_active() {
        tracing::trace!(agent = %agent.name(), state = %agent.runtime().state(), "tick skipped");
        return None;
    }
    let result = agent.execute(ExecutionContext::scheduled()).await;
    agent.learn_from_result(&result);
    agent.adapt_strategy().await;
    Some(result)
}

/// Tick job bound to `agent`
///
/// After each tick the job compares `tick_period` with the attached timer and
/// re-attaches the timer through `scheduler` when the period moved.
#[must_use]
pub fn tick_job(agent: Arc<dyn Agent>, scheduler: Arc<dyn Scheduler>) -> TickJob {
    Arc::new(move || -> BoxFuture<'static, ()> {
        let agent = Arc::clone(&agent);
        let scheduler = Arc::clone(&scheduler);
        Box::pin(async move {
            if run_tick(agent.as_ref()).await.is_some() {
                reschedule(agent, scheduler);
            }
        })
    })
}

/// Re-attach the timer when the agent asks for a different period
///
/// Returns whether a new timer was attached.
pub fn reschedule(agent: Arc<dyn Agent>, scheduler: Arc<dyn Scheduler>) -> bool {
    let (Some(wanted), Some(current)) = (agent.tick_period(), agent.runtime().timer_period()) else {
        return false;
    };
    if wanted == current || !agent.runtime().is_active() {
        return false;
    }
    let handle = scheduler.spawn_periodic(
        agent.name(),
        wanted,
        tick_job(Arc::clone(&agent), Arc::clone(&scheduler)),
    );
    agent.runtime().attach_timer(handle);
    tracing::info!(
        agent = %agent.name(),
        from_ms = current.as_millis() as u64,
        to_ms = wanted.as_millis() as u64,
        "tick period changed"
    );
    true
}

/// Start `agent` and attach its periodic job
///
/// Idempotent: a running agent with a timer is left untouched.
pub async fn launch(agent: Arc<dyn Agent>, scheduler: Arc<dyn Scheduler>) -> Result<(), AgentError> {
    agent.start().await?;

    if let Some(period) = agent.tick_period() {
        if !agent.runtime().has_timer() {
            let handle = scheduler.spawn_periodic(
                agent.name(),
                period,
                tick_job(Arc::clone(&agent), Arc::clone(&scheduler)),
            );
            agent.runtime().attach_timer(handle);
            tracing::debug!(agent = %agent.name(), period_ms = period.as_millis() as u64, "periodic execution attached");
        }
    }
    Ok(())
}
