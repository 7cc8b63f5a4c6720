//! Cooperative timer runner for timeouts and recurring tasks.
//!
//! # Design
//! - One driver task evaluates every registered task on a fixed tick step.
//! - The driver is spawned on first registration and exits once no task remains.
//! - Recurring tasks reschedule from the moment their callback finishes, so a slow
//!   callback never causes catch-up bursts.
//! - Callback errors and panics are logged and discarded; the loop keeps running.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tinytorrent_telemetry::Metrics;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Default tick step.
pub const DEFAULT_STEP: Duration = Duration::from_millis(250);

type TaskId = u64;
type Callback = Box<dyn FnMut() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

enum TaskKind {
    Timeout,
    Recurring { interval: Duration },
}

struct ScheduledTask {
    kind: TaskKind,
    due_at: Instant,
    /// `None` while the callback is running.
    callback: Option<Callback>,
}

#[derive(Default)]
struct SchedulerState {
    tasks: HashMap<TaskId, ScheduledTask>,
    next_id: TaskId,
    driver: Option<JoinHandle<()>>,
}

struct SchedulerInner {
    state: Mutex<SchedulerState>,
    step: Duration,
    metrics: Option<Metrics>,
}

impl SchedulerInner {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Timer runner shared by the ambient poller and any other periodic work.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

/// Cancellation handle for a one-shot timeout.
pub struct TimeoutHandle {
    id: TaskId,
    scheduler: Weak<SchedulerInner>,
}

/// Cancellation and cadence handle for a recurring task.
pub struct RecurringHandle {
    id: TaskId,
    scheduler: Weak<SchedulerInner>,
}

impl Scheduler {
    /// Create a scheduler ticking every `step`.
    #[must_use]
    pub fn new(step: Duration) -> Self {
        Self::build(step, None)
    }

    /// Create a scheduler that records callback failures in `metrics`.
    #[must_use]
    pub fn with_metrics(step: Duration, metrics: Metrics) -> Self {
        Self::build(step, Some(metrics))
    }

    fn build(step: Duration, metrics: Option<Metrics>) -> Self {
        let step = if step.is_zero() { DEFAULT_STEP } else { step };
        Self {
            inner: Arc::new(SchedulerInner {
                state: Mutex::new(SchedulerState::default()),
                step,
                metrics,
            }),
        }
    }

    /// Tick step in use.
    #[must_use]
    pub fn step(&self) -> Duration {
        self.inner.step
    }

    /// Run `callback` once after `delay`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule_timeout<F, Fut>(&self, delay: Duration, callback: F) -> TimeoutHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut callback = Some(callback);
        let boxed: Callback = Box::new(move || match callback.take() {
            Some(callback) => callback().boxed(),
            None => async { Ok(()) }.boxed(),
        });
        let id = self.register(TaskKind::Timeout, delay, boxed);
        TimeoutHandle {
            id,
            scheduler: Arc::downgrade(&self.inner),
        }
    }

    /// Run `callback` every `interval`, measured from the end of the previous run.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule_recurring<F, Fut>(&self, interval: Duration, mut callback: F) -> RecurringHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let boxed: Callback = Box::new(move || callback().boxed());
        let id = self.register(TaskKind::Recurring { interval }, interval, boxed);
        RecurringHandle {
            id,
            scheduler: Arc::downgrade(&self.inner),
        }
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    /// Whether the driver task is running.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.inner.lock().driver.is_some()
    }

    /// Drop every task and stop the driver.
    pub fn shutdown(&self) {
        let mut state = self.inner.lock();
        state.tasks.clear();
        if let Some(driver) = state.driver.take() {
            driver.abort();
        }
        debug!("scheduler shut down");
    }

    /// Evaluate every task due at `now`. Returns whether any task remains registered.
    pub async fn tick(&self, now: Instant) -> bool {
        tick(&self.inner, now).await
    }

    fn register(&self, kind: TaskKind, delay: Duration, callback: Callback) -> TaskId {
        let mut state = self.inner.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.tasks.insert(
            id,
            ScheduledTask {
                kind,
                due_at: Instant::now() + delay,
                callback: Some(callback),
            },
        );
        if state.driver.is_none() {
            state.driver = Some(tokio::spawn(drive(
                Arc::downgrade(&self.inner),
                self.inner.step,
            )));
            debug!(step_ms = self.inner.step.as_millis(), "scheduler armed");
        }
        id
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_STEP)
    }
}

async fn drive(scheduler: Weak<SchedulerInner>, step: Duration) {
    let mut ticker = tokio::time::interval(step);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = scheduler.upgrade() else {
            return;
        };
        tick(&inner, Instant::now()).await;
        let disarmed = {
            let mut state = inner.lock();
            let idle = state.tasks.is_empty();
            if idle {
                state.driver = None;
            }
            idle
        };
        if disarmed {
            debug!("scheduler disarmed");
            return;
        }
    }
}

async fn tick(inner: &SchedulerInner, now: Instant) -> bool {
    let mut due: Vec<(TaskId, Instant, Callback)> = {
        let mut state = inner.lock();
        let ids: Vec<TaskId> = state
            .tasks
            .iter()
            .filter(|(_, task)| task.due_at <= now && task.callback.is_some())
            .map(|(id, _)| *id)
            .collect();
        let mut due = Vec::with_capacity(ids.len());
        for id in ids {
            let is_timeout = matches!(
                state.tasks.get(&id).map(|task| &task.kind),
                Some(TaskKind::Timeout)
            );
            let taken = if is_timeout {
                state
                    .tasks
                    .remove(&id)
                    .and_then(|task| task.callback.map(|cb| (task.due_at, cb)))
            } else {
                state
                    .tasks
                    .get_mut(&id)
                    .and_then(|task| task.callback.take().map(|cb| (task.due_at, cb)))
            };
            if let Some((due_at, callback)) = taken {
                due.push((id, due_at, callback));
            }
        }
        due
    };
    due.sort_by_key(|(id, due_at, _)| (*due_at, *id));

    for (id, _, mut callback) in due {
        run_callback(inner, id, &mut callback).await;
        reschedule(inner, id, callback);
    }

    !inner.lock().tasks.is_empty()
}

/// Put a recurring callback back; callbacks of cancelled tasks are dropped.
fn reschedule(inner: &SchedulerInner, id: TaskId, callback: Callback) {
    let mut state = inner.lock();
    if let Some(task) = state.tasks.get_mut(&id)
        && let TaskKind::Recurring { interval } = task.kind
    {
        task.due_at = Instant::now() + interval;
        task.callback = Some(callback);
    }
}

async fn run_callback(inner: &SchedulerInner, id: TaskId, callback: &mut Callback) {
    let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| callback())) {
        Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
        Err(panic) => Err(panic),
    };
    let failed = match outcome {
        Ok(Ok(())) => false,
        Ok(Err(err)) => {
            warn!(task_id = id, error = %err, "scheduled callback failed");
            true
        }
        Err(_) => {
            warn!(task_id = id, "scheduled callback panicked");
            true
        }
    };
    if failed && let Some(metrics) = &inner.metrics {
        metrics.inc_scheduler_callback_failure();
    }
}

impl TimeoutHandle {
    /// Cancel the timeout. Returns `false` when it already fired or was cancelled.
    pub fn cancel(&self) -> bool {
        self.scheduler
            .upgrade()
            .is_some_and(|inner| inner.lock().tasks.remove(&self.id).is_some())
    }
}

impl RecurringHandle {
    /// Cancel the task. A run in progress completes but is not rescheduled.
    pub fn cancel(&self) -> bool {
        self.scheduler
            .upgrade()
            .is_some_and(|inner| inner.lock().tasks.remove(&self.id).is_some())
    }

    /// Change the interval; the next run is due `interval` from now.
    pub fn update_interval(&self, interval: Duration) -> bool {
        let Some(inner) = self.scheduler.upgrade() else {
            return false;
        };
        let mut state = inner.lock();
        let Some(task) = state.tasks.get_mut(&self.id) else {
            return false;
        };
        task.kind = TaskKind::Recurring { interval };
        task.due_at = Instant::now() + interval;
        true
    }
}
