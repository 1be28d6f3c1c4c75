//! Recurring callback registration.
//!
//! A [`ScheduleHandle`] is the only proof that a registration exists. It is
//! not `Clone`, and [`Scheduler::cancel`] consumes it, so whoever holds the
//! handle owns the registration.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::trace;

use crate::{Error, Result};

pub type TickCallback = Arc<dyn Fn(DateTime<Utc>) + Send + Sync>;

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ScheduleHandle(u64);

impl ScheduleHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

pub trait Scheduler: Send + Sync {
    /// Wall-clock time as seen by this scheduler.
    fn now(&self) -> DateTime<Utc>;

    /// Runs `callback` every `period`, first after one full period. Fails
    /// without registering anything when the scheduler cannot run ticks.
    fn schedule_recurring(&self, period: Duration, callback: TickCallback) -> Result<ScheduleHandle>;

    /// Once this returns, `callback` is never started again.
    fn cancel(&self, handle: ScheduleHandle);
}

struct TokioRegistration {
    cancelled: Arc<AtomicBool>,
    task: AbortHandle,
}

/// Scheduler backed by tokio intervals, one task per registration.
///
/// Tasks are spawned on the runtime captured at construction, so timers can
/// be armed from threads outside the runtime.
pub struct TokioScheduler {
    runtime: Option<Handle>,
    next_id: AtomicU64,
    registrations: Mutex<BTreeMap<u64, TokioRegistration>>,
}

impl TokioScheduler {
    /// Captures the current runtime if there is one. Without it, scheduling
    /// falls back to whatever runtime the caller is in, or fails.
    pub fn new() -> Self {
        Self::from_runtime(Handle::try_current().ok())
    }

    pub fn with_handle(runtime: Handle) -> Self {
        Self::from_runtime(Some(runtime))
    }

    fn from_runtime(runtime: Option<Handle>) -> Self {
        Self {
            runtime,
            next_id: AtomicU64::new(1),
            registrations: Mutex::new(BTreeMap::new()),
        }
    }

    fn runtime(&self) -> Result<Handle> {
        match &self.runtime {
            Some(handle) => Ok(handle.clone()),
            None => Handle::try_current().map_err(|_| Error::NoRuntime),
        }
    }

    pub fn live_registrations(&self) -> usize {
        self.registrations.lock().len()
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TokioScheduler {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn schedule_recurring(&self, period: Duration, callback: TickCallback) -> Result<ScheduleHandle> {
        let runtime = self.runtime()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();

        let task = runtime.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if flag.load(Ordering::Acquire) {
                    break;
                }
                trace!(registration = id, "recurring tick");
                callback(Utc::now());
            }
        });

        self.registrations.lock().insert(
            id,
            TokioRegistration {
                cancelled,
                task: task.abort_handle(),
            },
        );
        Ok(ScheduleHandle(id))
    }

    fn cancel(&self, handle: ScheduleHandle) {
        if let Some(reg) = self.registrations.lock().remove(&handle.0) {
            reg.cancelled.store(true, Ordering::Release);
            reg.task.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, reg) in std::mem::take(&mut *self.registrations.lock()) {
            reg.cancelled.store(true, Ordering::Release);
            reg.task.abort();
        }
    }
}

struct ManualRegistration {
    period: chrono::Duration,
    next_due: DateTime<Utc>,
    callback: TickCallback,
}

/// Scheduler driven by hand: time only moves when [`ManualScheduler::advance`]
/// is called. Used for simulations and tests.
pub struct ManualScheduler {
    now: Mutex<DateTime<Utc>>,
    next_id: AtomicU64,
    registrations: Mutex<BTreeMap<u64, ManualRegistration>>,
    created: AtomicU64,
    cancelled: AtomicU64,
}

impl ManualScheduler {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            next_id: AtomicU64::new(1),
            registrations: Mutex::new(BTreeMap::new()),
            created: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
        }
    }

    /// Moves the clock forward, firing due callbacks in time order.
    /// Callbacks run without any scheduler lock held, so they may cancel or
    /// create registrations themselves.
    pub fn advance(&self, by: Duration) {
        let target = *self.now.lock() + to_chrono(by);
        while let Some((id, due, callback)) = self.next_due_before(target) {
            *self.now.lock() = due;
            if let Some(reg) = self.registrations.lock().get_mut(&id) {
                reg.next_due = due + reg.period;
            }
            callback(due);
        }
        *self.now.lock() = target;
    }

    pub fn live_registrations(&self) -> usize {
        self.registrations.lock().len()
    }

    pub fn total_created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn total_cancelled(&self) -> u64 {
        self.cancelled.load(Ordering::Relaxed)
    }

    fn next_due_before(&self, target: DateTime<Utc>) -> Option<(u64, DateTime<Utc>, TickCallback)> {
        self.registrations
            .lock()
            .iter()
            .filter(|(_, reg)| reg.next_due <= target)
            .min_by_key(|(id, reg)| (reg.next_due, **id))
            .map(|(id, reg)| (*id, reg.next_due, reg.callback.clone()))
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    fn schedule_recurring(&self, period: Duration, callback: TickCallback) -> Result<ScheduleHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let period = to_chrono(period).max(chrono::Duration::milliseconds(1));
        let next_due = *self.now.lock() + period;
        self.registrations.lock().insert(
            id,
            ManualRegistration {
                period,
                next_due,
                callback,
            },
        );
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(ScheduleHandle(id))
    }

    fn cancel(&self, handle: ScheduleHandle) {
        if self.registrations.lock().remove(&handle.0).is_some() {
            self.cancelled.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}
