//! Per-device shut-off timer.
//!
//! A [`TimerEngine`] is either idle or armed with a deadline. While armed it
//! owns exactly one recurring tick registration; every transition back to
//! idle (cancel, re-arm, expiry, teardown) gives that registration back to the
//! scheduler before returning. Arm, cancel and tick all run under one lock,
//! so they are strictly serialized per device.
//!
//! Teardown is terminal. A torn-down engine refuses to arm, so it can never
//! hold a registration again; a fresh engine has to be created instead.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::client::RemoteDeviceClient;
use crate::coordinator::Coordinator;
use crate::scheduler::{ScheduleHandle, Scheduler};
use crate::types::{DeviceId, TimerAction};
use crate::{Error, Result};

pub const MAX_TIMER_MINUTES: i64 = 480;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "error")]
pub enum ExpiryOutcome {
    Pending,
    Confirmed,
    Failed(String),
}

/// What happened the last time a timer ran out. The engine is already idle
/// by the time this is first published; `outcome` follows once the remote
/// call returns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpiryReport {
    pub action: TimerAction,
    pub fired_at: DateTime<Utc>,
    pub outcome: ExpiryOutcome,
}

/// Externally visible timer values, republished on every transition and tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerStatus {
    pub active: bool,
    pub remaining_minutes: u32,
    pub duration_minutes: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub target_action: TimerAction,
    pub last_expiry: Option<ExpiryReport>,
}

impl Default for TimerStatus {
    fn default() -> Self {
        Self {
            active: false,
            remaining_minutes: 0,
            duration_minutes: None,
            started_at: None,
            ends_at: None,
            target_action: TimerAction::default(),
            last_expiry: None,
        }
    }
}

struct ArmedTimer {
    started_at: DateTime<Utc>,
    duration_minutes: u32,
    deadline: DateTime<Utc>,
    action: TimerAction,
    remaining_minutes: u32,
    tick: ScheduleHandle,
}

enum TimerState {
    Idle,
    Armed(ArmedTimer),
}

struct Inner {
    state: TimerState,
    // Bumped whenever a registration is released; ticks carrying an older
    // generation are ignored.
    generation: u64,
    last_action: TimerAction,
    torn_down: bool,
}

pub struct TimerEngine<C: RemoteDeviceClient> {
    device_id: DeviceId,
    coordinator: Weak<Coordinator<C>>,
    scheduler: Arc<dyn Scheduler>,
    tick_period: Duration,
    inner: Mutex<Inner>,
    status: Arc<watch::Sender<TimerStatus>>,
    this: Weak<Self>,
}

impl<C: RemoteDeviceClient> TimerEngine<C> {
    pub(crate) fn new(
        device_id: DeviceId,
        coordinator: Weak<Coordinator<C>>,
        scheduler: Arc<dyn Scheduler>,
        tick_period: Duration,
    ) -> Arc<Self> {
        let (status, _) = watch::channel(TimerStatus::default());
        Arc::new_cyclic(|this| Self {
            device_id,
            coordinator,
            scheduler,
            tick_period,
            inner: Mutex::new(Inner {
                state: TimerState::Idle,
                generation: 0,
                last_action: TimerAction::default(),
                torn_down: false,
            }),
            status: Arc::new(status),
            this: this.clone(),
        })
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn status(&self) -> TimerStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TimerStatus> {
        self.status.subscribe()
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.inner.lock().state, TimerState::Armed(_))
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.lock().torn_down
    }

    /// Starts a timer of `minutes`, replacing any armed one. Zero only cancels.
    ///
    /// Fails with [`Error::TimerTornDown`] after [`teardown`](Self::teardown).
    /// If the scheduler cannot register the tick, the previous timer is
    /// still cancelled and the engine is left idle.
    pub fn arm(&self, minutes: i64, action: TimerAction) -> Result<()> {
        if !(0..=MAX_TIMER_MINUTES).contains(&minutes) {
            return Err(Error::InvalidDuration(minutes));
        }
        let minutes = minutes as u32;

        let mut inner = self.inner.lock();
        if inner.torn_down {
            warn!(device = %self.device_id, "arm after teardown rejected");
            return Err(Error::TimerTornDown(self.device_id.clone()));
        }
        let replaced = self.release(&mut inner);

        if minutes == 0 {
            if replaced {
                info!(device = %self.device_id, "timer cancelled by zero duration");
            }
            self.publish(&inner);
            return Ok(());
        }

        let now = self.scheduler.now();
        let deadline = now + chrono::Duration::minutes(i64::from(minutes));
        let generation = inner.generation;
        let this = self.this.clone();
        let scheduled = self.scheduler.schedule_recurring(
            self.tick_period,
            Arc::new(move |now: DateTime<Utc>| {
                if let Some(engine) = this.upgrade() {
                    engine.on_tick(generation, now);
                }
            }),
        );
        let tick = match scheduled {
            Ok(tick) => tick,
            Err(e) => {
                error!(device = %self.device_id, error = %e, "could not schedule timer tick");
                self.publish(&inner);
                return Err(e);
            }
        };

        inner.last_action = action;
        inner.state = TimerState::Armed(ArmedTimer {
            started_at: now,
            duration_minutes: minutes,
            deadline,
            action,
            remaining_minutes: minutes,
            tick,
        });
        info!(
            device = %self.device_id,
            minutes,
            action = action.as_str(),
            ends_at = %deadline.to_rfc3339(),
            "timer armed"
        );
        self.publish(&inner);
        Ok(())
    }

    /// Idempotent; a no-op when idle.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        if self.release(&mut inner) {
            info!(device = %self.device_id, "timer cancelled");
            self.publish(&inner);
        }
    }

    /// Called when the owning entity goes away. Releases any registration
    /// and retires the engine for good. Idempotent.
    pub fn teardown(&self) {
        let mut inner = self.inner.lock();
        if inner.torn_down {
            return;
        }
        debug!(device = %self.device_id, "tearing down timer");
        inner.torn_down = true;
        if self.release(&mut inner) {
            self.publish(&inner);
        }
    }

    /// Re-evaluates remaining time at `now`, firing the expiry action once
    /// the deadline has passed. Does nothing while idle.
    pub fn tick(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        self.evaluate(&mut inner, now);
    }

    /// [`tick`](Self::tick) at the scheduler's current time.
    pub fn evaluate_now(&self) {
        self.tick(self.scheduler.now());
    }

    fn on_tick(&self, generation: u64, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            trace!(device = %self.device_id, "stale tick ignored");
            return;
        }
        self.evaluate(&mut inner, now);
    }

    fn evaluate(&self, inner: &mut Inner, now: DateTime<Utc>) {
        let expired = match &mut inner.state {
            TimerState::Idle => return,
            TimerState::Armed(timer) if now >= timer.deadline => true,
            TimerState::Armed(timer) => {
                // Never let the displayed value climb back up, even if the
                // wall clock steps backwards.
                timer.remaining_minutes = timer
                    .remaining_minutes
                    .min(remaining_minutes(timer.deadline, now));
                trace!(device = %self.device_id, remaining = timer.remaining_minutes, "timer tick");
                false
            }
        };

        if expired
            && let TimerState::Armed(timer) = std::mem::replace(&mut inner.state, TimerState::Idle)
        {
            self.scheduler.cancel(timer.tick);
            inner.generation += 1;
            info!(
                device = %self.device_id,
                action = timer.action.as_str(),
                "timer expired"
            );
            self.publish(inner);
            self.dispatch_expiry(timer.action, now);
            return;
        }

        self.publish(inner);
    }

    /// Returns the tick registration and clears the armed state. True if a
    /// timer was armed.
    fn release(&self, inner: &mut Inner) -> bool {
        match std::mem::replace(&mut inner.state, TimerState::Idle) {
            TimerState::Idle => false,
            TimerState::Armed(timer) => {
                self.scheduler.cancel(timer.tick);
                inner.generation += 1;
                true
            }
        }
    }

    /// Fires the expiry action without waiting for it. The engine has already
    /// gone idle; the result is only recorded in [`TimerStatus::last_expiry`].
    fn dispatch_expiry(&self, action: TimerAction, fired_at: DateTime<Utc>) {
        self.status.send_modify(|s| {
            s.last_expiry = Some(ExpiryReport {
                action,
                fired_at,
                outcome: ExpiryOutcome::Pending,
            });
        });

        // The coordinator is upgraded last and moved straight into the task,
        // so its final drop can never happen here under the engine lock.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(device = %self.device_id, "no async runtime, timer action dropped");
            record_outcome(&self.status, fired_at, ExpiryOutcome::Failed("no async runtime".to_string()));
            return;
        };
        let Some(coordinator) = self.coordinator.upgrade() else {
            warn!(device = %self.device_id, "coordinator gone, timer action dropped");
            record_outcome(&self.status, fired_at, ExpiryOutcome::Failed(Error::CoordinatorGone.to_string()));
            return;
        };

        let device_id = self.device_id.clone();
        let status = self.status.clone();
        runtime.spawn(async move {
            let params = action.params();
            let outcome = match coordinator.set_device_params(&device_id, &params).await {
                Ok(()) => {
                    info!(device = %device_id, action = action.as_str(), "timer action applied");
                    ExpiryOutcome::Confirmed
                }
                Err(e) => {
                    error!(device = %device_id, action = action.as_str(), error = %e, "timer action failed");
                    ExpiryOutcome::Failed(e.to_string())
                }
            };
            record_outcome(&status, fired_at, outcome);
        });
    }

    fn publish(&self, inner: &Inner) {
        self.status.send_modify(|s| {
            s.target_action = inner.last_action;
            match &inner.state {
                TimerState::Idle => {
                    s.active = false;
                    s.remaining_minutes = 0;
                    s.duration_minutes = None;
                    s.started_at = None;
                    s.ends_at = None;
                }
                TimerState::Armed(timer) => {
                    s.active = true;
                    s.remaining_minutes = timer.remaining_minutes;
                    s.duration_minutes = Some(timer.duration_minutes);
                    s.started_at = Some(timer.started_at);
                    s.ends_at = Some(timer.deadline);
                }
            }
        });
    }
}

fn record_outcome(status: &watch::Sender<TimerStatus>, fired_at: DateTime<Utc>, outcome: ExpiryOutcome) {
    status.send_modify(|s| {
        if let Some(report) = s.last_expiry.as_mut()
            && report.fired_at == fired_at
        {
            report.outcome = outcome;
        }
    });
}

/// Whole minutes left, truncated and never negative.
fn remaining_minutes(deadline: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    (deadline - now).num_minutes().clamp(0, MAX_TIMER_MINUTES) as u32
}
