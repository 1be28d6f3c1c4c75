//! Single source of truth for device state.
//!
//! The coordinator polls the cloud, swaps in a fresh [`SnapshotStore`] per
//! cycle and fans the new store out to every subscribed [`Observer`]. It also
//! owns the per-device [`TimerEngine`]s.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::RemoteDeviceClient;
use crate::diff::diff_stores;
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::snapshot::SnapshotStore;
use crate::timer::TimerEngine;
use crate::types::{DeviceId, DeviceRef, Event, Params, TimerAction};
use crate::{Error, Result};

pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(60);

type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;

/// A consumer of refreshed device state.
pub trait Observer: Send + Sync {
    /// Called once per successful refresh with the newly published store.
    fn on_snapshot_refreshed(&self, store: &SnapshotStore);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

struct Subscription {
    id: u64,
    observer: Arc<dyn Observer>,
    active: AtomicBool,
    // Held for the duration of each delivery; unsubscribe waits on it so no
    // delivery can still be running once removal returns. Reentrant so an
    // observer may unsubscribe itself from inside its own callback.
    delivering: ReentrantMutex<()>,
}

pub struct CoordinatorBuilder<C> {
    client: C,
    update_interval: Duration,
    tick_period: Duration,
    scheduler: Option<Arc<dyn Scheduler>>,
    runtime: Option<Handle>,
    event_callbacks: Vec<EventCallback>,
}

impl<C: RemoteDeviceClient> CoordinatorBuilder<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            tick_period: DEFAULT_TICK_PERIOD,
            scheduler: None,
            runtime: None,
            event_callbacks: Vec::new(),
        }
    }

    pub fn update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    /// How often armed timers re-evaluate their remaining time.
    pub fn tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Runtime for the default [`TokioScheduler`]'s tick tasks. Without it,
    /// the runtime `build` is called from is used.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn on_event(mut self, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.event_callbacks.push(Box::new(f));
        self
    }

    pub fn build(self) -> Result<Arc<Coordinator<C>>> {
        if self.update_interval.is_zero() {
            return Err(Error::InvalidValue("update interval must be non-zero".to_string()));
        }
        if self.tick_period.is_zero() {
            return Err(Error::InvalidValue("timer tick period must be non-zero".to_string()));
        }
        Ok(Arc::new(Coordinator {
            client: self.client,
            store: RwLock::new(Arc::new(SnapshotStore::default())),
            subscriptions: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            event_callbacks: self.event_callbacks,
            scheduler: self
                .scheduler
                .unwrap_or_else(|| match self.runtime {
                    Some(handle) => Arc::new(TokioScheduler::with_handle(handle)),
                    None => Arc::new(TokioScheduler::new()),
                }),
            update_interval: self.update_interval,
            tick_period: self.tick_period,
            timers: Mutex::new(HashMap::new()),
            refresh_cycle: tokio::sync::Mutex::new(()),
        }))
    }
}

pub struct Coordinator<C: RemoteDeviceClient> {
    client: C,
    store: RwLock<Arc<SnapshotStore>>,
    subscriptions: Mutex<Vec<Arc<Subscription>>>,
    next_subscription: AtomicU64,
    event_callbacks: Vec<EventCallback>,
    scheduler: Arc<dyn Scheduler>,
    update_interval: Duration,
    tick_period: Duration,
    timers: Mutex<HashMap<DeviceId, Arc<TimerEngine<C>>>>,
    refresh_cycle: tokio::sync::Mutex<()>,
}

impl<C: RemoteDeviceClient> Coordinator<C> {
    pub fn builder(client: C) -> CoordinatorBuilder<C> {
        CoordinatorBuilder::new(client)
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// The store published by the last successful refresh.
    pub fn store(&self) -> Arc<SnapshotStore> {
        self.store.read().clone()
    }

    /// Fetches every device and publishes a new store. On failure the previous
    /// store stays in place and no observer is notified.
    pub async fn refresh(&self) -> Result<()> {
        let _cycle = self.refresh_cycle.lock().await;
        debug!("refreshing device state");

        let devices = match self.client.list_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(error = %e, "refresh failed, keeping previous state");
                self.emit(&Event::RefreshFailed { error: e.to_string() });
                return Err(e);
            }
        };

        let next = Arc::new(SnapshotStore::from_devices(devices, self.scheduler.now()));
        let previous = std::mem::replace(&mut *self.store.write(), next.clone());

        let events = diff_stores(&previous, &next);
        for event in &events {
            self.emit(event);
        }

        let delivered = self.notify(&next);
        debug!(
            devices = next.len(),
            events = events.len(),
            observers = delivered,
            "refresh complete"
        );
        Ok(())
    }

    /// Asks the service which devices exist, bypassing the store.
    pub async fn get_devices(&self) -> Result<Vec<DeviceRef>> {
        self.client.list_devices().await
    }

    /// Sends a parameter delta to one device. The local store is left alone;
    /// the next refresh reconciles it.
    pub async fn set_device_params(&self, device_id: &DeviceId, params: &Params) -> Result<()> {
        let device = self
            .store()
            .get(device_id)
            .map(|snap| snap.device().clone())
            .ok_or_else(|| Error::UnknownDevice(device_id.clone()))?;
        debug!(device = %device_id, ?params, "sending params");
        self.client.set_params(&device, params).await
    }

    pub fn subscribe(&self, observer: Arc<dyn Observer>) -> SubscriptionHandle {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.lock().push(Arc::new(Subscription {
            id,
            observer,
            active: AtomicBool::new(true),
            delivering: ReentrantMutex::new(()),
        }));
        SubscriptionHandle(id)
    }

    /// After this returns the observer receives no further notifications.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        let removed = {
            let mut subs = self.subscriptions.lock();
            subs.iter()
                .position(|s| s.id == handle.0)
                .map(|idx| subs.remove(idx))
        };
        if let Some(sub) = removed {
            sub.active.store(false, Ordering::Release);
            drop(sub.delivering.lock());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Spawns the periodic refresh. The task holds only a weak reference and
    /// ends once the coordinator is dropped.
    pub fn spawn_refresh_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::downgrade(self);
        let period = self.update_interval;
        info!(interval_secs = period.as_secs(), "starting refresh loop");

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };
                // Failures are already logged and reported as events.
                let _ = coordinator.refresh().await;
            }
            debug!("refresh loop stopped");
        })
    }

    /// Returns the device's timer engine, creating it on first use. There is
    /// at most one engine per device; a torn-down engine is never handed out.
    pub fn timer_engine(self: &Arc<Self>, device_id: &DeviceId) -> Arc<TimerEngine<C>> {
        let mut timers = self.timers.lock();
        if let Some(engine) = timers.get(device_id)
            && !engine.is_torn_down()
        {
            return engine.clone();
        }
        let engine = TimerEngine::new(
            device_id.clone(),
            Arc::downgrade(self),
            self.scheduler.clone(),
            self.tick_period,
        );
        timers.insert(device_id.clone(), engine.clone());
        engine
    }

    pub fn find_timer(&self, device_id: &DeviceId) -> Option<Arc<TimerEngine<C>>> {
        self.timers.lock().get(device_id).cloned()
    }

    pub fn arm_timer(&self, device_id: &DeviceId, minutes: i64, action: TimerAction) -> Result<()> {
        self.find_timer(device_id)
            .ok_or_else(|| Error::UnknownDevice(device_id.clone()))?
            .arm(minutes, action)
    }

    pub fn cancel_timer(&self, device_id: &DeviceId) -> Result<()> {
        self.find_timer(device_id)
            .ok_or_else(|| Error::UnknownDevice(device_id.clone()))?
            .cancel();
        Ok(())
    }

    /// Drops the device's timer engine, cancelling any armed timer.
    pub fn remove_timer(&self, device_id: &DeviceId) {
        let engine = self.timers.lock().remove(device_id);
        if let Some(engine) = engine {
            engine.teardown();
        }
    }

    /// Tears down `engine`, removing it from the map only if it is still the
    /// device's current engine.
    pub(crate) fn release_timer(&self, engine: &Arc<TimerEngine<C>>) {
        {
            let mut timers = self.timers.lock();
            if timers
                .get(engine.device_id())
                .is_some_and(|current| Arc::ptr_eq(current, engine))
            {
                timers.remove(engine.device_id());
            }
        }
        engine.teardown();
    }

    fn notify(&self, store: &SnapshotStore) -> usize {
        let subs: Vec<Arc<Subscription>> = self.subscriptions.lock().clone();
        let mut delivered = 0;
        for sub in subs {
            let _delivering = sub.delivering.lock();
            if !sub.active.load(Ordering::Acquire) {
                continue;
            }
            sub.observer.on_snapshot_refreshed(store);
            delivered += 1;
        }
        delivered
    }

    fn emit(&self, event: &Event) {
        for cb in &self.event_callbacks {
            cb(event);
        }
    }
}

impl<C: RemoteDeviceClient> Drop for Coordinator<C> {
    fn drop(&mut self) {
        for (_, engine) in self.timers.get_mut().drain() {
            engine.teardown();
        }
    }
}
