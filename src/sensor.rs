use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::client::RemoteDeviceClient;
use crate::coordinator::{Coordinator, Observer};
use crate::entity::{self, DeviceInfo};
use crate::snapshot::SnapshotStore;
use crate::timer::{TimerEngine, TimerStatus};
use crate::types::{DeviceId, DeviceRef, TimerAction};
use crate::{Error, Result};

/// Attributes published alongside the remaining minutes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerAttributes {
    pub timer_active: bool,
    pub timer_duration: Option<u32>,
    pub timer_start_time: Option<String>,
    pub timer_end_time: Option<String>,
    pub target_action: TimerAction,
    pub sleep_mode_active: bool,
}

/// Remaining minutes of the device's shut-off timer. Owns the lifecycle of
/// the device's [`TimerEngine`]: tearing the sensor down cancels the timer.
pub struct TimerSensor<C: RemoteDeviceClient> {
    coordinator: Weak<Coordinator<C>>,
    device_id: DeviceId,
    unique_id: String,
    name: String,
    device_info: DeviceInfo,
    engine: Arc<TimerEngine<C>>,
    available: AtomicBool,
    sleep_mode_active: AtomicBool,
}

impl<C: RemoteDeviceClient> TimerSensor<C> {
    pub fn new(coordinator: &Arc<Coordinator<C>>, device: &DeviceRef) -> Self {
        let engine = coordinator.timer_engine(&device.endpoint_id);
        info!(device = %device.endpoint_id, "timer sensor initialized");
        Self {
            coordinator: Arc::downgrade(coordinator),
            device_id: device.endpoint_id.clone(),
            unique_id: format!("{}_timer", device.endpoint_id),
            name: format!("{} Timer", entity::device_name(device)),
            device_info: DeviceInfo::for_device(device),
            engine,
            available: AtomicBool::new(false),
            sleep_mode_active: AtomicBool::new(false),
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    pub fn available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Whole minutes until the timer fires; 0 when idle.
    pub fn native_value(&self) -> u32 {
        self.engine.status().remaining_minutes
    }

    pub fn timer_status(&self) -> TimerStatus {
        self.engine.status()
    }

    pub fn watch(&self) -> watch::Receiver<TimerStatus> {
        self.engine.subscribe()
    }

    pub fn extra_state_attributes(&self) -> TimerAttributes {
        let status = self.engine.status();
        TimerAttributes {
            timer_active: status.active,
            timer_duration: status.duration_minutes,
            timer_start_time: status.started_at.map(|t| t.to_rfc3339()),
            timer_end_time: status.ends_at.map(|t| t.to_rfc3339()),
            target_action: status.target_action,
            sleep_mode_active: self.sleep_mode_active.load(Ordering::Acquire),
        }
    }

    /// Arms the device's timer through the coordinator. Fails once this
    /// sensor has been torn down.
    pub fn set_timer(&self, minutes: i64, action: TimerAction) -> Result<()> {
        if self.engine.is_torn_down() {
            return Err(Error::TimerTornDown(self.device_id.clone()));
        }
        entity::upgrade(&self.coordinator)?.arm_timer(&self.device_id, minutes, action)
    }

    /// A no-op after teardown; a later sensor for the same device owns its
    /// own timer.
    pub fn cancel_timer(&self) -> Result<()> {
        if self.engine.is_torn_down() {
            return Ok(());
        }
        entity::upgrade(&self.coordinator)?.cancel_timer(&self.device_id)
    }

    /// Releases the timer for good. Safe to call more than once.
    pub fn teardown(&self) {
        match self.coordinator.upgrade() {
            Some(coordinator) => coordinator.release_timer(&self.engine),
            None => self.engine.teardown(),
        }
    }
}

impl<C: RemoteDeviceClient> Observer for TimerSensor<C> {
    fn on_snapshot_refreshed(&self, store: &SnapshotStore) {
        let Some(snap) = store.get(&self.device_id) else {
            self.available.store(false, Ordering::Release);
            return;
        };
        // Remote sleep mode is reported as-is; it never touches the timer.
        self.sleep_mode_active
            .store(snap.sleep_mode_active(), Ordering::Release);
        self.engine.evaluate_now();
        self.available.store(true, Ordering::Release);
        debug!(device = %self.device_id, remaining = self.native_value(), "timer sensor updated");
    }
}
