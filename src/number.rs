use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use tracing::{info, warn};

use crate::client::RemoteDeviceClient;
use crate::coordinator::{Coordinator, Observer};
use crate::entity::{self, DeviceInfo};
use crate::snapshot::SnapshotStore;
use crate::timer::MAX_TIMER_MINUTES;
use crate::types::{DeviceId, DeviceRef, TimerAction};
use crate::{Error, Result};

pub const MIN_VALUE: f64 = 0.0;
pub const MAX_VALUE: f64 = MAX_TIMER_MINUTES as f64;
pub const STEP: f64 = 1.0;

/// Box input for the timer duration in minutes. Setting a value arms the
/// device's timer with [`TimerAction::TurnOff`].
pub struct TimerDurationNumber<C: RemoteDeviceClient> {
    coordinator: Weak<Coordinator<C>>,
    device_id: DeviceId,
    unique_id: String,
    name: String,
    device_info: DeviceInfo,
    available: AtomicBool,
    value: AtomicU32,
}

impl<C: RemoteDeviceClient> TimerDurationNumber<C> {
    pub fn new(coordinator: &Arc<Coordinator<C>>, device: &DeviceRef) -> Self {
        Self {
            coordinator: Arc::downgrade(coordinator),
            device_id: device.endpoint_id.clone(),
            unique_id: format!("{}_timer_duration", device.endpoint_id),
            name: format!("{} Timer Duration", entity::device_name(device)),
            device_info: DeviceInfo::for_device(device),
            available: AtomicBool::new(false),
            value: AtomicU32::new(0),
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

    /// Last duration successfully requested.
    pub fn native_value(&self) -> u32 {
        self.value.load(Ordering::Acquire)
    }

    pub fn set_value(&self, value: f64) -> Result<()> {
        if !value.is_finite() || !(MIN_VALUE..=MAX_VALUE).contains(&value) {
            return Err(Error::InvalidValue(format!(
                "timer duration {value} outside {MIN_VALUE}..={MAX_VALUE}"
            )));
        }
        let minutes = value.trunc() as i64;
        info!(device = %self.device_id, minutes, "setting timer duration");

        entity::upgrade(&self.coordinator)?
            .arm_timer(&self.device_id, minutes, TimerAction::TurnOff)
            .inspect_err(|e| warn!(device = %self.device_id, error = %e, "set timer duration failed"))?;
        self.value.store(minutes as u32, Ordering::Release);
        Ok(())
    }
}

impl<C: RemoteDeviceClient> Observer for TimerDurationNumber<C> {
    fn on_snapshot_refreshed(&self, store: &SnapshotStore) {
        self.available
            .store(store.contains(&self.device_id), Ordering::Release);
    }
}
