use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, info};

use crate::client::RemoteDeviceClient;
use crate::coordinator::{Coordinator, Observer};
use crate::entity::{self, DeviceInfo};
use crate::snapshot::SnapshotStore;
use crate::types::{DeviceId, DeviceRef, PARAM_SLEEP, params_of};
use crate::Result;

pub struct SleepModeSwitch<C: RemoteDeviceClient> {
    coordinator: Weak<Coordinator<C>>,
    device_id: DeviceId,
    unique_id: String,
    name: String,
    device_info: DeviceInfo,
    available: AtomicBool,
    is_on: AtomicBool,
}

impl<C: RemoteDeviceClient> SleepModeSwitch<C> {
    pub fn new(coordinator: &Arc<Coordinator<C>>, device: &DeviceRef) -> Self {
        Self {
            coordinator: Arc::downgrade(coordinator),
            device_id: device.endpoint_id.clone(),
            unique_id: format!("{}_sleep_mode", device.endpoint_id),
            name: format!("{} Sleep Mode", entity::device_name(device)),
            device_info: DeviceInfo::for_device(device),
            available: AtomicBool::new(false),
            is_on: AtomicBool::new(false),
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

    pub fn is_on(&self) -> bool {
        self.is_on.load(Ordering::Acquire)
    }

    pub async fn turn_on(&self) -> Result<()> {
        info!(device = %self.device_id, "turning on sleep mode");
        entity::send_params(
            &self.coordinator,
            &self.device_id,
            params_of([(PARAM_SLEEP, 1)]),
            "enable sleep mode",
        )
        .await
    }

    pub async fn turn_off(&self) -> Result<()> {
        info!(device = %self.device_id, "turning off sleep mode");
        entity::send_params(
            &self.coordinator,
            &self.device_id,
            params_of([(PARAM_SLEEP, 0)]),
            "disable sleep mode",
        )
        .await
    }
}

impl<C: RemoteDeviceClient> Observer for SleepModeSwitch<C> {
    fn on_snapshot_refreshed(&self, store: &SnapshotStore) {
        let Some(snap) = store.get(&self.device_id) else {
            self.available.store(false, Ordering::Release);
            return;
        };
        self.is_on.store(snap.sleep_mode_active(), Ordering::Release);
        self.available.store(true, Ordering::Release);
        debug!(device = %self.device_id, is_on = self.is_on(), "sleep mode switch updated");
    }
}
