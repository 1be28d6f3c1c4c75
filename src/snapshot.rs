use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::types::{DeviceId, DeviceRef, Params, PARAM_SLEEP, param_i64};

/// Last known state of one device. Never mutated after publication.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    device: DeviceRef,
}

impl DeviceSnapshot {
    pub fn new(device: DeviceRef) -> Self {
        Self { device }
    }

    pub fn id(&self) -> &DeviceId {
        &self.device.endpoint_id
    }

    pub fn display_name(&self) -> &str {
        &self.device.friendly_name
    }

    pub fn params(&self) -> &Params {
        &self.device.params
    }

    /// Addressing material needed to send commands to this device.
    pub fn device(&self) -> &DeviceRef {
        &self.device
    }

    pub fn sleep_mode_active(&self) -> bool {
        param_i64(self.params(), PARAM_SLEEP).unwrap_or(0) != 0
    }
}

/// Every device snapshot produced by one refresh. The coordinator swaps in a
/// whole new store per cycle, so readers always see one consistent cycle.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    devices: HashMap<DeviceId, Arc<DeviceSnapshot>>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl SnapshotStore {
    pub fn from_devices(devices: Vec<DeviceRef>, refreshed_at: DateTime<Utc>) -> Self {
        let devices = devices
            .into_iter()
            .map(|d| (d.endpoint_id.clone(), Arc::new(DeviceSnapshot::new(d))))
            .collect();
        Self {
            devices,
            refreshed_at: Some(refreshed_at),
        }
    }

    pub fn get(&self, id: &DeviceId) -> Option<&Arc<DeviceSnapshot>> {
        self.devices.get(id)
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.devices.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<DeviceSnapshot>> {
        self.devices.values()
    }

    /// `None` until the first successful refresh.
    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }
}
