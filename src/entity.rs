use std::sync::{Arc, Weak};

use serde::Serialize;
use tracing::warn;

use crate::client::RemoteDeviceClient;
use crate::coordinator::Coordinator;
use crate::types::{DeviceId, DeviceRef, Params};
use crate::{Error, Result};

pub const MANUFACTURER: &str = "Tornado";
pub const MODEL: &str = "AUX Cloud";

/// Physical-device metadata shared by every entity of one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub identifier: DeviceId,
    pub name: String,
    pub manufacturer: &'static str,
    pub model: &'static str,
}

impl DeviceInfo {
    pub fn for_device(device: &DeviceRef) -> Self {
        Self {
            identifier: device.endpoint_id.clone(),
            name: device_name(device),
            manufacturer: MANUFACTURER,
            model: MODEL,
        }
    }
}

pub(crate) fn device_name(device: &DeviceRef) -> String {
    format!("Tornado AC {}", device.friendly_name)
}

pub(crate) fn upgrade<C: RemoteDeviceClient>(coordinator: &Weak<Coordinator<C>>) -> Result<Arc<Coordinator<C>>> {
    coordinator.upgrade().ok_or(Error::CoordinatorGone)
}

/// Sends `params` for one entity, logging failures under `what`.
pub(crate) async fn send_params<C: RemoteDeviceClient>(
    coordinator: &Weak<Coordinator<C>>,
    device_id: &DeviceId,
    params: Params,
    what: &str,
) -> Result<()> {
    let coordinator = upgrade(coordinator)?;
    coordinator
        .set_device_params(device_id, &params)
        .await
        .inspect_err(|e| warn!(device = %device_id, error = %e, "{what} failed"))
}
