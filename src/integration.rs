//! Wires one coordinator to the per-device entities and exposes the timer
//! service calls.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::client::RemoteDeviceClient;
use crate::climate::ClimateControl;
use crate::coordinator::{Coordinator, Observer, SubscriptionHandle};
use crate::number::TimerDurationNumber;
use crate::sensor::TimerSensor;
use crate::switch::SleepModeSwitch;
use crate::types::{DeviceId, TimerAction};
use crate::{Error, Result};

/// Payload of the `set_timer` service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SetTimerCall {
    pub device_id: DeviceId,
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub action: TimerAction,
}

/// Payload of the `cancel_timer` service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CancelTimerCall {
    pub device_id: DeviceId,
}

/// All entities belonging to one device.
pub struct DeviceEntities<C: RemoteDeviceClient> {
    pub climate: Arc<ClimateControl<C>>,
    pub timer: Arc<TimerSensor<C>>,
    pub sleep_mode: Arc<SleepModeSwitch<C>>,
    pub timer_duration: Arc<TimerDurationNumber<C>>,
}

pub struct Integration<C: RemoteDeviceClient> {
    coordinator: Arc<Coordinator<C>>,
    devices: Vec<DeviceEntities<C>>,
    subscriptions: Mutex<Vec<SubscriptionHandle>>,
    refresh_loop: Mutex<Option<JoinHandle<()>>>,
}

impl<C: RemoteDeviceClient> Integration<C> {
    /// Performs the first refresh, creates and subscribes every entity, and
    /// starts periodic refreshing. A failed first refresh aborts setup.
    ///
    /// Entities are built from the store that refresh published, so they
    /// match what the first delivery sees and the cloud is listed only once.
    pub async fn setup(coordinator: Arc<Coordinator<C>>) -> Result<Self> {
        coordinator.refresh().await?;
        let store = coordinator.store();
        let mut devices: Vec<_> = store.iter().map(|snap| snap.device()).collect();
        devices.sort_by(|a, b| a.endpoint_id.as_str().cmp(b.endpoint_id.as_str()));

        let mut entities = Vec::with_capacity(devices.len());
        let mut subscriptions = Vec::with_capacity(devices.len() * 4);

        for device in devices {
            let set = DeviceEntities {
                climate: Arc::new(ClimateControl::new(&coordinator, device)),
                timer: Arc::new(TimerSensor::new(&coordinator, device)),
                sleep_mode: Arc::new(SleepModeSwitch::new(&coordinator, device)),
                timer_duration: Arc::new(TimerDurationNumber::new(&coordinator, device)),
            };
            let observers: [Arc<dyn Observer>; 4] = [
                set.climate.clone(),
                set.timer.clone(),
                set.sleep_mode.clone(),
                set.timer_duration.clone(),
            ];
            for observer in observers {
                observer.on_snapshot_refreshed(&store);
                subscriptions.push(coordinator.subscribe(observer));
            }
            debug!(device = %device.endpoint_id, "entities created");
            entities.push(set);
        }

        let refresh_loop = coordinator.spawn_refresh_loop();
        info!(devices = entities.len(), "integration set up");

        Ok(Self {
            coordinator,
            devices: entities,
            subscriptions: Mutex::new(subscriptions),
            refresh_loop: Mutex::new(Some(refresh_loop)),
        })
    }

    pub fn coordinator(&self) -> &Arc<Coordinator<C>> {
        &self.coordinator
    }

    pub fn devices(&self) -> &[DeviceEntities<C>] {
        &self.devices
    }

    pub fn device(&self, device_id: &DeviceId) -> Option<&DeviceEntities<C>> {
        self.devices.iter().find(|d| d.climate.device_id() == device_id)
    }

    pub fn set_timer(&self, call: SetTimerCall) -> Result<()> {
        info!(
            device = %call.device_id,
            minutes = call.duration,
            action = call.action.as_str(),
            "set_timer called"
        );
        self.device(&call.device_id)
            .ok_or_else(|| Error::UnknownDevice(call.device_id.clone()))?
            .timer
            .set_timer(call.duration, call.action)
    }

    pub fn cancel_timer(&self, call: CancelTimerCall) -> Result<()> {
        info!(device = %call.device_id, "cancel_timer called");
        self.device(&call.device_id)
            .ok_or_else(|| Error::UnknownDevice(call.device_id.clone()))?
            .timer
            .cancel_timer()
    }

    /// Stops refreshing, unsubscribes every entity and tears down all timers.
    /// Calling it again does nothing.
    pub fn unload(&self) {
        let Some(refresh_loop) = self.refresh_loop.lock().take() else {
            return;
        };
        refresh_loop.abort();
        for handle in self.subscriptions.lock().drain(..) {
            self.coordinator.unsubscribe(handle);
        }
        for set in &self.devices {
            set.timer.teardown();
        }
        info!("integration unloaded");
    }
}

impl<C: RemoteDeviceClient> Drop for Integration<C> {
    fn drop(&mut self) {
        self.unload();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_timer_call_defaults() {
        let call: SetTimerCall = serde_json::from_str(r#"{"device_id": "dev1"}"#).unwrap();
        assert_eq!(call.device_id, DeviceId::from("dev1"));
        assert_eq!(call.duration, 0);
        assert_eq!(call.action, TimerAction::TurnOff);
    }

    #[test]
    fn set_timer_call_sleep_action() {
        let call: SetTimerCall =
            serde_json::from_str(r#"{"device_id": "dev1", "duration": 90, "action": "sleep_mode"}"#).unwrap();
        assert_eq!(call.duration, 90);
        assert_eq!(call.action, TimerAction::EnableSleepMode);
    }

    #[test]
    fn set_timer_call_rejects_unknown_action() {
        let res = serde_json::from_str::<SetTimerCall>(r#"{"device_id": "d", "action": "explode"}"#);
        assert!(res.is_err());
    }
}
