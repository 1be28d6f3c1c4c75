#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tornado_ac::{
    Coordinator, DeviceId, DeviceRef, Error, ManualScheduler, Params, RemoteDeviceClient, Result,
    params_of,
};

#[derive(Default)]
struct FakeState {
    devices: Mutex<Vec<DeviceRef>>,
    fail_list: AtomicBool,
    fail_set: AtomicBool,
    list_calls: AtomicUsize,
    set_calls: Mutex<Vec<(DeviceId, Params)>>,
}

/// In-memory cloud. Clones share state, so a test can keep a handle after
/// moving one into the coordinator.
#[derive(Clone, Default)]
pub struct FakeClient {
    state: Arc<FakeState>,
}

impl FakeClient {
    pub fn new(devices: Vec<DeviceRef>) -> Self {
        let client = Self::default();
        *client.state.devices.lock() = devices;
        client
    }

    pub fn set_devices(&self, devices: Vec<DeviceRef>) {
        *self.state.devices.lock() = devices;
    }

    pub fn update_param(&self, id: &str, key: &str, value: i64) {
        for device in self.state.devices.lock().iter_mut() {
            if device.endpoint_id.as_str() == id {
                device.params.insert(key.to_string(), Value::from(value));
            }
        }
    }

    pub fn fail_list(&self, fail: bool) {
        self.state.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn fail_set(&self, fail: bool) {
        self.state.fail_set.store(fail, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.state.list_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> Vec<(DeviceId, Params)> {
        self.state.set_calls.lock().clone()
    }
}

impl RemoteDeviceClient for FakeClient {
    async fn list_devices(&self) -> Result<Vec<DeviceRef>> {
        self.state.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_list.load(Ordering::SeqCst) {
            return Err(Error::Protocol("cloud unreachable".into()));
        }
        Ok(self.state.devices.lock().clone())
    }

    async fn set_params(&self, device: &DeviceRef, params: &Params) -> Result<()> {
        self.state
            .set_calls
            .lock()
            .push((device.endpoint_id.clone(), params.clone()));
        if self.state.fail_set.load(Ordering::SeqCst) {
            return Err(Error::Api {
                endpoint: "/device/control/v2/sdkcontrol".into(),
                body: "{\"status\":-1}".into(),
            });
        }
        Ok(())
    }
}

/// A cooling unit at 25.0 °C target, 27.0 °C room, low fan, vertical swing.
pub fn ac(id: &str, name: &str) -> DeviceRef {
    DeviceRef {
        endpoint_id: DeviceId::from(id),
        friendly_name: name.to_string(),
        params: params_of([
            ("pwr", 1),
            ("ac_mode", 2),
            ("ac_mark", 1),
            ("temp", 250),
            ("envtemp", 270),
            ("ac_vdir", 1),
            ("ac_hdir", 0),
            ("ac_slp", 0),
        ]),
        ..Default::default()
    }
}

pub fn start_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 22, 0, 0).unwrap()
}

pub struct Harness {
    pub client: FakeClient,
    pub scheduler: Arc<ManualScheduler>,
    pub coordinator: Arc<Coordinator<FakeClient>>,
}

pub fn harness(devices: Vec<DeviceRef>) -> Harness {
    harness_with_tick(devices, Duration::from_secs(60))
}

pub fn harness_with_tick(devices: Vec<DeviceRef>, tick: Duration) -> Harness {
    let client = FakeClient::new(devices);
    let scheduler = Arc::new(ManualScheduler::new(start_time()));
    let coordinator = Coordinator::builder(client.clone())
        .scheduler(scheduler.clone())
        .tick_period(tick)
        .build()
        .expect("valid coordinator config");
    Harness {
        client,
        scheduler,
        coordinator,
    }
}
