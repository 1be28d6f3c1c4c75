use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::client::RemoteDeviceClient;
use crate::coordinator::{Coordinator, Observer};
use crate::entity::{self, DeviceInfo};
use crate::snapshot::SnapshotStore;
use crate::types::{
    DeviceId, DeviceRef, FanMode, HvacAction, HvacMode, PARAM_AMBIENT_TEMP, PARAM_FAN,
    PARAM_HORIZONTAL_SWING, PARAM_MODE, PARAM_POWER, PARAM_TARGET_TEMP, PARAM_VERTICAL_SWING,
    Params, SwingMode, Temperature, param_i64, params_of,
};
use crate::{Error, Result};

pub const MIN_TEMP: f64 = 16.0;
pub const MAX_TEMP: f64 = 32.0;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClimateState {
    pub available: bool,
    pub hvac_mode: Option<HvacMode>,
    pub hvac_action: HvacAction,
    pub target_temperature: Option<Temperature>,
    pub current_temperature: Option<Temperature>,
    pub fan_mode: Option<FanMode>,
    pub swing_mode: Option<SwingMode>,
}

impl ClimateState {
    fn update_from(&mut self, params: &Params) {
        let power = param_i64(params, PARAM_POWER);
        self.hvac_mode = match power {
            Some(0) => Some(HvacMode::Off),
            _ => param_i64(params, PARAM_MODE).and_then(HvacMode::from_aux_code),
        };
        self.hvac_action = self.hvac_mode.map(HvacAction::from).unwrap_or_default();
        self.target_temperature = param_i64(params, PARAM_TARGET_TEMP).map(Temperature::from_tenths);
        self.current_temperature = param_i64(params, PARAM_AMBIENT_TEMP).map(Temperature::from_tenths);
        self.fan_mode = param_i64(params, PARAM_FAN).and_then(FanMode::from_aux_code);
        self.swing_mode = Some(SwingMode::from_aux_codes(
            param_i64(params, PARAM_VERTICAL_SWING).unwrap_or(0),
            param_i64(params, PARAM_HORIZONTAL_SWING).unwrap_or(0),
        ));
        self.available = true;
    }
}

/// Thermostat view of one air conditioner.
pub struct ClimateControl<C: RemoteDeviceClient> {
    coordinator: Weak<Coordinator<C>>,
    device_id: DeviceId,
    unique_id: String,
    name: String,
    device_info: DeviceInfo,
    state: RwLock<ClimateState>,
}

impl<C: RemoteDeviceClient> ClimateControl<C> {
    pub fn new(coordinator: &Arc<Coordinator<C>>, device: &DeviceRef) -> Self {
        Self {
            coordinator: Arc::downgrade(coordinator),
            device_id: device.endpoint_id.clone(),
            unique_id: format!("{}_climate", device.endpoint_id),
            name: entity::device_name(device),
            device_info: DeviceInfo::for_device(device),
            state: RwLock::new(ClimateState::default()),
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

    pub fn state(&self) -> ClimateState {
        self.state.read().clone()
    }

    pub fn available(&self) -> bool {
        self.state.read().available
    }

    pub fn hvac_modes(&self) -> &'static [HvacMode] {
        &HvacMode::ALL
    }

    pub fn fan_modes(&self) -> &'static [FanMode] {
        &FanMode::ALL
    }

    pub fn swing_modes(&self) -> &'static [SwingMode] {
        &SwingMode::ALL
    }

    pub async fn set_temperature(&self, celsius: f64) -> Result<()> {
        if !celsius.is_finite() || !(MIN_TEMP..=MAX_TEMP).contains(&celsius) {
            return Err(Error::InvalidValue(format!(
                "temperature {celsius} outside {MIN_TEMP}..={MAX_TEMP}"
            )));
        }
        let tenths = Temperature::from_celsius(celsius).to_tenths();
        info!(device = %self.device_id, tenths, "setting target temperature");
        self.send(params_of([(PARAM_TARGET_TEMP, tenths)]), "set temperature")
            .await
    }

    pub async fn set_hvac_mode(&self, mode: HvacMode) -> Result<()> {
        info!(device = %self.device_id, ?mode, "setting hvac mode");
        let params = match mode.as_aux_code() {
            None => params_of([(PARAM_POWER, 0)]),
            Some(code) => params_of([(PARAM_POWER, 1), (PARAM_MODE, code)]),
        };
        self.send(params, "set hvac mode").await
    }

    pub async fn set_fan_mode(&self, mode: FanMode) -> Result<()> {
        info!(device = %self.device_id, ?mode, "setting fan mode");
        self.send(params_of([(PARAM_FAN, mode.as_aux_code())]), "set fan mode")
            .await
    }

    pub async fn set_swing_mode(&self, mode: SwingMode) -> Result<()> {
        info!(device = %self.device_id, ?mode, "setting swing mode");
        let (vertical, horizontal) = mode.as_aux_codes();
        self.send(
            params_of([(PARAM_VERTICAL_SWING, vertical), (PARAM_HORIZONTAL_SWING, horizontal)]),
            "set swing mode",
        )
        .await
    }

    pub async fn turn_on(&self) -> Result<()> {
        info!(device = %self.device_id, "turning on");
        self.send(params_of([(PARAM_POWER, 1)]), "turn on").await
    }

    pub async fn turn_off(&self) -> Result<()> {
        info!(device = %self.device_id, "turning off");
        self.send(params_of([(PARAM_POWER, 0)]), "turn off").await
    }

    async fn send(&self, params: Params, what: &str) -> Result<()> {
        entity::send_params(&self.coordinator, &self.device_id, params, what).await
    }
}

impl<C: RemoteDeviceClient> Observer for ClimateControl<C> {
    fn on_snapshot_refreshed(&self, store: &SnapshotStore) {
        let mut state = self.state.write();
        match store.get(&self.device_id) {
            Some(snap) => {
                state.update_from(snap.params());
                debug!(device = %self.device_id, mode = ?state.hvac_mode, "climate updated");
            }
            None => state.available = false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(v: serde_json::Value) -> Params {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn cool_mode_maps_every_field() {
        let mut state = ClimateState::default();
        state.update_from(&params(json!({
            "pwr": 1, "ac_mode": 2, "ac_mark": 1, "temp": 250, "envtemp": 270,
            "ac_vdir": 1, "ac_hdir": 0,
        })));
        assert!(state.available);
        assert_eq!(state.hvac_mode, Some(HvacMode::Cool));
        assert_eq!(state.hvac_action, HvacAction::Cooling);
        assert_eq!(state.fan_mode, Some(FanMode::Low));
        assert_eq!(state.target_temperature, Some(Temperature::from_celsius(25.0)));
        assert_eq!(state.current_temperature, Some(Temperature::from_celsius(27.0)));
        assert_eq!(state.swing_mode, Some(SwingMode::Vertical));
    }

    #[test]
    fn power_off_wins_over_mode() {
        let mut state = ClimateState::default();
        state.update_from(&params(json!({"pwr": 0, "ac_mode": 1})));
        assert_eq!(state.hvac_mode, Some(HvacMode::Off));
        assert_eq!(state.hvac_action, HvacAction::Off);
    }

    #[test]
    fn unknown_mode_code_is_none() {
        let mut state = ClimateState::default();
        state.update_from(&params(json!({"pwr": 1, "ac_mode": 9})));
        assert_eq!(state.hvac_mode, None);
        assert_eq!(state.hvac_action, HvacAction::Off);
    }
}
