use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PARAM_POWER: &str = "pwr";
pub const PARAM_MODE: &str = "ac_mode";
pub const PARAM_TARGET_TEMP: &str = "temp";
pub const PARAM_AMBIENT_TEMP: &str = "envtemp";
pub const PARAM_FAN: &str = "ac_mark";
pub const PARAM_VERTICAL_SWING: &str = "ac_vdir";
pub const PARAM_HORIZONTAL_SWING: &str = "ac_hdir";
pub const PARAM_SLEEP: &str = "ac_slp";

/// Remote parameter set of one device, keyed by parameter name.
pub type Params = BTreeMap<String, Value>;

/// Integer view of a parameter; missing or non-numeric values read as `None`.
pub fn param_i64(params: &Params, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

/// Builds a parameter delta from `(key, value)` pairs.
pub fn params_of<const N: usize>(pairs: [(&str, i64); N]) -> Params {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), Value::from(v)))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A device as reported by the cloud service, including the pairing
/// material needed to address it in control requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRef {
    pub endpoint_id: DeviceId,
    #[serde(default)]
    pub friendly_name: String,
    #[serde(default)]
    pub product_id: String,
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub dev_session: String,
    #[serde(default)]
    pub devicetype_flag: i64,
    #[serde(default)]
    pub cookie: String,
    #[serde(default)]
    pub state: Option<i64>,
    #[serde(default)]
    pub params: Params,
}

/// Temperature in degrees Celsius. The service exchanges tenths of a degree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Temperature(f64);

impl Temperature {
    pub fn from_celsius(c: f64) -> Self {
        Self(c)
    }

    pub fn from_tenths(tenths: i64) -> Self {
        Self(tenths as f64 / 10.0)
    }

    pub fn celsius(&self) -> f64 {
        self.0
    }

    pub fn to_tenths(&self) -> i64 {
        (self.0 * 10.0).round() as i64
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}\u{00b0}C", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HvacMode {
    Off,
    Auto,
    Heat,
    Cool,
    FanOnly,
    Dry,
}

impl HvacMode {
    pub const ALL: [HvacMode; 6] = [
        HvacMode::Off,
        HvacMode::Auto,
        HvacMode::Heat,
        HvacMode::Cool,
        HvacMode::FanOnly,
        HvacMode::Dry,
    ];

    /// `ac_mode` code; `Off` has none because it is expressed through `pwr`.
    pub fn as_aux_code(&self) -> Option<i64> {
        match self {
            HvacMode::Off => None,
            HvacMode::Auto => Some(0),
            HvacMode::Heat => Some(1),
            HvacMode::Cool => Some(2),
            HvacMode::FanOnly => Some(3),
            HvacMode::Dry => Some(4),
        }
    }

    pub fn from_aux_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(HvacMode::Auto),
            1 => Some(HvacMode::Heat),
            2 => Some(HvacMode::Cool),
            3 => Some(HvacMode::FanOnly),
            4 => Some(HvacMode::Dry),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HvacAction {
    #[default]
    Off,
    Idle,
    Heating,
    Cooling,
    Drying,
    Fan,
}

impl From<HvacMode> for HvacAction {
    fn from(mode: HvacMode) -> Self {
        match mode {
            HvacMode::Off => HvacAction::Off,
            HvacMode::Auto => HvacAction::Idle,
            HvacMode::Heat => HvacAction::Heating,
            HvacMode::Cool => HvacAction::Cooling,
            HvacMode::FanOnly => HvacAction::Fan,
            HvacMode::Dry => HvacAction::Drying,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanMode {
    Auto,
    Low,
    Medium,
    High,
}

impl FanMode {
    pub const ALL: [FanMode; 4] = [FanMode::Auto, FanMode::Low, FanMode::Medium, FanMode::High];

    pub fn as_aux_code(&self) -> i64 {
        match self {
            FanMode::Auto => 0,
            FanMode::Low => 1,
            FanMode::Medium => 2,
            FanMode::High => 3,
        }
    }

    pub fn from_aux_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(FanMode::Auto),
            1 => Some(FanMode::Low),
            2 => Some(FanMode::Medium),
            3 => Some(FanMode::High),
            _ => None,
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(FanMode::Auto),
            "low" => Some(FanMode::Low),
            "medium" => Some(FanMode::Medium),
            "high" => Some(FanMode::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwingMode {
    Off,
    Vertical,
    Horizontal,
    Both,
}

impl SwingMode {
    pub const ALL: [SwingMode; 4] = [
        SwingMode::Off,
        SwingMode::Vertical,
        SwingMode::Horizontal,
        SwingMode::Both,
    ];

    /// `(ac_vdir, ac_hdir)`
    pub fn as_aux_codes(&self) -> (i64, i64) {
        match self {
            SwingMode::Off => (0, 0),
            SwingMode::Vertical => (1, 0),
            SwingMode::Horizontal => (0, 1),
            SwingMode::Both => (1, 1),
        }
    }

    pub fn from_aux_codes(vertical: i64, horizontal: i64) -> Self {
        match (vertical != 0, horizontal != 0) {
            (false, false) => SwingMode::Off,
            (true, false) => SwingMode::Vertical,
            (false, true) => SwingMode::Horizontal,
            (true, true) => SwingMode::Both,
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "off" => Some(SwingMode::Off),
            "vertical" => Some(SwingMode::Vertical),
            "horizontal" => Some(SwingMode::Horizontal),
            "both" => Some(SwingMode::Both),
            _ => None,
        }
    }
}

/// What a timer does to its device when it runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimerAction {
    #[default]
    #[serde(rename = "turn_off")]
    TurnOff,
    #[serde(rename = "sleep_mode")]
    EnableSleepMode,
}

impl TimerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerAction::TurnOff => "turn_off",
            TimerAction::EnableSleepMode => "sleep_mode",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "turn_off" => Some(TimerAction::TurnOff),
            "sleep_mode" => Some(TimerAction::EnableSleepMode),
            _ => None,
        }
    }

    /// Parameter delta sent to the device on expiry.
    pub fn params(&self) -> Params {
        match self {
            TimerAction::TurnOff => params_of([(PARAM_POWER, 0)]),
            TimerAction::EnableSleepMode => params_of([(PARAM_SLEEP, 1)]),
        }
    }
}

/// Changes observed between two consecutive refreshes.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    DeviceAdded { device_id: DeviceId, name: String },
    DeviceRemoved { device_id: DeviceId },
    ParamChanged { device_id: DeviceId, param: String, old: Option<Value>, new: Value },
    RefreshFailed { error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_ref_deserializes_service_fields() {
        let raw = serde_json::json!({
            "endpointId": "00000000000000000000a043b0a1b2c3",
            "friendlyName": "Bedroom",
            "productId": "000000000000000000000000c0620000",
            "mac": "a0:43:b0:a1:b2:c3",
            "devSession": "sess",
            "devicetypeFlag": 1,
            "cookie": "e30=",
            "unrelated": true
        });
        let dev: DeviceRef = serde_json::from_value(raw).unwrap();
        assert_eq!(dev.endpoint_id.as_str(), "00000000000000000000a043b0a1b2c3");
        assert_eq!(dev.friendly_name, "Bedroom");
        assert_eq!(dev.devicetype_flag, 1);
        assert!(dev.params.is_empty());
        assert_eq!(dev.state, None);
    }

    #[test]
    fn temperature_tenths() {
        assert_eq!(Temperature::from_tenths(250).celsius(), 25.0);
        assert_eq!(Temperature::from_celsius(24.0).to_tenths(), 240);
        assert_eq!(Temperature::from_celsius(21.55).to_tenths(), 216);
        assert_eq!(Temperature::from_tenths(270).to_string(), "27.0\u{00b0}C");
    }

    #[test]
    fn hvac_mode_codes() {
        for mode in HvacMode::ALL {
            match mode.as_aux_code() {
                Some(code) => assert_eq!(HvacMode::from_aux_code(code), Some(mode)),
                None => assert_eq!(mode, HvacMode::Off),
            }
        }
        assert_eq!(HvacMode::from_aux_code(9), None);
        assert_eq!(HvacAction::from(HvacMode::Dry), HvacAction::Drying);
    }

    #[test]
    fn swing_codes() {
        assert_eq!(SwingMode::Vertical.as_aux_codes(), (1, 0));
        assert_eq!(SwingMode::from_aux_codes(0, 1), SwingMode::Horizontal);
        assert_eq!(SwingMode::from_aux_codes(1, 1), SwingMode::Both);
    }

    #[test]
    fn timer_action_params_and_names() {
        assert_eq!(TimerAction::TurnOff.params(), params_of([("pwr", 0)]));
        assert_eq!(TimerAction::EnableSleepMode.params(), params_of([("ac_slp", 1)]));
        assert_eq!(TimerAction::from_name("sleep_mode"), Some(TimerAction::EnableSleepMode));
        assert_eq!(TimerAction::from_name("explode"), None);
        let json = serde_json::to_value(TimerAction::TurnOff).unwrap();
        assert_eq!(json, "turn_off");
    }
}
