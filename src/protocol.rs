use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};

use crate::config::Session;
use crate::types::{DeviceRef, Params};
use crate::{Error, Result};

pub const LICENSE: &str = "PAFbJJ3WbvDxH5vvWezXN5BujETtH/iuTtIIW5CE/SeHN7oNKqnEajgljTcL0fBQQWM0XAAAAAAnBhJyhMi7zIQMsUcwR/PEwGA3uB5HLOnr+xRrci+FwHMkUtK7v4yo0ZHa+jPvb6djelPP893k7SagmffZmOkLSOsbNs8CAqsu8HuIDs2mDQAAAAA=";
pub const LICENSE_ID: &str = "3c015b249dd66ef0f11f9bef59ecd737";
pub const APP_VERSION: &str = "2.2.10.456537160";
pub const USER_AGENT: &str = "Dalvik/2.1.0 (Linux; U; Android 12; SM-G991B Build/SP1A.210812.016)";
const APP_PLATFORM: &str = "android";

pub const FAMILY_LIST_PATH: &str = "/appsync/group/member/getfamilylist";
pub const DEVICE_LIST_PATH: &str = "/appsync/group/dev/query?action=select";
pub const SHARED_DEVICE_LIST_PATH: &str = "/appsync/group/sharedev/querylist?querytype=shared";
pub const QUERY_STATE_PATH: &str = "/device/control/v2/querystate";
pub const CONTROL_PATH: &str = "/device/control/v2/sdkcontrol";

pub const DEVICE_LIST_BODY: &str = r#"{"pids":[]}"#;
pub const SHARED_DEVICE_LIST_BODY: &str = r#"{"endpointId":""}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAct {
    Get,
    Set,
}

impl ControlAct {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAct::Get => "get",
            ControlAct::Set => "set",
        }
    }
}

/// Headers sent with every request once a session exists.
pub fn session_headers(session: &Session) -> Vec<(&'static str, String)> {
    vec![
        ("Content-Type", "application/x-java-serialized-object".to_string()),
        ("licenseId", LICENSE_ID.to_string()),
        ("lid", LICENSE_ID.to_string()),
        ("language", "en".to_string()),
        ("appVersion", APP_VERSION.to_string()),
        ("User-Agent", USER_AGENT.to_string()),
        ("system", APP_PLATFORM.to_string()),
        ("appPlatform", APP_PLATFORM.to_string()),
        ("loginsession", session.loginsession.clone()),
        ("userid", session.userid.clone()),
    ]
}

pub fn directive_header(namespace: &str, name: &str, message_id_prefix: &str, timestamp: i64) -> Value {
    json!({
        "namespace": namespace,
        "name": name,
        "interfaceVersion": "2",
        "senderId": "sdk",
        "messageId": format!("{message_id_prefix}-{timestamp}"),
    })
}

pub fn query_state_message(userid: &str, device: &DeviceRef, timestamp: i64) -> Value {
    let mut header = directive_header("DNA.QueryState", "queryState", userid, timestamp);
    header["messageType"] = json!("controlgw.batch");
    header["timestamp"] = json!(timestamp.to_string());
    json!({
        "directive": {
            "header": header,
            "payload": {
                "studata": [{
                    "did": device.endpoint_id,
                    "devSession": device.dev_session,
                }],
                "msgtype": "batch"
            }
        }
    })
}

/// Re-encodes the device cookie (`{terminalid, aeskey}`) into the shape the
/// control endpoint expects.
pub fn mapped_cookie(device: &DeviceRef) -> Result<String> {
    let raw = STANDARD
        .decode(device.cookie.as_bytes())
        .map_err(|e| Error::Protocol(format!("device cookie is not base64: {e}")))?;
    let cookie: Value = serde_json::from_slice(&raw)?;
    let field = |name: &str| {
        cookie
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Protocol(format!("device cookie missing {name}")))
    };
    let mapped = json!({
        "device": {
            "id": field("terminalid")?,
            "key": field("aeskey")?,
            "devSession": device.dev_session,
            "aeskey": field("aeskey")?,
            "did": device.endpoint_id,
            "pid": device.product_id,
            "mac": device.mac,
        }
    });
    Ok(STANDARD.encode(serde_json::to_vec(&mapped)?))
}

pub fn key_value_control_message(
    device: &DeviceRef,
    act: ControlAct,
    params: &[String],
    vals: Vec<Value>,
    timestamp: i64,
) -> Result<Value> {
    let mut msg = json!({
        "directive": {
            "header": directive_header(
                "DNA.KeyValueControl",
                "KeyValueControl",
                device.endpoint_id.as_str(),
                timestamp,
            ),
            "endpoint": {
                "devicePairedInfo": {
                    "did": device.endpoint_id,
                    "pid": device.product_id,
                    "mac": device.mac,
                    "devicetypeflag": device.devicetype_flag,
                    "cookie": mapped_cookie(device)?,
                },
                "endpointId": device.endpoint_id,
                "cookie": {},
                "devSession": device.dev_session,
            },
            "payload": {
                "act": act.as_str(),
                "params": params,
                "vals": vals,
            },
        }
    });
    // The ambient reading is a `get` of the single key `mode` with a dummy value.
    if act == ControlAct::Get && params.len() == 1 && params[0] == "mode" {
        msg["directive"]["payload"]["did"] = json!(device.endpoint_id);
        msg["directive"]["payload"]["vals"] = json!([[{"val": 0, "idx": 1}]]);
    }
    Ok(msg)
}

/// Splits a parameter delta into the parallel `params` / `vals` arrays of a
/// `set` request.
pub fn set_payload(values: &Params) -> (Vec<String>, Vec<Value>) {
    values
        .iter()
        .map(|(k, v)| (k.clone(), json!([{"val": v, "idx": 1}])))
        .unzip()
}

fn api_error(endpoint: &str, body: &str) -> Error {
    Error::Api {
        endpoint: endpoint.to_string(),
        body: body.to_string(),
    }
}

/// `{"status": 0, "data": ...}` envelope used by the account/group endpoints.
pub fn parse_status_data(endpoint: &str, body: &str) -> Result<Value> {
    let parsed: Value = serde_json::from_str(body).map_err(|_| api_error(endpoint, body))?;
    match (parsed.get("status").and_then(|v| v.as_i64()), parsed.get("data")) {
        (Some(0), Some(data)) => Ok(data.clone()),
        _ => Err(api_error(endpoint, body)),
    }
}

/// `{"event": {"payload": {"status": 0, ...}}}` envelope of the control endpoints.
pub fn parse_event_payload(endpoint: &str, body: &str) -> Result<Value> {
    let parsed: Value = serde_json::from_str(body).map_err(|_| api_error(endpoint, body))?;
    match parsed.pointer("/event/payload") {
        Some(payload) if payload.get("status").and_then(|v| v.as_i64()) == Some(0) => {
            Ok(payload.clone())
        }
        _ => Err(api_error(endpoint, body)),
    }
}

pub fn parse_device_state(body: &str) -> Result<i64> {
    let payload = parse_event_payload(QUERY_STATE_PATH, body)?;
    payload
        .pointer("/data/0/state")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| Error::Protocol("query state response without state".to_string()))
}

/// Control responses carry a JSON string in `event.payload.data` holding
/// parallel `params` and `vals` arrays.
pub fn parse_control_response(body: &str) -> Result<Params> {
    let parsed: Value = serde_json::from_str(body).map_err(|_| api_error(CONTROL_PATH, body))?;
    let data = parsed
        .pointer("/event/payload/data")
        .and_then(|v| v.as_str())
        .ok_or_else(|| api_error(CONTROL_PATH, body))?;
    let inner: Value = serde_json::from_str(data)?;

    let (Some(Value::Array(params)), Some(Value::Array(vals))) = (inner.get("params"), inner.get("vals"))
    else {
        return Err(Error::Protocol(format!("control response without params/vals: {data}")));
    };

    params
        .iter()
        .zip(vals)
        .map(|(name, val)| {
            let name = name
                .as_str()
                .ok_or_else(|| Error::Protocol(format!("non-string param name: {name}")))?;
            let value = val
                .pointer("/0/val")
                .cloned()
                .ok_or_else(|| Error::Protocol(format!("no value for {name}")))?;
            Ok((name.to_string(), value))
        })
        .collect()
}

/// Devices of a family listing: `endpoints` for owned devices,
/// `shareFromOther[].devinfo` for shared ones.
pub fn family_devices(data: &Value) -> Result<Vec<DeviceRef>> {
    let raw: Vec<Value> = if let Some(Value::Array(endpoints)) = data.get("endpoints") {
        endpoints.clone()
    } else if let Some(Value::Array(shared)) = data.get("shareFromOther") {
        shared.iter().filter_map(|s| s.get("devinfo").cloned()).collect()
    } else {
        Vec::new()
    };
    raw.into_iter()
        .map(|v| serde_json::from_value(v).map_err(Error::from))
        .collect()
}
