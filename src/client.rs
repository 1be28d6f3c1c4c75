use std::future::Future;
use std::path::PathBuf;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, trace};

use crate::config::{Region, Session};
use crate::logger::{MessageLogMode, MessageLogger};
use crate::protocol::{
    self, CONTROL_PATH, ControlAct, DEVICE_LIST_BODY, DEVICE_LIST_PATH, FAMILY_LIST_PATH, LICENSE,
    QUERY_STATE_PATH, SHARED_DEVICE_LIST_BODY, SHARED_DEVICE_LIST_PATH,
};
use crate::types::{DeviceRef, PARAM_AMBIENT_TEMP, Params};
use crate::{Error, Result};

/// The narrow view of the cloud service the rest of the crate depends on.
pub trait RemoteDeviceClient: Send + Sync + 'static {
    /// Every device visible to the account, with its current parameters.
    fn list_devices(&self) -> impl Future<Output = Result<Vec<DeviceRef>>> + Send;

    /// Writes a parameter delta to one device.
    fn set_params(&self, device: &DeviceRef, params: &Params) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Family {
    #[serde(rename = "familyid")]
    pub family_id: String,
    #[serde(default)]
    pub name: String,
}

pub struct AuxCloudClientBuilder {
    region: Region,
    base_url: Option<String>,
    session: Option<Session>,
    session_file: Option<PathBuf>,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl AuxCloudClientBuilder {
    pub fn new() -> Self {
        Self {
            region: Region::default(),
            base_url: None,
            session: None,
            session_file: None,
            log_mode: None,
            log_path: None,
        }
    }

    pub fn region(mut self, region: Region) -> Self {
        self.region = region;
        self
    }

    /// Overrides the region's server, e.g. for a local mock.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn session_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_file = Some(path.into());
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<AuxCloudClient> {
        let session = match (self.session, self.session_file) {
            (Some(session), _) => session,
            (None, Some(path)) => Session::load(&path)?,
            (None, None) => return Err(Error::NotLoggedIn),
        };

        let http = reqwest::Client::builder().build()?;

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(Mutex::new(MessageLogger::new(mode, &path)?)),
            _ => None,
        };

        let base_url = self
            .base_url
            .unwrap_or_else(|| self.region.base_url().to_string());
        debug!(url = %base_url, userid = %session.userid, "built cloud client");

        Ok(AuxCloudClient {
            http,
            base_url,
            session,
            logger,
        })
    }
}

impl Default for AuxCloudClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP client for the AUX cloud service, authenticated by an existing session.
pub struct AuxCloudClient {
    http: reqwest::Client,
    base_url: String,
    session: Session,
    logger: Option<Mutex<MessageLogger>>,
}

impl AuxCloudClient {
    pub fn builder() -> AuxCloudClientBuilder {
        AuxCloudClientBuilder::new()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub async fn list_families(&self) -> Result<Vec<Family>> {
        let body = self.post(FAMILY_LIST_PATH, String::new(), &[], &[]).await?;
        let data = protocol::parse_status_data(FAMILY_LIST_PATH, &body)?;
        let families = data
            .get("familyList")
            .cloned()
            .ok_or_else(|| Error::Protocol("family list response without familyList".to_string()))?;
        let families: Vec<Family> = serde_json::from_value(families)?;
        debug!(count = families.len(), "fetched families");
        Ok(families)
    }

    /// Devices of one family, each completed with its online state and
    /// current parameters (including the ambient temperature).
    pub async fn list_family_devices(&self, family_id: &str, shared: bool) -> Result<Vec<DeviceRef>> {
        let (path, request) = if shared {
            (SHARED_DEVICE_LIST_PATH, SHARED_DEVICE_LIST_BODY)
        } else {
            (DEVICE_LIST_PATH, DEVICE_LIST_BODY)
        };
        let body = self
            .post(path, request.to_string(), &[("familyid", family_id)], &[])
            .await?;
        let data = protocol::parse_status_data(path, &body)?;
        let mut devices = protocol::family_devices(&data)?;

        for device in &mut devices {
            device.state = Some(self.query_device_state(device).await?);
            device.params = self.get_device_params(device, &[]).await?;

            let ambient = self.get_device_params(device, &["mode"]).await?;
            if let Some(envtemp) = ambient.get(PARAM_AMBIENT_TEMP) {
                device.params.insert(PARAM_AMBIENT_TEMP.to_string(), envtemp.clone());
            }
        }

        debug!(family = family_id, shared, count = devices.len(), "fetched devices");
        Ok(devices)
    }

    pub async fn query_device_state(&self, device: &DeviceRef) -> Result<i64> {
        let msg = protocol::query_state_message(&self.session.userid, device, Utc::now().timestamp());
        let body = self
            .post(QUERY_STATE_PATH, serde_json::to_string(&msg)?, &[], &[])
            .await?;
        protocol::parse_device_state(&body)
    }

    /// Reads the named parameters, or all of them when `params` is empty.
    pub async fn get_device_params(&self, device: &DeviceRef, params: &[&str]) -> Result<Params> {
        let names: Vec<String> = params.iter().map(|p| p.to_string()).collect();
        self.act_device_params(device, ControlAct::Get, &names, Vec::new())
            .await
    }

    pub async fn set_device_params(&self, device: &DeviceRef, values: &Params) -> Result<Params> {
        info!(device = %device.endpoint_id, ?values, "setting device params");
        if let Some(logger) = &self.logger {
            let params = serde_json::to_value(values)?;
            logger.lock().log_command(&device.endpoint_id, &params);
        }
        let (names, vals) = protocol::set_payload(values);
        self.act_device_params(device, ControlAct::Set, &names, vals)
            .await
    }

    async fn act_device_params(
        &self,
        device: &DeviceRef,
        act: ControlAct,
        params: &[String],
        vals: Vec<Value>,
    ) -> Result<Params> {
        let msg = protocol::key_value_control_message(device, act, params, vals, Utc::now().timestamp())?;
        let body = self
            .post(
                CONTROL_PATH,
                serde_json::to_string(&msg)?,
                &[],
                &[("license", LICENSE)],
            )
            .await?;
        protocol::parse_control_response(&body)
    }

    async fn post(
        &self,
        path: &str,
        body: String,
        headers: &[(&str, &str)],
        query: &[(&str, &str)],
    ) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);
        trace!(url = %url, body = %body, "request");

        if let Some(logger) = &self.logger {
            let json_body = serde_json::from_str::<Value>(&body).ok();
            logger.lock().log_request("POST", path, json_body.as_ref());
        }

        let mut request = self.http.post(&url).body(body);
        for (name, value) in protocol::session_headers(&self.session) {
            request = request.header(name, value);
        }
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        if !query.is_empty() {
            request = request.query(query);
        }

        let resp = request.send().await?.error_for_status()?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        trace!(path, status, body = %text, "response");

        if let Some(logger) = &self.logger {
            let json_body = serde_json::from_str(&text).unwrap_or(Value::Null);
            logger.lock().log_response(path, status, &json_body);
        }

        Ok(text)
    }
}

impl RemoteDeviceClient for AuxCloudClient {
    async fn list_devices(&self) -> Result<Vec<DeviceRef>> {
        let mut all = Vec::new();
        for family in self.list_families().await? {
            all.extend(self.list_family_devices(&family.family_id, false).await?);
            all.extend(self.list_family_devices(&family.family_id, true).await?);
        }
        Ok(all)
    }

    async fn set_params(&self, device: &DeviceRef, params: &Params) -> Result<()> {
        self.set_device_params(device, params).await.map(|_| ())
    }
}
