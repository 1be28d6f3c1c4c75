use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::Result;

pub const API_SERVER_URL_EU: &str = "https://app-service-deu-f0e9ebbb.smarthomecs.de";
pub const API_SERVER_URL_USA: &str = "https://app-service-usa-fd7cc04c.smarthomecs.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    #[default]
    Eu,
    Usa,
}

impl Region {
    pub fn base_url(&self) -> &'static str {
        match self {
            Region::Eu => API_SERVER_URL_EU,
            Region::Usa => API_SERVER_URL_USA,
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "eu" => Some(Region::Eu),
            "usa" => Some(Region::Usa),
            _ => None,
        }
    }
}

/// Login session issued by the cloud service, cached on disk between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub userid: String,
    pub loginsession: String,
}

impl Session {
    pub fn new(userid: impl Into<String>, loginsession: impl Into<String>) -> Self {
        Self {
            userid: userid.into(),
            loginsession: loginsession.into(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let session: Session = serde_json::from_str(&raw).inspect_err(|e| {
            warn!(path = %path.display(), error = %e, "unreadable session file");
        })?;
        debug!(path = %path.display(), userid = %session.userid, "loaded session");
        Ok(session)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, serde_json::to_string(self)?)?;
        debug!(path = %path.display(), "saved session");
        Ok(())
    }
}
