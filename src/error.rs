use std::fmt;

use crate::types::DeviceId;

#[derive(Debug)]
pub enum Error {
    Http(reqwest::Error),
    Json(serde_json::Error),
    Io(std::io::Error),
    /// The cloud service answered with a non-zero status or an unexpected body.
    Api { endpoint: String, body: String },
    Protocol(String),
    NotLoggedIn,
    UnknownDevice(DeviceId),
    InvalidDuration(i64),
    InvalidValue(String),
    CoordinatorGone,
    /// The device's timer was torn down with its entity.
    TimerTornDown(DeviceId),
    /// No tokio runtime to run the tick task on.
    NoRuntime,
}

impl Error {
    /// True for failures of the remote call itself, as opposed to input
    /// rejected before anything was sent.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::Json(_) | Error::Io(_) | Error::Api { .. } | Error::Protocol(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Json(e) => write!(f, "JSON error: {e}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Api { endpoint, body } => write!(f, "{endpoint} failed: {body}"),
            Error::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Error::NotLoggedIn => write!(f, "no login session"),
            Error::UnknownDevice(id) => write!(f, "unknown device: {id}"),
            Error::InvalidDuration(minutes) => {
                write!(f, "invalid timer duration: {minutes} min (0..=480)")
            }
            Error::InvalidValue(msg) => write!(f, "invalid value: {msg}"),
            Error::CoordinatorGone => write!(f, "coordinator has been dropped"),
            Error::TimerTornDown(id) => write!(f, "timer for {id} has been torn down"),
            Error::NoRuntime => write!(f, "no tokio runtime available"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Json(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
