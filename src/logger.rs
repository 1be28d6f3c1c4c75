use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;

use crate::diff::diff_json;
use crate::types::DeviceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLogMode {
    Full,
    /// First response per endpoint in full, then only changed paths.
    Diffed,
}

/// Appends cloud traffic to a file as one JSON object per line.
pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous: HashMap<String, Value>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            previous: HashMap::new(),
        })
    }

    pub fn log_request(&mut self, method: &str, path: &str, body: Option<&Value>) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "req",
            "method": method,
            "path": path,
            "body": body,
        });
        self.write_line(&entry);
    }

    pub fn log_command(&mut self, device: &DeviceId, params: &Value) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "cmd",
            "device": device,
            "params": params,
        });
        self.write_line(&entry);
    }

    pub fn log_response(&mut self, path: &str, status: u16, body: &Value) {
        let entry = match self.mode {
            MessageLogMode::Full => json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "resp",
                "path": path,
                "status": status,
                "body": body,
            }),
            MessageLogMode::Diffed => match self.previous.get(path) {
                None => json!({
                    "ts": Utc::now().to_rfc3339(),
                    "dir": "resp",
                    "path": path,
                    "status": status,
                    "full": true,
                    "body": body,
                }),
                Some(prev) => {
                    let mut changes = Vec::new();
                    diff_json(prev, body, "", &mut changes);
                    let changes: Vec<Value> = changes
                        .iter()
                        .map(|c| json!({ "path": c.path, "old": c.old, "new": c.new }))
                        .collect();
                    json!({
                        "ts": Utc::now().to_rfc3339(),
                        "dir": "resp",
                        "path": path,
                        "status": status,
                        "changes": changes,
                    })
                }
            },
        };
        if self.mode == MessageLogMode::Diffed {
            self.previous.insert(path.to_string(), body.clone());
        }
        self.write_line(&entry);
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write message log entry: {e}");
        }
    }
}
