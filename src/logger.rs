use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageLogMode {
    /// Log full request/event payloads.
    Full,
    /// Log only the names of the status fields an event changed.
    Changes,
}

/// Mask credential fields before anything reaches the log file.
pub(crate) fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                if key == "password" {
                    out.insert(key.clone(), Value::String("********".to_string()));
                } else {
                    out.insert(key.clone(), redact(val));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

/// NDJSON log of requests, commands and realtime events.
pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { mode, file })
    }

    pub fn log_request(&mut self, method: &str, path: &str, body: Option<&Value>) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "req",
            "method": method,
            "path": path,
            "body": body.map(redact),
        });
        self.write_line(&entry);
    }

    pub fn log_emission(&mut self, event: &str, args: &Value) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "emit",
            "event": event,
            "args": redact(args),
        });
        self.write_line(&entry);
    }

    pub fn log_event(
        &mut self,
        event: &str,
        device_id: Option<&str>,
        payload: &Value,
        changed: &[&'static str],
    ) {
        let entry = match self.mode {
            MessageLogMode::Full => json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "event",
                "event": event,
                "device_id": device_id,
                "payload": redact(payload),
            }),
            MessageLogMode::Changes => json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "event",
                "event": event,
                "device_id": device_id,
                "changes": changed,
            }),
        };
        self.write_line(&entry);
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::NamedTempFile;

    fn read_lines(path: &str) -> Vec<Value> {
        let mut contents = String::new();
        std::fs::File::open(path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn request_body_password_is_masked() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, path).unwrap();
        logger.log_request(
            "POST",
            "/api/v1/auth/login",
            Some(&json!({"email": "a@b.c", "password": "hunter2"})),
        );

        let lines = read_lines(path);
        assert_eq!(lines[0]["dir"], "req");
        assert_eq!(lines[0]["body"]["password"], "********");
        assert_eq!(lines[0]["body"]["email"], "a@b.c");
    }

    #[test]
    fn redact_handles_nested_objects() {
        let value = json!({
            "outer": [{"password": "x", "keep": 1}],
            "password": "y"
        });
        let redacted = redact(&value);
        assert_eq!(redacted["outer"][0]["password"], "********");
        assert_eq!(redacted["outer"][0]["keep"], 1);
        assert_eq!(redacted["password"], "********");
    }

    #[test]
    fn changes_mode_logs_field_names_only() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Changes, path).unwrap();
        logger.log_event(
            "DEVICES_UPDATES",
            Some("d1"),
            &json!({"power": true, "humidity": 41.0}),
            &["power", "humidity"],
        );

        let lines = read_lines(path);
        assert_eq!(lines[0]["changes"], json!(["power", "humidity"]));
        assert!(lines[0].get("payload").is_none());
    }

    #[test]
    fn emission_log_entry() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, path).unwrap();
        logger.log_emission("listen_installation", &json!(["inst1"]));

        let lines = read_lines(path);
        assert_eq!(lines[0]["dir"], "emit");
        assert_eq!(lines[0]["event"], "listen_installation");
    }
}
