//! Wire contracts: REST endpoint paths, mutation payload builders and the
//! realtime channel framing.
//!
//! Realtime messages are JSON text frames. Client emissions carry an `ack`
//! id the server echoes back with either a null error or a structured
//! `{"_id": ...}` code; server events carry an `event` name plus payload
//! arguments.

use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{Error, Result};

// Installation/group/device API.
pub const API_LOGIN: &str = "/api/v1/auth/login";
pub const API_REFRESH_TOKEN: &str = "/api/v1/auth/refreshToken";
pub const API_USER: &str = "/api/v1/user";
pub const API_INSTALLATIONS: &str = "/api/v1/installations";
pub const API_DEVICES: &str = "/api/v1/devices";
pub const API_WEBSOCKETS: &str = "/api/v1/websockets";

// Variant vendor (Daikin) API.
pub const DKN_LOGIN: &str = "/users/sign_in";
pub const DKN_INSTALLATION_RELATIONS: &str = "/installation_relations";
pub const DKN_DEVICES: &str = "/devices";
pub const DKN_EVENTS: &str = "/events";

// Client emission names.
pub const EMIT_AUTH: &str = "auth";
pub const EMIT_LISTEN_INSTALLATION: &str = "listen_installation";
pub const EMIT_LISTEN_WS: &str = "listen_ws";
pub const EMIT_CLEAR_LISTENERS: &str = "clear_listeners";

// Server event names.
pub const EVT_DEVICE_STATE: &str = "DEVICE_STATE";
pub const EVT_DEVICE_STATE_END: &str = "DEVICE_STATE_END";
pub const EVT_DEVICES_UPDATES: &str = "DEVICES_UPDATES";
pub const EVT_USERS_UPDATE: &str = "USERS.update";

/// Build a client emission frame. Returns the ack id the server will echo.
pub fn emission(event: &str, args: Vec<Value>) -> (String, String) {
    let ack = Uuid::new_v4().to_string();
    let frame = json!({
        "event": event,
        "args": args,
        "ack": ack,
    });
    (ack, frame.to_string())
}

#[derive(Debug, Clone, Deserialize)]
pub struct AckError {
    #[serde(rename = "_id")]
    pub id: String,
}

/// A parsed server-to-client frame: either an event or an emission ack.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerFrame {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub ack: Option<String>,
    #[serde(default)]
    pub error: Option<AckError>,
}

pub fn parse_frame(text: &str) -> Result<ServerFrame> {
    serde_json::from_str(text).map_err(|e| Error::Malformed {
        context: "realtime frame",
        reason: e.to_string(),
    })
}

/// PATCH body for a device mutation: `param` is a setpoint field name,
/// `mode` or `power`.
pub fn device_patch_body(
    param: &str,
    value: Value,
    installation_id: &str,
    units: crate::Units,
) -> Value {
    json!({
        "param": param,
        "value": value,
        "installation_id": installation_id,
        "opts": { "units": u8::from(units) },
    })
}

/// PUT body for a group-level mode change.
pub fn group_put_body(mode_code: i64) -> Value {
    json!({ "params": { "mode": mode_code } })
}

/// POST body for a variant vendor machine command (`P1` power, `P2` mode,
/// `P7` cold consign, `P8` heat consign).
pub fn daikin_event_body(device_id: &str, option: &str, value: Value) -> Value {
    json!({
        "event": {
            "cgi": "modmaquina",
            "device_id": device_id,
            "option": option,
            "value": value,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emission_frame_structure() {
        let (ack, frame) = emission(EMIT_LISTEN_INSTALLATION, vec![json!("inst1")]);
        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["event"], "listen_installation");
        assert_eq!(parsed["args"][0], "inst1");
        assert_eq!(parsed["ack"], ack.as_str());
        assert!(!ack.is_empty());
    }

    #[test]
    fn parse_ack_frame_with_error() {
        let frame =
            parse_frame(r#"{"ack": "abc", "error": {"_id": "tooManyConnections"}}"#).unwrap();
        assert_eq!(frame.ack.as_deref(), Some("abc"));
        assert_eq!(frame.error.unwrap().id, "tooManyConnections");
        assert!(frame.event.is_none());
    }

    #[test]
    fn parse_event_frame() {
        let frame = parse_frame(
            r#"{"event": "DEVICE_STATE", "args": [{"device_id": "d1", "power": true}]}"#,
        )
        .unwrap();
        assert_eq!(frame.event.as_deref(), Some(EVT_DEVICE_STATE));
        assert_eq!(frame.args[0]["device_id"], "d1");
    }

    #[test]
    fn parse_garbage_is_malformed() {
        let err = parse_frame("not json").unwrap_err();
        assert!(matches!(
            err,
            Error::Malformed {
                context: "realtime frame",
                ..
            }
        ));
    }

    #[test]
    fn device_patch_body_shape() {
        let body = device_patch_body(
            "setpoint_air_heat",
            json!(21.5),
            "inst1",
            crate::Units::Celsius,
        );
        assert_eq!(body["param"], "setpoint_air_heat");
        assert_eq!(body["value"], 21.5);
        assert_eq!(body["installation_id"], "inst1");
        assert_eq!(body["opts"]["units"], 0);
    }

    #[test]
    fn daikin_event_body_shape() {
        let body = daikin_event_body("dev1", "P1", json!(1));
        assert_eq!(body["event"]["cgi"], "modmaquina");
        assert_eq!(body["event"]["device_id"], "dev1");
        assert_eq!(body["event"]["option"], "P1");
        assert_eq!(body["event"]["value"], 1);
    }
}
