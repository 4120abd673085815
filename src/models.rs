//! Typed records for the installation/group/device API.
//!
//! Payloads are validated at the deserialization boundary: a response that
//! does not fit these shapes fails with [`Error::Malformed`] instead of
//! producing half-empty records. Unknown extra fields are tolerated.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::types::Units;
use crate::{Error, Result};

pub(crate) fn decode<T: DeserializeOwned>(value: Value, context: &'static str) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::Malformed {
        context,
        reason: e.to_string(),
    })
}

pub type I18n = BTreeMap<String, String>;

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
    #[serde(default)]
    pub user: Option<User>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub config: Option<UserConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub units: Units,
    #[serde(default)]
    pub lang: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationText {
    #[serde(default)]
    pub city: Option<I18n>,
    #[serde(default)]
    pub country: Option<I18n>,
}

/// One page of the installations listing.
#[derive(Debug, Clone, Deserialize)]
pub struct InstallationsPage {
    pub installations: Vec<Installation>,
}

/// A physical site. Replaced wholesale on each re-fetch; the detail endpoint
/// additionally populates `groups`.
#[derive(Debug, Clone, Deserialize)]
pub struct Installation {
    #[serde(rename = "installation_id", alias = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub location_text: Option<LocationText>,
    #[serde(default)]
    pub ws_ids: Vec<String>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub access_type: Option<String>,
}

/// A logical grouping of devices sharing one climate-control unit.
#[derive(Debug, Clone, Deserialize)]
pub struct Group {
    pub group_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub devices: Vec<Device>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    pub device_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub ws_id: Option<String>,
    #[serde(default)]
    pub meta: Option<DeviceMeta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceMeta {
    #[serde(default)]
    pub system_number: Option<i64>,
    #[serde(default)]
    pub zone_number: Option<i64>,
    #[serde(default)]
    pub units: Option<Units>,
}

/// The vendor's network bridge hardware.
#[derive(Debug, Clone, Deserialize)]
pub struct Webserver {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub ws_type: Option<String>,
    #[serde(default)]
    pub status: Option<WebserverStatus>,
    #[serde(default)]
    pub config: Option<WebserverConfig>,
    #[serde(default)]
    pub devices: Option<Vec<WebserverDevice>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebserverStatus {
    #[serde(rename = "isConnected", default)]
    pub is_connected: bool,
    #[serde(default)]
    pub connection_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub disconnection_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebserverConfig {
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub ws_fw: Option<String>,
    #[serde(default)]
    pub units: Option<Units>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebserverDevice {
    pub device_id: String,
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "isConnected", default)]
    pub is_connected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn installation_detail_with_groups() {
        let installation: Installation = decode(
            json!({
                "installation_id": "inst1",
                "name": "Home",
                "ws_ids": ["ws1"],
                "location_text": {"city": {"en": "Madrid"}},
                "groups": [{
                    "group_id": "g1",
                    "name": "Ground floor",
                    "devices": [{
                        "device_id": "d1",
                        "name": "Living room",
                        "type": "az_zone",
                        "ws_id": "ws1",
                        "meta": {"system_number": 1, "zone_number": 2, "units": 0}
                    }]
                }]
            }),
            "installation",
        )
        .unwrap();
        assert_eq!(installation.id, "inst1");
        assert_eq!(installation.groups.len(), 1);
        let device = &installation.groups[0].devices[0];
        assert_eq!(device.device_id, "d1");
        assert_eq!(device.meta.as_ref().unwrap().units, Some(Units::Celsius));
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let err = decode::<Installation>(json!({"name": "no id"}), "installation").unwrap_err();
        assert!(matches!(
            err,
            Error::Malformed {
                context: "installation",
                ..
            }
        ));
    }

    #[test]
    fn login_response_field_names() {
        let login: LoginResponse = decode(
            json!({
                "token": "tok",
                "refreshToken": "ref",
                "user": {"_id": "u1", "email": "a@b.c", "config": {"units": 1}}
            }),
            "login",
        )
        .unwrap();
        assert_eq!(login.refresh_token, "ref");
        assert_eq!(
            login.user.unwrap().config.unwrap().units,
            Units::Fahrenheit
        );
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let webserver: Webserver = decode(
            json!({
                "_id": "ws1",
                "ws_type": "ws_az",
                "config": {"mac": "AA:BB", "ws_fw": "3.44", "pin": 1234},
                "status": {"isConnected": true},
                "future_field": {"x": 1}
            }),
            "webserver",
        )
        .unwrap();
        assert!(webserver.status.unwrap().is_connected);
        assert_eq!(webserver.config.unwrap().mac.as_deref(), Some("AA:BB"));
    }
}
