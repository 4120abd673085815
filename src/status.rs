//! Per-device status cache fed by the realtime channel.
//!
//! The cache is owned and mutated only by the event listener's dispatch
//! task; adapters read cloned snapshots through the listener handle.
//! Incoming deltas are restricted to the known status fields by the typed
//! [`StatusDelta`] record.

use std::collections::HashMap;

use serde::Deserialize;

use crate::modes::{DeviceMode, SetpointField};
use crate::types::{Temperature, TemperaturePair, Units};
use crate::{Error, Result};

/// A temperature as it appears in status payloads: either a
/// `{celsius, fah}` pair or a bare Celsius number.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum TempValue {
    Pair(TemperaturePair),
    Celsius(f64),
}

impl From<TempValue> for Temperature {
    fn from(value: TempValue) -> Self {
        match value {
            TempValue::Pair(pair) => pair.into(),
            TempValue::Celsius(c) => Temperature::from_celsius(c),
        }
    }
}

/// Field-level delta from a push event. Any payload key outside this record
/// is dropped at deserialization, which enforces the status allow-list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusDelta {
    #[serde(default)]
    pub power: Option<bool>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub local_temp: Option<TempValue>,
    #[serde(default)]
    pub setpoint_air_stop: Option<TempValue>,
    #[serde(default)]
    pub setpoint_air_auto: Option<TempValue>,
    #[serde(default)]
    pub setpoint_air_cool: Option<TempValue>,
    #[serde(default)]
    pub setpoint_air_heat: Option<TempValue>,
    #[serde(default)]
    pub setpoint_air_vent: Option<TempValue>,
    #[serde(default)]
    pub setpoint_air_dry: Option<TempValue>,
    #[serde(default)]
    pub step: Option<f64>,
    #[serde(default)]
    pub mode: Option<i64>,
    #[serde(default)]
    pub mode_available: Option<Vec<i64>>,
}

/// Per-mode setpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Setpoints {
    pub stop: Option<Temperature>,
    pub auto: Option<Temperature>,
    pub cool: Option<Temperature>,
    pub heat: Option<Temperature>,
    pub vent: Option<Temperature>,
    pub dry: Option<Temperature>,
}

impl Setpoints {
    pub fn get(&self, field: SetpointField) -> Option<Temperature> {
        match field {
            SetpointField::Stop => self.stop,
            SetpointField::Auto => self.auto,
            SetpointField::Cool => self.cool,
            SetpointField::Heat => self.heat,
            SetpointField::Vent => self.vent,
            SetpointField::Dry => self.dry,
        }
    }

    fn slot(&mut self, field: SetpointField) -> &mut Option<Temperature> {
        match field {
            SetpointField::Stop => &mut self.stop,
            SetpointField::Auto => &mut self.auto,
            SetpointField::Cool => &mut self.cool,
            SetpointField::Heat => &mut self.heat,
            SetpointField::Vent => &mut self.vent,
            SetpointField::Dry => &mut self.dry,
        }
    }
}

/// Last known status of one device, built up from push events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceStatus {
    pub power: Option<bool>,
    pub humidity: Option<f64>,
    pub local_temp: Option<Temperature>,
    pub setpoints: Setpoints,
    pub step: Option<f64>,
    /// Raw vendor mode code; decode with [`DeviceMode::from_code`].
    pub mode: Option<i64>,
    pub mode_available: Vec<i64>,
}

impl DeviceStatus {
    /// Merge a delta, returning the names of the fields that changed.
    pub fn apply(&mut self, delta: &StatusDelta) -> Vec<&'static str> {
        let mut changed = Vec::new();

        if let Some(power) = delta.power
            && self.power != Some(power)
        {
            self.power = Some(power);
            changed.push("power");
        }
        if let Some(humidity) = delta.humidity
            && self.humidity != Some(humidity)
        {
            self.humidity = Some(humidity);
            changed.push("humidity");
        }
        if let Some(temp) = delta.local_temp {
            let temp = Temperature::from(temp);
            if self.local_temp != Some(temp) {
                self.local_temp = Some(temp);
                changed.push("local_temp");
            }
        }

        let setpoint_deltas: [(SetpointField, Option<TempValue>); 6] = [
            (SetpointField::Stop, delta.setpoint_air_stop),
            (SetpointField::Auto, delta.setpoint_air_auto),
            (SetpointField::Cool, delta.setpoint_air_cool),
            (SetpointField::Heat, delta.setpoint_air_heat),
            (SetpointField::Vent, delta.setpoint_air_vent),
            (SetpointField::Dry, delta.setpoint_air_dry),
        ];
        for (field, value) in setpoint_deltas {
            if let Some(value) = value {
                let temp = Temperature::from(value);
                let slot = self.setpoints.slot(field);
                if *slot != Some(temp) {
                    *slot = Some(temp);
                    changed.push(field.as_str());
                }
            }
        }

        if let Some(step) = delta.step
            && self.step != Some(step)
        {
            self.step = Some(step);
            changed.push("step");
        }
        if let Some(mode) = delta.mode
            && self.mode != Some(mode)
        {
            self.mode = Some(mode);
            changed.push("mode");
        }
        if let Some(ref available) = delta.mode_available
            && self.mode_available != *available
        {
            self.mode_available = available.clone();
            changed.push("mode_available");
        }

        changed
    }

    pub fn device_mode(&self) -> Result<Option<DeviceMode>> {
        self.mode.map(DeviceMode::from_code).transpose()
    }

    /// The setpoint that is active for the current mode.
    pub fn active_setpoint(&self) -> Result<Option<Temperature>> {
        match self.device_mode()? {
            Some(mode) => Ok(self.setpoints.get(mode.setpoint_field())),
            None => Ok(None),
        }
    }

    pub fn available_modes(&self) -> Vec<DeviceMode> {
        DeviceMode::from_codes_lenient(&self.mode_available)
    }
}

/// Map from device id to its last known status, plus the account-level
/// display units pushed via `USERS.update`.
#[derive(Debug, Clone, Default)]
pub struct StatusCache {
    devices: HashMap<String, DeviceStatus>,
    display_units: Option<Units>,
}

impl StatusCache {
    /// Seed (or overwrite) a device record from a full snapshot event.
    pub fn apply_state(&mut self, device_id: &str, delta: &StatusDelta) -> Vec<&'static str> {
        let status = self.devices.entry(device_id.to_string()).or_default();
        *status = DeviceStatus::default();
        status.apply(delta)
    }

    /// Merge an incremental delta into the device record, creating it on
    /// first reference.
    pub fn apply_update(&mut self, device_id: &str, delta: &StatusDelta) -> Vec<&'static str> {
        self.devices
            .entry(device_id.to_string())
            .or_default()
            .apply(delta)
    }

    pub fn get(&self, device_id: &str) -> Option<&DeviceStatus> {
        self.devices.get(device_id)
    }

    pub fn snapshot(&self) -> HashMap<String, DeviceStatus> {
        self.devices.clone()
    }

    pub fn set_display_units(&mut self, units: Units) {
        self.display_units = Some(units);
    }

    pub fn display_units(&self) -> Option<Units> {
        self.display_units
    }

    /// Drop all device records (listener resubscription).
    pub fn clear(&mut self) {
        self.devices.clear();
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

pub(crate) fn delta_from_value(value: &serde_json::Value) -> Result<StatusDelta> {
    serde_json::from_value(value.clone()).map_err(|e| Error::Malformed {
        context: "status delta",
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn apply_reports_changed_fields() {
        let mut status = DeviceStatus::default();
        let delta = delta_from_value(&json!({
            "power": true,
            "local_temp": {"celsius": 21.5, "fah": 70.7},
            "mode": 3,
            "setpoint_air_heat": {"celsius": 22.0, "fah": 71.6}
        }))
        .unwrap();

        let changed = status.apply(&delta);
        assert_eq!(
            changed,
            vec!["power", "local_temp", "setpoint_air_heat", "mode"]
        );

        // Re-applying the same delta changes nothing.
        assert!(status.apply(&delta).is_empty());
    }

    #[test]
    fn unknown_fields_are_dropped_by_the_allow_list() {
        let delta = delta_from_value(&json!({
            "power": false,
            "firmware_secret": "nope",
            "warnings": ["w1"]
        }))
        .unwrap();
        let mut status = DeviceStatus::default();
        assert_eq!(status.apply(&delta), vec!["power"]);
    }

    #[test]
    fn active_setpoint_indexes_by_mode() {
        let mut status = DeviceStatus::default();
        status.mode = Some(3); // heating
        status.setpoints.heat = Some(Temperature::from_celsius(22.0));
        status.setpoints.cool = Some(Temperature::from_celsius(25.0));
        let active = status.active_setpoint().unwrap().unwrap();
        assert_eq!(active.celsius(), 22.0);

        status.mode = Some(2); // cooling
        let active = status.active_setpoint().unwrap().unwrap();
        assert_eq!(active.celsius(), 25.0);
    }

    #[test]
    fn active_setpoint_unknown_mode_is_loud() {
        let mut status = DeviceStatus::default();
        status.mode = Some(99);
        assert!(matches!(
            status.active_setpoint().unwrap_err(),
            Error::UnknownCode { kind: "mode", .. }
        ));
    }

    #[test]
    fn state_event_overwrites_previous_record() {
        let mut cache = StatusCache::default();
        cache.apply_update(
            "d1",
            &delta_from_value(&json!({"humidity": 40.0, "power": true})).unwrap(),
        );
        cache.apply_state("d1", &delta_from_value(&json!({"power": false})).unwrap());

        let status = cache.get("d1").unwrap();
        assert_eq!(status.power, Some(false));
        assert_eq!(status.humidity, None);
    }

    #[test]
    fn clear_drops_devices_but_not_units() {
        let mut cache = StatusCache::default();
        cache.apply_update("d1", &StatusDelta::default());
        cache.set_display_units(Units::Fahrenheit);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.display_units(), Some(Units::Fahrenheit));
    }
}
