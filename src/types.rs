use std::fmt;

use serde::{Deserialize, Serialize};

/// Temperature stored as Celsius internally.
/// The cloud reports paired `{celsius, fah}` values; the Celsius member is
/// authoritative. Wire payloads carry one decimal place in either unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Temperature(f64);

impl Temperature {
    pub fn from_celsius(c: f64) -> Self {
        Self(c)
    }

    pub fn from_fahrenheit(f: f64) -> Self {
        Self((f - 32.0) * (5.0 / 9.0))
    }

    /// Construct from a paired celsius+fah value as sent by the cloud.
    /// Prefers the Celsius value (avoids rounding loss).
    pub fn from_pair(celsius: f64, _fah: f64) -> Self {
        Self(celsius)
    }

    pub fn celsius(&self) -> f64 {
        self.0
    }

    pub fn fahrenheit(&self) -> f64 {
        self.0 * (9.0 / 5.0) + 32.0
    }

    /// Value in the given unit, rounded to the one-decimal wire precision.
    pub fn as_wire(&self, units: Units) -> f64 {
        let raw = match units {
            Units::Celsius => self.celsius(),
            Units::Fahrenheit => self.fahrenheit(),
        };
        (raw * 10.0).round() / 10.0
    }

    pub fn in_units(&self, units: Units) -> f64 {
        match units {
            Units::Celsius => self.celsius(),
            Units::Fahrenheit => self.fahrenheit(),
        }
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}\u{00b0}C", self.0)
    }
}

/// Raw `{celsius, fah}` pair as it appears in cloud payloads.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct TemperaturePair {
    pub celsius: f64,
    pub fah: f64,
}

impl From<TemperaturePair> for Temperature {
    fn from(pair: TemperaturePair) -> Self {
        Temperature::from_pair(pair.celsius, pair.fah)
    }
}

/// Display unit system, encoded by the vendor as 0 (Celsius) or 1 (Fahrenheit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Units {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TryFrom<u8> for Units {
    type Error = String;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        match code {
            0 => Ok(Units::Celsius),
            1 => Ok(Units::Fahrenheit),
            other => Err(format!("invalid units code: {other}")),
        }
    }
}

impl From<Units> for u8 {
    fn from(units: Units) -> u8 {
        match units {
            Units::Celsius => 0,
            Units::Fahrenheit => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fahrenheit_wire_round_trip_within_tolerance() {
        // 70.0F -> 21.1C on the wire -> read back as 70.0F +- 0.1
        let set = Temperature::from_fahrenheit(70.0);
        let wire_c = set.as_wire(Units::Celsius);
        assert!((wire_c - 21.1).abs() < 0.05, "got {wire_c}");

        let read = Temperature::from_celsius(wire_c);
        let shown = read.as_wire(Units::Fahrenheit);
        assert!((shown - 70.0).abs() <= 0.1, "got {shown}");
        // Not exact: the one-decimal Celsius wire value loses precision.
        assert!((read.fahrenheit() - 70.0).abs() > 1e-9);
    }

    #[test]
    fn pair_prefers_celsius() {
        let t = Temperature::from_pair(22.0, 72.0);
        assert_eq!(t.celsius(), 22.0);
    }

    #[test]
    fn units_codes() {
        assert_eq!(Units::try_from(0).unwrap(), Units::Celsius);
        assert_eq!(Units::try_from(1).unwrap(), Units::Fahrenheit);
        assert!(Units::try_from(2).is_err());
        assert_eq!(u8::from(Units::Fahrenheit), 1);
    }

    #[test]
    fn display() {
        let t = Temperature::from_celsius(22.5);
        assert_eq!(format!("{t}"), "22.5\u{00b0}C");
    }
}
