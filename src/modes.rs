//! Vendor code tables.
//!
//! The cloud reports operating mode, fan speed, eco level and airflow as raw
//! integer codes. Lookups fail with [`Error::UnknownCode`] instead of
//! silently degrading, so protocol drift surfaces at the boundary.

use tracing::warn;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeKind {
    /// No thermal demand (stop, ventilation-only).
    None,
    Cold,
    Heat,
    Auto,
}

/// Operating mode codes of the installation/group/device API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceMode {
    Stop,
    Auto,
    Cooling,
    Heating,
    Fan,
    Dry,
    EmergencyHeat,
    HeatAir,
    HeatRadiant,
    HeatComb,
    CoolAir,
    CoolRadiant,
    CoolComb,
}

impl DeviceMode {
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(DeviceMode::Stop),
            1 => Ok(DeviceMode::Auto),
            2 => Ok(DeviceMode::Cooling),
            3 => Ok(DeviceMode::Heating),
            4 => Ok(DeviceMode::Fan),
            5 => Ok(DeviceMode::Dry),
            6 => Ok(DeviceMode::EmergencyHeat),
            7 => Ok(DeviceMode::HeatAir),
            8 => Ok(DeviceMode::HeatRadiant),
            9 => Ok(DeviceMode::HeatComb),
            10 => Ok(DeviceMode::CoolAir),
            11 => Ok(DeviceMode::CoolRadiant),
            12 => Ok(DeviceMode::CoolComb),
            other => Err(Error::UnknownCode {
                kind: "mode",
                code: other,
            }),
        }
    }

    /// Parse a `mode_available` list, dropping unknown codes with a warning.
    /// Used at discovery time where one unrecognized mode must not sink the
    /// whole device.
    pub fn from_codes_lenient(codes: &[i64]) -> Vec<Self> {
        codes
            .iter()
            .filter_map(|&code| match Self::from_code(code) {
                Ok(mode) => Some(mode),
                Err(_) => {
                    warn!(code, "dropping unknown mode code from mode_available");
                    None
                }
            })
            .collect()
    }

    pub fn code(&self) -> i64 {
        match self {
            DeviceMode::Stop => 0,
            DeviceMode::Auto => 1,
            DeviceMode::Cooling => 2,
            DeviceMode::Heating => 3,
            DeviceMode::Fan => 4,
            DeviceMode::Dry => 5,
            DeviceMode::EmergencyHeat => 6,
            DeviceMode::HeatAir => 7,
            DeviceMode::HeatRadiant => 8,
            DeviceMode::HeatComb => 9,
            DeviceMode::CoolAir => 10,
            DeviceMode::CoolRadiant => 11,
            DeviceMode::CoolComb => 12,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeviceMode::Stop => "stop",
            DeviceMode::Auto => "auto",
            DeviceMode::Cooling => "cooling",
            DeviceMode::Heating => "heating",
            DeviceMode::Fan => "ventilate",
            DeviceMode::Dry => "dehumidify",
            DeviceMode::EmergencyHeat => "emergency-heat",
            DeviceMode::HeatAir => "heat-air",
            DeviceMode::HeatRadiant => "heat-radiant",
            DeviceMode::HeatComb => "heat-both",
            DeviceMode::CoolAir => "cool-air",
            DeviceMode::CoolRadiant => "cool-radiant",
            DeviceMode::CoolComb => "cool-both",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DeviceMode::Stop => "Stop",
            DeviceMode::Auto => "Auto",
            DeviceMode::Cooling => "Cooling",
            DeviceMode::Heating => "Heating",
            DeviceMode::Fan => "Ventilate",
            DeviceMode::Dry => "Dry",
            DeviceMode::EmergencyHeat => "Emergency heating",
            DeviceMode::HeatAir => "Air heating",
            DeviceMode::HeatRadiant => "Radiant heating",
            DeviceMode::HeatComb => "Combined heating",
            DeviceMode::CoolAir => "Air cooling",
            DeviceMode::CoolRadiant => "Radiant cooling",
            DeviceMode::CoolComb => "Combined cooling",
        }
    }

    pub fn kind(&self) -> ModeKind {
        match self {
            DeviceMode::Stop => ModeKind::None,
            DeviceMode::Auto => ModeKind::Auto,
            DeviceMode::Fan | DeviceMode::Dry => ModeKind::None,
            DeviceMode::Cooling
            | DeviceMode::CoolAir
            | DeviceMode::CoolRadiant
            | DeviceMode::CoolComb => ModeKind::Cold,
            DeviceMode::Heating
            | DeviceMode::EmergencyHeat
            | DeviceMode::HeatAir
            | DeviceMode::HeatRadiant
            | DeviceMode::HeatComb => ModeKind::Heat,
        }
    }

    /// The setpoint field that is active while this mode is selected.
    pub fn setpoint_field(&self) -> SetpointField {
        match self {
            DeviceMode::Stop => SetpointField::Stop,
            DeviceMode::Auto => SetpointField::Auto,
            DeviceMode::Fan => SetpointField::Vent,
            DeviceMode::Dry => SetpointField::Dry,
            mode => match mode.kind() {
                ModeKind::Heat => SetpointField::Heat,
                _ => SetpointField::Cool,
            },
        }
    }
}

/// Per-mode setpoint field names used by the device status record and the
/// PATCH `param` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetpointField {
    Stop,
    Auto,
    Cool,
    Heat,
    Vent,
    Dry,
}

impl SetpointField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetpointField::Stop => "setpoint_air_stop",
            SetpointField::Auto => "setpoint_air_auto",
            SetpointField::Cool => "setpoint_air_cool",
            SetpointField::Heat => "setpoint_air_heat",
            SetpointField::Vent => "setpoint_air_vent",
            SetpointField::Dry => "setpoint_air_dry",
        }
    }

    pub const ALL: [SetpointField; 6] = [
        SetpointField::Stop,
        SetpointField::Auto,
        SetpointField::Cool,
        SetpointField::Heat,
        SetpointField::Vent,
        SetpointField::Dry,
    ];
}

/// Operating mode codes of the variant vendor (Daikin) cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaikinMode {
    Cool,
    Heat,
    Ventilate,
    Auto,
    Dry,
    CoolAir,
    HeatAir,
    VentilateHeat,
}

impl DaikinMode {
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            1 => Ok(DaikinMode::Cool),
            2 => Ok(DaikinMode::Heat),
            3 => Ok(DaikinMode::Ventilate),
            4 => Ok(DaikinMode::Auto),
            5 => Ok(DaikinMode::Dry),
            6 => Ok(DaikinMode::CoolAir),
            7 => Ok(DaikinMode::HeatAir),
            8 => Ok(DaikinMode::VentilateHeat),
            other => Err(Error::UnknownCode {
                kind: "daikin mode",
                code: other,
            }),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            DaikinMode::Cool => 1,
            DaikinMode::Heat => 2,
            DaikinMode::Ventilate => 3,
            DaikinMode::Auto => 4,
            DaikinMode::Dry => 5,
            DaikinMode::CoolAir => 6,
            DaikinMode::HeatAir => 7,
            DaikinMode::VentilateHeat => 8,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DaikinMode::Cool => "cool",
            DaikinMode::Heat => "heat",
            DaikinMode::Ventilate => "ventilate",
            DaikinMode::Auto => "heat-cold-auto",
            DaikinMode::Dry => "dehumidify",
            DaikinMode::CoolAir => "cool-air",
            DaikinMode::HeatAir => "heat-air",
            DaikinMode::VentilateHeat => "ventilate-heat",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DaikinMode::Cool => "Cooling mode",
            DaikinMode::Heat => "Heating mode",
            DaikinMode::Ventilate => "Ventilation in cold mode",
            DaikinMode::Auto => "Auto mode",
            DaikinMode::Dry => "Dry mode",
            DaikinMode::CoolAir => "Automatic cooling",
            DaikinMode::HeatAir => "Automatic heating",
            DaikinMode::VentilateHeat => "Ventilation in heating mode",
        }
    }

    /// Which of the two consign fields (heat/cold) this mode drives.
    pub fn kind(&self) -> ModeKind {
        match self {
            DaikinMode::Heat | DaikinMode::HeatAir | DaikinMode::VentilateHeat => ModeKind::Heat,
            _ => ModeKind::Cold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanSpeed {
    Auto,
    Low,
    Medium,
    High,
}

impl FanSpeed {
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(FanSpeed::Auto),
            1 => Ok(FanSpeed::Low),
            2 => Ok(FanSpeed::Medium),
            3 => Ok(FanSpeed::High),
            other => Err(Error::UnknownCode {
                kind: "fan speed",
                code: other,
            }),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            FanSpeed::Auto => 0,
            FanSpeed::Low => 1,
            FanSpeed::Medium => 2,
            FanSpeed::High => 3,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FanSpeed::Auto => "Auto",
            FanSpeed::Low => "Low speed",
            FanSpeed::Medium => "Medium speed",
            FanSpeed::High => "High speed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcoMode {
    Off,
    Manual,
    A,
    APlus,
    APlusPlus,
}

impl EcoMode {
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(EcoMode::Off),
            1 => Ok(EcoMode::Manual),
            2 => Ok(EcoMode::A),
            3 => Ok(EcoMode::APlus),
            4 => Ok(EcoMode::APlusPlus),
            other => Err(Error::UnknownCode {
                kind: "eco",
                code: other,
            }),
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            EcoMode::Off => "Eco off",
            EcoMode::Manual => "Eco manual",
            EcoMode::A => "Eco A",
            EcoMode::APlus => "Eco A+",
            EcoMode::APlusPlus => "Eco A++",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Airflow {
    Silence,
    Standard,
    Power,
}

impl Airflow {
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(Airflow::Silence),
            1 => Ok(Airflow::Standard),
            2 => Ok(Airflow::Power),
            other => Err(Error::UnknownCode {
                kind: "airflow",
                code: other,
            }),
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Airflow::Silence => "Silence",
            Airflow::Standard => "Standard",
            Airflow::Power => "Power",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_mode_code_round_trip() {
        for code in 0..=12 {
            let mode = DeviceMode::from_code(code).unwrap();
            assert_eq!(mode.code(), code);
        }
    }

    #[test]
    fn unknown_mode_code_is_loud() {
        let err = DeviceMode::from_code(42).unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownCode {
                kind: "mode",
                code: 42
            }
        ));
    }

    #[test]
    fn lenient_parse_drops_unknown() {
        let modes = DeviceMode::from_codes_lenient(&[0, 3, 42, 2]);
        assert_eq!(
            modes,
            vec![DeviceMode::Stop, DeviceMode::Heating, DeviceMode::Cooling]
        );
    }

    #[test]
    fn setpoint_field_follows_mode() {
        assert_eq!(
            DeviceMode::Heating.setpoint_field().as_str(),
            "setpoint_air_heat"
        );
        assert_eq!(
            DeviceMode::CoolRadiant.setpoint_field().as_str(),
            "setpoint_air_cool"
        );
        assert_eq!(
            DeviceMode::Dry.setpoint_field().as_str(),
            "setpoint_air_dry"
        );
        assert_eq!(
            DeviceMode::Auto.setpoint_field().as_str(),
            "setpoint_air_auto"
        );
    }

    #[test]
    fn daikin_mode_kinds() {
        assert_eq!(DaikinMode::Heat.kind(), ModeKind::Heat);
        assert_eq!(DaikinMode::VentilateHeat.kind(), ModeKind::Heat);
        assert_eq!(DaikinMode::Cool.kind(), ModeKind::Cold);
        assert_eq!(DaikinMode::Auto.kind(), ModeKind::Cold);
        assert!(DaikinMode::from_code(9).is_err());
    }
}
