mod adapter;
mod client;
mod config;
mod daikin;
mod error;
mod logger;
mod models;
mod modes;
mod protocol;
mod realtime;
mod status;
mod types;

pub use adapter::{
    DeviceDescriptor, HeatingCoolingState, TargetState, Thermostat, discover, discover_cloud,
    discover_daikin,
};
pub use client::{AirzoneClient, AirzoneClientBuilder};
pub use config::{CloudVariant, Config, MessageLogConfig};
pub use daikin::{
    DaikinClient, DaikinDevice, DaikinDeviceData, DaikinInstallation, DaikinInstallationData,
};
pub use error::{Error, Result, SubscriptionError};
pub use logger::MessageLogMode;
pub use models::{
    Device, DeviceMeta, Group, I18n, Installation, InstallationsPage, LocationText,
    LoginResponse, RefreshResponse, User, UserConfig, Webserver, WebserverConfig,
    WebserverDevice, WebserverStatus,
};
pub use modes::{
    Airflow, DaikinMode, DeviceMode, EcoMode, FanSpeed, ModeKind, SetpointField,
};
pub use realtime::{EventListener, ListenTarget};
pub use status::{DeviceStatus, Setpoints, StatusCache, StatusDelta, TempValue};
pub use types::{Temperature, TemperaturePair, Units};
