//! Accessory surface: device discovery and per-device thermostat adapters.
//!
//! The host automation framework binds its characteristic get/set hooks to
//! a [`Thermostat`]. Reads are best-effort within a fixed deadline and fall
//! back to the last known value; writes translate characteristic values
//! into vendor codes, dispatch the HTTP call and invalidate freshness so
//! the next read re-fetches.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{debug, info, warn};

use crate::client::AirzoneClient;
use crate::daikin::{DaikinClient, DaikinDevice};
use crate::modes::{DaikinMode, DeviceMode, ModeKind};
use crate::realtime::EventListener;
use crate::status::DeviceStatus;
use crate::types::{Temperature, Units};
use crate::{CloudVariant, Config, Result};

/// Deadline for the refresh a characteristic read may trigger. Reads must
/// return promptly, so a slow refresh degrades to the last known value.
const REFRESH_BUDGET: Duration = Duration::from_millis(800);

/// What discovery reports to the host framework for each controllable
/// device/zone.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub id: String,
    pub installation_id: String,
    pub group_id: Option<String>,
    pub name: String,
    pub serial: Option<String>,
    pub model: Option<String>,
    pub firmware: Option<String>,
    pub last_status: Option<DeviceStatus>,
}

/// Current heating/cooling state characteristic values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeatingCoolingState {
    Off,
    Heat,
    Cool,
}

/// Target heating/cooling state characteristic values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Off,
    Heat,
    Cool,
    Auto,
}

struct CloudBackend {
    client: Arc<AirzoneClient>,
    listener: Arc<EventListener>,
    installation_id: String,
    group_id: Option<String>,
    device_id: String,
    /// Other devices in the same group, consulted by the auto-off policy.
    siblings: Vec<String>,
}

struct DaikinBackend {
    client: Arc<DaikinClient>,
    device: tokio::sync::Mutex<DaikinDevice>,
}

/// Discovery tags each device with its API generation; every adapter path
/// dispatches on this exhaustively.
enum Backend {
    Cloud(CloudBackend),
    Daikin(DaikinBackend),
}

/// One thermostat accessory.
pub struct Thermostat {
    descriptor: DeviceDescriptor,
    backend: Backend,
    auto_off: bool,
    cache_ttl: Duration,
    valid_targets: Vec<TargetState>,
    display_units: Mutex<Units>,
    last_status: Mutex<Option<DeviceStatus>>,
    last_refresh: Mutex<Option<Instant>>,
}

impl Thermostat {
    pub fn cloud(
        client: Arc<AirzoneClient>,
        listener: Arc<EventListener>,
        descriptor: DeviceDescriptor,
        siblings: Vec<String>,
        config: &Config,
        display_units: Units,
    ) -> Self {
        let available = descriptor
            .last_status
            .as_ref()
            .map(DeviceStatus::available_modes)
            .unwrap_or_default();
        let valid_targets = valid_targets(&available);
        let backend = Backend::Cloud(CloudBackend {
            client,
            listener,
            installation_id: descriptor.installation_id.clone(),
            group_id: descriptor.group_id.clone(),
            device_id: descriptor.id.clone(),
            siblings,
        });
        Self {
            last_status: Mutex::new(descriptor.last_status.clone()),
            descriptor,
            backend,
            auto_off: config.auto_off,
            cache_ttl: config.cache_ttl(),
            valid_targets,
            display_units: Mutex::new(display_units),
            last_refresh: Mutex::new(None),
        }
    }

    pub fn daikin(
        client: Arc<DaikinClient>,
        device: DaikinDevice,
        descriptor: DeviceDescriptor,
        config: &Config,
    ) -> Self {
        Self {
            descriptor,
            backend: Backend::Daikin(DaikinBackend {
                client,
                device: tokio::sync::Mutex::new(device),
            }),
            auto_off: config.auto_off,
            cache_ttl: config.cache_ttl(),
            // The variant vendor API always supports the auto mode.
            valid_targets: vec![
                TargetState::Off,
                TargetState::Heat,
                TargetState::Cool,
                TargetState::Auto,
            ],
            display_units: Mutex::new(Units::Celsius),
            last_status: Mutex::new(None),
            last_refresh: Mutex::new(None),
        }
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Target states this device may be asked for. Declared at accessory
    /// construction; a device whose `mode_available` lacks AUTO does not
    /// offer AUTO.
    pub fn valid_target_states(&self) -> &[TargetState] {
        &self.valid_targets
    }

    pub fn display_units(&self) -> Units {
        *self.display_units.lock().expect("units lock poisoned")
    }

    /// Change the display units. On the main cloud this is persisted as an
    /// account preference (best effort).
    pub async fn set_display_units(&self, units: Units) {
        *self.display_units.lock().expect("units lock poisoned") = units;
        if let Backend::Cloud(b) = &self.backend
            && let Err(e) = b.client.set_user_units(units).await
        {
            warn!("failed to persist display units: {e}");
        }
    }

    pub fn supports_fan(&self) -> bool {
        match &self.backend {
            Backend::Cloud(_) => self
                .last_status
                .lock()
                .expect("status lock poisoned")
                .as_ref()
                .is_some_and(|s| s.available_modes().contains(&DeviceMode::Fan)),
            Backend::Daikin(_) => true,
        }
    }

    // -- Characteristic reads --

    pub async fn current_temperature(&self) -> Option<f64> {
        let units = self.display_units();
        match &self.backend {
            Backend::Cloud(b) => self
                .cloud_status(b)
                .await
                .and_then(|s| s.local_temp)
                .map(|t| t.as_wire(units)),
            Backend::Daikin(b) => {
                self.daikin_refresh(b).await;
                let device = b.device.lock().await;
                device.current_temperature().map(|t| t.as_wire(units))
            }
        }
    }

    pub async fn target_temperature(&self) -> Option<f64> {
        let units = self.display_units();
        match &self.backend {
            Backend::Cloud(b) => {
                let status = self.cloud_status(b).await?;
                match status.active_setpoint() {
                    Ok(setpoint) => setpoint.map(|t| t.as_wire(units)),
                    Err(e) => {
                        warn!(device = %self.descriptor.id, "cannot resolve setpoint: {e}");
                        None
                    }
                }
            }
            Backend::Daikin(b) => {
                self.daikin_refresh(b).await;
                let device = b.device.lock().await;
                match device.target_temperature() {
                    Ok(target) => target.map(|t| t.as_wire(units)),
                    Err(e) => {
                        warn!(device = %self.descriptor.id, "cannot resolve setpoint: {e}");
                        None
                    }
                }
            }
        }
    }

    pub async fn current_relative_humidity(&self) -> Option<f64> {
        match &self.backend {
            Backend::Cloud(b) => self.cloud_status(b).await.and_then(|s| s.humidity),
            // The variant vendor does not report humidity.
            Backend::Daikin(_) => None,
        }
    }

    pub async fn current_heating_cooling_state(&self) -> HeatingCoolingState {
        match &self.backend {
            Backend::Cloud(b) => match self.cloud_status(b).await {
                Some(status) => current_state(&status),
                None => HeatingCoolingState::Off,
            },
            Backend::Daikin(b) => {
                self.daikin_refresh(b).await;
                let device = b.device.lock().await;
                if !device.is_on() {
                    return HeatingCoolingState::Off;
                }
                match device.mode() {
                    Ok(mode) => match mode.kind() {
                        ModeKind::Heat => HeatingCoolingState::Heat,
                        _ => HeatingCoolingState::Cool,
                    },
                    Err(e) => {
                        warn!(device = %self.descriptor.id, "cannot resolve mode: {e}");
                        HeatingCoolingState::Off
                    }
                }
            }
        }
    }

    pub async fn target_heating_cooling_state(&self) -> TargetState {
        match &self.backend {
            Backend::Cloud(b) => match self.cloud_status(b).await {
                Some(status) => target_state(&status),
                None => TargetState::Off,
            },
            Backend::Daikin(b) => {
                self.daikin_refresh(b).await;
                let device = b.device.lock().await;
                if !device.is_on() {
                    return TargetState::Off;
                }
                match device.mode() {
                    Ok(DaikinMode::Auto) => TargetState::Auto,
                    Ok(mode) => match mode.kind() {
                        ModeKind::Heat => TargetState::Heat,
                        _ => TargetState::Cool,
                    },
                    Err(e) => {
                        warn!(device = %self.descriptor.id, "cannot resolve mode: {e}");
                        TargetState::Off
                    }
                }
            }
        }
    }

    pub async fn fan_on(&self) -> Option<bool> {
        if !self.supports_fan() {
            return None;
        }
        match &self.backend {
            Backend::Cloud(b) => {
                let status = self.cloud_status(b).await?;
                Some(
                    status.power == Some(true)
                        && status.mode == Some(DeviceMode::Fan.code()),
                )
            }
            Backend::Daikin(b) => {
                let device = b.device.lock().await;
                Some(device.is_on() && matches!(device.mode(), Ok(DaikinMode::Ventilate)))
            }
        }
    }

    // -- Characteristic writes --

    /// Translate and dispatch a target-state change.
    ///
    /// Turning a device off applies the auto-off policy: the device's own
    /// power-off is issued first, and only if every confirmed sibling in
    /// the group is also off (and the policy is enabled) is the group-level
    /// stop sent afterwards.
    pub async fn set_target_state(&self, state: TargetState) -> Result<()> {
        info!(device = %self.descriptor.id, ?state, "set target state");
        match &self.backend {
            Backend::Cloud(b) => {
                match state {
                    TargetState::Off => {
                        b.client
                            .set_device_power(&b.device_id, &b.installation_id, false)
                            .await?;
                        self.maybe_group_stop(b).await?;
                    }
                    TargetState::Heat => {
                        let mode = self.pick_cloud_mode(ModeKind::Heat, DeviceMode::Heating);
                        b.client
                            .set_device_mode(&b.device_id, &b.installation_id, mode)
                            .await?;
                        b.client
                            .set_device_power(&b.device_id, &b.installation_id, true)
                            .await?;
                    }
                    TargetState::Cool => {
                        let mode = self.pick_cloud_mode(ModeKind::Cold, DeviceMode::Cooling);
                        b.client
                            .set_device_mode(&b.device_id, &b.installation_id, mode)
                            .await?;
                        b.client
                            .set_device_power(&b.device_id, &b.installation_id, true)
                            .await?;
                    }
                    TargetState::Auto => {
                        b.client
                            .set_device_mode(&b.device_id, &b.installation_id, DeviceMode::Auto)
                            .await?;
                        b.client
                            .set_device_power(&b.device_id, &b.installation_id, true)
                            .await?;
                    }
                }
                self.invalidate();
                Ok(())
            }
            Backend::Daikin(b) => {
                {
                    let mut device = b.device.lock().await;
                    match state {
                        TargetState::Off => device.turn_off(&b.client).await?,
                        TargetState::Heat => {
                            device.set_mode(&b.client, DaikinMode::Heat).await?;
                            device.turn_on(&b.client).await?;
                        }
                        TargetState::Cool => {
                            device.set_mode(&b.client, DaikinMode::Cool).await?;
                            device.turn_on(&b.client).await?;
                        }
                        TargetState::Auto => {
                            device.set_mode(&b.client, DaikinMode::Auto).await?;
                            device.turn_on(&b.client).await?;
                        }
                    }
                }
                self.request_daikin_update(b);
                Ok(())
            }
        }
    }

    /// Set the target temperature, given in the current display units.
    pub async fn set_target_temperature(&self, value: f64) -> Result<()> {
        let units = self.display_units();
        let temperature = match units {
            Units::Celsius => Temperature::from_celsius(value),
            Units::Fahrenheit => Temperature::from_fahrenheit(value),
        };
        info!(device = %self.descriptor.id, %temperature, "set target temperature");

        match &self.backend {
            Backend::Cloud(b) => {
                // The wire `param` is the setpoint field of the active mode.
                let status = self.cloud_status(b).await;
                let field = status
                    .as_ref()
                    .and_then(|s| s.device_mode().ok().flatten())
                    .map(|m| m.setpoint_field())
                    .unwrap_or_else(|| DeviceMode::Auto.setpoint_field());
                // The wire value is always Celsius, whatever the display units.
                b.client
                    .set_device_setpoint(
                        &b.device_id,
                        &b.installation_id,
                        field,
                        temperature,
                        Units::Celsius,
                    )
                    .await?;
                self.invalidate();
                Ok(())
            }
            Backend::Daikin(b) => {
                {
                    let mut device = b.device.lock().await;
                    device.set_temperature(&b.client, temperature).await?;
                }
                self.request_daikin_update(b);
                Ok(())
            }
        }
    }

    pub async fn set_fan_on(&self, on: bool) -> Result<()> {
        match &self.backend {
            Backend::Cloud(b) => {
                if on {
                    b.client
                        .set_device_mode(&b.device_id, &b.installation_id, DeviceMode::Fan)
                        .await?;
                    b.client
                        .set_device_power(&b.device_id, &b.installation_id, true)
                        .await?;
                } else {
                    b.client
                        .set_device_power(&b.device_id, &b.installation_id, false)
                        .await?;
                }
                self.invalidate();
                Ok(())
            }
            Backend::Daikin(b) => {
                {
                    let mut device = b.device.lock().await;
                    if on {
                        device.set_mode(&b.client, DaikinMode::Ventilate).await?;
                        device.turn_on(&b.client).await?;
                    } else {
                        device.turn_off(&b.client).await?;
                    }
                }
                self.request_daikin_update(b);
                Ok(())
            }
        }
    }

    // -- Internals --

    /// Best-effort status for the cloud backend: re-fetch when stale,
    /// otherwise the realtime cache, otherwise the adapter's last value.
    async fn cloud_status(&self, b: &CloudBackend) -> Option<DeviceStatus> {
        if self.stale() {
            let fetch = b.client.device_status(&b.device_id, &b.installation_id);
            match tokio::time::timeout(REFRESH_BUDGET, fetch).await {
                Ok(Ok(status)) => {
                    *self.last_status.lock().expect("status lock poisoned") =
                        Some(status.clone());
                    *self.last_refresh.lock().expect("refresh lock poisoned") =
                        Some(Instant::now());
                    return Some(status);
                }
                Ok(Err(e)) => {
                    warn!(device = %b.device_id, "status refresh failed, using last known: {e}")
                }
                Err(_) => {
                    warn!(device = %b.device_id, "status refresh timed out, using last known")
                }
            }
        }

        if let Some(status) = b.listener.status(&b.device_id) {
            *self.last_status.lock().expect("status lock poisoned") = Some(status.clone());
            return Some(status);
        }
        self.last_status.lock().expect("status lock poisoned").clone()
    }

    async fn daikin_refresh(&self, b: &DaikinBackend) {
        if !self.stale() {
            return;
        }
        let refresh = async {
            let mut device = b.device.lock().await;
            device.refresh(&b.client).await
        };
        match tokio::time::timeout(REFRESH_BUDGET, refresh).await {
            Ok(Ok(())) => {
                *self.last_refresh.lock().expect("refresh lock poisoned") = Some(Instant::now());
            }
            Ok(Err(e)) => warn!(device = %self.descriptor.id, "refresh failed, using last known: {e}"),
            Err(_) => warn!(device = %self.descriptor.id, "refresh timed out, using last known"),
        }
    }

    fn stale(&self) -> bool {
        let last = *self.last_refresh.lock().expect("refresh lock poisoned");
        match last {
            Some(at) => at.elapsed() > self.cache_ttl,
            None => true,
        }
    }

    fn invalidate(&self) {
        *self.last_refresh.lock().expect("refresh lock poisoned") = None;
    }

    /// Ask the hardware to push fresh readings; not awaited by the write.
    fn request_daikin_update(&self, b: &DaikinBackend) {
        self.invalidate();
        let client = Arc::clone(&b.client);
        let device_id = self.descriptor.id.clone();
        tokio::spawn(async move {
            if let Err(e) = client.send_event(&device_id, "", json!(0)).await {
                debug!(device = %device_id, "update request failed: {e}");
            }
        });
    }

    fn pick_cloud_mode(&self, kind: ModeKind, preferred: DeviceMode) -> DeviceMode {
        let available = self
            .last_status
            .lock()
            .expect("status lock poisoned")
            .as_ref()
            .map(DeviceStatus::available_modes)
            .unwrap_or_default();
        pick_mode(&available, kind, preferred)
    }

    /// Group stop, gated on the policy flag and every sibling confirming
    /// power off. An unknown sibling status counts as running.
    async fn maybe_group_stop(&self, b: &CloudBackend) -> Result<()> {
        if !self.auto_off {
            return Ok(());
        }
        let Some(ref group_id) = b.group_id else {
            return Ok(());
        };

        let all_off = b.siblings.iter().all(|sibling| {
            b.listener
                .status(sibling)
                .is_some_and(|s| s.power == Some(false))
        });
        if !all_off {
            debug!(device = %b.device_id, "siblings still running, skipping group stop");
            return Ok(());
        }

        info!(group = %group_id, "all devices off, sending group stop");
        b.client
            .set_group_mode(&b.installation_id, group_id, DeviceMode::Stop)
            .await
    }
}

fn current_state(status: &DeviceStatus) -> HeatingCoolingState {
    if status.power != Some(true) {
        return HeatingCoolingState::Off;
    }
    match status.device_mode() {
        Ok(Some(mode)) => match mode.kind() {
            ModeKind::Heat => HeatingCoolingState::Heat,
            ModeKind::Cold => HeatingCoolingState::Cool,
            ModeKind::None => HeatingCoolingState::Off,
            ModeKind::Auto => {
                // Infer the direction from current vs target temperature.
                let setpoint = status.active_setpoint().ok().flatten();
                match (status.local_temp, setpoint) {
                    (Some(local), Some(target)) if local.celsius() < target.celsius() => {
                        HeatingCoolingState::Heat
                    }
                    _ => HeatingCoolingState::Cool,
                }
            }
        },
        Ok(None) => HeatingCoolingState::Off,
        Err(e) => {
            warn!("cannot resolve current mode: {e}");
            HeatingCoolingState::Off
        }
    }
}

fn target_state(status: &DeviceStatus) -> TargetState {
    if status.power != Some(true) {
        return TargetState::Off;
    }
    match status.device_mode() {
        Ok(Some(DeviceMode::Auto)) => TargetState::Auto,
        Ok(Some(mode)) => match mode.kind() {
            ModeKind::Heat => TargetState::Heat,
            ModeKind::Cold => TargetState::Cool,
            ModeKind::None => TargetState::Off,
            ModeKind::Auto => TargetState::Auto,
        },
        Ok(None) => TargetState::Off,
        Err(e) => {
            warn!("cannot resolve target mode: {e}");
            TargetState::Off
        }
    }
}

fn valid_targets(available: &[DeviceMode]) -> Vec<TargetState> {
    if available.is_empty() {
        return vec![
            TargetState::Off,
            TargetState::Heat,
            TargetState::Cool,
            TargetState::Auto,
        ];
    }
    let mut targets = vec![TargetState::Off];
    if available.iter().any(|m| m.kind() == ModeKind::Heat) {
        targets.push(TargetState::Heat);
    }
    if available.iter().any(|m| m.kind() == ModeKind::Cold) {
        targets.push(TargetState::Cool);
    }
    if available.contains(&DeviceMode::Auto) {
        targets.push(TargetState::Auto);
    }
    targets
}

fn pick_mode(available: &[DeviceMode], kind: ModeKind, preferred: DeviceMode) -> DeviceMode {
    if available.is_empty() || available.contains(&preferred) {
        return preferred;
    }
    available
        .iter()
        .copied()
        .find(|m| m.kind() == kind)
        .unwrap_or(preferred)
}

// -- Discovery --

/// Discover all controllable devices for the configured cloud variant.
///
/// Builds the clients internally; use [`discover_cloud`] / [`discover_daikin`]
/// to keep your own handles.
pub async fn discover(config: &Config) -> Result<Vec<Thermostat>> {
    match config.variant {
        CloudVariant::Airzone => {
            let client = Arc::new(AirzoneClient::from_config(config));
            let listener = Arc::new(EventListener::spawn(Arc::clone(&client), config)?);
            discover_cloud(client, listener, config).await
        }
        CloudVariant::Daikin => {
            let client = Arc::new(DaikinClient::from_config(config));
            discover_daikin(client, config).await
        }
    }
}

/// Walk installations -> groups -> devices on the main cloud. Each
/// installation is listened to in turn so descriptors carry a full status
/// snapshot; the subscription remains on the last installation.
pub async fn discover_cloud(
    client: Arc<AirzoneClient>,
    listener: Arc<EventListener>,
    config: &Config,
) -> Result<Vec<Thermostat>> {
    let display_units = client
        .user()
        .await
        .ok()
        .and_then(|u| u.config)
        .map(|c| c.units)
        .unwrap_or_default();

    let mut thermostats = Vec::new();
    for summary in client.installations().await? {
        let installation = client.installation(&summary.id).await?;
        let statuses = listener.listen_installation(&installation.id).await?;

        // Webserver metadata supplies serial numbers and firmware revisions.
        let mut webservers: HashMap<String, (Option<String>, Option<String>)> = HashMap::new();
        for ws_id in &installation.ws_ids {
            match client.webserver_status(&installation.id, ws_id, false).await {
                Ok(ws) => {
                    let mac = ws.config.as_ref().and_then(|c| c.mac.clone());
                    let fw = ws.config.as_ref().and_then(|c| c.ws_fw.clone());
                    webservers.insert(ws.id.clone(), (mac, fw));
                }
                Err(e) => warn!(webserver = %ws_id, "webserver status unavailable: {e}"),
            }
        }

        for group in &installation.groups {
            let member_ids: Vec<String> =
                group.devices.iter().map(|d| d.device_id.clone()).collect();
            for device in &group.devices {
                let (serial, firmware) = device
                    .ws_id
                    .as_ref()
                    .and_then(|id| webservers.get(id).cloned())
                    .unwrap_or((None, None));
                let descriptor = DeviceDescriptor {
                    id: device.device_id.clone(),
                    installation_id: installation.id.clone(),
                    group_id: Some(group.group_id.clone()),
                    name: device
                        .name
                        .clone()
                        .or_else(|| group.name.clone())
                        .unwrap_or_else(|| device.device_id.clone()),
                    serial,
                    model: device.device_type.clone(),
                    firmware,
                    last_status: statuses.get(&device.device_id).cloned(),
                };
                let siblings = member_ids
                    .iter()
                    .filter(|id| **id != device.device_id)
                    .cloned()
                    .collect();
                info!(device = %descriptor.id, name = %descriptor.name, "discovered device");
                thermostats.push(Thermostat::cloud(
                    Arc::clone(&client),
                    Arc::clone(&listener),
                    descriptor,
                    siblings,
                    config,
                    display_units,
                ));
            }
        }
    }
    Ok(thermostats)
}

/// Walk installations -> devices on the variant vendor cloud.
pub async fn discover_daikin(
    client: Arc<DaikinClient>,
    config: &Config,
) -> Result<Vec<Thermostat>> {
    let mut thermostats = Vec::new();
    for installation in client.installations().await? {
        let installation_id = installation.id().to_string();
        for device in installation.devices {
            let descriptor = DeviceDescriptor {
                id: device.id().to_string(),
                installation_id: installation_id.clone(),
                group_id: None,
                name: device
                    .name()
                    .map(str::to_string)
                    .unwrap_or_else(|| device.id().to_string()),
                serial: device.mac().map(str::to_string),
                model: device.brand().map(str::to_string),
                firmware: device.firmware().map(str::to_string),
                last_status: None,
            };
            info!(device = %descriptor.id, name = %descriptor.name, "discovered device");
            thermostats.push(Thermostat::daikin(
                Arc::clone(&client),
                device,
                descriptor,
                config,
            ));
        }
    }
    Ok(thermostats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_targets_exclude_auto_when_unavailable() {
        let available = [DeviceMode::Stop, DeviceMode::Heating, DeviceMode::Cooling];
        let targets = valid_targets(&available);
        assert_eq!(
            targets,
            vec![TargetState::Off, TargetState::Heat, TargetState::Cool]
        );
    }

    #[test]
    fn valid_targets_include_auto_when_available() {
        let available = [
            DeviceMode::Stop,
            DeviceMode::Auto,
            DeviceMode::Heating,
            DeviceMode::Cooling,
        ];
        assert!(valid_targets(&available).contains(&TargetState::Auto));
    }

    #[test]
    fn unknown_mode_list_defaults_to_all_targets() {
        assert_eq!(valid_targets(&[]).len(), 4);
    }

    #[test]
    fn pick_mode_prefers_exact_then_kind() {
        let available = [DeviceMode::Stop, DeviceMode::HeatRadiant, DeviceMode::CoolAir];
        assert_eq!(
            pick_mode(&available, ModeKind::Heat, DeviceMode::Heating),
            DeviceMode::HeatRadiant
        );
        let with_preferred = [DeviceMode::Heating, DeviceMode::HeatRadiant];
        assert_eq!(
            pick_mode(&with_preferred, ModeKind::Heat, DeviceMode::Heating),
            DeviceMode::Heating
        );
    }

    #[test]
    fn current_state_auto_infers_direction() {
        let mut status = DeviceStatus::default();
        status.power = Some(true);
        status.mode = Some(DeviceMode::Auto.code());
        status.local_temp = Some(Temperature::from_celsius(19.0));
        status.setpoints.auto = Some(Temperature::from_celsius(22.0));
        assert_eq!(current_state(&status), HeatingCoolingState::Heat);

        status.local_temp = Some(Temperature::from_celsius(25.0));
        assert_eq!(current_state(&status), HeatingCoolingState::Cool);
    }

    #[test]
    fn powered_off_is_off_regardless_of_mode() {
        let mut status = DeviceStatus::default();
        status.power = Some(false);
        status.mode = Some(DeviceMode::Heating.code());
        assert_eq!(current_state(&status), HeatingCoolingState::Off);
        assert_eq!(target_state(&status), TargetState::Off);
    }
}
