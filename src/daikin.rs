//! Variant vendor (Daikin) cloud: the older endpoint-per-resource tree.
//!
//! Authentication rides in query parameters (`user_email`/`user_token`) and
//! there is no refresh token: 401 recovery is a single re-login followed by
//! one replay. Device commands go through `POST /events` with `P*` option
//! codes (`P1` power, `P2` mode, `P7` cold consign, `P8` heat consign).

use std::sync::Mutex;

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error, info, trace};
use url::Url;

use crate::models::decode;
use crate::modes::{DaikinMode, ModeKind};
use crate::protocol::{DKN_DEVICES, DKN_EVENTS, DKN_INSTALLATION_RELATIONS, DKN_LOGIN,
    daikin_event_body};
use crate::types::{Temperature, Units};
use crate::{Config, Error, Result};

#[derive(Debug, Clone, Deserialize)]
struct DknLoginResponse {
    user: DknLoginUser,
}

#[derive(Debug, Clone, Deserialize)]
struct DknLoginUser {
    authentication_token: String,
}

#[derive(Debug, Clone, Deserialize)]
struct InstallationRelationsPage {
    installation_relations: Vec<InstallationRelation>,
}

#[derive(Debug, Clone, Deserialize)]
struct InstallationRelation {
    installation: DaikinInstallationData,
}

#[derive(Debug, Clone, Deserialize)]
struct DevicesPage {
    devices: Vec<DaikinDeviceData>,
}

/// Raw installation payload. The vendor reports most scalars as strings.
#[derive(Debug, Clone, Deserialize)]
pub struct DaikinInstallationData {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Raw device payload.
#[derive(Debug, Clone, Deserialize)]
pub struct DaikinDeviceData {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub pin: Option<String>,
    #[serde(default)]
    pub power: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub local_temp: Option<String>,
    #[serde(default)]
    pub cold_consign: Option<String>,
    #[serde(default)]
    pub heat_consign: Option<String>,
    #[serde(default)]
    pub min_limit_cold: Option<String>,
    #[serde(default)]
    pub max_limit_cold: Option<String>,
    #[serde(default)]
    pub min_limit_heat: Option<String>,
    #[serde(default)]
    pub max_limit_heat: Option<String>,
    #[serde(default)]
    pub firmware: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub units: Option<Units>,
}

fn parse_temp(field: &Option<String>) -> Option<Temperature> {
    field
        .as_deref()
        .and_then(|s| s.parse::<f64>().ok())
        .map(Temperature::from_celsius)
}

enum Reply {
    Ok(Value),
    Unauthorized,
}

/// Client for the variant vendor cloud.
pub struct DaikinClient {
    http: reqwest::Client,
    base_url: Url,
    email: String,
    password: String,
    token: Mutex<Option<String>>,
}

impl DaikinClient {
    pub fn new(email: impl Into<String>, password: impl Into<String>, base_url: Url) -> Self {
        let http = reqwest::Client::builder()
            .build()
            .expect("failed to build HTTP client");
        Self {
            http,
            base_url,
            email: email.into(),
            password: password.into(),
            token: Mutex::new(None),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent())
            .build()
            .expect("failed to build HTTP client");
        Self {
            http,
            base_url: config.base_url(),
            email: config.email.clone(),
            password: config.password.clone(),
            token: Mutex::new(None),
        }
    }

    /// Log in and store the account token. Not retried on failure.
    pub async fn login(&self) -> Result<String> {
        let body = json!({ "email": self.email, "password": self.password });
        debug!(path = DKN_LOGIN, "POST login");

        let mut url = self.base_url.clone();
        url.set_path(DKN_LOGIN);
        let resp = self.http.post(url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            error!(status = status.as_u16(), "login rejected");
            return Err(Error::Auth(format!(
                "login failed with status {}",
                status.as_u16()
            )));
        }

        let login: DknLoginResponse = decode(resp.json().await?, "daikin login")?;
        let token = login.user.authentication_token;
        *self.token.lock().expect("token lock poisoned") = Some(token.clone());
        info!(email = %self.email, "login success");
        Ok(token)
    }

    async fn ensure_token(&self) -> Result<String> {
        let current = self.token.lock().expect("token lock poisoned").clone();
        match current {
            Some(token) => Ok(token),
            None => self.login().await,
        }
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let token = self.ensure_token().await?;
        match self.send(method.clone(), path, params, body, &token).await? {
            Reply::Ok(value) => Ok(value),
            Reply::Unauthorized => {
                // No refresh token on this API: the only recovery is a full
                // re-login, then one replay.
                let token = self.login().await?;
                match self.send(method, path, params, body, &token).await? {
                    Reply::Ok(value) => Ok(value),
                    Reply::Unauthorized => Err(Error::Auth(
                        "request unauthorized after re-login".to_string(),
                    )),
                }
            }
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<&Value>,
        token: &str,
    ) -> Result<Reply> {
        debug!(method = %method, path, "request");

        let mut url = self.base_url.clone();
        url.set_path(path);
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
            pairs.append_pair("format", "json");
            pairs.append_pair("user_email", &self.email);
            pairs.append_pair("user_token", token);
        }

        let mut req = self.http.request(method, url);
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            debug!(path, "request unauthorized");
            return Ok(Reply::Unauthorized);
        }
        if !status.is_success() {
            let body = resp.json::<Value>().await.ok();
            error!(status = status.as_u16(), path, "API error");
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }

        let value = resp.json::<Value>().await.map_err(|e| Error::Malformed {
            context: "response body",
            reason: e.to_string(),
        })?;
        Ok(Reply::Ok(value))
    }

    /// All installations of the account, with their devices loaded.
    pub async fn installations(&self) -> Result<Vec<DaikinInstallation>> {
        let mut installations = Vec::new();
        self.refresh_installations(&mut installations).await?;
        Ok(installations)
    }

    /// Re-fetch installations, reconciling `current` by id: matching
    /// entities are updated in place, new ones appended, absent ones drop.
    pub async fn refresh_installations(
        &self,
        current: &mut Vec<DaikinInstallation>,
    ) -> Result<()> {
        let value = self
            .request(Method::GET, DKN_INSTALLATION_RELATIONS, &[], None)
            .await?;
        let page: InstallationRelationsPage = decode(value, "installation relations")?;

        let fresh: Vec<DaikinInstallationData> = page
            .installation_relations
            .into_iter()
            .map(|r| r.installation)
            .collect();

        let mut next = Vec::with_capacity(fresh.len());
        for data in fresh {
            match current.iter().position(|i| i.id() == data.id) {
                Some(idx) => {
                    let mut installation = current.remove(idx);
                    installation.set_data(data);
                    next.push(installation);
                }
                None => next.push(DaikinInstallation::new(data)),
            }
        }
        *current = next;

        for installation in current.iter_mut() {
            installation.refresh_devices(self).await?;
        }
        Ok(())
    }

    /// Devices of one installation.
    pub async fn devices(&self, installation_id: &str) -> Result<Vec<DaikinDeviceData>> {
        let params = [("installation_id", installation_id.to_string())];
        let value = self
            .request(Method::GET, DKN_DEVICES, &params, None)
            .await?;
        let page: DevicesPage = decode(value, "devices")?;
        Ok(page.devices)
    }

    /// Machine command for one device.
    pub async fn send_event(&self, device_id: &str, option: &str, value: Value) -> Result<()> {
        let body = daikin_event_body(device_id, option, value);
        trace!(device_id, option, "send event");
        self.request(Method::POST, DKN_EVENTS, &[], Some(&body))
            .await?;
        Ok(())
    }
}

/// A physical site on the variant vendor cloud.
#[derive(Debug, Clone)]
pub struct DaikinInstallation {
    data: DaikinInstallationData,
    pub devices: Vec<DaikinDevice>,
}

impl DaikinInstallation {
    fn new(data: DaikinInstallationData) -> Self {
        Self {
            data,
            devices: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.data.id
    }

    pub fn name(&self) -> Option<&str> {
        self.data.name.as_deref()
    }

    fn set_data(&mut self, data: DaikinInstallationData) {
        trace!(installation = %data.id, "installation data refreshed");
        self.data = data;
    }

    /// Refresh this installation's own data, then its device list.
    pub async fn refresh(&mut self, client: &DaikinClient) -> Result<()> {
        let value = client
            .request(Method::GET, DKN_INSTALLATION_RELATIONS, &[], None)
            .await?;
        let page: InstallationRelationsPage = decode(value, "installation relations")?;
        if let Some(relation) = page
            .installation_relations
            .into_iter()
            .find(|r| r.installation.id == self.data.id)
        {
            self.set_data(relation.installation);
        }
        self.refresh_devices(client).await
    }

    /// Re-fetch devices, reconciling by id.
    pub async fn refresh_devices(&mut self, client: &DaikinClient) -> Result<()> {
        let fresh = client.devices(&self.data.id).await?;
        reconcile_devices(&mut self.devices, fresh, &self.data.id);
        Ok(())
    }
}

fn reconcile_devices(
    current: &mut Vec<DaikinDevice>,
    fresh: Vec<DaikinDeviceData>,
    installation_id: &str,
) {
    let mut next = Vec::with_capacity(fresh.len());
    for data in fresh {
        match current.iter().position(|d| d.id() == data.id) {
            Some(idx) => {
                let mut device = current.remove(idx);
                device.set_data(data);
                next.push(device);
            }
            None => next.push(DaikinDevice::new(installation_id.to_string(), data)),
        }
    }
    *current = next;
}

/// One climate machine.
#[derive(Debug, Clone)]
pub struct DaikinDevice {
    installation_id: String,
    data: DaikinDeviceData,
}

impl DaikinDevice {
    fn new(installation_id: String, data: DaikinDeviceData) -> Self {
        trace!(device = %data.id, "device created");
        Self {
            installation_id,
            data,
        }
    }

    pub fn id(&self) -> &str {
        &self.data.id
    }

    /// Owning installation (navigation only).
    pub fn installation_id(&self) -> &str {
        &self.installation_id
    }

    pub fn name(&self) -> Option<&str> {
        self.data.name.as_deref()
    }

    pub fn mac(&self) -> Option<&str> {
        self.data.mac.as_deref()
    }

    pub fn firmware(&self) -> Option<&str> {
        self.data.firmware.as_deref()
    }

    pub fn brand(&self) -> Option<&str> {
        self.data.brand.as_deref()
    }

    pub fn is_on(&self) -> bool {
        self.data.power.as_deref() == Some("1")
    }

    pub fn mode_raw(&self) -> Result<i64> {
        let raw = self.data.mode.as_deref().ok_or(Error::Malformed {
            context: "daikin device",
            reason: "missing mode".to_string(),
        })?;
        raw.parse().map_err(|_| Error::Malformed {
            context: "daikin device",
            reason: format!("non-numeric mode: {raw}"),
        })
    }

    pub fn mode(&self) -> Result<DaikinMode> {
        DaikinMode::from_code(self.mode_raw()?)
    }

    pub fn current_temperature(&self) -> Option<Temperature> {
        parse_temp(&self.data.local_temp)
    }

    /// Target temperature for the active heat/cold mode.
    pub fn target_temperature(&self) -> Result<Option<Temperature>> {
        Ok(match self.mode()?.kind() {
            ModeKind::Heat => parse_temp(&self.data.heat_consign),
            _ => parse_temp(&self.data.cold_consign),
        })
    }

    pub fn min_temperature(&self) -> Result<Option<Temperature>> {
        Ok(match self.mode()?.kind() {
            ModeKind::Heat => parse_temp(&self.data.min_limit_heat),
            _ => parse_temp(&self.data.min_limit_cold),
        })
    }

    pub fn max_temperature(&self) -> Result<Option<Temperature>> {
        Ok(match self.mode()?.kind() {
            ModeKind::Heat => parse_temp(&self.data.max_limit_heat),
            _ => parse_temp(&self.data.max_limit_cold),
        })
    }

    fn set_data(&mut self, data: DaikinDeviceData) {
        trace!(device = %data.id, "device data refreshed");
        self.data = data;
    }

    /// Turn the machine on, optimistically patching local state.
    pub async fn turn_on(&mut self, client: &DaikinClient) -> Result<()> {
        client.send_event(self.id(), "P1", json!(1)).await?;
        self.data.power = Some("1".to_string());
        Ok(())
    }

    pub async fn turn_off(&mut self, client: &DaikinClient) -> Result<()> {
        client.send_event(self.id(), "P1", json!(0)).await?;
        self.data.power = Some("0".to_string());
        Ok(())
    }

    pub async fn set_mode(&mut self, client: &DaikinClient, mode: DaikinMode) -> Result<()> {
        client.send_event(self.id(), "P2", json!(mode.code())).await?;
        self.data.mode = Some(mode.code().to_string());
        Ok(())
    }

    /// Set the target temperature for the active mode, clamped to the
    /// vendor-reported limits.
    pub async fn set_temperature(
        &mut self,
        client: &DaikinClient,
        temperature: Temperature,
    ) -> Result<()> {
        let mut celsius = temperature.celsius();
        if let Some(min) = self.min_temperature()? {
            celsius = celsius.max(min.celsius());
        }
        if let Some(max) = self.max_temperature()? {
            celsius = celsius.min(max.celsius());
        }
        let wire = Temperature::from_celsius(celsius).as_wire(Units::Celsius);

        match self.mode()?.kind() {
            ModeKind::Heat => {
                client.send_event(self.id(), "P8", json!(wire)).await?;
                self.data.heat_consign = Some(format!("{wire:.1}"));
            }
            _ => {
                client.send_event(self.id(), "P7", json!(wire)).await?;
                self.data.cold_consign = Some(format!("{wire:.1}"));
            }
        }
        Ok(())
    }

    /// Ask the hardware to push fresh readings to the cloud (available on
    /// the next refresh, after a few seconds).
    pub async fn request_update(&self, client: &DaikinClient) -> Result<()> {
        client.send_event(self.id(), "", json!(0)).await
    }

    /// Re-fetch the parent installation's device list and reconcile this
    /// device's record from it.
    pub async fn refresh(&mut self, client: &DaikinClient) -> Result<()> {
        let fresh = client.devices(&self.installation_id).await?;
        if let Some(data) = fresh.into_iter().find(|d| d.id == self.data.id) {
            self.set_data(data);
        }
        Ok(())
    }
}
