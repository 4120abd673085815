use std::sync::Mutex;

use reqwest::{Method, StatusCode};
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::logger::{MessageLogMode, MessageLogger};
use crate::models::{
    Installation, InstallationsPage, LoginResponse, RefreshResponse, User, Webserver, decode,
};
use crate::modes::{DeviceMode, SetpointField};
use crate::protocol::{
    API_DEVICES, API_INSTALLATIONS, API_LOGIN, API_REFRESH_TOKEN, API_USER, API_WEBSOCKETS,
    device_patch_body, group_put_body,
};
use crate::status::{DeviceStatus, delta_from_value};
use crate::types::{Temperature, Units};
use crate::{Config, Error, Result};

#[derive(Default)]
struct Tokens {
    access: Option<String>,
    refresh: Option<String>,
}

pub struct AirzoneClientBuilder {
    email: String,
    password: String,
    base_url: Url,
    user_agent: String,
    log: Option<(MessageLogMode, String)>,
}

impl AirzoneClientBuilder {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            base_url: Url::parse("https://m.airzonecloud.com").expect("default base URL is valid"),
            user_agent: String::new(),
            log: None,
        }
    }

    pub fn base_url(mut self, url: Url) -> Self {
        self.base_url = url;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log = Some((mode, path.into()));
        self
    }

    pub fn build(self) -> AirzoneClient {
        let mut http = reqwest::Client::builder();
        if !self.user_agent.is_empty() {
            http = http.user_agent(self.user_agent);
        }
        let http = http.build().expect("failed to build HTTP client");

        let logger = self
            .log
            .map(|(mode, path)| MessageLogger::new(mode, &path).expect("failed to open log file"));

        let (token_tx, _) = watch::channel(None);

        AirzoneClient {
            http,
            base_url: self.base_url,
            email: self.email,
            password: self.password,
            tokens: Mutex::new(Tokens::default()),
            token_tx,
            logger: Mutex::new(logger),
        }
    }
}

enum Reply {
    Ok(Option<Value>),
    Unauthorized,
}

/// Authenticated client for the installation/group/device API.
///
/// Owns the session token pair. A 401 on any request triggers exactly one
/// recovery cycle (silent token refresh, then full re-login as fallback) and
/// one replay of the original request; a second 401 propagates as
/// [`Error::Auth`].
pub struct AirzoneClient {
    http: reqwest::Client,
    base_url: Url,
    email: String,
    password: String,
    tokens: Mutex<Tokens>,
    /// New access tokens are published here before any token-mutating call
    /// returns, so the realtime client reconnects with the current token.
    token_tx: watch::Sender<Option<String>>,
    logger: Mutex<Option<MessageLogger>>,
}

impl AirzoneClient {
    pub fn builder(
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> AirzoneClientBuilder {
        AirzoneClientBuilder::new(email, password)
    }

    pub fn from_config(config: &Config) -> Self {
        let mut builder = AirzoneClientBuilder::new(&config.email, &config.password)
            .base_url(config.base_url())
            .user_agent(config.user_agent());
        if let Some(ref log) = config.message_log {
            builder = builder.message_log(log.mode, &log.path);
        }
        builder.build()
    }

    /// Watch channel carrying the current access token.
    pub fn token_watch(&self) -> watch::Receiver<Option<String>> {
        self.token_tx.subscribe()
    }

    /// WebSocket endpoint derived from the base URL.
    pub fn ws_url(&self) -> Result<Url> {
        let mut url = self.base_url.clone();
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| Error::Connection("cannot derive websocket URL".to_string()))?;
        url.set_path(API_WEBSOCKETS);
        Ok(url)
    }

    // -- Session --

    /// Log in with the stored credentials. Not retried on failure.
    pub async fn login(&self) -> Result<String> {
        let body = json!({ "email": self.email, "password": self.password });
        self.log_request("POST", API_LOGIN, Some(&body));
        debug!(path = API_LOGIN, "POST login");

        let url = self.endpoint(API_LOGIN, &[]);
        let resp = self.http.post(url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            error!(status = status.as_u16(), "login rejected");
            return Err(Error::Auth(format!(
                "login failed with status {}",
                status.as_u16()
            )));
        }

        let login: LoginResponse = decode(resp.json().await?, "login")?;
        let token = login.token.clone();
        self.store_tokens(login.token, login.refresh_token);
        info!(email = %self.email, "login success");
        Ok(token)
    }

    fn store_tokens(&self, access: String, refresh: String) {
        {
            let mut tokens = self.tokens.lock().expect("token lock poisoned");
            tokens.access = Some(access.clone());
            tokens.refresh = Some(refresh);
        }
        // Published before returning: a reconnecting listener must never
        // observe the old token after this call.
        let _ = self.token_tx.send(Some(access));
    }

    pub(crate) async fn ensure_token(&self) -> Result<String> {
        let current = {
            let tokens = self.tokens.lock().expect("token lock poisoned");
            tokens.access.clone()
        };
        match current {
            Some(token) => Ok(token),
            None => self.login().await,
        }
    }

    /// One recovery cycle: silent refresh with the stored refresh token,
    /// falling back to a full re-login.
    pub(crate) async fn renew_token(&self) -> Result<String> {
        let refresh = {
            let tokens = self.tokens.lock().expect("token lock poisoned");
            tokens.refresh.clone()
        };
        if let Some(refresh) = refresh {
            match self.refresh_tokens(&refresh).await {
                Ok(token) => return Ok(token),
                Err(e) => warn!("token refresh failed ({e}), falling back to re-login"),
            }
        }
        self.login().await
    }

    async fn refresh_tokens(&self, refresh: &str) -> Result<String> {
        let path = format!("{API_REFRESH_TOKEN}/{refresh}");
        self.log_request("GET", API_REFRESH_TOKEN, None);
        debug!(path = API_REFRESH_TOKEN, "GET refresh token");

        let url = self.endpoint(&path, &[]);
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Auth(format!(
                "token refresh failed with status {}",
                status.as_u16()
            )));
        }

        let refreshed: RefreshResponse = decode(resp.json().await?, "refresh token")?;
        let token = refreshed.token.clone();
        self.store_tokens(refreshed.token, refreshed.refresh_token);
        info!("refresh token success");
        Ok(token)
    }

    // -- Transport --

    /// Issue an authenticated request. `Ok(None)` on 204; parsed JSON
    /// otherwise.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Option<Value>> {
        let token = self.ensure_token().await?;
        match self.send(method.clone(), path, params, body, &token).await? {
            Reply::Ok(value) => Ok(value),
            Reply::Unauthorized => {
                let token = self.renew_token().await?;
                match self.send(method, path, params, body, &token).await? {
                    Reply::Ok(value) => Ok(value),
                    Reply::Unauthorized => Err(Error::Auth(
                        "request unauthorized after token recovery".to_string(),
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
        self.log_request(method.as_str(), path, body);
        debug!(method = %method, path, "request");

        let url = self.endpoint(path, params);
        let mut req = self.http.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            debug!(path, "request unauthorized");
            return Ok(Reply::Unauthorized);
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Reply::Ok(None));
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
        Ok(Reply::Ok(Some(value)))
    }

    fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(path);
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        url
    }

    fn log_request(&self, method: &str, path: &str, body: Option<&Value>) {
        let mut logger = self.logger.lock().expect("logger lock poisoned");
        if let Some(ref mut logger) = *logger {
            logger.log_request(method, path, body);
        }
    }

    // -- Resources --

    /// All installations visible to the account.
    pub async fn installations(&self) -> Result<Vec<Installation>> {
        self.installations_page(None, None, None).await
    }

    /// One page of installations, optionally filtered by `city`, `country`,
    /// `mac` or `name`.
    pub async fn installations_page(
        &self,
        filter: Option<(&str, &str)>,
        items: Option<u32>,
        page: Option<u32>,
    ) -> Result<Vec<Installation>> {
        let mut params = Vec::new();
        if let Some((param, value)) = filter {
            params.push(("filterParam", param.to_string()));
            params.push(("filterValue", value.to_string()));
        }
        if let Some(items) = items {
            params.push(("items", items.to_string()));
        }
        if let Some(page) = page {
            params.push(("page", page.to_string()));
        }

        let value = self
            .request(Method::GET, API_INSTALLATIONS, &params, None)
            .await?
            .ok_or(Error::Malformed {
                context: "installations",
                reason: "empty response".to_string(),
            })?;
        let page: InstallationsPage = decode(value, "installations")?;
        Ok(page.installations)
    }

    /// Data and group/device structure of one installation.
    pub async fn installation(&self, installation_id: &str) -> Result<Installation> {
        let path = format!("{API_INSTALLATIONS}/{installation_id}");
        let value = self
            .request(Method::GET, &path, &[], None)
            .await?
            .ok_or(Error::Malformed {
                context: "installation",
                reason: "empty response".to_string(),
            })?;
        decode(value, "installation")
    }

    /// Webservers belonging to an installation.
    pub async fn webservers(&self, installation_id: &str) -> Result<Vec<Webserver>> {
        let path = format!("{API_DEVICES}/wwss");
        let params = [("installation_id", installation_id.to_string())];
        let value = self
            .request(Method::GET, &path, &params, None)
            .await?
            .ok_or(Error::Malformed {
                context: "webservers",
                reason: "empty response".to_string(),
            })?;
        decode(value, "webservers")
    }

    /// Status of one webserver. The status endpoint omits the id, so it is
    /// re-injected before decoding.
    pub async fn webserver_status(
        &self,
        installation_id: &str,
        webserver_id: &str,
        devices: bool,
    ) -> Result<Webserver> {
        let path = format!("{API_DEVICES}/ws/{webserver_id}/status");
        let mut params = vec![("installation_id", installation_id.to_string())];
        if devices {
            params.push(("devices", "1".to_string()));
        }
        let mut value = self
            .request(Method::GET, &path, &params, None)
            .await?
            .ok_or(Error::Malformed {
                context: "webserver status",
                reason: "empty response".to_string(),
            })?;
        if let Some(map) = value.as_object_mut() {
            map.entry("_id")
                .or_insert_with(|| Value::String(webserver_id.to_string()));
        }
        decode(value, "webserver status")
    }

    /// The logged-in user, including display-unit preferences.
    pub async fn user(&self) -> Result<User> {
        let value = self
            .request(Method::GET, API_USER, &[], None)
            .await?
            .ok_or(Error::Malformed {
                context: "user",
                reason: "empty response".to_string(),
            })?;
        decode(value, "user")
    }

    /// Update the account display units (does not rotate tokens).
    pub async fn set_user_units(&self, units: Units) -> Result<()> {
        let body = json!({ "units": u8::from(units) });
        self.request(Method::PATCH, API_USER, &[], Some(&body))
            .await?;
        Ok(())
    }

    /// Last reported status of one device.
    pub async fn device_status(
        &self,
        device_id: &str,
        installation_id: &str,
    ) -> Result<DeviceStatus> {
        let path = format!("{API_DEVICES}/{device_id}/status");
        let params = [("installation_id", installation_id.to_string())];
        let value = self
            .request(Method::GET, &path, &params, None)
            .await?
            .ok_or(Error::Malformed {
                context: "device status",
                reason: "empty response".to_string(),
            })?;
        let delta = delta_from_value(&value)?;
        let mut status = DeviceStatus::default();
        status.apply(&delta);
        Ok(status)
    }

    /// PATCH one device parameter (`power`, `mode` or a setpoint field).
    pub async fn set_device_param(
        &self,
        device_id: &str,
        installation_id: &str,
        param: &str,
        value: Value,
        units: Units,
    ) -> Result<()> {
        let path = format!("{API_DEVICES}/{device_id}");
        let body = device_patch_body(param, value, installation_id, units);
        self.request(Method::PATCH, &path, &[], Some(&body)).await?;
        Ok(())
    }

    pub async fn set_device_power(
        &self,
        device_id: &str,
        installation_id: &str,
        on: bool,
    ) -> Result<()> {
        self.set_device_param(device_id, installation_id, "power", json!(on), Units::Celsius)
            .await
    }

    pub async fn set_device_mode(
        &self,
        device_id: &str,
        installation_id: &str,
        mode: DeviceMode,
    ) -> Result<()> {
        self.set_device_param(
            device_id,
            installation_id,
            "mode",
            json!(mode.code()),
            Units::Celsius,
        )
        .await
    }

    /// Set the setpoint for one mode, in wire precision for the given units.
    pub async fn set_device_setpoint(
        &self,
        device_id: &str,
        installation_id: &str,
        field: SetpointField,
        temperature: Temperature,
        units: Units,
    ) -> Result<()> {
        self.set_device_param(
            device_id,
            installation_id,
            field.as_str(),
            json!(temperature.as_wire(units)),
            units,
        )
        .await
    }

    /// Group-level mode change (PUT), used by the auto-off stop command.
    pub async fn set_group_mode(
        &self,
        installation_id: &str,
        group_id: &str,
        mode: DeviceMode,
    ) -> Result<()> {
        let path = format!("{API_INSTALLATIONS}/{installation_id}/group/{group_id}");
        let body = group_put_body(mode.code());
        self.request(Method::PUT, &path, &[], Some(&body)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> AirzoneClient {
        AirzoneClient::builder("a@b.c", "pw")
            .base_url(Url::parse("https://m.airzonecloud.com").unwrap())
            .build()
    }

    #[test]
    fn endpoint_builds_query_params() {
        let client = client();
        let url = client.endpoint(
            "/api/v1/devices/wwss",
            &[("installation_id", "inst1".to_string())],
        );
        assert_eq!(
            url.as_str(),
            "https://m.airzonecloud.com/api/v1/devices/wwss?installation_id=inst1"
        );
    }

    #[test]
    fn ws_url_switches_scheme() {
        let client = client();
        let ws = client.ws_url().unwrap();
        assert_eq!(ws.scheme(), "wss");
        assert_eq!(ws.path(), API_WEBSOCKETS);

        let plain = AirzoneClient::builder("a@b.c", "pw")
            .base_url(Url::parse("http://127.0.0.1:9000").unwrap())
            .build();
        assert_eq!(plain.ws_url().unwrap().scheme(), "ws");
    }

    #[test]
    fn token_watch_starts_empty() {
        let client = client();
        assert!(client.token_watch().borrow().is_none());
    }
}
