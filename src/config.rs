use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::logger::MessageLogMode;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (iPhone; CPU iPhone OS 14_3 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile";

const AIRZONE_BASE_URL: &str = "https://m.airzonecloud.com";
const DAIKIN_BASE_URL: &str = "https://dkn.airzonecloud.com";

const DEFAULT_CACHE_TTL_SECS: u64 = 30;

/// Which cloud service the account lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudVariant {
    #[default]
    Airzone,
    Daikin,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MessageLogConfig {
    pub mode: MessageLogMode,
    pub path: String,
}

/// Client configuration, threaded explicitly through constructors.
#[derive(Clone, Deserialize)]
pub struct Config {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub variant: CloudVariant,
    /// Override the per-variant default base URL.
    #[serde(default)]
    pub base_url: Option<Url>,
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Send a group-level stop when the last device of a group is turned off.
    #[serde(default = "default_auto_off")]
    pub auto_off: bool,
    /// Freshness hint for adapter reads: cache entries older than this
    /// trigger a best-effort refresh.
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
    #[serde(default)]
    pub message_log: Option<MessageLogConfig>,
}

fn default_auto_off() -> bool {
    true
}

impl Config {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            variant: CloudVariant::default(),
            base_url: None,
            user_agent: None,
            auto_off: true,
            cache_ttl_secs: None,
            message_log: None,
        }
    }

    pub fn base_url(&self) -> Url {
        self.base_url.clone().unwrap_or_else(|| {
            let default = match self.variant {
                CloudVariant::Airzone => AIRZONE_BASE_URL,
                CloudVariant::Daikin => DAIKIN_BASE_URL,
            };
            Url::parse(default).expect("default base URL is valid")
        })
    }

    pub fn user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs.unwrap_or(DEFAULT_CACHE_TTL_SECS))
    }
}

// Credentials must never leak into logs; Debug masks the password.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("email", &self.email)
            .field("password", &"********")
            .field("variant", &self.variant)
            .field("base_url", &self.base_url)
            .field("user_agent", &self.user_agent)
            .field("auto_off", &self.auto_off)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_masks_password() {
        let config = Config::new("user@example.com", "hunter2");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("user@example.com"));
    }

    #[test]
    fn variant_selects_base_url() {
        let mut config = Config::new("a@b.c", "pw");
        assert_eq!(config.base_url().as_str(), "https://m.airzonecloud.com/");
        config.variant = CloudVariant::Daikin;
        assert_eq!(config.base_url().as_str(), "https://dkn.airzonecloud.com/");
        config.base_url = Some(Url::parse("http://127.0.0.1:8080").unwrap());
        assert_eq!(config.base_url().as_str(), "http://127.0.0.1:8080/");
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"email": "a@b.c", "password": "pw", "variant": "daikin"}"#,
        )
        .unwrap();
        assert_eq!(config.variant, CloudVariant::Daikin);
        assert!(config.auto_off);
        assert_eq!(config.cache_ttl(), Duration::from_secs(30));
    }
}
