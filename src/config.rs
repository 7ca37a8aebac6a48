use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::server::HEALTHCHECK_PATH;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    #[default]
    Json,
    Form,
}

impl std::fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadFormat::Json => write!(f, "json"),
            PayloadFormat::Form => write!(f, "form"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub line: LineConfig,
    #[serde(default)]
    pub ifttt: IftttConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LineConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_line_api_base_url")]
    pub api_base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IftttConfig {
    /// Maker webhooks key. Only ever supplied by the config file or `IFTTT_KEY`.
    #[serde(default)]
    pub key: String,
    #[serde(default = "default_ifttt_event")]
    pub event: String,
    #[serde(default = "default_ifttt_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub payload_format: PayloadFormat,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Webhook bodies larger than this are dropped (still answered 200).
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    /// Drop events whose resolved display name is empty instead of forwarding them.
    #[serde(default = "default_skip_empty_display_name")]
    pub skip_empty_display_name: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_token_refresh_margin_secs")]
    pub token_refresh_margin_secs: u64,
}

/// One webhook path and the bot name forwarded for events arriving on it.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RouteConfig {
    pub path: String,
    pub bot_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            line: LineConfig::default(),
            ifttt: IftttConfig::default(),
            server: ServerConfig::default(),
            relay: RelayConfig::default(),
            routes: default_routes(),
        }
    }
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            api_base_url: default_line_api_base_url(),
        }
    }
}

impl Default for IftttConfig {
    fn default() -> Self {
        Self {
            key: String::new(),
            event: default_ifttt_event(),
            base_url: default_ifttt_base_url(),
            payload_format: PayloadFormat::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            skip_empty_display_name: default_skip_empty_display_name(),
            request_timeout_secs: default_request_timeout_secs(),
            token_refresh_margin_secs: default_token_refresh_margin_secs(),
        }
    }
}

fn default_line_api_base_url() -> String {
    "https://api.line.me".to_string()
}

fn default_ifttt_event() -> String {
    "line_message_received".to_string()
}

fn default_ifttt_base_url() -> String {
    "https://maker.ifttt.com".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_skip_empty_display_name() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_token_refresh_margin_secs() -> u64 {
    300
}

fn default_routes() -> Vec<RouteConfig> {
    vec![RouteConfig {
        path: "/assistancedu".to_string(),
        bot_name: "休校塾".to_string(),
    }]
}

impl RelayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn token_refresh_margin(&self) -> Duration {
        Duration::from_secs(self.token_refresh_margin_secs)
    }

    /// Client shared by every outbound call, bounded by `request_timeout`.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.request_timeout())
            .build()
            .context("Failed to build HTTP client")
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Config {
    /// Load the TOML file at `path`, apply environment overrides and validate.
    ///
    /// When `path` is `None` the file is optional: `config.toml` is read if it
    /// exists, otherwise built-in defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let fallback = Path::new("config.toml");
                if fallback.exists() {
                    Self::from_file(fallback)?
                } else {
                    Config::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Overlay values from the environment. `lookup` is `std::env::var` outside tests.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("LINE_CLIENT_ID") {
            self.line.client_id = v;
        }
        if let Some(v) = non_empty("LINE_CLIENT_SECRET") {
            self.line.client_secret = v;
        }
        if let Some(v) = non_empty("IFTTT_KEY") {
            self.ifttt.key = v;
        }
        if let Some(v) = non_empty("IFTTT_EVENT") {
            self.ifttt.event = v;
        }
        if let Some(v) = non_empty("PORT") {
            self.server.port = v
                .trim()
                .parse()
                .with_context(|| format!("PORT is not a valid port number: {v}"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.line.client_id.is_empty() {
            bail!("LINE client id is missing (set LINE_CLIENT_ID or [line] client_id)");
        }
        if self.line.client_secret.is_empty() {
            bail!("LINE client secret is missing (set LINE_CLIENT_SECRET or [line] client_secret)");
        }
        if self.ifttt.key.is_empty() {
            bail!("IFTTT key is missing (set IFTTT_KEY or [ifttt] key)");
        }
        if self.ifttt.event.is_empty() {
            bail!("IFTTT event name must not be empty");
        }
        if self.relay.request_timeout_secs == 0 {
            bail!("relay.request_timeout_secs must be greater than zero");
        }
        if self.server.max_body_bytes == 0 {
            bail!("server.max_body_bytes must be greater than zero");
        }
        if self.routes.is_empty() {
            bail!("At least one [[routes]] entry is required");
        }

        let mut seen = HashSet::new();
        for route in &self.routes {
            if !route.path.starts_with('/') {
                bail!("Route path must start with '/': {}", route.path);
            }
            // axum reads these as captures or wildcards and panics on some forms
            if route.path.contains([':', '*', '{', '}']) {
                bail!("Route path must be a literal path: {}", route.path);
            }
            if route.path == HEALTHCHECK_PATH {
                bail!("Route path {} is reserved for the health check", route.path);
            }
            if route.bot_name.is_empty() {
                bail!("Route {} has an empty bot_name", route.path);
            }
            if !seen.insert(route.path.as_str()) {
                bail!("Duplicate route path: {}", route.path);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.line.client_id = "id".to_string();
        config.line.client_secret = "secret".to_string();
        config.ifttt.key = "key".to_string();
        config
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = valid_config();
        assert_eq!(config.line.api_base_url, "https://api.line.me");
        assert_eq!(config.ifttt.event, "line_message_received");
        assert_eq!(config.ifttt.payload_format, PayloadFormat::Json);
        assert_eq!(config.server.port, 8080);
        assert!(config.relay.skip_empty_display_name);
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].path, "/assistancedu");
        assert_eq!(config.routes[0].bot_name, "休校塾");
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_full_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[line]
client_id = "cid"
client_secret = "csecret"

[ifttt]
key = "k"
event = "custom_event"
payload_format = "form"

[server]
port = 9000

[relay]
skip_empty_display_name = false
request_timeout_secs = 3

[[routes]]
path = "/a"
bot_name = "Bot A"

[[routes]]
path = "/b"
bot_name = "Bot B"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.line.client_id, "cid");
        assert_eq!(config.ifttt.event, "custom_event");
        assert_eq!(config.ifttt.payload_format, PayloadFormat::Form);
        assert_eq!(config.server.port, 9000);
        assert!(!config.relay.skip_empty_display_name);
        assert_eq!(config.relay.request_timeout(), Duration::from_secs(3));
        assert_eq!(config.relay.token_refresh_margin_secs, 300);
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[1].bot_name, "Bot B");
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_routes_section_uses_default_route() {
        let config: Config = toml::from_str("[line]\nclient_id = \"x\"\n").unwrap();
        assert_eq!(config.routes, default_routes());
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = valid_config();
        config
            .apply_env(env(&[
                ("LINE_CLIENT_ID", "env-id"),
                ("LINE_CLIENT_SECRET", "env-secret"),
                ("IFTTT_KEY", "env-key"),
                ("PORT", "3000"),
            ]))
            .unwrap();
        assert_eq!(config.line.client_id, "env-id");
        assert_eq!(config.line.client_secret, "env-secret");
        assert_eq!(config.ifttt.key, "env-key");
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let mut config = valid_config();
        config
            .apply_env(env(&[("LINE_CLIENT_ID", ""), ("PORT", "  ")]))
            .unwrap();
        assert_eq!(config.line.client_id, "id");
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let mut config = valid_config();
        assert!(config.apply_env(env(&[("PORT", "eighty")])).is_err());
    }

    #[test]
    fn test_missing_secrets_fail_validation() {
        let mut config = valid_config();
        config.ifttt.key.clear();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("IFTTT key"));

        let mut config = valid_config();
        config.line.client_secret.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_route_validation() {
        let mut config = valid_config();
        config.routes.push(RouteConfig {
            path: "/assistancedu".to_string(),
            bot_name: "dup".to_string(),
        });
        assert!(config.validate().unwrap_err().to_string().contains("Duplicate"));

        let mut config = valid_config();
        config.routes[0].path = "no-slash".to_string();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.routes[0].path = HEALTHCHECK_PATH.to_string();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.routes[0].bot_name.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_limits_are_rejected() {
        let mut config = valid_config();
        config.relay.request_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.server.max_body_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_route_with_capture_syntax_is_rejected() {
        for path in ["/hooks/:bot", "/hooks/*rest", "/hooks/{bot}", "/a}"] {
            let mut config = valid_config();
            config.routes[0].path = path.to_string();
            let err = config.validate().unwrap_err().to_string();
            assert!(err.contains("literal path"), "{path}: {err}");
        }
    }
}
