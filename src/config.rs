//! # Configuration Management
//!
//! Centralized configuration for the relay.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()` (prefix `BEDROCK_RELAY_`)
//!
//! ## Sections
//! - `relay`: listen/upstream addresses and protocol version
//! - `auth`: chain mode, device class, account and token cache
//! - `endpoints`: identity-provider and chain-issuance URLs
//! - `logging`: subscriber configuration

use crate::auth::device::DeviceKind;
use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::filter::Directive;

/// Default protocol version announced in `RequestNetworkSettings`.
pub const DEFAULT_PROTOCOL_VERSION: u32 = 859;

/// `Client-Version` header sent to the chain-issuance endpoint.
pub const DEFAULT_CLIENT_VERSION: &str = "1.21.124";

/// Main relay configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub relay: RelaySettings,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub endpoints: EndpointConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RelayConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| RelayError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| RelayError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| RelayError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("BEDROCK_RELAY_LISTEN_ADDRESS") {
            config.relay.listen_address = addr;
        }

        if let Ok(addr) = std::env::var("BEDROCK_RELAY_REMOTE_ADDRESS") {
            config.relay.remote_address = addr;
        }

        if let Ok(version) = std::env::var("BEDROCK_RELAY_PROTOCOL_VERSION") {
            if let Ok(val) = version.parse::<u32>() {
                config.relay.protocol_version = val;
            }
        }

        if let Ok(mode) = std::env::var("BEDROCK_RELAY_AUTH_MODE") {
            config.auth.mode = match mode.to_ascii_lowercase().as_str() {
                "delegated" => ChainMode::Delegated,
                "self_signed" | "self-signed" => ChainMode::SelfSigned,
                other => {
                    return Err(RelayError::ConfigError(format!(
                        "Unknown auth mode in BEDROCK_RELAY_AUTH_MODE: {other}"
                    )))
                }
            };
        }

        if let Ok(account) = std::env::var("BEDROCK_RELAY_ACCOUNT_ID") {
            config.auth.account_id = account;
        }

        if let Ok(token) = std::env::var("BEDROCK_RELAY_REFRESH_TOKEN") {
            config.auth.refresh_token = Some(token);
        }

        if let Ok(path) = std::env::var("BEDROCK_RELAY_TOKEN_CACHE") {
            config.auth.token_cache_path = PathBuf::from(path);
        }

        if let Ok(level) = std::env::var("BEDROCK_RELAY_LOG_LEVEL") {
            config.logging.level = level.parse().map_err(|_| {
                RelayError::ConfigError(format!("Unknown log level in BEDROCK_RELAY_LOG_LEVEL: {level}"))
            })?;
        }

        if let Ok(path) = std::env::var("BEDROCK_RELAY_LOG_FILE") {
            config.logging.file = Some(PathBuf::from(path));
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| RelayError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| RelayError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.relay.validate());
        errors.extend(self.auth.validate());
        errors.extend(self.endpoints.validate());
        errors.extend(self.logging.validate());

        if self.logging.file.as_deref() == Some(self.auth.token_cache_path.as_path()) {
            errors.push("Log file cannot be the token cache file".to_string());
        }
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(RelayError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Relay addresses and protocol settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelaySettings {
    /// Address the game client connects to (e.g., "0.0.0.0:19132")
    pub listen_address: String,

    /// Upstream server address
    pub remote_address: String,

    /// Protocol version sent in `RequestNetworkSettings` when the login carries none
    pub protocol_version: u32,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            listen_address: String::from("0.0.0.0:19132"),
            remote_address: String::from("127.0.0.1:19133"),
            protocol_version: DEFAULT_PROTOCOL_VERSION,
        }
    }
}

impl RelaySettings {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.listen_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid listen address format: '{}' (expected format: '0.0.0.0:19132')",
                self.listen_address
            ));
        }

        // Upstream may be a hostname, so only the port is checked
        match self.remote_address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
            _ => errors.push(format!(
                "Invalid remote address format: '{}' (expected format: 'host:port')",
                self.remote_address
            )),
        }

        if self.protocol_version == 0 {
            errors.push("Protocol version must be greater than 0".to_string());
        }

        errors
    }
}

/// How the login chain is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainMode {
    /// One self-signed token; no identity provider involved
    #[default]
    SelfSigned,
    /// Provider-issued chain behind a relay-signed authority token
    Delegated,
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub mode: ChainMode,

    /// Device class presented to the identity provider
    pub device: DeviceKind,

    /// Cache key for this account's identity tokens
    pub account_id: String,

    /// OAuth refresh token or authorization code; required in delegated mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// JSON document holding cached identity tokens
    pub token_cache_path: PathBuf,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: ChainMode::SelfSigned,
            device: DeviceKind::Android,
            account_id: String::from("default"),
            refresh_token: None,
            token_cache_path: PathBuf::from("identity_tokens.json"),
        }
    }
}

impl AuthConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.account_id.is_empty() {
            errors.push("Account id cannot be empty".to_string());
        }

        if self.mode == ChainMode::Delegated {
            match self.refresh_token.as_deref() {
                Some(token) if !token.trim().is_empty() => {}
                _ => errors.push("refresh_token must be specified in delegated mode".to_string()),
            }
        }

        if self.token_cache_path.as_os_str().is_empty() {
            errors.push("Token cache path cannot be empty".to_string());
        }

        errors
    }
}

/// External endpoints
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    pub oauth_token_url: String,
    pub oauth_redirect_uri: String,
    pub user_auth_url: String,
    pub device_auth_url: String,
    pub title_auth_url: String,
    pub sisu_authenticate_url: String,
    pub sisu_authorize_url: String,
    pub xsts_authorize_url: String,
    pub chain_url: String,

    /// `Client-Version` header for the chain endpoint
    pub client_version: String,

    /// Timeout applied to each provider request
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            oauth_token_url: String::from("https://login.live.com/oauth20_token.srf"),
            oauth_redirect_uri: String::from("https://login.live.com/oauth20_desktop.srf"),
            user_auth_url: String::from("https://user.auth.xboxlive.com/user/authenticate"),
            device_auth_url: String::from("https://device.auth.xboxlive.com/device/authenticate"),
            title_auth_url: String::from("https://title.auth.xboxlive.com/title/authenticate"),
            sisu_authenticate_url: String::from("https://sisu.xboxlive.com/authenticate"),
            sisu_authorize_url: String::from("https://sisu.xboxlive.com/authorize"),
            xsts_authorize_url: String::from("https://xsts.auth.xboxlive.com/xsts/authorize"),
            chain_url: String::from("https://multiplayer.minecraft.net/authentication"),
            client_version: String::from(DEFAULT_CLIENT_VERSION),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl EndpointConfig {
    /// Point every endpoint at `base`, keeping each default path.
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            oauth_token_url: format!("{base}/oauth20_token.srf"),
            oauth_redirect_uri: format!("{base}/oauth20_desktop.srf"),
            user_auth_url: format!("{base}/user/authenticate"),
            device_auth_url: format!("{base}/device/authenticate"),
            title_auth_url: format!("{base}/title/authenticate"),
            sisu_authenticate_url: format!("{base}/authenticate"),
            sisu_authorize_url: format!("{base}/authorize"),
            xsts_authorize_url: format!("{base}/xsts/authorize"),
            chain_url: format!("{base}/authentication"),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (name, url) in [
            ("oauth_token_url", &self.oauth_token_url),
            ("user_auth_url", &self.user_auth_url),
            ("device_auth_url", &self.device_auth_url),
            ("title_auth_url", &self.title_auth_url),
            ("sisu_authenticate_url", &self.sisu_authenticate_url),
            ("sisu_authorize_url", &self.sisu_authorize_url),
            ("xsts_authorize_url", &self.xsts_authorize_url),
            ("chain_url", &self.chain_url),
        ] {
            if reqwest::Url::parse(url).is_err() {
                errors.push(format!("Invalid URL for {name}: '{url}'"));
            }
        }

        if self.client_version.is_empty() {
            errors.push("Client version cannot be empty".to_string());
        }

        if self.request_timeout.as_millis() < 100 {
            errors.push("Request timeout too short (minimum: 100ms)".to_string());
        } else if self.request_timeout.as_secs() > 300 {
            errors.push("Request timeout too long (maximum: 300s)".to_string());
        }

        errors
    }
}

/// Log line encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Subscriber settings. Logs go to stderr unless `file` is set.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Service name on the startup line; tells relays sharing a log sink apart
    pub service_name: String,

    #[serde(with = "log_level_serde")]
    pub level: Level,

    pub format: LogFormat,

    pub file: Option<PathBuf>,

    /// Extra `EnvFilter` directives, e.g. `bedrock_relay::auth=trace`
    pub directives: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            service_name: String::from("bedrock-relay"),
            level: Level::INFO,
            format: LogFormat::Text,
            file: None,
            directives: Vec::new(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.service_name.trim().is_empty() {
            errors.push("Service name cannot be empty".to_string());
        }

        if let Some(parent) = self.file.as_deref().and_then(Path::parent) {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                errors.push(format!(
                    "Log file directory does not exist: {}",
                    parent.display()
                ));
            }
        }

        for directive in &self.directives {
            if directive.parse::<Directive>().is_err() {
                errors.push(format!("Invalid log directive: {directive}"));
            }
        }

        errors
    }
}

/// Durations as whole milliseconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// `tracing::Level` as its lowercase name.
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use tracing::Level;

    pub fn serialize<S: Serializer>(level: &Level, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&level.as_str().to_ascii_lowercase())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Level, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse()
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {name}")))
    }
}
