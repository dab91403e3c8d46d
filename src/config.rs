//! Client configuration
//!
//! A [`ClientConfig`] is fixed for the lifetime of a client instance. It can be
//! built in code with [`ClientConfig::new`] or loaded from a TOML file; any
//! omitted field falls back to its default.
//!
//! ```toml
//! url = "wss://realtime.voyager.example/ws"
//! token_env = "VOYAGER_TOKEN"
//! session_id = "trip-42"
//! channels = ["itinerary", "chat"]
//! reconnect_attempts = 5
//! reconnect_delay_ms = 1000
//!
//! [batching]
//! enabled = true
//! timeout_ms = 50
//! max_batch_size = 20
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Connection configuration for one client instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// WebSocket endpoint (`ws://` or `wss://`)
    pub url: String,
    /// Pre-issued credential token sent in the handshake
    #[serde(default)]
    pub token: String,
    /// Environment variable holding the token, used when `token` is empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
    /// Session to resume, forwarded in the handshake
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Channels to join during the handshake
    #[serde(default)]
    pub channels: Vec<String>,
    /// Ceiling on automatic reconnection attempts
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    /// Base delay for exponential backoff, in milliseconds
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Keep-alive interval while connected, in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Deadline for transport open plus handshake, in milliseconds
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// Outbound batching parameters
    #[serde(default)]
    pub batching: BatchingConfig,
    /// Log individual frames at debug level instead of trace
    #[serde(default)]
    pub debug: bool,
}

/// Outbound batching parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchingConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Flush deadline measured from the first queued item, in milliseconds
    #[serde(default = "default_batch_timeout_ms")]
    pub timeout_ms: u64,
    /// Queue length that forces an immediate flush
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_ms: default_batch_timeout_ms(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

fn default_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_connection_timeout_ms() -> u64 {
    10_000
}

fn default_batch_timeout_ms() -> u64 {
    100
}

fn default_max_batch_size() -> usize {
    10
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientConfig {
    /// Create a configuration with defaults for every optional field
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            token_env: None,
            session_id: None,
            channels: Vec::new(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            connection_timeout_ms: default_connection_timeout_ms(),
            batching: BatchingConfig::default(),
            debug: false,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = channels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_reconnect(mut self, attempts: u32, delay_ms: u64) -> Self {
        self.reconnect_attempts = attempts;
        self.reconnect_delay_ms = delay_ms;
        self
    }

    pub fn with_heartbeat_interval_ms(mut self, interval_ms: u64) -> Self {
        self.heartbeat_interval_ms = interval_ms;
        self
    }

    pub fn with_connection_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connection_timeout_ms = timeout_ms;
        self
    }

    pub fn with_batching(mut self, batching: BatchingConfig) -> Self {
        self.batching = batching;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Load configuration from a TOML file, resolve the token and validate
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text, resolve the token and validate
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: ClientConfig = toml::from_str(content)?;
        config.resolve_token()?;
        config.validate()?;
        Ok(config)
    }

    /// Fill `token` from `token_env` when no literal token was given
    pub fn resolve_token(&mut self) -> Result<(), ConfigError> {
        if !self.token.is_empty() {
            return Ok(());
        }
        if let Some(env_name) = &self.token_env {
            self.token = std::env::var(env_name)
                .map_err(|_| ConfigError::EnvVarNotFound(env_name.clone()))?;
        }
        Ok(())
    }

    /// Check the invariants the connection manager relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.url).map_err(|_| ConfigError::InvalidUrl(self.url.clone()))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidUrl(format!(
                "{} (expected ws:// or wss://)",
                self.url
            )));
        }

        if self.token.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "a credential token is required (token or token_env)".to_string(),
            ));
        }
        if self.reconnect_delay_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "reconnect_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "heartbeat_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.connection_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "connection_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.batching.max_batch_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "batching.max_batch_size must be greater than 0".to_string(),
            ));
        }
        if self.batching.timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "batching.timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        Self::new("ws://localhost:8787/ws", "test-token")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied_for_omitted_fields() {
        let config = ClientConfig::from_toml_str(
            r#"
url = "wss://realtime.example.com/ws"
token = "abc"
"#,
        )
        .unwrap();

        assert_eq!(config.reconnect_attempts, 5);
        assert_eq!(config.reconnect_delay_ms, 1000);
        assert_eq!(config.heartbeat_interval_ms, 30_000);
        assert_eq!(config.connection_timeout_ms, 10_000);
        assert!(config.channels.is_empty());
        assert!(config.session_id.is_none());
        assert!(!config.batching.enabled);
        assert_eq!(config.batching.timeout_ms, 100);
        assert_eq!(config.batching.max_batch_size, 10);
        assert!(!config.debug);
    }

    #[test]
    fn test_full_config_with_batching_table() {
        let config = ClientConfig::from_toml_str(
            r#"
url = "ws://localhost:9000/socket"
token = "abc"
session_id = "trip-42"
channels = ["itinerary", "chat"]
reconnect_attempts = 2
reconnect_delay_ms = 100
heartbeat_interval_ms = 5000
connection_timeout_ms = 2000
debug = true

[batching]
enabled = true
timeout_ms = 25
max_batch_size = 3
"#,
        )
        .unwrap();

        assert_eq!(config.session_id.as_deref(), Some("trip-42"));
        assert_eq!(config.channels, vec!["itinerary", "chat"]);
        assert_eq!(config.reconnect_delay(), Duration::from_millis(100));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(config.connection_timeout(), Duration::from_secs(2));
        assert!(config.batching.enabled);
        assert_eq!(config.batching.max_batch_size, 3);
        assert!(config.debug);
    }

    #[test]
    fn test_rejects_non_websocket_scheme() {
        let config = ClientConfig::new("https://example.com", "abc");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_rejects_unparseable_url() {
        let config = ClientConfig::new("not a url", "abc");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_rejects_missing_token() {
        let config = ClientConfig::new("ws://localhost/ws", "");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_zero_intervals() {
        let base = ClientConfig::test_config();
        assert!(base.clone().with_reconnect(3, 0).validate().is_err());
        assert!(base.clone().with_heartbeat_interval_ms(0).validate().is_err());
        assert!(base.clone().with_connection_timeout_ms(0).validate().is_err());

        let mut batching = BatchingConfig::default();
        batching.max_batch_size = 0;
        assert!(base.with_batching(batching).validate().is_err());
    }

    #[test]
    fn test_zero_reconnect_attempts_is_allowed() {
        let config = ClientConfig::test_config().with_reconnect(0, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_token_resolved_from_environment() {
        std::env::set_var("VOYAGER_LINK_CONFIG_TEST_TOKEN", "from-env");
        let config = ClientConfig::from_toml_str(
            r#"
url = "ws://localhost/ws"
token_env = "VOYAGER_LINK_CONFIG_TEST_TOKEN"
"#,
        )
        .unwrap();
        assert_eq!(config.token, "from-env");
    }

    #[test]
    fn test_missing_token_env_is_an_error() {
        let result = ClientConfig::from_toml_str(
            r#"
url = "ws://localhost/ws"
token_env = "VOYAGER_LINK_CONFIG_TEST_UNSET_VARIABLE"
"#,
        );
        assert!(matches!(result, Err(ConfigError::EnvVarNotFound(_))));
    }

    #[test]
    fn test_literal_token_wins_over_env() {
        let mut config = ClientConfig::test_config();
        config.token_env = Some("VOYAGER_LINK_CONFIG_TEST_UNSET_VARIABLE".to_string());
        assert!(config.resolve_token().is_ok());
        assert_eq!(config.token, "test-token");
    }
}
