//! Configuration loading and validation tests
//!
//! Tests focus on observable outcomes of loading and validating a
//! configuration, not on TOML parsing details.

use std::io::Write;
use tempfile::NamedTempFile;
use voyager_link::config::{ClientConfig, ConfigError};

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
url = "wss://realtime.voyager.example/ws"
token = "abc123"
session_id = "trip-42"
channels = ["itinerary", "chat"]
reconnect_attempts = 3
reconnect_delay_ms = 250
heartbeat_interval_ms = 15000
connection_timeout_ms = 5000
debug = true

[batching]
enabled = true
timeout_ms = 20
max_batch_size = 5
"#,
    );

    let config = ClientConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.url, "wss://realtime.voyager.example/ws");
    assert_eq!(config.token, "abc123");
    assert_eq!(config.session_id.as_deref(), Some("trip-42"));
    assert_eq!(config.channels, vec!["itinerary", "chat"]);
    assert_eq!(config.reconnect_attempts, 3);
    assert_eq!(config.reconnect_delay_ms, 250);
    assert_eq!(config.heartbeat_interval_ms, 15_000);
    assert_eq!(config.connection_timeout_ms, 5_000);
    assert!(config.debug);
    assert!(config.batching.enabled);
    assert_eq!(config.batching.timeout_ms, 20);
    assert_eq!(config.batching.max_batch_size, 5);
}

#[test]
fn test_minimal_config_gets_defaults() {
    let temp_file = write_config(
        r#"
url = "ws://localhost:8787/ws"
token = "t"
"#,
    );

    let config = ClientConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.reconnect_attempts, 5);
    assert_eq!(config.reconnect_delay_ms, 1_000);
    assert_eq!(config.heartbeat_interval_ms, 30_000);
    assert_eq!(config.connection_timeout_ms, 10_000);
    assert!(!config.batching.enabled);
    assert_eq!(config.batching.timeout_ms, 100);
    assert_eq!(config.batching.max_batch_size, 10);
    assert!(!config.debug);
    assert!(config.channels.is_empty());
}

#[test]
fn test_token_resolved_from_environment() {
    std::env::set_var("VOYAGER_LINK_TEST_TOKEN_RESOLVE", "from-env");
    let temp_file = write_config(
        r#"
url = "wss://realtime.voyager.example/ws"
token_env = "VOYAGER_LINK_TEST_TOKEN_RESOLVE"
"#,
    );

    let config = ClientConfig::load_from_file(temp_file.path()).unwrap();
    assert_eq!(config.token, "from-env");
}

#[test]
fn test_missing_token_env_var_is_reported() {
    let temp_file = write_config(
        r#"
url = "wss://realtime.voyager.example/ws"
token_env = "VOYAGER_LINK_TEST_TOKEN_DOES_NOT_EXIST"
"#,
    );

    let result = ClientConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::EnvVarNotFound(name)) if name == "VOYAGER_LINK_TEST_TOKEN_DOES_NOT_EXIST"));
}

#[test]
fn test_missing_file_is_reported() {
    let result = ClientConfig::load_from_file(std::path::Path::new("/nonexistent/voyager.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_reported() {
    let temp_file = write_config("url = [unterminated");
    let result = ClientConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_non_websocket_url_is_rejected() {
    let temp_file = write_config(
        r#"
url = "https://realtime.voyager.example/ws"
token = "t"
"#,
    );
    let result = ClientConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidUrl(_))));
}

#[test]
fn test_zero_intervals_are_rejected() {
    let base = ClientConfig::new("ws://localhost/ws", "t");

    assert!(base.clone().with_heartbeat_interval_ms(0).validate().is_err());
    assert!(base.clone().with_connection_timeout_ms(0).validate().is_err());
    assert!(base.clone().with_reconnect(3, 0).validate().is_err());
    assert!(base.clone().with_reconnect(0, 10).validate().is_ok());
}

#[test]
fn test_config_round_trips_through_toml() {
    let config = ClientConfig::new("wss://realtime.voyager.example/ws", "t")
        .with_session_id("s1")
        .with_channels(["a", "b"]);

    let rendered = toml::to_string_pretty(&config).unwrap();
    let parsed = ClientConfig::from_toml_str(&rendered).unwrap();
    assert_eq!(parsed, config);
}
