//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bedrock_relay::auth::DeviceKind;
use bedrock_relay::config::{ChainMode, EndpointConfig, LogFormat, LoggingConfig, RelayConfig};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = RelayConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_invalid_listen_address() {
    let mut config = RelayConfig::default();
    config.relay.listen_address = "invalid_address".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid listen address")));
}

#[test]
fn test_remote_address_accepts_hostname() {
    let mut config = RelayConfig::default();
    config.relay.remote_address = "play.example.net:19132".to_string();
    assert!(config.validate().is_empty());

    config.relay.remote_address = "play.example.net".to_string();
    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid remote address")));
}

#[test]
fn test_zero_protocol_version() {
    let mut config = RelayConfig::default();
    config.relay.protocol_version = 0;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Protocol version must be greater than 0")));
}

#[test]
fn test_delegated_mode_requires_refresh_token() {
    let mut config = RelayConfig::default();
    config.auth.mode = ChainMode::Delegated;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("refresh_token")));

    config.auth.refresh_token = Some("M.R3_BAY.token".to_string());
    assert!(config.validate().is_empty());
}

#[test]
fn test_empty_account_id() {
    let mut config = RelayConfig::default();
    config.auth.account_id = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Account id cannot be empty")));
}

#[test]
fn test_invalid_endpoint_url() {
    let mut config = RelayConfig::default();
    config.endpoints.chain_url = "not a url".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("chain_url")));
}

#[test]
fn test_short_request_timeout() {
    let mut config = RelayConfig::default();
    config.endpoints.request_timeout = Duration::from_millis(10);

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Request timeout too short")));
}

#[test]
fn test_with_base_rewrites_every_endpoint() {
    let endpoints = EndpointConfig::with_base("http://127.0.0.1:8080/");
    assert_eq!(endpoints.chain_url, "http://127.0.0.1:8080/authentication");
    assert_eq!(endpoints.xsts_authorize_url, "http://127.0.0.1:8080/xsts/authorize");
    assert_eq!(endpoints.sisu_authenticate_url, "http://127.0.0.1:8080/authenticate");
    assert_eq!(endpoints.client_version, "1.21.124");
    assert!(endpoints.validate().is_empty());
}

#[test]
fn test_empty_service_name() {
    let mut config = RelayConfig::default();
    config.logging.service_name = "  ".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Service name cannot be empty")));
}

#[test]
fn test_log_file_in_missing_directory() {
    let mut config = RelayConfig::default();
    config.logging.file = Some(PathBuf::from("/nonexistent/relay/relay.log"));

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Log file directory does not exist")));
}

#[test]
fn test_log_file_cannot_shadow_token_cache() {
    let dir = TempDir::new().unwrap();
    let config = RelayConfig::default_with_overrides(|c| {
        c.auth.token_cache_path = dir.path().join("identity.json");
        c.logging.file = Some(dir.path().join("identity.json"));
    });

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be the token cache")));
}

#[test]
fn test_invalid_log_directive() {
    let config = RelayConfig::default_with_overrides(|c| {
        c.logging = LoggingConfig {
            format: LogFormat::Json,
            directives: vec!["bedrock_relay::auth=trace".into(), "bedrock_relay=loud".into()],
            ..LoggingConfig::default()
        };
    });

    let errors = config.validate();
    assert_eq!(errors, vec!["Invalid log directive: bedrock_relay=loud".to_string()]);
}

#[test]
fn test_validate_strict_with_invalid_config() {
    let mut config = RelayConfig::default();
    config.relay.protocol_version = 0;
    config.auth.account_id = String::new();

    let err = config.validate_strict().expect_err("Should fail validation");
    let msg = err.to_string();
    assert!(msg.contains("Configuration validation failed"));
    assert!(msg.contains("Protocol version"));
    assert!(msg.contains("Account id"));
}

#[test]
fn test_toml_roundtrip_through_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("relay.toml");

    let config = RelayConfig::default_with_overrides(|c| {
        c.auth.mode = ChainMode::Delegated;
        c.auth.device = DeviceKind::Ios;
        c.auth.refresh_token = Some("M.token".to_string());
        c.logging.level = Level::DEBUG;
        c.logging.format = LogFormat::Json;
    });
    config.save_to_file(&path).unwrap();

    let loaded = RelayConfig::from_file(&path).unwrap();
    assert_eq!(loaded.auth.mode, ChainMode::Delegated);
    assert_eq!(loaded.auth.device, DeviceKind::Ios);
    assert_eq!(loaded.auth.refresh_token.as_deref(), Some("M.token"));
    assert_eq!(loaded.logging.level, Level::DEBUG);
    assert_eq!(loaded.logging.format, LogFormat::Json);
    assert_eq!(loaded.endpoints.request_timeout, Duration::from_secs(30));
}

#[test]
fn test_partial_toml_uses_defaults() {
    let config = RelayConfig::from_toml(
        r#"
        [auth]
        mode = "delegated"
        device = "nintendo"
        account_id = "bob"
        refresh_token = "0.Aabc"
        token_cache_path = "/tmp/tokens.json"
        "#,
    )
    .unwrap();

    assert_eq!(config.auth.device, DeviceKind::Nintendo);
    assert_eq!(config.relay.protocol_version, bedrock_relay::config::DEFAULT_PROTOCOL_VERSION);
    assert!(config.validate().is_empty());
}

#[test]
fn test_unknown_device_is_rejected() {
    let err = RelayConfig::from_toml(
        r#"
        [auth]
        mode = "self_signed"
        device = "toaster"
        account_id = "bob"
        token_cache_path = "t.json"
        "#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("Failed to parse TOML"));
}

#[test]
fn test_example_config_parses() {
    let example = RelayConfig::example_config();
    let parsed = RelayConfig::from_toml(&example).unwrap();
    assert!(parsed.validate().is_empty());
}
