//! Integration tests for configuration loading

use geofence_engine::domain::types::TransitionKind;
use geofence_engine::infra::Config;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[site]
id = "test-site"

[engine]
tick_interval_ms = 500
max_fix_accuracy_m = 75.0

[api]
port = 0

[mqtt]
host = "test-host"
port = 1884
fix_topic = "test/fixes"
username = "device"
password = "secret"

[broker]
enabled = false

[notify]
log = false
jsonl_file = "/tmp/notifications.jsonl"
webhook_url = "https://hooks.example.com/geofence"
webhook_timeout_ms = 500

[[regions]]
id = "home"
lat = 46.0
lon = 14.5
radiusMeters = 200.0
transitions = ["ENTER", "EXIT"]
expiresInMs = 3600000
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "test-site");
    assert_eq!(config.tick_interval_ms(), 500);
    assert_eq!(config.max_fix_accuracy_m(), 75.0);
    assert_eq!(config.api_port(), 0);
    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_fix_topic(), "test/fixes");
    assert_eq!(config.mqtt_username(), Some("device"));
    assert_eq!(config.mqtt_password(), Some("secret"));
    assert!(!config.broker_enabled());
    assert!(!config.notify_log());
    assert_eq!(config.notify_jsonl_file(), Some("/tmp/notifications.jsonl"));
    assert_eq!(config.notify_mqtt_topic(), None);
    assert_eq!(config.notify_webhook_url(), Some("https://hooks.example.com/geofence"));
    assert_eq!(config.notify_webhook_timeout_ms(), 500);

    let regions = config.regions();
    assert_eq!(regions.len(), 1);
    assert!(regions[0].transitions.contains(TransitionKind::Exit));
    assert_eq!(regions[0].expires_in_ms, Some(3_600_000));
    assert_eq!(config.config_file(), temp_file.path().display().to_string());
}

#[test]
fn test_invalid_toml_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[engine\ntick_interval_ms = ").unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
}

#[test]
fn test_load_from_path_fallback() {
    // Non-existent file should fall back to defaults
    let config = Config::load_from_path("/nonexistent/path/config.toml");
    assert_eq!(config.site_id(), "geofence");
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_dev_config_seeds_preset_regions() {
    let config = Config::from_file(concat!(env!("CARGO_MANIFEST_DIR"), "/config/dev.toml")).unwrap();
    let ids: Vec<&str> = config.regions().iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["home", "work", "fitness"]);
    assert_eq!(config.regions()[2].dwell_delay_ms, Some(1000));
}
