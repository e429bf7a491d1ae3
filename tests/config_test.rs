//! Integration tests for configuration loading

use parkwatch::infra::Config;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[detection]
speed_threshold_kmh = 7.2
stop_duration_ms = 30000
distance_threshold_m = 75.0

[notify]
radius_m = 500.0
spot_expiration_secs = 120
poll_interval_ms = 5000
search_default = false

[ingest]
host = "test-host"
port = 1884
topic = "test/position"

[store]
base_url = "https://store.example/api"
spots_collection = "spots"
users_collection = "profiles"
api_key = "secret"
owner_id = "driver-42"

[egress]
file = "out/test.jsonl"

[broker]
enabled = false

[metrics]
interval_secs = 15
prometheus_port = 9091
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.speed_threshold_kmh(), 7.2);
    assert!((config.speed_threshold_mps() - 2.0).abs() < 1e-9);
    assert_eq!(config.stop_duration(), Duration::from_secs(30));
    assert_eq!(config.distance_threshold_m(), 75.0);
    assert_eq!(config.notification_radius_m(), 500.0);
    assert_eq!(config.spot_expiration(), Duration::from_secs(120));
    assert!(!config.search_default());
    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.position_topic(), "test/position");
    assert_eq!(config.store_base_url(), Some("https://store.example/api"));
    assert_eq!(config.spots_collection(), "spots");
    assert_eq!(config.users_collection(), "profiles");
    assert_eq!(config.store_api_key(), Some("secret"));
    assert_eq!(config.owner_id(), "driver-42");
    assert_eq!(config.egress_file(), "out/test.jsonl");
    assert!(!config.broker_enabled());
    assert_eq!(config.prometheus_port(), 9091);
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.speed_threshold_kmh(), 5.0);
    assert_eq!(config.stop_duration(), Duration::from_secs(60));
    assert!(config.store_base_url().is_none());
}

#[test]
fn test_invalid_toml_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[detection\nspeed").unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());
}
