//! Configuration loading from TOML files
//!
//! Config file is selected via the `--config` command line argument; a
//! missing or unparsable file falls back to defaults with a warning.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Speed below which the settle timer may arm (km/h)
    #[serde(default = "default_speed_threshold_kmh")]
    pub speed_threshold_kmh: f64,
    /// Sustained-stop window before a park is confirmed (ms)
    #[serde(default = "default_stop_duration_ms")]
    pub stop_duration_ms: u64,
    /// Distance from the candidate that confirms departure (m)
    #[serde(default = "default_distance_threshold_m")]
    pub distance_threshold_m: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            speed_threshold_kmh: default_speed_threshold_kmh(),
            stop_duration_ms: default_stop_duration_ms(),
            distance_threshold_m: default_distance_threshold_m(),
        }
    }
}

fn default_speed_threshold_kmh() -> f64 {
    5.0
}

fn default_stop_duration_ms() -> u64 {
    60_000
}

fn default_distance_threshold_m() -> f64 {
    50.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Maximum distance at which a free spot raises a notification (m)
    #[serde(default = "default_notification_radius_m")]
    pub radius_m: f64,
    /// Spots older than this never reach the map or the notifier (s)
    #[serde(default = "default_spot_expiration_secs")]
    pub spot_expiration_secs: u64,
    /// Live-spot poll interval (ms)
    #[serde(default = "default_spot_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Search mode when no profile store provides the flag
    #[serde(default = "default_search_default")]
    pub search_default: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            radius_m: default_notification_radius_m(),
            spot_expiration_secs: default_spot_expiration_secs(),
            poll_interval_ms: default_spot_poll_interval_ms(),
            search_default: default_search_default(),
        }
    }
}

fn default_notification_radius_m() -> f64 {
    1000.0
}

fn default_spot_expiration_secs() -> u64 {
    300
}

fn default_spot_poll_interval_ms() -> u64 {
    10_000
}

fn default_search_default() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_position_topic")]
    pub topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            topic: default_position_topic(),
            username: None,
            password: None,
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_position_topic() -> String {
    "parkwatch/position".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Document store base URL; absent = publishing and polling disabled
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_spots_collection")]
    pub spots_collection: String,
    #[serde(default = "default_users_collection")]
    pub users_collection: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Owner id stamped on published spots and profile updates
    #[serde(default = "default_owner_id")]
    pub owner_id: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            spots_collection: default_spots_collection(),
            users_collection: default_users_collection(),
            api_key: None,
            owner_id: default_owner_id(),
        }
    }
}

fn default_spots_collection() -> String {
    "parkings".to_string()
}

fn default_users_collection() -> String {
    "users".to_string()
}

fn default_owner_id() -> String {
    "anonymous".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EgressConfig {
    /// File path for spot/notification egress (JSONL format)
    #[serde(default = "default_egress_file")]
    pub file: String,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self { file: default_egress_file() }
    }
}

fn default_egress_file() -> String {
    "spots.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_enabled")]
    pub enabled: bool,
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: default_broker_enabled(),
            bind_address: default_broker_bind_address(),
            port: default_broker_port(),
        }
    }
}

fn default_broker_enabled() -> bool {
    true
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_metrics_interval_secs(),
            prometheus_port: default_prometheus_port(),
        }
    }
}

fn default_metrics_interval_secs() -> u64 {
    10
}

fn default_prometheus_port() -> u16 {
    9464
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    speed_threshold_kmh: f64,
    stop_duration_ms: u64,
    distance_threshold_m: f64,
    notification_radius_m: f64,
    spot_expiration_secs: u64,
    spot_poll_interval_ms: u64,
    search_default: bool,
    mqtt_host: String,
    mqtt_port: u16,
    position_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    store_base_url: Option<String>,
    spots_collection: String,
    users_collection: String,
    store_api_key: Option<String>,
    owner_id: String,
    egress_file: String,
    broker_enabled: bool,
    broker_bind_address: String,
    broker_port: u16,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        Self {
            speed_threshold_kmh: toml_config.detection.speed_threshold_kmh,
            stop_duration_ms: toml_config.detection.stop_duration_ms,
            distance_threshold_m: toml_config.detection.distance_threshold_m,
            notification_radius_m: toml_config.notify.radius_m,
            spot_expiration_secs: toml_config.notify.spot_expiration_secs,
            spot_poll_interval_ms: toml_config.notify.poll_interval_ms,
            search_default: toml_config.notify.search_default,
            mqtt_host: toml_config.ingest.host,
            mqtt_port: toml_config.ingest.port,
            position_topic: toml_config.ingest.topic,
            mqtt_username: toml_config.ingest.username,
            mqtt_password: toml_config.ingest.password,
            store_base_url: toml_config.store.base_url,
            spots_collection: toml_config.store.spots_collection,
            users_collection: toml_config.store.users_collection,
            store_api_key: toml_config.store.api_key,
            owner_id: toml_config.store.owner_id,
            egress_file: toml_config.egress.file,
            broker_enabled: toml_config.broker.enabled,
            broker_bind_address: toml_config.broker.bind_address,
            broker_port: toml_config.broker.port,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file: config_file.to_string(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {e:#}. Using defaults.");
                Self::default()
            }
        }
    }

    // Detection thresholds

    pub fn speed_threshold_kmh(&self) -> f64 {
        self.speed_threshold_kmh
    }

    /// Speed threshold in the unit the position stream reports
    pub fn speed_threshold_mps(&self) -> f64 {
        self.speed_threshold_kmh / 3.6
    }

    pub fn stop_duration(&self) -> Duration {
        Duration::from_millis(self.stop_duration_ms)
    }

    pub fn distance_threshold_m(&self) -> f64 {
        self.distance_threshold_m
    }

    // Notification

    pub fn notification_radius_m(&self) -> f64 {
        self.notification_radius_m
    }

    pub fn spot_expiration(&self) -> Duration {
        Duration::from_secs(self.spot_expiration_secs)
    }

    pub fn spot_poll_interval(&self) -> Duration {
        Duration::from_millis(self.spot_poll_interval_ms)
    }

    pub fn search_default(&self) -> bool {
        self.search_default
    }

    // Ingest

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn position_topic(&self) -> &str {
        &self.position_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    // Store

    pub fn store_base_url(&self) -> Option<&str> {
        self.store_base_url.as_deref()
    }

    pub fn spots_collection(&self) -> &str {
        &self.spots_collection
    }

    pub fn users_collection(&self) -> &str {
        &self.users_collection
    }

    pub fn store_api_key(&self) -> Option<&str> {
        self.store_api_key.as_deref()
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    // Egress / broker / metrics

    pub fn egress_file(&self) -> &str {
        &self.egress_file
    }

    pub fn broker_enabled(&self) -> bool {
        self.broker_enabled
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker_bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to shorten the settle window
    #[cfg(test)]
    pub fn with_stop_duration_ms(mut self, ms: u64) -> Self {
        self.stop_duration_ms = ms;
        self
    }

    /// Builder method for tests to force search mode
    #[cfg(test)]
    pub fn with_search_default(mut self, searching: bool) -> Self {
        self.search_default = searching;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.speed_threshold_kmh(), 5.0);
        assert_eq!(config.stop_duration(), Duration::from_millis(60_000));
        assert_eq!(config.distance_threshold_m(), 50.0);
        assert_eq!(config.notification_radius_m(), 1000.0);
        assert_eq!(config.spot_expiration(), Duration::from_secs(300));
        assert_eq!(config.position_topic(), "parkwatch/position");
        assert_eq!(config.spots_collection(), "parkings");
        assert!(config.store_base_url().is_none());
        assert!(config.broker_enabled());
    }

    #[test]
    fn test_speed_threshold_conversion() {
        let config = Config::default();
        // 5 km/h is roughly 1.39 m/s
        assert!((config.speed_threshold_mps() - 1.3889).abs() < 0.001);
    }

    #[test]
    fn test_egress_file_default() {
        let egress = EgressConfig::default();
        assert_eq!(egress.file, "spots.jsonl");
        assert!(!egress.file.is_empty());

        let config = Config::default();
        assert_eq!(config.egress_file(), "spots.jsonl");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [detection]
            speed_threshold_kmh = 10.0

            [store]
            base_url = "https://store.example/api"
            "#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline");

        assert_eq!(config.speed_threshold_kmh(), 10.0);
        assert_eq!(config.stop_duration(), Duration::from_millis(60_000));
        assert_eq!(config.store_base_url(), Some("https://store.example/api"));
        assert_eq!(config.owner_id(), "anonymous");
    }
}
