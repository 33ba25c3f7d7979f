//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable (read by clap)
//! 3. Default: config/dev.toml

use crate::domain::types::RegionSpec;
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Site identifier stamped on every notification
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "geofence".to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Dwell scheduler period
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_queue_size")]
    pub command_queue_size: usize,
    #[serde(default = "default_queue_size")]
    pub notify_queue_size: usize,
    /// Reject fixes with worse accuracy (0 disables the gate)
    #[serde(default)]
    pub max_fix_accuracy_m: f64,
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,
}

fn default_tick_interval_ms() -> u64 {
    250
}

fn default_queue_size() -> usize {
    1024
}

fn default_metrics_interval() -> u64 {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            command_queue_size: default_queue_size(),
            notify_queue_size: default_queue_size(),
            max_fix_accuracy_m: 0.0,
            metrics_interval_secs: default_metrics_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Region API + Prometheus port (0 to disable)
    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_port() -> u16 {
    8080
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: default_api_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Topic carrying position fixes
    #[serde(default = "default_fix_topic")]
    pub fix_topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_fix_topic() -> String {
    "geofence/fixes".to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            fix_topic: default_fix_topic(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_broker_bind_address(),
            port: default_mqtt_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixListenerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_fix_listener_port")]
    pub port: u16,
}

fn default_fix_listener_port() -> u16 {
    7878
}

impl Default for FixListenerConfig {
    fn default() -> Self {
        Self { enabled: false, port: default_fix_listener_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GpsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_gps_device")]
    pub device: String,
    #[serde(default = "default_gps_baud")]
    pub baud: u32,
    /// User equivalent range error; accuracy = HDOP * uere_m
    #[serde(default = "default_uere_m")]
    pub uere_m: f64,
}

fn default_gps_device() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_gps_baud() -> u32 {
    9600
}

fn default_uere_m() -> f64 {
    5.0
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device: default_gps_device(),
            baud: default_gps_baud(),
            uere_m: default_uere_m(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Log every notification at info level
    #[serde(default = "default_true")]
    pub log: bool,
    /// JSONL file for notifications
    #[serde(default)]
    pub jsonl_file: Option<String>,
    /// MQTT topic for notifications (QoS 1)
    #[serde(default)]
    pub mqtt_topic: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_webhook_timeout_ms")]
    pub webhook_timeout_ms: u64,
}

fn default_webhook_timeout_ms() -> u64 {
    2000
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            log: true,
            jsonl_file: None,
            mqtt_topic: None,
            webhook_url: None,
            webhook_timeout_ms: default_webhook_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub fix_listener: FixListenerConfig,
    #[serde(default)]
    pub gps: GpsConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    /// Regions registered at startup
    #[serde(default)]
    pub regions: Vec<RegionSpec>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    tick_interval_ms: u64,
    command_queue_size: usize,
    notify_queue_size: usize,
    max_fix_accuracy_m: f64,
    metrics_interval_secs: u64,
    api_port: u16,
    mqtt_enabled: bool,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_fix_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    broker_enabled: bool,
    broker_bind_address: String,
    broker_port: u16,
    fix_listener_enabled: bool,
    fix_listener_port: u16,
    gps_enabled: bool,
    gps_device: String,
    gps_baud: u32,
    gps_uere_m: f64,
    notify_log: bool,
    notify_jsonl_file: Option<String>,
    notify_mqtt_topic: Option<String>,
    notify_webhook_url: Option<String>,
    notify_webhook_timeout_ms: u64,
    regions: Vec<RegionSpec>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            site_id: toml_config.site.id,
            tick_interval_ms: toml_config.engine.tick_interval_ms,
            command_queue_size: toml_config.engine.command_queue_size,
            notify_queue_size: toml_config.engine.notify_queue_size,
            max_fix_accuracy_m: toml_config.engine.max_fix_accuracy_m,
            metrics_interval_secs: toml_config.engine.metrics_interval_secs,
            api_port: toml_config.api.port,
            mqtt_enabled: toml_config.mqtt.enabled,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_fix_topic: toml_config.mqtt.fix_topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            broker_enabled: toml_config.broker.enabled,
            broker_bind_address: toml_config.broker.bind_address,
            broker_port: toml_config.broker.port,
            fix_listener_enabled: toml_config.fix_listener.enabled,
            fix_listener_port: toml_config.fix_listener.port,
            gps_enabled: toml_config.gps.enabled,
            gps_device: toml_config.gps.device,
            gps_baud: toml_config.gps.baud,
            gps_uere_m: toml_config.gps.uere_m,
            notify_log: toml_config.notify.log,
            notify_jsonl_file: toml_config.notify.jsonl_file,
            notify_mqtt_topic: toml_config.notify.mqtt_topic,
            notify_webhook_url: toml_config.notify.webhook_url,
            notify_webhook_timeout_ms: toml_config.notify.webhook_timeout_ms,
            regions: toml_config.regions,
            config_file,
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms
    }

    pub fn command_queue_size(&self) -> usize {
        self.command_queue_size
    }

    pub fn notify_queue_size(&self) -> usize {
        self.notify_queue_size
    }

    pub fn max_fix_accuracy_m(&self) -> f64 {
        self.max_fix_accuracy_m
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn api_port(&self) -> u16 {
        self.api_port
    }

    pub fn mqtt_enabled(&self) -> bool {
        self.mqtt_enabled
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_fix_topic(&self) -> &str {
        &self.mqtt_fix_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
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

    pub fn fix_listener_enabled(&self) -> bool {
        self.fix_listener_enabled
    }

    pub fn fix_listener_port(&self) -> u16 {
        self.fix_listener_port
    }

    pub fn gps_enabled(&self) -> bool {
        self.gps_enabled
    }

    pub fn gps_device(&self) -> &str {
        &self.gps_device
    }

    pub fn gps_baud(&self) -> u32 {
        self.gps_baud
    }

    pub fn gps_uere_m(&self) -> f64 {
        self.gps_uere_m
    }

    pub fn notify_log(&self) -> bool {
        self.notify_log
    }

    pub fn notify_jsonl_file(&self) -> Option<&str> {
        self.notify_jsonl_file.as_deref()
    }

    pub fn notify_mqtt_topic(&self) -> Option<&str> {
        self.notify_mqtt_topic.as_deref()
    }

    pub fn notify_webhook_url(&self) -> Option<&str> {
        self.notify_webhook_url.as_deref()
    }

    pub fn notify_webhook_timeout_ms(&self) -> u64 {
        self.notify_webhook_timeout_ms
    }

    /// Region seeds from `[[regions]]`
    pub fn regions(&self) -> &[RegionSpec] {
        &self.regions
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the accuracy gate
    #[cfg(test)]
    pub fn with_max_fix_accuracy_m(mut self, meters: f64) -> Self {
        self.max_fix_accuracy_m = meters;
        self
    }
}
