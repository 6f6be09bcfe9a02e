//! Gateway configuration, loaded from YAML.
//!
//! ```yaml
//! mqtt:
//!   host: localhost
//!   port: 1883
//!   client_id: spbridge-gw1
//!   sparkplug:
//!     group_id: plant
//!     edge_node: gw1
//! storage:
//!   path: ./spbridge.redb
//! modbus:
//!   - host: 10.0.0.12
//!     device_name: boiler
//!     tags:
//!       - name: temperature
//!         register: 1
//!         type: holding
//!         interval_ms: 1000
//!         delta: 0.5
//! ```

use std::{collections::HashSet, fmt::Write, fs, path::PathBuf, time::Duration};

use serde::Deserialize;
use spbridge_client::RetryConfig;
use spbridge_client_rumqtt::MqttOptions;
use spbridge_node::BridgeConfig;
use spbridge_types::utils::validate_name;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unable to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unable to parse configuration: {0}")]
    Parse(#[from] serde_yml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn invalid<T>(message: impl Into<String>) -> Result<T, ConfigError> {
    Err(ConfigError::Invalid(message.into()))
}

fn default_true() -> bool {
    true
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_modbus_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_decimals() -> u32 {
    2
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SparkplugConfig {
    pub group_id: String,
    pub edge_node: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub sparkplug: SparkplugConfig,
}

/// Bridge timings, all in milliseconds.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeSettings {
    pub publish_tick_ms: u64,
    pub sweep_interval_ms: u64,
    pub inactivity_threshold_ms: u64,
    pub active_window_ms: u64,
    pub status_interval_ms: u64,
    pub node_rebirth_cooldown_ms: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        let defaults = BridgeConfig::default();
        Self {
            publish_tick_ms: defaults.publish_tick.as_millis() as u64,
            sweep_interval_ms: defaults.sweep_interval.as_millis() as u64,
            inactivity_threshold_ms: defaults.inactivity_threshold.as_millis() as u64,
            active_window_ms: defaults.active_window.as_millis() as u64,
            status_interval_ms: defaults.status_interval.as_millis() as u64,
            node_rebirth_cooldown_ms: defaults.node_rebirth_cooldown.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: Option<u32>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            max_attempts: None,
        }
    }
}

impl RetrySettings {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_attempts: self.max_attempts,
        }
    }
}

/// Where the offline log lives. `memory: true` takes precedence over `path`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
    pub memory: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./spbridge-offline.redb"),
            memory: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RegisterKind {
    Holding,
    Input,
    Coil,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModbusTag {
    pub name: String,
    /// 1-based register number.
    pub register: u16,
    #[serde(rename = "type")]
    pub kind: RegisterKind,
    pub interval_ms: u64,
    pub delta: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModbusConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub device_name: Option<String>,
    pub host: String,
    #[serde(default = "default_modbus_port")]
    pub port: u16,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    pub tags: Vec<ModbusTag>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SimulatedTag {
    pub name: String,
    pub min: f64,
    pub max: f64,
    #[serde(default = "default_decimals")]
    pub decimals: u32,
    pub interval_ms: u64,
    pub delta: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SimulatorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub device_name: Option<String>,
    pub tags: Vec<SimulatedTag>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Config {
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub bridge: BridgeSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub modbus: Vec<ModbusConfig>,
    #[serde(default)]
    pub simulator: Vec<SimulatorConfig>,
}

fn validate_tag_names<'a>(
    adapter: &str,
    names: impl Iterator<Item = &'a str>,
) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    let mut count = 0;
    for name in names {
        count += 1;
        if name.is_empty() {
            return invalid(format!("{adapter}: tag names must not be empty"));
        }
        if !seen.insert(name) {
            return invalid(format!("{adapter}: duplicate tag name {name}"));
        }
    }
    if count == 0 {
        return invalid(format!("{adapter}: at least one tag is required"));
    }
    Ok(())
}

fn validate_device_name(adapter: &str, name: &Option<String>) -> Result<(), ConfigError> {
    match name {
        Some(name) => validate_name(name).or_else(|e| invalid(format!("{adapter}: {e}"))),
        None => Ok(()),
    }
}

impl Config {
    pub fn from_file<P: Into<PathBuf>>(path: P) -> Result<Self, ConfigError> {
        let path = path.into();
        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate a configuration document.
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mqtt = &self.mqtt;
        if mqtt.host.is_empty() {
            return invalid("mqtt.host must not be empty");
        }
        if mqtt.port == 0 {
            return invalid("mqtt.port must not be 0");
        }
        if mqtt.client_id.is_empty() {
            return invalid("mqtt.client_id must not be empty");
        }
        if mqtt.username.is_some() != mqtt.password.is_some() {
            return invalid("mqtt.username and mqtt.password must be set together");
        }
        validate_name(&mqtt.sparkplug.group_id)
            .or_else(|e| invalid(format!("mqtt.sparkplug.group_id: {e}")))?;
        validate_name(&mqtt.sparkplug.edge_node)
            .or_else(|e| invalid(format!("mqtt.sparkplug.edge_node: {e}")))?;

        if self.retry.initial_delay_ms == 0 {
            return invalid("retry.initial_delay_ms must be greater than 0");
        }
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            return invalid("retry.max_delay_ms must not be less than retry.initial_delay_ms");
        }

        for (i, modbus) in self.modbus.iter().enumerate() {
            let adapter = format!("modbus[{i}]");
            if !modbus.enabled {
                continue;
            }
            validate_device_name(&adapter, &modbus.device_name)?;
            if modbus.port == 0 {
                return invalid(format!("{adapter}: port must not be 0"));
            }
            validate_tag_names(&adapter, modbus.tags.iter().map(|t| t.name.as_str()))?;
            for tag in &modbus.tags {
                if tag.register == 0 {
                    return invalid(format!(
                        "{adapter}: tag {} register numbers start at 1",
                        tag.name
                    ));
                }
                if tag.interval_ms == 0 {
                    return invalid(format!("{adapter}: tag {} interval must be > 0", tag.name));
                }
            }
        }

        for (i, simulator) in self.simulator.iter().enumerate() {
            let adapter = format!("simulator[{i}]");
            if !simulator.enabled {
                continue;
            }
            validate_device_name(&adapter, &simulator.device_name)?;
            validate_tag_names(&adapter, simulator.tags.iter().map(|t| t.name.as_str()))?;
            for tag in &simulator.tags {
                if tag.min >= tag.max {
                    return invalid(format!("{adapter}: tag {} requires min < max", tag.name));
                }
                if tag.interval_ms == 0 {
                    return invalid(format!("{adapter}: tag {} interval must be > 0", tag.name));
                }
            }
        }
        Ok(())
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        let b = &self.bridge;
        BridgeConfig {
            publish_tick: Duration::from_millis(b.publish_tick_ms),
            sweep_interval: Duration::from_millis(b.sweep_interval_ms),
            inactivity_threshold: Duration::from_millis(b.inactivity_threshold_ms),
            active_window: Duration::from_millis(b.active_window_ms),
            status_interval: Duration::from_millis(b.status_interval_ms),
            node_rebirth_cooldown: Duration::from_millis(b.node_rebirth_cooldown_ms),
            retry: self.retry.retry_config(),
        }
    }

    pub fn mqtt_options(&self) -> MqttOptions {
        let mqtt = &self.mqtt;
        let options = MqttOptions::new(mqtt.client_id.clone(), mqtt.host.clone(), mqtt.port);
        match (&mqtt.username, &mqtt.password) {
            (Some(username), Some(password)) => options.with_credentials(username, password),
            _ => options,
        }
    }

    /// Human readable overview of the broker, edge node and adapters.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let mqtt = &self.mqtt;
        _ = writeln!(out, "MQTT broker: {}:{}", mqtt.host, mqtt.port);
        _ = writeln!(out, "Sparkplug group: {}", mqtt.sparkplug.group_id);
        _ = writeln!(out, "Sparkplug edge node: {}", mqtt.sparkplug.edge_node);
        if self.storage.memory {
            _ = writeln!(out, "Offline storage: memory");
        } else {
            _ = writeln!(out, "Offline storage: {}", self.storage.path.display());
        }

        let status = |enabled: bool| if enabled { "ENABLED" } else { "DISABLED" };
        _ = writeln!(out, "Modbus configurations: {}", self.modbus.len());
        for (i, modbus) in self.modbus.iter().enumerate() {
            _ = writeln!(
                out,
                "  {}. {} ({}:{}) - {}, tags: {}",
                i + 1,
                modbus.device_name.as_deref().unwrap_or("NO NAME"),
                modbus.host,
                modbus.port,
                status(modbus.enabled),
                modbus.tags.len()
            );
        }
        _ = writeln!(out, "Simulator configurations: {}", self.simulator.len());
        for (i, simulator) in self.simulator.iter().enumerate() {
            _ = writeln!(
                out,
                "  {}. {} - {}, tags: {}",
                i + 1,
                simulator.device_name.as_deref().unwrap_or("NO NAME"),
                status(simulator.enabled),
                simulator.tags.len()
            );
        }

        let modbus_enabled = self.modbus.iter().filter(|m| m.enabled).count();
        let simulator_enabled = self.simulator.iter().filter(|s| s.enabled).count();
        _ = writeln!(out, "Active services:");
        _ = writeln!(out, "- Modbus: {modbus_enabled}/{}", self.modbus.len());
        _ = writeln!(out, "- Simulator: {simulator_enabled}/{}", self.simulator.len());
        _ = write!(out, "- Total: {} devices", modbus_enabled + simulator_enabled);
        out
    }
}
