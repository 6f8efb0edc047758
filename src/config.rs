// src/config.rs - Gateway identity and transport configuration
//
// Loaded once at startup from an optional YAML file, then overridden by the
// environment (`.env` supported). Distinct from the live `Settings`, which
// arrive over the bus while running.

use crate::error::{GatewayError, Result};
use crate::mode::Mode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound for the probe and heartbeat intervals (one week).
pub const MAX_INTERVAL_SECS: u64 = 7 * 24 * 3600;

// ============================================================================
// MAIN CONFIGURATION
// ============================================================================

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Unit identifier (the panel's serial number) used to scope topics
    #[serde(default)]
    pub unit_id: String,

    /// Panel wiring variant
    #[serde(default)]
    pub mode: Mode,

    /// Publish an ack for every accepted telemetry reading
    #[serde(default = "default_true")]
    pub ack_telemetry: bool,

    /// MQTT broker connection
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Serial link to the panel
    #[serde(default)]
    pub serial: SerialConfig,

    /// Internet reachability probe
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Liveness announcements
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Backend used to fetch settings at startup
    #[serde(default)]
    pub backend: BackendConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            unit_id: String::new(),
            mode: Mode::default(),
            ack_telemetry: default_true(),
            mqtt: MqttConfig::default(),
            serial: SerialConfig::default(),
            probe: ProbeConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

// ============================================================================
// SECTION CONFIGURATIONS
// ============================================================================

/// MQTT broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub broker_host: String,

    #[serde(default = "default_mqtt_port")]
    pub broker_port: u16,

    /// Client id; a random one is generated when absent
    #[serde(default = "default_mqtt_client_id")]
    pub client_id: String,

    #[serde(default = "default_mqtt_keepalive")]
    pub keep_alive_secs: u64,

    #[serde(default = "default_qos")]
    pub qos: u8,

    /// Back-off after a failed poll before the client reconnects
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: default_mqtt_host(),
            broker_port: default_mqtt_port(),
            client_id: default_mqtt_client_id(),
            keep_alive_secs: default_mqtt_keepalive(),
            qos: default_qos(),
            reconnect_delay_ms: default_reconnect_delay(),
        }
    }
}

/// Serial panel link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    #[serde(default = "default_serial_path")]
    pub path: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Delay before reopening the port after a failure
    #[serde(default = "default_reopen_delay")]
    pub reopen_delay_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            path: default_serial_path(),
            baud_rate: default_baud_rate(),
            reopen_delay_ms: default_reopen_delay(),
        }
    }
}

/// Connectivity probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Known-good endpoint; reachable (HTTP 200) means online
    #[serde(default = "default_probe_url")]
    pub url: String,

    #[serde(default = "default_probe_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            url: default_probe_url(),
            interval_secs: default_probe_interval(),
            timeout_secs: default_probe_timeout(),
        }
    }
}

impl ProbeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Heartbeat configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_interval(),
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Backend configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL; settings are fetched from `<url>/public-node/setting/<unit>`
    #[serde(default)]
    pub url: Option<String>,
}

// ============================================================================
// LOADING
// ============================================================================

impl GatewayConfig {
    /// Parse a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read and parse a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_yaml(&contents)
    }

    /// Build the effective configuration: optional file, then process
    /// environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment-style overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SERIAL_NUMBER") {
            self.unit_id = v;
        }
        if let Some(v) = lookup("TMA_MODE") {
            self.mode = v.parse()?;
        }
        if let Some(v) = lookup("ACK_TELEMETRY") {
            self.ack_telemetry = parse_flag("ACK_TELEMETRY", &v)?;
        }
        if let Some(v) = lookup("MQTT_BROKER") {
            self.mqtt.broker_host = v;
        }
        if let Some(v) = lookup("MQTT_PORT") {
            self.mqtt.broker_port = parse_number("MQTT_PORT", &v)?;
        }
        if let Some(v) = lookup("MQTT_CLIENT_ID") {
            self.mqtt.client_id = v;
        }
        if let Some(v) = lookup("SERIAL_PORT") {
            self.serial.path = v;
        }
        if let Some(v) = lookup("BAUD_RATE") {
            self.serial.baud_rate = parse_number("BAUD_RATE", &v)?;
        }
        if let Some(v) = lookup("BACKEND_URL") {
            self.backend.url = Some(v).filter(|url| !url.trim().is_empty());
        }
        if let Some(v) = lookup("PROBE_URL") {
            self.probe.url = v;
        }
        if let Some(v) = lookup("PROBE_INTERVAL_SECS") {
            self.probe.interval_secs = parse_number("PROBE_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("HEARTBEAT_INTERVAL_SECS") {
            self.heartbeat.interval_secs = parse_number("HEARTBEAT_INTERVAL_SECS", &v)?;
        }
        Ok(())
    }

    /// Reject configurations the gateway cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.unit_id.trim().is_empty() {
            return Err(GatewayError::Config(
                "Unit identifier is required (SERIAL_NUMBER or unit_id)".to_string(),
            ));
        }
        if self.serial.path.trim().is_empty() {
            return Err(GatewayError::Config("Serial device path is empty".to_string()));
        }
        if self.serial.baud_rate == 0 {
            return Err(GatewayError::Config("Baud rate must be greater than zero".to_string()));
        }
        if self.probe.interval_secs == 0 {
            return Err(GatewayError::Config(
                "Probe interval must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat.interval_secs == 0 {
            return Err(GatewayError::Config(
                "Heartbeat interval must be greater than zero".to_string(),
            ));
        }
        if self.probe.interval_secs > MAX_INTERVAL_SECS
            || self.heartbeat.interval_secs > MAX_INTERVAL_SECS
        {
            return Err(GatewayError::Config(format!(
                "Probe and heartbeat intervals must not exceed {} seconds",
                MAX_INTERVAL_SECS
            )));
        }
        if self.mqtt.qos > 2 {
            return Err(GatewayError::Config(format!(
                "Invalid MQTT QoS {}, expected 0, 1 or 2",
                self.mqtt.qos
            )));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        GatewayError::Config(format!("{} must be a number, got '{}'", key, value))
    })
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(GatewayError::Config(format!(
            "{} must be a boolean, got '{}'",
            key, value
        ))),
    }
}

// ============================================================================
// DEFAULT VALUE FUNCTIONS
// ============================================================================

fn default_true() -> bool { true }
fn default_mqtt_host() -> String { "localhost".to_string() }
fn default_mqtt_port() -> u16 { 1883 }
fn default_mqtt_client_id() -> String { format!("ews-gateway-{}", uuid::Uuid::new_v4().simple()) }
fn default_mqtt_keepalive() -> u64 { 30 }
fn default_qos() -> u8 { 1 }
fn default_reconnect_delay() -> u64 { 1000 }
fn default_serial_path() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 9600 }
fn default_reopen_delay() -> u64 { 5000 }
fn default_probe_url() -> String { "http://www.google.com/images/icons/product/chrome-48.png".to_string() }
fn default_probe_interval() -> u64 { 60 }
fn default_probe_timeout() -> u64 { 10 }
fn default_heartbeat_interval() -> u64 { 20 * 60 }
