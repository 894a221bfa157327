/// Agent configuration structures that can be tested independently
///
/// The firmware persists an `AgentConfig` as JSON in NVS. Secrets default to
/// empty here; the firmware fills them from the values baked in at build time.
use crate::connectivity::Topics;
use crate::gesture::GestureTiming;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OtaConfig {
    pub manifest_url: String,
    pub auth_token: String,
    pub poll_interval_ms: u64,
    pub http_timeout_ms: u64,
    pub verify_checksum: bool,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            manifest_url: String::new(),
            auth_token: String::new(),
            poll_interval_ms: 5000,
            http_timeout_ms: 15_000,
            verify_checksum: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_password: String,
    pub link_retry_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_password: String::new(),
            link_retry_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_url: String,
    pub client_id: String,
    pub session_retry_ms: u64,
    pub topics: Topics,
    pub device_id: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_url: String::new(),
            client_id: "esp32-fota-agent".to_string(),
            session_retry_ms: 2000,
            topics: Topics::default(),
            device_id: "ESP32".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub publish_interval_ms: u64,
    pub max_buffered_records: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            publish_interval_ms: 5000,
            max_buffered_records: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PinConfig {
    pub rollback_pin: i32,
    pub reset_button_pin: i32,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            rollback_pin: 4,
            reset_button_pin: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResetConfig {
    pub long_press_ms: u64,
    pub double_press_window_ms: u64,
    pub debounce_ms: u64,
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            long_press_ms: 3000,
            double_press_window_ms: 500,
            debounce_ms: 50,
        }
    }
}

impl ResetConfig {
    pub fn timing(&self) -> GestureTiming {
        GestureTiming {
            long_press: Duration::from_millis(self.long_press_ms),
            double_press_window: Duration::from_millis(self.double_press_window_ms),
            debounce: Duration::from_millis(self.debounce_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub ota: OtaConfig,
    pub network: NetworkConfig,
    pub mqtt: MqttConfig,
    pub telemetry: TelemetryConfig,
    pub pins: PinConfig,
    pub reset: ResetConfig,
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            ota: OtaConfig::default(),
            network: NetworkConfig::default(),
            mqtt: MqttConfig::default(),
            telemetry: TelemetryConfig::default(),
            pins: PinConfig::default(),
            reset: ResetConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid configuration: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ota.manifest_url.trim().is_empty() {
            return Err(ConfigError("ota.manifest_url is empty".to_string()));
        }
        let intervals = [
            ("ota.poll_interval_ms", self.ota.poll_interval_ms),
            ("ota.http_timeout_ms", self.ota.http_timeout_ms),
            ("network.link_retry_ms", self.network.link_retry_ms),
            ("mqtt.session_retry_ms", self.mqtt.session_retry_ms),
            ("telemetry.publish_interval_ms", self.telemetry.publish_interval_ms),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError(format!("{} must be non-zero", name)));
        }
        if self.telemetry.max_buffered_records == 0 {
            return Err(ConfigError("telemetry.max_buffered_records must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Merge the values baked into the running image. The update endpoint and
    /// token belong to the release, so non-empty compiled ones always win; the
    /// remaining secrets are only filled in when empty. Returns true if anything
    /// changed.
    pub fn merge_compiled(&mut self, compiled: &AgentConfig) -> bool {
        let mut changed = false;

        let release_owned = [
            (&mut self.ota.manifest_url, &compiled.ota.manifest_url),
            (&mut self.ota.auth_token, &compiled.ota.auth_token),
        ];
        for (value, baked) in release_owned {
            if !baked.is_empty() && *value != *baked {
                *value = baked.clone();
                changed = true;
            }
        }

        let fill_only = [
            (&mut self.network.wifi_ssid, &compiled.network.wifi_ssid),
            (&mut self.network.wifi_password, &compiled.network.wifi_password),
            (&mut self.mqtt.broker_url, &compiled.mqtt.broker_url),
        ];
        for (value, baked) in fill_only {
            if value.is_empty() && !baked.is_empty() {
                *value = baked.clone();
                changed = true;
            }
        }
        changed
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.ota.poll_interval_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.ota.http_timeout_ms)
    }
}
