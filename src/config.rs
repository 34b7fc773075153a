use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use anyhow::Error;
use rgb::RGB8;
use serde::{Deserialize, Serialize};

use common::protocol;

/// Whether switching modes tears down the subsystems of the previous mode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum TeardownPolicy {
    /// Stop everything the previous mode started before starting the new one
    #[default]
    Exclusive,
    /// Only the networking stop-then-reconfigure tears anything down; a wireless
    /// command service keeps advertising once started
    Permissive,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub input: InputConfig,
    pub display: DisplayConfig,
    pub network: NetworkConfig,
    pub broker: BrokerConfig,
    pub ble: BleConfig,
    pub mode: ModeConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct InputConfig {
    pub low_threshold: u16,
    pub high_threshold: u16,
    pub adc_max: u16,
    pub poll_period_ms: u64,
    pub long_press_ms: u64,
    /// Longest gap between a short release and the next press for a double click
    pub double_click_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            low_threshold: 1000,
            high_threshold: 3000,
            adc_max: 4095,
            poll_period_ms: 100,
            long_press_ms: 1000,
            double_click_ms: 300,
        }
    }
}

impl InputConfig {
    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period_ms)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DisplayConfig {
    pub render_period_ms: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            render_period_ms: 500,
        }
    }
}

impl DisplayConfig {
    pub fn render_period(&self) -> Duration {
        Duration::from_millis(self.render_period_ms)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    pub station_ssid: String,
    pub station_password: String,
    pub ap_ssid: String,
    pub ap_password: String,
    pub ap_max_connections: u8,
    pub max_retry: u32,
    pub probe_target: Ipv4Addr,
    pub probe_count: u32,
    pub sntp_server: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            station_ssid: "SSID".to_string(),
            station_password: "Pass".to_string(),
            ap_ssid: "ESP32_CONFIG_AP".to_string(),
            ap_password: "12345678".to_string(),
            ap_max_connections: 4,
            max_retry: 5,
            probe_target: Ipv4Addr::new(8, 8, 8, 8),
            probe_count: 3,
            sntp_server: "pool.ntp.org".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub uri: String,
    pub client_id: Option<String>,
    pub command_topic: String,
    pub status_topic: String,
    pub announcement: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            uri: protocol::DEFAULT_BROKER_URI.to_string(),
            client_id: None,
            command_topic: protocol::COMMAND_TOPIC.to_string(),
            status_topic: protocol::STATUS_TOPIC.to_string(),
            announcement: protocol::DEFAULT_ANNOUNCEMENT.to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BleConfig {
    pub device_name: String,
    /// Color used when a one-byte "on" command arrives
    pub default_on_color: RGB8,
    pub manufacturer: String,
    pub model_number: String,
    pub battery_level: u8,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            device_name: "Ivan-ESP32".to_string(),
            default_on_color: RGB8::new(255, 255, 255),
            manufacturer: "Ivan-Corp".to_string(),
            model_number: "ESP32S3-Ivan-Dev".to_string(),
            battery_level: 98,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ModeConfig {
    pub teardown: TeardownPolicy,
}

/// Rejected configuration values
#[derive(Debug, PartialEq)]
pub enum ConfigError {
    Thresholds { low: u16, high: u16, adc_max: u16 },
    ZeroPeriod(&'static str),
    ZeroProbeCount,
    ApPasswordTooShort(usize),
    BatteryLevel(u8),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Thresholds { low, high, adc_max } => write!(
                f,
                "thresholds must satisfy low < high <= adc_max (got {low} / {high} / {adc_max})"
            ),
            ConfigError::ZeroPeriod(name) => write!(f, "{name} must be greater than zero"),
            ConfigError::ZeroProbeCount => write!(f, "probe_count must be at least 1"),
            ConfigError::ApPasswordTooShort(len) => write!(
                f,
                "ap_password must be empty (open AP) or at least 8 characters, got {len}"
            ),
            ConfigError::BatteryLevel(level) => {
                write!(f, "battery_level must be a percentage, got {level}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn load() -> Result<Config, Error> {
        Self::load_from("config.ron")
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Config, Error> {
        let config = std::fs::read_to_string(path)?;
        Self::from_ron_str(&config)
    }

    pub fn from_ron_str(config: &str) -> Result<Config, Error> {
        let config: Config = ron::from_str(config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let input = &self.input;
        if input.low_threshold >= input.high_threshold || input.high_threshold > input.adc_max {
            return Err(ConfigError::Thresholds {
                low: input.low_threshold,
                high: input.high_threshold,
                adc_max: input.adc_max,
            });
        }
        if input.poll_period_ms == 0 {
            return Err(ConfigError::ZeroPeriod("poll_period_ms"));
        }
        if input.double_click_ms == 0 {
            return Err(ConfigError::ZeroPeriod("double_click_ms"));
        }
        if self.display.render_period_ms == 0 {
            return Err(ConfigError::ZeroPeriod("render_period_ms"));
        }
        if self.network.probe_count == 0 {
            return Err(ConfigError::ZeroProbeCount);
        }
        let ap_password = self.network.ap_password.len();
        if ap_password > 0 && ap_password < 8 {
            return Err(ConfigError::ApPasswordTooShort(ap_password));
        }
        if self.ble.battery_level > 100 {
            return Err(ConfigError::BatteryLevel(self.ble.battery_level));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.input.low_threshold, 1000);
        assert_eq!(config.input.high_threshold, 3000);
        assert_eq!(config.network.max_retry, 5);
        assert_eq!(config.network.probe_count, 3);
        assert_eq!(config.display.render_period(), Duration::from_millis(500));
        assert_eq!(config.input.poll_period(), Duration::from_millis(100));
        assert_eq!(config.mode.teardown, TeardownPolicy::Exclusive);
    }

    #[test]
    fn test_load() {
        let path = std::env::temp_dir().join("status-orchestrator-test-load.ron");
        std::fs::write(
            &path,
            r#"(
    network: (
        station_ssid: "home",
        station_password: "hunter22",
        max_retry: 3,
    ),
    broker: (
        command_topic: "lab/cmd",
    ),
    mode: (
        teardown: Permissive,
    ),
)"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.network.station_ssid, "home");
        assert_eq!(config.network.max_retry, 3);
        // Unspecified fields keep their defaults
        assert_eq!(config.network.ap_ssid, "ESP32_CONFIG_AP");
        assert_eq!(config.broker.command_topic, "lab/cmd");
        assert_eq!(config.broker.status_topic, protocol::STATUS_TOPIC);
        assert_eq!(config.mode.teardown, TeardownPolicy::Permissive);
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let err = Config::from_ron_str("(input: (low_threshold: 3000, high_threshold: 1000))")
            .unwrap_err();
        assert!(err.to_string().contains("thresholds"));
    }

    #[test]
    fn test_rejects_short_ap_password() {
        let mut config = Config::default();
        config.network.ap_password = "short".to_string();
        assert_eq!(config.validate(), Err(ConfigError::ApPasswordTooShort(5)));

        config.network.ap_password.clear();
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_parses_probe_target_and_color() {
        let config = Config::from_ron_str(
            r#"(
    network: (probe_target: "1.1.1.1"),
    ble: (default_on_color: (r: 1, g: 2, b: 3)),
)"#,
        )
        .unwrap();
        assert_eq!(config.network.probe_target, Ipv4Addr::new(1, 1, 1, 1));
        assert_eq!(config.ble.default_on_color, RGB8::new(1, 2, 3));
    }
}
