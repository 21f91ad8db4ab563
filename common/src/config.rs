use std::fmt;

use serde::{Deserialize, Serialize};

use crate::relay::{RelayCommandSet, RelayCommandsConfig};
use crate::types::TemperatureUnit;

/// Which pieces of the system this device runs. `Server` is the
/// coordinator role and is refused by the device daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentType {
    Thermostat,
    Probe,
    Server,
    HybridProbe,
    HybridThermo,
}

impl DeploymentType {
    /// Roles that drive relays and run the control engine.
    pub fn runs_control(self) -> bool {
        matches!(self, Self::Thermostat | Self::HybridThermo)
    }

    /// Roles that read sensors and publish telemetry.
    pub fn runs_sensing(self) -> bool {
        !matches!(self, Self::Server)
    }
}

/// Restricts which hardware backends the probe sequence may try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlatformMode {
    Auto,
    Windows,
    Linux,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub deployment_type: DeploymentType,
    pub mode: PlatformMode,

    pub arduino_com_port: Option<String>,
    pub relay_com_port: Option<String>,
    pub baud_rate: u32,
    pub com_timeout_ms: u64,

    pub enable_ftdi_relay: bool,
    pub ftdi_serial_number: Option<String>,

    pub relay_pins: Vec<u8>,
    pub dht_sensor_pin: Option<u8>,
    pub relay_commands: RelayCommandsConfig,

    pub temperature_unit: TemperatureUnit,
    pub cooling_offset: f64,
    pub heating_offset: f64,
    pub temperature_difference_threshold: f64,
    /// Recognized but reserved; the upgrade test uses its built-in tiers.
    pub minimum_heating_rate_per_10min: f64,
    pub compressor_min_off_minutes: u64,

    pub sensor_poll_interval_seconds: u64,
    pub data_send_interval_seconds: u64,
    pub control_loop_interval_ms: u64,

    pub http_retry_count: u32,
    pub sensor_failure_threshold: u32,

    pub api_host: String,
    pub api_port: u16,
    pub vm_server: String,
    pub device_id: String,
    pub default_user_set_temperature: f64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            deployment_type: DeploymentType::Thermostat,
            mode: PlatformMode::Auto,
            arduino_com_port: None,
            relay_com_port: None,
            baud_rate: 9600,
            com_timeout_ms: 2000,
            enable_ftdi_relay: false,
            ftdi_serial_number: None,
            relay_pins: Vec::new(),
            dht_sensor_pin: None,
            relay_commands: RelayCommandsConfig::default(),
            temperature_unit: TemperatureUnit::F,
            cooling_offset: 0.5,
            heating_offset: 0.5,
            temperature_difference_threshold: 1.3,
            minimum_heating_rate_per_10min: 0.4,
            compressor_min_off_minutes: 5,
            sensor_poll_interval_seconds: 10,
            data_send_interval_seconds: 120,
            control_loop_interval_ms: 1000,
            http_retry_count: 3,
            sensor_failure_threshold: 5,
            api_host: "0.0.0.0".to_string(),
            api_port: 5001,
            vm_server: String::new(),
            device_id: String::new(),
            default_user_set_temperature: 70.0,
        }
    }
}

/// Thresholds the control engine ticks with, derived from config once at
/// boot and again when the API updates tunables.
#[derive(Debug, Clone)]
pub struct ControlTuning {
    pub temperature_difference_threshold: f64,
    pub cooling_offset: f64,
    pub heating_offset: f64,
    pub compressor_min_off_ms: u64,
}

impl DeviceConfig {
    pub fn control_tuning(&self) -> ControlTuning {
        ControlTuning {
            temperature_difference_threshold: self.temperature_difference_threshold,
            cooling_offset: self.cooling_offset,
            heating_offset: self.heating_offset,
            compressor_min_off_ms: self.compressor_min_off_minutes * 60 * 1000,
        }
    }

    /// Full startup validation. Any error here refuses startup; the daemon
    /// exits nonzero without touching hardware.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.deployment_type == DeploymentType::Server {
            return Err(ConfigError::UnsupportedRole(
                "deployment_type Server is the coordinator role; this daemon runs device roles only"
                    .to_string(),
            ));
        }

        if self.device_id.trim().is_empty() {
            return Err(ConfigError::invalid("device_id", "must not be empty"));
        }
        if self.vm_server.trim().is_empty() {
            return Err(ConfigError::invalid("vm_server", "must not be empty"));
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::invalid("baud_rate", "must be positive"));
        }
        if self.com_timeout_ms == 0 {
            return Err(ConfigError::invalid("com_timeout_ms", "must be positive"));
        }
        if self.control_loop_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "control_loop_interval_ms",
                "must be positive",
            ));
        }
        if self.sensor_poll_interval_seconds == 0 {
            return Err(ConfigError::invalid(
                "sensor_poll_interval_seconds",
                "must be positive",
            ));
        }

        for (key, value) in [
            ("cooling_offset", self.cooling_offset),
            ("heating_offset", self.heating_offset),
            (
                "temperature_difference_threshold",
                self.temperature_difference_threshold,
            ),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::invalid(key, "must be a non-negative number"));
            }
        }
        if self.temperature_difference_threshold == 0.0 {
            return Err(ConfigError::invalid(
                "temperature_difference_threshold",
                "must be positive",
            ));
        }
        if !self.default_user_set_temperature.is_finite() {
            return Err(ConfigError::invalid(
                "default_user_set_temperature",
                "must be a number",
            ));
        }

        if self.enable_ftdi_relay && self.ftdi_serial_number.is_none() {
            return Err(ConfigError::invalid(
                "ftdi_serial_number",
                "required when enable_ftdi_relay is set",
            ));
        }

        self.validate_pins()?;

        // Surface relay-command parse errors at startup rather than at the
        // first relay write.
        RelayCommandSet::parse(&self.relay_commands)?;

        Ok(())
    }

    fn validate_pins(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::BTreeSet::new();
        for pin in &self.relay_pins {
            if !seen.insert(*pin) {
                return Err(ConfigError::invalid(
                    "relay_pins",
                    format!("pin {pin} listed more than once"),
                ));
            }
        }
        if let Some(sensor_pin) = self.dht_sensor_pin {
            if self.relay_pins.contains(&sensor_pin) {
                return Err(ConfigError::invalid(
                    "dht_sensor_pin",
                    format!("pin {sensor_pin} collides with relay_pins"),
                ));
            }
        }
        // Only thermostat roles drive relays; probes may leave pins empty.
        if self.deployment_type.runs_control() && !self.relay_pins.is_empty() && self.relay_pins.len() < 4
        {
            return Err(ConfigError::invalid(
                "relay_pins",
                "thermostat control needs at least 4 relay pins",
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue { key: &'static str, reason: String },
    RelayCommand { name: &'static str, reason: String },
    UnsupportedRole(String),
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, reason } => write!(f, "config key {key}: {reason}"),
            Self::RelayCommand { name, reason } => {
                write!(f, "relay_commands.{name}: {reason}")
            }
            Self::UnsupportedRole(reason) => write!(f, "{reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> DeviceConfig {
        DeviceConfig {
            device_id: "pump-01".to_string(),
            vm_server: "http://coordinator.local:8000".to_string(),
            relay_pins: vec![17, 27, 22, 23],
            dht_sensor_pin: Some(4),
            ..DeviceConfig::default()
        }
    }

    #[test]
    fn default_config_validates_once_identity_is_set() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn server_role_is_refused() {
        let config = DeviceConfig {
            deployment_type: DeploymentType::Server,
            ..valid_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsupportedRole(_))
        ));
    }

    #[test]
    fn duplicate_relay_pins_are_rejected() {
        let config = DeviceConfig {
            relay_pins: vec![17, 27, 17, 23],
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn sensor_pin_must_not_collide_with_relays() {
        let config = DeviceConfig {
            dht_sensor_pin: Some(27),
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn thermostat_role_needs_four_relay_pins() {
        let config = DeviceConfig {
            relay_pins: vec![17, 27],
            ..valid_config()
        };
        assert!(config.validate().is_err());

        let probe = DeviceConfig {
            deployment_type: DeploymentType::Probe,
            relay_pins: vec![17, 27],
            ..valid_config()
        };
        assert!(probe.validate().is_ok());
    }

    #[test]
    fn ftdi_requires_serial_number() {
        let config = DeviceConfig {
            enable_ftdi_relay: true,
            ftdi_serial_number: None,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_relay_command_fails_validation() {
        let mut config = valid_config();
        config.relay_commands.cool = crate::relay::RelayCommandSpec::Text("0xZZ".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let config = DeviceConfig {
            temperature_difference_threshold: 0.0,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn tuning_converts_minutes_to_ms() {
        let tuning = valid_config().control_tuning();
        assert_eq!(tuning.compressor_min_off_ms, 5 * 60 * 1000);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = valid_config();
        let text = serde_json::to_string_pretty(&config).unwrap();
        let back: DeviceConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.device_id, config.device_id);
        assert_eq!(back.relay_pins, config.relay_pins);
        assert_eq!(back.compressor_min_off_minutes, config.compressor_min_off_minutes);
    }
}
