#[cfg(feature = "gpio")]
mod dht22;
#[cfg(feature = "ftdi")]
mod ftdi;
#[cfg(feature = "gpio")]
mod gpio;
mod serial;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use heatpump_common::{
    DeviceConfig, Hardware, HardwareError, PlatformMode, RelayCommandSet,
};

pub use serial::SerialBridge;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    SerialBridge,
    Ftdi,
    Gpio,
}

impl Backend {
    fn label(self) -> &'static str {
        match self {
            Self::SerialBridge => "serial-bridge",
            Self::Ftdi => "ftdi",
            Self::Gpio => "gpio",
        }
    }
}

/// Tries the configured backends in order and returns the first one that
/// initializes. Pinning `mode` restricts the candidate list; `Auto` walks
/// the platform's full order.
pub fn probe(
    config: &DeviceConfig,
    commands: &RelayCommandSet,
    needs_relays: bool,
) -> Result<Arc<dyn Hardware>, HardwareError> {
    let mut last_error: Option<HardwareError> = None;

    for backend in candidates(config) {
        info!(backend = backend.label(), "probing hardware backend");
        match initialize(backend, config, commands, needs_relays) {
            Ok(hardware) => {
                info!(backend = hardware.name(), "hardware backend ready");
                return Ok(hardware);
            }
            Err(err) => {
                warn!(backend = backend.label(), %err, "backend probe failed");
                last_error = Some(err);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        HardwareError::ConfigIncompatible(
            "no hardware backend is usable with this mode/platform combination".to_string(),
        )
    }))
}

fn candidates(config: &DeviceConfig) -> Vec<Backend> {
    let allow_windows = matches!(config.mode, PlatformMode::Auto | PlatformMode::Windows);
    let allow_linux = matches!(config.mode, PlatformMode::Auto | PlatformMode::Linux);
    let mut list = Vec::new();

    if cfg!(target_os = "windows") {
        if allow_windows {
            list.push(Backend::SerialBridge);
            // Windows IoT GPIO sits last in the order; this stack has no
            // driver for it, so the probe reports DriverMissing and moves on.
            list.push(Backend::Gpio);
        }
    } else if allow_linux {
        if config.enable_ftdi_relay && config.ftdi_serial_number.is_some() {
            list.push(Backend::Ftdi);
        }
        list.push(Backend::SerialBridge);
        list.push(Backend::Gpio);
    }

    list
}

fn initialize(
    backend: Backend,
    config: &DeviceConfig,
    commands: &RelayCommandSet,
    needs_relays: bool,
) -> Result<Arc<dyn Hardware>, HardwareError> {
    match backend {
        Backend::SerialBridge => init_serial(config, commands, needs_relays),
        Backend::Ftdi => init_ftdi(config, commands, needs_relays),
        Backend::Gpio => init_gpio(config, commands, needs_relays),
    }
}

fn init_serial(
    config: &DeviceConfig,
    commands: &RelayCommandSet,
    needs_relays: bool,
) -> Result<Arc<dyn Hardware>, HardwareError> {
    let sensor_port = config.arduino_com_port.as_deref().ok_or_else(|| {
        HardwareError::ConfigIncompatible("arduino_com_port is not configured".to_string())
    })?;
    let relay_port = if needs_relays {
        Some(config.relay_com_port.as_deref().ok_or_else(|| {
            HardwareError::ConfigIncompatible("relay_com_port is not configured".to_string())
        })?)
    } else {
        None
    };

    let bridge = SerialBridge::open(
        sensor_port,
        relay_port,
        config.baud_rate,
        Duration::from_millis(config.com_timeout_ms),
        config.temperature_unit,
        commands.off.bytes().to_vec(),
    )?;
    Ok(Arc::new(bridge))
}

#[cfg(feature = "gpio")]
fn init_gpio(
    config: &DeviceConfig,
    commands: &RelayCommandSet,
    needs_relays: bool,
) -> Result<Arc<dyn Hardware>, HardwareError> {
    let sensor_pin = config.dht_sensor_pin.ok_or_else(|| {
        HardwareError::ConfigIncompatible("dht_sensor_pin is not configured".to_string())
    })?;
    let relay_pins: &[u8] = if needs_relays { &config.relay_pins } else { &[] };
    let backend = gpio::GpioBackend::open(
        relay_pins,
        sensor_pin,
        config.temperature_unit,
        commands.off.bytes().to_vec(),
    )?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "gpio"))]
fn init_gpio(
    _config: &DeviceConfig,
    _commands: &RelayCommandSet,
    _needs_relays: bool,
) -> Result<Arc<dyn Hardware>, HardwareError> {
    Err(HardwareError::DriverMissing(
        "built without the `gpio` feature".to_string(),
    ))
}

#[cfg(feature = "ftdi")]
fn init_ftdi(
    config: &DeviceConfig,
    commands: &RelayCommandSet,
    _needs_relays: bool,
) -> Result<Arc<dyn Hardware>, HardwareError> {
    let serial_number = config.ftdi_serial_number.as_deref().ok_or_else(|| {
        HardwareError::ConfigIncompatible("ftdi_serial_number is not configured".to_string())
    })?;

    // Sensing composes a dedicated sub-backend; GPIO relay pins are never
    // mixed with an FTDI relay bank.
    let sensor: Arc<dyn Hardware> = match config.arduino_com_port.as_deref() {
        Some(port) => Arc::new(SerialBridge::open(
            port,
            None,
            config.baud_rate,
            Duration::from_millis(config.com_timeout_ms),
            config.temperature_unit,
            commands.off.bytes().to_vec(),
        )?),
        None => ftdi_dht_sensor(config, commands)?,
    };

    let relay = ftdi::FtdiRelay::open(serial_number, sensor, commands.off.bytes().to_vec())?;
    Ok(Arc::new(relay))
}

#[cfg(not(feature = "ftdi"))]
fn init_ftdi(
    _config: &DeviceConfig,
    _commands: &RelayCommandSet,
    _needs_relays: bool,
) -> Result<Arc<dyn Hardware>, HardwareError> {
    Err(HardwareError::DriverMissing(
        "built without the `ftdi` feature".to_string(),
    ))
}

#[cfg(all(feature = "ftdi", feature = "gpio"))]
fn ftdi_dht_sensor(
    config: &DeviceConfig,
    commands: &RelayCommandSet,
) -> Result<Arc<dyn Hardware>, HardwareError> {
    let sensor_pin = config.dht_sensor_pin.ok_or_else(|| {
        HardwareError::ConfigIncompatible(
            "ftdi relay needs arduino_com_port or dht_sensor_pin for sensing".to_string(),
        )
    })?;
    let backend = gpio::GpioBackend::open(
        &[],
        sensor_pin,
        config.temperature_unit,
        commands.off.bytes().to_vec(),
    )?;
    Ok(Arc::new(backend))
}

#[cfg(all(feature = "ftdi", not(feature = "gpio")))]
fn ftdi_dht_sensor(
    _config: &DeviceConfig,
    _commands: &RelayCommandSet,
) -> Result<Arc<dyn Hardware>, HardwareError> {
    Err(HardwareError::ConfigIncompatible(
        "ftdi relay needs arduino_com_port for sensing (built without the `gpio` feature)"
            .to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DeviceConfig {
        DeviceConfig {
            device_id: "pump-01".to_string(),
            vm_server: "http://coordinator.local:8000".to_string(),
            ..DeviceConfig::default()
        }
    }

    #[test]
    fn auto_mode_orders_platform_candidates() {
        // Without FTDI enabled both platforms try the serial bridge first
        // and fall back to GPIO.
        assert_eq!(
            candidates(&config()),
            vec![Backend::SerialBridge, Backend::Gpio]
        );
    }

    #[test]
    fn ftdi_leads_when_enabled() {
        let cfg = DeviceConfig {
            enable_ftdi_relay: true,
            ftdi_serial_number: Some("FT123456".to_string()),
            ..config()
        };
        let list = candidates(&cfg);
        if cfg!(target_os = "windows") {
            assert!(!list.contains(&Backend::Ftdi));
        } else {
            assert_eq!(list.first(), Some(&Backend::Ftdi));
        }
    }

    #[test]
    fn pinned_mode_for_other_platform_yields_nothing() {
        let pinned = if cfg!(target_os = "windows") {
            PlatformMode::Linux
        } else {
            PlatformMode::Windows
        };
        let cfg = DeviceConfig {
            mode: pinned,
            ..config()
        };
        assert!(candidates(&cfg).is_empty());
    }

    #[test]
    fn probe_without_ports_reports_config_error() {
        let cfg = config();
        let commands = RelayCommandSet::parse(&cfg.relay_commands).unwrap();
        let err = probe(&cfg, &commands, true).unwrap_err();
        // No ports, no pins, no features: every candidate refuses.
        assert!(matches!(
            err,
            HardwareError::ConfigIncompatible(_) | HardwareError::DriverMissing(_)
        ));
    }
}
