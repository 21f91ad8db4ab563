use std::sync::Mutex;

use rppal::gpio::{Gpio, OutputPin};
use tracing::warn;

use heatpump_common::{Hardware, HardwareError, RawReading, TemperatureUnit};

use super::dht22::NativeDht;

/// Direct GPIO backend for single-board computers: one output pin per
/// relay (active-low), sensor readings through the native DHT22 poller.
/// With an empty pin list it acts as a sensor-only backend.
pub struct GpioBackend {
    pins: Mutex<Vec<OutputPin>>,
    dht: NativeDht,
    off_command: Vec<u8>,
    unit: TemperatureUnit,
}

impl GpioBackend {
    pub fn open(
        relay_pins: &[u8],
        sensor_pin: u8,
        unit: TemperatureUnit,
        off_command: Vec<u8>,
    ) -> Result<Self, HardwareError> {
        let mut pins = Vec::with_capacity(relay_pins.len());
        if !relay_pins.is_empty() {
            if relay_pins.len() < 4 {
                return Err(HardwareError::ConfigIncompatible(format!(
                    "thermostat control needs 4 relay pins, got {}",
                    relay_pins.len()
                )));
            }
            let gpio = Gpio::new().map_err(|err| {
                HardwareError::DriverMissing(format!("gpio controller unavailable: {err}"))
            })?;
            for &pin in relay_pins {
                let mut output = gpio
                    .get(pin)
                    .map_err(|err| {
                        HardwareError::ConfigIncompatible(format!("relay pin {pin}: {err}"))
                    })?
                    .into_output();
                // Active-low bank: high releases the relay.
                output.set_high();
                pins.push(output);
            }
        }

        let dht = NativeDht::acquire(sensor_pin)?;

        Ok(Self {
            pins: Mutex::new(pins),
            dht,
            off_command,
            unit,
        })
    }
}

impl Hardware for GpioBackend {
    fn name(&self) -> &'static str {
        "gpio"
    }

    fn write_relay(&self, command: &[u8]) {
        let Some(&mask) = command.first() else {
            warn!("relay write ignored: empty command");
            return;
        };
        let mut pins = self.pins.lock().expect("relay pin lock poisoned");
        for (index, pin) in pins.iter_mut().enumerate() {
            if mask & (1 << index) != 0 {
                pin.set_low();
            } else {
                pin.set_high();
            }
        }
    }

    fn read_sensor(&self) -> Option<RawReading> {
        let (celsius, humidity) = self.dht.read()?;
        Some(RawReading {
            temperature: self.unit.from_celsius(celsius),
            humidity,
        })
    }

    fn cleanup(&self) {
        let has_relays = !self.pins.lock().expect("relay pin lock poisoned").is_empty();
        if has_relays {
            self.write_relay(&self.off_command);
        }
        self.dht.release();
    }
}
