use std::sync::{Arc, Mutex};

use libftd2xx::{BitMode, Ftdi, FtdiCommon};
use tracing::warn;

use heatpump_common::{Hardware, HardwareError, RawReading};

/// FTDI bit-bang relay backend. The USB device drives the relay bank with
/// all eight pins as outputs; sensing is delegated to a composed backend
/// chosen at probe time (serial bridge or native DHT), never GPIO relays.
pub struct FtdiRelay {
    device: Mutex<Ftdi>,
    sensor: Arc<dyn Hardware>,
    off_command: Vec<u8>,
}

impl FtdiRelay {
    pub fn open(
        serial_number: &str,
        sensor: Arc<dyn Hardware>,
        off_command: Vec<u8>,
    ) -> Result<Self, HardwareError> {
        let mut device = Ftdi::with_serial_number(serial_number).map_err(|status| {
            HardwareError::PortNotFound(format!("ftdi {serial_number}: {status:?}"))
        })?;
        device
            .set_bit_mode(0xFF, BitMode::AsyncBitbang)
            .map_err(|status| {
                HardwareError::ConfigIncompatible(format!(
                    "ftdi {serial_number} bit-bang mode: {status:?}"
                ))
            })?;

        Ok(Self {
            device: Mutex::new(device),
            sensor,
            off_command,
        })
    }
}

impl Hardware for FtdiRelay {
    fn name(&self) -> &'static str {
        "ftdi"
    }

    fn write_relay(&self, command: &[u8]) {
        let Some(&state) = command.first() else {
            warn!("relay write ignored: empty command");
            return;
        };
        let mut device = self.device.lock().expect("ftdi lock poisoned");
        if let Err(err) = device.write_all(&[state]) {
            warn!(?err, "ftdi relay write failed; will retry on next tick");
        }
    }

    fn read_sensor(&self) -> Option<RawReading> {
        self.sensor.read_sensor()
    }

    fn cleanup(&self) {
        self.write_relay(&self.off_command);
        self.sensor.cleanup();
        let mut device = self.device.lock().expect("ftdi lock poisoned");
        if let Err(err) = device.close() {
            warn!(?err, "ftdi close failed");
        }
    }
}
