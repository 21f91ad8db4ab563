use std::io::Write;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, warn};

use heatpump_common::{Hardware, HardwareError, RawReading, TemperatureUnit};

/// Opening a port toggles DTR and resets the microcontroller; give it time
/// to come back before talking to it.
const SETTLE_AFTER_OPEN: Duration = Duration::from_secs(2);

const SENSOR_REQUEST: &[u8] = b"R";
const MAX_RESPONSE_BYTES: usize = 64;

/// Serial backend: one port to the microcontroller sensor bridge, one
/// (optional) port to the relay board. The bridge answers a single `R`
/// byte with `"T:<float>,H:<float>\n"`, temperatures in Fahrenheit.
pub struct SerialBridge {
    sensor: Mutex<Box<dyn SerialPort>>,
    relay: Option<Mutex<Box<dyn SerialPort>>>,
    off_command: Vec<u8>,
    unit: TemperatureUnit,
}

impl SerialBridge {
    pub fn open(
        sensor_port: &str,
        relay_port: Option<&str>,
        baud_rate: u32,
        timeout: Duration,
        unit: TemperatureUnit,
        off_command: Vec<u8>,
    ) -> Result<Self, HardwareError> {
        let sensor = open_port(sensor_port, baud_rate, timeout)?;
        let relay = relay_port
            .map(|path| open_port(path, baud_rate, timeout))
            .transpose()?;

        thread::sleep(SETTLE_AFTER_OPEN);

        Ok(Self {
            sensor: Mutex::new(sensor),
            relay: relay.map(Mutex::new),
            off_command,
            unit,
        })
    }
}

impl Hardware for SerialBridge {
    fn name(&self) -> &'static str {
        "serial-bridge"
    }

    fn write_relay(&self, command: &[u8]) {
        let Some(relay) = &self.relay else {
            warn!("relay write ignored: no relay port configured");
            return;
        };
        let mut port = relay.lock().expect("relay port lock poisoned");
        if let Err(err) = port.write_all(command) {
            warn!(%err, "relay write failed; will retry on next tick");
            return;
        }
        if let Err(err) = port.flush() {
            warn!(%err, "relay flush failed");
        }
    }

    fn read_sensor(&self) -> Option<RawReading> {
        let mut port = self.sensor.lock().expect("sensor port lock poisoned");

        // Drop anything stale from a previous request before asking again.
        if let Err(err) = port.clear(ClearBuffer::All) {
            debug!(%err, "could not clear sensor port buffers");
        }
        if let Err(err) = port.write_all(SENSOR_REQUEST) {
            debug!(%err, "sensor request write failed");
            return None;
        }

        let line = read_line(port.as_mut())?;
        let (fahrenheit, humidity) = parse_bridge_line(&line)?;
        Some(RawReading {
            temperature: self.unit.from_fahrenheit(fahrenheit),
            humidity,
        })
    }

    fn cleanup(&self) {
        if self.relay.is_some() {
            self.write_relay(&self.off_command);
        }
        // Ports close when the backend drops.
    }
}

fn open_port(
    path: &str,
    baud_rate: u32,
    timeout: Duration,
) -> Result<Box<dyn SerialPort>, HardwareError> {
    serialport::new(path, baud_rate)
        .timeout(timeout)
        .open()
        .map_err(|err| classify_open_error(path, err))
}

fn classify_open_error(path: &str, err: serialport::Error) -> HardwareError {
    let detail = format!("{path}: {err}");
    match err.kind() {
        serialport::ErrorKind::NoDevice => HardwareError::PortNotFound(detail),
        serialport::ErrorKind::InvalidInput => HardwareError::ConfigIncompatible(detail),
        serialport::ErrorKind::Io(kind) => match kind {
            std::io::ErrorKind::NotFound => HardwareError::PortNotFound(detail),
            std::io::ErrorKind::PermissionDenied => HardwareError::PermissionDenied(detail),
            _ => HardwareError::DeviceBusy(detail),
        },
        serialport::ErrorKind::Unknown => HardwareError::DeviceBusy(detail),
    }
}

fn read_line(port: &mut dyn SerialPort) -> Option<String> {
    let mut buffer = Vec::with_capacity(32);
    let mut byte = [0u8; 1];
    while buffer.len() < MAX_RESPONSE_BYTES {
        match port.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                if byte[0] == b'\n' {
                    break;
                }
                buffer.push(byte[0]);
            }
            Err(err) => {
                debug!(%err, "sensor response read failed");
                return None;
            }
        }
    }
    String::from_utf8(buffer).ok()
}

/// Parses `"T:<float>,H:<float>"`. Sentinel values the bridge emits when
/// its own sensor read failed yield no reading.
fn parse_bridge_line(line: &str) -> Option<(f64, f64)> {
    let line = line.trim();
    let (temp_part, hum_part) = line.split_once(',')?;
    let fahrenheit: f64 = temp_part.trim().strip_prefix("T:")?.trim().parse().ok()?;
    let humidity: f64 = hum_part.trim().strip_prefix("H:")?.trim().parse().ok()?;

    if !fahrenheit.is_finite() || !humidity.is_finite() {
        return None;
    }
    if fahrenheit <= -900.0 || !(0.0..=100.0).contains(&humidity) {
        return None;
    }
    Some((fahrenheit, humidity))
}
