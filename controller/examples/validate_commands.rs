//! Checks a configuration file without touching hardware: validates every
//! key, parses the five relay commands, and prints what the probe sequence
//! would try. Handy before deploying a config to a device.
//!
//! ```sh
//! cargo run -p heatpump-controller --example validate_commands -- heatpump.example.json
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use heatpump_common::{DeviceConfig, RelayCommandSet, RelayMode};

fn main() -> ExitCode {
    let path = match std::env::args().nth(1) {
        Some(arg) => PathBuf::from(arg),
        None => {
            eprintln!("usage: validate_commands <config.json>");
            return ExitCode::from(2);
        }
    };

    let raw = match std::fs::read(&path) {
        Ok(raw) => raw,
        Err(err) => {
            eprintln!("cannot read {}: {err}", path.display());
            return ExitCode::from(2);
        }
    };

    let config: DeviceConfig = match serde_json::from_slice(&raw) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration does not parse: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = config.validate() {
        eprintln!("configuration invalid: {err}");
        return ExitCode::FAILURE;
    }

    let commands = match RelayCommandSet::parse(&config.relay_commands) {
        Ok(commands) => commands,
        Err(err) => {
            eprintln!("relay commands invalid: {err}");
            return ExitCode::FAILURE;
        }
    };

    println!("configuration OK: {}", path.display());
    println!("  device_id:  {}", config.device_id);
    println!("  deployment: {:?}", config.deployment_type);
    println!("  unit:       {}", config.temperature_unit.label());
    println!("  target:     {}", config.default_user_set_temperature);
    println!();
    println!("relay commands (canonical form):");
    for (label, mode) in [
        ("off", RelayMode::Off),
        ("fan_only", RelayMode::FanOnly),
        ("cool", RelayMode::Cool),
        ("heat", RelayMode::Heat),
        ("emergency", RelayMode::Emergency),
    ] {
        println!("  {label:<10} {}", commands.for_mode(mode).render());
    }

    println!();
    println!("probe plan ({:?} mode on this platform):", config.mode);
    if config.enable_ftdi_relay && config.ftdi_serial_number.is_some() {
        println!("  1. ftdi (serial number {:?})", config.ftdi_serial_number.as_deref().unwrap_or(""));
    }
    match (&config.arduino_com_port, &config.relay_com_port) {
        (Some(sensor), Some(relay)) => {
            println!("  -  serial bridge: sensor {sensor}, relays {relay}");
        }
        (Some(sensor), None) => println!("  -  serial bridge: sensor {sensor}, no relay port"),
        _ => println!("  -  serial bridge: not configured"),
    }
    match config.dht_sensor_pin {
        Some(pin) => println!(
            "  -  gpio: sensor pin {pin}, relay pins {:?}",
            config.relay_pins
        ),
        None => println!("  -  gpio: not configured"),
    }

    ExitCode::SUCCESS
}
