use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::setpoint::SetPoint;

/// Unit used for every temperature crossing the API, the logs, and the
/// control math. Sensors report in their native unit; the hardware layer
/// converts before anything else sees the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemperatureUnit {
    F,
    C,
}

impl TemperatureUnit {
    pub fn label(self) -> &'static str {
        match self {
            Self::F => "°F",
            Self::C => "°C",
        }
    }

    pub fn from_celsius(self, celsius: f64) -> f64 {
        match self {
            Self::C => celsius,
            Self::F => celsius * 9.0 / 5.0 + 32.0,
        }
    }

    pub fn from_fahrenheit(self, fahrenheit: f64) -> f64 {
        match self {
            Self::F => fahrenheit,
            Self::C => (fahrenheit - 32.0) * 5.0 / 9.0,
        }
    }
}

/// Logical relay selection. Each variant indexes exactly one of the five
/// byte sequences parsed from configuration at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    Off,
    FanOnly,
    Cool,
    Heat,
    Emergency,
}

/// Mode vocabulary shared with the coordinating server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireMode {
    Off,
    Fan,
    Cool,
    Heat,
    Emergency,
}

impl WireMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Fan => "fan",
            Self::Cool => "cool",
            Self::Heat => "heat",
            Self::Emergency => "emergency",
        }
    }
}

/// A validated sensor sample in the configured unit. Immutable once
/// published; invalid samples are dropped before this type is built.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Reading {
    pub temperature: f64,
    pub humidity: f64,
    #[serde(rename = "observedAt")]
    pub observed_at: DateTime<Utc>,
    #[serde(skip)]
    pub observed_at_ms: u64,
}

/// Sensor poller counters surfaced in the status snapshot.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SensorStats {
    #[serde(rename = "successfulReads")]
    pub successful_reads: u64,
    #[serde(rename = "consecutiveFailures")]
    pub consecutive_failures: u32,
    #[serde(rename = "warmedUp")]
    pub warmed_up: bool,
}

/// Point-in-time view of the whole control surface, built under the engine
/// lock so it only ever shows committed decisions.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state: &'static str,
    pub mode: WireMode,
    pub reading: Option<Reading>,
    #[serde(rename = "setPoint")]
    pub set_point: SetPoint,
    #[serde(rename = "fanMode")]
    pub fan_mode: bool,
    #[serde(rename = "emergencyStop")]
    pub emergency_stop: bool,
    #[serde(rename = "cooldownRemainingSec")]
    pub cooldown_remaining_sec: u64,
    #[serde(rename = "stateTimeSec")]
    pub state_time_sec: u64,
    #[serde(rename = "heatingTimeSec")]
    pub heating_time_sec: u64,
    #[serde(rename = "estimatedSecondsToTarget")]
    pub estimated_seconds_to_target: u64,
    #[serde(rename = "ratePerMinute")]
    pub rate_per_minute: f64,
    pub sensor: SensorStats,
    pub unit: &'static str,
}
