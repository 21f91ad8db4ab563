pub mod config;
pub mod engine;
pub mod hardware;
pub mod history;
pub mod readings;
pub mod relay;
pub mod setpoint;
pub mod types;

pub use config::{ConfigError, ControlTuning, DeploymentType, DeviceConfig, PlatformMode};
pub use engine::{ControlEngine, ControlState, TickOutcome};
pub use hardware::{Hardware, HardwareError, RawReading};
pub use history::{HistorySample, TemperatureHistory, HISTORY_WINDOW_MS};
pub use readings::{SharedReadings, WARMUP_SUCCESS_COUNT};
pub use relay::{RelayCommand, RelayCommandSet, RelayCommandSpec, RelayCommandsConfig};
pub use setpoint::{SetPoint, SetPointSource, SetPointStore};
pub use types::{
    Reading, RelayMode, SensorStats, StatusSnapshot, TemperatureUnit, WireMode,
};
