use std::fmt;

/// Sample straight from a backend, already converted to the configured
/// unit but not yet rounded or validated for publication.
#[derive(Debug, Clone, Copy)]
pub struct RawReading {
    pub temperature: f64,
    pub humidity: f64,
}

/// Uniform surface over the relay/sensor backends (serial bridge, GPIO,
/// FTDI). Implementations serialize access to their underlying handle
/// internally; callers may invoke from any thread.
pub trait Hardware: Send + Sync {
    fn name(&self) -> &'static str;

    /// Drives the relay bank. Failures never surface through this call:
    /// backends log the error and the write becomes a no-op, to be retried
    /// by the next engine tick.
    fn write_relay(&self, command: &[u8]);

    /// Latest sensor sample, or `None` on any protocol or parse failure.
    fn read_sensor(&self) -> Option<RawReading>;

    /// Releases every acquired handle. Must assert the OFF relay command
    /// once more before closing, and is safe to call more than once.
    fn cleanup(&self);
}

impl fmt::Debug for dyn Hardware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hardware").field("name", &self.name()).finish()
    }
}

/// Why a backend refused to initialize during the probe sequence.
#[derive(Debug)]
pub enum HardwareError {
    PortNotFound(String),
    DeviceBusy(String),
    PermissionDenied(String),
    DriverMissing(String),
    ConfigIncompatible(String),
}

impl fmt::Display for HardwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PortNotFound(detail) => write!(f, "port not found: {detail}"),
            Self::DeviceBusy(detail) => write!(f, "device busy: {detail}"),
            Self::PermissionDenied(detail) => write!(f, "permission denied: {detail}"),
            Self::DriverMissing(detail) => write!(f, "driver missing: {detail}"),
            Self::ConfigIncompatible(detail) => write!(f, "configuration incompatible: {detail}"),
        }
    }
}

impl std::error::Error for HardwareError {}
