use std::sync::Mutex;

use crate::types::{Reading, SensorStats};

/// Successful reads required before sensor failures count as operational
/// problems. DHT22-class sensors routinely fail their first attempts after
/// power-on, so early failures stay at debug severity.
pub const WARMUP_SUCCESS_COUNT: u64 = 3;

#[derive(Debug, Default)]
struct SlotInner {
    current: Option<Reading>,
    successful_reads: u64,
    consecutive_failures: u32,
}

/// Shared slot holding the latest valid sensor pair. Written only by the
/// poller; read by the engine and the status endpoint. Both values of a
/// sample are published atomically or not at all.
#[derive(Debug, Default)]
pub struct SharedReadings {
    inner: Mutex<SlotInner>,
}

impl SharedReadings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, reading: Reading) {
        let mut inner = self.inner.lock().expect("readings lock poisoned");
        inner.current = Some(reading);
        inner.successful_reads = inner.successful_reads.saturating_add(1);
        inner.consecutive_failures = 0;
    }

    /// Records a failed poll. Returns the consecutive-failure count and
    /// whether the poller has warmed up, so the caller can pick severity.
    pub fn record_failure(&self) -> (u32, bool) {
        let mut inner = self.inner.lock().expect("readings lock poisoned");
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        (
            inner.consecutive_failures,
            inner.successful_reads >= WARMUP_SUCCESS_COUNT,
        )
    }

    pub fn current(&self) -> Option<Reading> {
        self.inner.lock().expect("readings lock poisoned").current
    }

    pub fn stats(&self) -> SensorStats {
        let inner = self.inner.lock().expect("readings lock poisoned");
        SensorStats {
            successful_reads: inner.successful_reads,
            consecutive_failures: inner.consecutive_failures,
            warmed_up: inner.successful_reads >= WARMUP_SUCCESS_COUNT,
        }
    }
}
