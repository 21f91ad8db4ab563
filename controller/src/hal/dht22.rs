use std::os::raw::{c_float, c_int};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use heatpump_common::HardwareError;

// Bundled pigpio polling library (native/dht22.c). It owns a background
// OS thread that drives the DHT22 wire protocol and caches the latest
// valid reading; signals are blocked in that thread.
extern "C" {
    fn dht22_init() -> c_int;
    fn dht22_start_polling(gpio_pin: c_int) -> c_int;
    fn dht22_get_last_valid_reading(temperature: *mut c_float, humidity: *mut c_float) -> c_int;
    fn dht22_terminate();
}

static ACQUIRED: AtomicBool = AtomicBool::new(false);

/// Exclusive handle over the process-wide native polling thread. Release
/// is idempotent; the native terminate joins the thread with a 15-second
/// bound and force-cancels on timeout.
pub struct NativeDht {
    released: AtomicBool,
}

impl NativeDht {
    pub fn acquire(pin: u8) -> Result<Self, HardwareError> {
        if ACQUIRED.swap(true, Ordering::SeqCst) {
            return Err(HardwareError::DeviceBusy(
                "native DHT22 poller is already acquired".to_string(),
            ));
        }

        // SAFETY: the ACQUIRED gate guarantees init/start run at most once
        // per acquisition; the library tolerates repeated init/terminate
        // cycles.
        let rc = unsafe { dht22_init() };
        if rc != 0 {
            ACQUIRED.store(false, Ordering::SeqCst);
            return Err(HardwareError::DriverMissing(format!(
                "pigpio initialization failed (rc {rc}); is the daemon running as root?"
            )));
        }

        let rc = unsafe { dht22_start_polling(c_int::from(pin)) };
        if rc != 0 {
            unsafe { dht22_terminate() };
            ACQUIRED.store(false, Ordering::SeqCst);
            return Err(HardwareError::ConfigIncompatible(format!(
                "DHT22 polling could not start on GPIO {pin} (rc {rc})"
            )));
        }

        info!(pin, "native DHT22 polling thread started");
        Ok(Self {
            released: AtomicBool::new(false),
        })
    }

    /// Latest cached reading, Celsius and percent relative humidity.
    /// `None` until the polling thread has seen its first valid frame.
    pub fn read(&self) -> Option<(f64, f64)> {
        if self.released.load(Ordering::SeqCst) {
            return None;
        }
        let mut temperature: c_float = 0.0;
        let mut humidity: c_float = 0.0;
        // SAFETY: both out-pointers are valid for the duration of the call.
        let rc = unsafe { dht22_get_last_valid_reading(&mut temperature, &mut humidity) };
        (rc == 0).then_some((f64::from(temperature), f64::from(humidity)))
    }

    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        // SAFETY: terminate is the designated shutdown call; it joins the
        // polling thread with a bounded timeout.
        unsafe { dht22_terminate() };
        ACQUIRED.store(false, Ordering::SeqCst);
        info!("native DHT22 polling thread terminated");
    }
}

impl Drop for NativeDht {
    fn drop(&mut self) {
        self.release();
    }
}
