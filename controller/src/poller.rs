use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use heatpump_common::{Hardware, Reading, SharedReadings};

use crate::clock::monotonic_ms;

/// Background sensor poller: asks the hardware layer for a sample on every
/// tick and publishes valid pairs to the shared slot. Failures are normal
/// until warm-up; afterwards a streak past the threshold is worth a warning.
pub fn spawn(
    hardware: Arc<dyn Hardware>,
    readings: Arc<SharedReadings>,
    poll_interval: Duration,
    failure_threshold: u32,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let hw = hardware.clone();
                    let sample = tokio::task::spawn_blocking(move || hw.read_sensor())
                        .await
                        .unwrap_or(None);

                    match sample {
                        Some(raw) => {
                            let reading = Reading {
                                temperature: round_to(raw.temperature, 10.0),
                                humidity: round_to(raw.humidity, 100.0),
                                observed_at: Utc::now(),
                                observed_at_ms: monotonic_ms(),
                            };
                            debug!(
                                temperature = reading.temperature,
                                humidity = reading.humidity,
                                "sensor reading published"
                            );
                            readings.publish(reading);
                        }
                        None => {
                            let (failures, warmed_up) = readings.record_failure();
                            if warmed_up && failures > failure_threshold {
                                warn!(failures, "sensor keeps failing past its tolerance");
                            } else {
                                debug!(failures, warmed_up, "sensor read failed");
                            }
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("sensor poller stopping");
                    break;
                }
            }
        }
    })
}

fn round_to(value: f64, scale: f64) -> f64 {
    (value * scale).round() / scale
}
