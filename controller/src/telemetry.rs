use std::future::Future;
use std::net::{IpAddr, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use heatpump_common::{SetPointSource, SetPointStore, SharedReadings, WireMode};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// The boot settings fetch gets a fixed budget regardless of the general
/// retry count; after that the configured default stands.
const SETPOINT_FETCH_ATTEMPTS: u32 = 3;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
const MAX_FAILURES_BEFORE_WARN: u32 = 5;
const REWARN_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// HTTP client for the coordinating server. Everything here is
/// best-effort: the control loop never waits on any of it.
#[derive(Debug, Clone)]
pub struct ServerClient {
    http: Client,
    base_url: String,
    device_id: String,
    retry_count: u32,
}

#[derive(Debug, Deserialize)]
pub struct DeviceSettings {
    pub set_temperature: f64,
    #[serde(default)]
    pub mode: String,
}

#[derive(Debug, Serialize)]
struct DataPayload<'a> {
    device_id: &'a str,
    temperature: f64,
    humidity: f64,
}

#[derive(Debug, Serialize)]
struct ModePayload<'a> {
    device_id: &'a str,
    mode: &'a str,
}

#[derive(Debug, Serialize)]
struct RegisterPayload<'a> {
    device_id: &'a str,
    ip: String,
}

impl ServerClient {
    pub fn new(base_url: &str, device_id: &str, retry_count: u32) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            device_id: device_id.to_string(),
            retry_count,
        })
    }

    pub async fn fetch_settings(&self) -> reqwest::Result<DeviceSettings> {
        let url = format!("{}/api/device/{}/settings", self.base_url, self.device_id);
        self.http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    pub async fn send_data(&self, temperature: f64, humidity: f64) -> reqwest::Result<()> {
        let url = format!("{}/api/receive_data", self.base_url);
        self.http
            .post(&url)
            .json(&DataPayload {
                device_id: &self.device_id,
                temperature,
                humidity,
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn send_mode(&self, mode: WireMode) -> reqwest::Result<()> {
        let url = format!("{}/api/update_mode", self.base_url);
        self.http
            .post(&url)
            .json(&ModePayload {
                device_id: &self.device_id,
                mode: mode.as_str(),
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn register(&self, ip: IpAddr) -> reqwest::Result<()> {
        let url = format!("{}/api/devices/register", self.base_url);
        self.http
            .post(&url)
            .json(&RegisterPayload {
                device_id: &self.device_id,
                ip: ip.to_string(),
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn heartbeat(&self, ip: IpAddr) -> reqwest::Result<()> {
        let url = format!(
            "{}/api/devices/{}/heartbeat?ip={}",
            self.base_url, self.device_id, ip
        );
        self.http.post(&url).send().await?.error_for_status()?;
        Ok(())
    }

    pub async fn send_data_with_retries(
        &self,
        temperature: f64,
        humidity: f64,
    ) -> reqwest::Result<()> {
        with_retries(self.retry_count, || self.send_data(temperature, humidity)).await
    }

    pub async fn send_mode_with_retries(&self, mode: WireMode) -> reqwest::Result<()> {
        with_retries(self.retry_count, || self.send_mode(mode)).await
    }
}

async fn with_retries<T, F, Fut>(retries: u32, mut operation: F) -> reqwest::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = reqwest::Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt > retries {
                    return Err(err);
                }
                debug!(attempt, %err, "server request failed; backing off");
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
        }
    }
}

/// One-shot boot task: register the device, then try to pull the server's
/// set point. Every failure here is survivable; the configured default
/// keeps the engine running.
pub async fn boot_sync(client: &ServerClient, set_point: &SetPointStore) {
    match local_lan_ip() {
        Some(ip) => {
            if let Err(err) = client.register(ip).await {
                warn!(%err, "device registration failed; continuing without it");
            }
        }
        None => debug!("no LAN address available; skipping registration"),
    }

    for attempt in 1..=SETPOINT_FETCH_ATTEMPTS {
        match client.fetch_settings().await {
            Ok(settings) => {
                info!(
                    set_temperature = settings.set_temperature,
                    mode = %settings.mode,
                    "seeded set point from server"
                );
                set_point.set(settings.set_temperature, SetPointSource::Server);
                return;
            }
            Err(err) => {
                warn!(attempt, %err, "server settings fetch failed");
                if attempt < SETPOINT_FETCH_ATTEMPTS {
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
            }
        }
    }
    info!("server settings unavailable; keeping the configured default set point");
}

/// Periodic sensor-data publisher.
pub fn spawn_data_publish(
    client: ServerClient,
    readings: Arc<SharedReadings>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(reading) = readings.current() else {
                        debug!("no sensor reading to publish yet");
                        continue;
                    };
                    if let Err(err) = client
                        .send_data_with_retries(reading.temperature, reading.humidity)
                        .await
                    {
                        warn!(%err, "giving up on data publish until the next interval");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

/// Publishes mode changes, deduplicated against the last mode the server
/// actually received.
pub fn spawn_mode_publish(
    client: ServerClient,
    mut mode_rx: mpsc::Receiver<WireMode>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_sent: Option<WireMode> = None;
        loop {
            tokio::select! {
                maybe_mode = mode_rx.recv() => {
                    let Some(mode) = maybe_mode else { break };
                    if last_sent == Some(mode) {
                        debug!(mode = mode.as_str(), "mode unchanged on the wire; not publishing");
                        continue;
                    }
                    match client.send_mode_with_retries(mode).await {
                        Ok(()) => {
                            info!(mode = mode.as_str(), "mode update published");
                            last_sent = Some(mode);
                        }
                        Err(err) => warn!(%err, "mode update dropped after retries"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

/// One-minute heartbeat carrying the device's LAN address. Transient drops
/// stay quiet; a sustained outage warns once, then every half hour.
pub fn spawn_heartbeat(client: ServerClient, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        let mut tracker = HeartbeatTracker::default();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(ip) = local_lan_ip() else {
                        debug!("no LAN address available for heartbeat");
                        continue;
                    };
                    match client.heartbeat(ip).await {
                        Ok(()) => tracker.record_success(),
                        Err(err) => {
                            if tracker.record_failure(Instant::now()) {
                                warn!(
                                    consecutive = tracker.consecutive(),
                                    %err,
                                    "heartbeat has been failing"
                                );
                            } else {
                                debug!(%err, "heartbeat failed");
                            }
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

/// Decides when consecutive heartbeat failures deserve a warning: once at
/// the threshold, again every 30 minutes while the outage lasts.
#[derive(Debug, Default)]
pub struct HeartbeatTracker {
    consecutive: u32,
    last_warned_at: Option<Instant>,
}

impl HeartbeatTracker {
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
        self.last_warned_at = None;
    }

    pub fn record_failure(&mut self, now: Instant) -> bool {
        self.consecutive = self.consecutive.saturating_add(1);
        if self.consecutive < MAX_FAILURES_BEFORE_WARN {
            return false;
        }
        match self.last_warned_at {
            None => {
                self.last_warned_at = Some(now);
                true
            }
            Some(previous) if now.duration_since(previous) >= REWARN_INTERVAL => {
                self.last_warned_at = Some(now);
                true
            }
            Some(_) => false,
        }
    }
}

/// Which source address reaches the wider network; the socket is never
/// actually written to.
pub fn local_lan_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).ok()?;
    socket.connect(("8.8.8.8", 80)).ok()?;
    Some(socket.local_addr().ok()?.ip())
}
