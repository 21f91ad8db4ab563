use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{error, info, warn};

use heatpump_common::{
    ControlEngine, DeviceConfig, RelayCommandSet, SetPointStore, SharedReadings,
};
use heatpump_controller::{api, hal, poller, tasks, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = config_path();
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(err) => {
            error!(path = %config_path.display(), "refusing to start: {err:#}");
            std::process::exit(2);
        }
    };
    info!(
        path = %config_path.display(),
        device_id = %config.device_id,
        deployment = ?config.deployment_type,
        "configuration loaded"
    );

    let commands = RelayCommandSet::parse(&config.relay_commands)
        .context("relay commands failed to parse after validation")?;

    let needs_relays = config.deployment_type.runs_control();
    let hardware = match hal::probe(&config, &commands, needs_relays) {
        Ok(hardware) => hardware,
        Err(err) => {
            error!("hardware probe failed: {err}");
            std::process::exit(1);
        }
    };

    let readings = Arc::new(SharedReadings::new());
    let set_point = Arc::new(SetPointStore::new(config.default_user_set_temperature));

    let engine = needs_relays.then(|| {
        Arc::new(Mutex::new(ControlEngine::new(
            hardware.clone(),
            commands.clone(),
            config.control_tuning(),
            readings.clone(),
            set_point.clone(),
        )))
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (mode_tx, mode_rx) = mpsc::channel(32);

    let client = telemetry::ServerClient::new(
        &config.vm_server,
        &config.device_id,
        config.http_retry_count,
    )?;

    let mut handles = Vec::new();
    {
        let client = client.clone();
        let set_point = set_point.clone();
        handles.push(tokio::spawn(async move {
            telemetry::boot_sync(&client, &set_point).await;
        }));
    }
    handles.push(poller::spawn(
        hardware.clone(),
        readings.clone(),
        Duration::from_secs(config.sensor_poll_interval_seconds),
        config.sensor_failure_threshold,
        shutdown_rx.clone(),
    ));
    handles.push(telemetry::spawn_data_publish(
        client.clone(),
        readings.clone(),
        Duration::from_secs(config.data_send_interval_seconds),
        shutdown_rx.clone(),
    ));
    handles.push(telemetry::spawn_mode_publish(
        client.clone(),
        mode_rx,
        shutdown_rx.clone(),
    ));
    handles.push(telemetry::spawn_heartbeat(client, shutdown_rx.clone()));

    let control_handle = engine.as_ref().map(|engine| {
        tasks::spawn_control_loop(
            engine.clone(),
            config.control_loop_interval_ms,
            mode_tx.clone(),
            shutdown_rx.clone(),
        )
    });

    let state = api::AppState {
        engine,
        readings,
        set_point,
        config: Arc::new(Mutex::new(config.clone())),
        config_path: Arc::new(config_path),
        mode_tx,
    };

    let addr = format!("{}:{}", config.api_host, config.api_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind local API at {addr}"))?;
    info!("local API listening on http://{addr}");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // Ordered teardown: the control loop asserts OFF and exits first, then
    // the remaining tasks, then the hardware handles are released.
    let _ = shutdown_tx.send(true);
    if let Some(handle) = control_handle {
        let _ = handle.await;
    }
    for handle in handles {
        let _ = handle.await;
    }
    hardware.cleanup();
    info!("shutdown complete");
    Ok(())
}

fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var("HEATPUMP_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("./heatpump.json"))
}

fn load_config(path: &Path) -> anyhow::Result<DeviceConfig> {
    let config = if path.exists() {
        let raw = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_slice::<DeviceConfig>(&raw).context("parsing configuration JSON")?
    } else {
        warn!(path = %path.display(), "configuration file not found; starting from defaults");
        DeviceConfig::default()
    };
    config.validate()?;
    Ok(config)
}
