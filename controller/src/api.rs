use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use heatpump_common::{
    ControlEngine, DeviceConfig, SetPointSource, SetPointStore, SharedReadings, TemperatureUnit,
    WireMode,
};

use crate::clock::monotonic_ms;
use crate::tasks::forward_outcome;

/// Everything the HTTP layer needs; cheap to clone per request. The shim
/// stays thin: each handler is one parse, one core operation, one status
/// body.
#[derive(Clone)]
pub struct AppState {
    pub engine: Option<Arc<Mutex<ControlEngine>>>,
    pub readings: Arc<SharedReadings>,
    pub set_point: Arc<SetPointStore>,
    pub config: Arc<Mutex<DeviceConfig>>,
    pub config_path: Arc<PathBuf>,
    pub mode_tx: mpsc::Sender<WireMode>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Tunable subset accepted by `PUT /api/config`. Cadence keys take effect
/// on the next restart; thresholds apply to the running engine at once.
#[derive(Debug, Deserialize)]
pub struct ConfigUpdate {
    pub cooling_offset: Option<f64>,
    pub heating_offset: Option<f64>,
    pub temperature_difference_threshold: Option<f64>,
    pub compressor_min_off_minutes: Option<u64>,
    pub sensor_poll_interval_seconds: Option<u64>,
    pub data_send_interval_seconds: Option<u64>,
    pub default_user_set_temperature: Option<f64>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/history", get(handle_get_history))
        .route("/api/set_temperature", post(handle_set_temperature))
        .route("/api/fan", post(handle_set_fan))
        .route("/api/emergency_stop", post(handle_set_emergency_stop))
        .route("/api/config", get(handle_get_config).put(handle_put_config))
        .with_state(state)
}

async fn handle_get_status(State(state): State<AppState>) -> Response {
    let unit = { state.config.lock().await.temperature_unit };
    match &state.engine {
        Some(engine) => {
            let status = engine.lock().await.status(monotonic_ms(), unit);
            Json(status).into_response()
        }
        None => {
            // Probe roles carry no control engine; report the sensor side.
            let payload = serde_json::json!({
                "state": "PROBE",
                "reading": state.readings.current(),
                "setPoint": state.set_point.snapshot(),
                "sensor": state.readings.stats(),
                "unit": unit.label(),
            });
            Json(payload).into_response()
        }
    }
}

async fn handle_get_history(State(state): State<AppState>) -> Response {
    let Some(engine) = &state.engine else {
        return error_response(StatusCode::CONFLICT, "This role does not run the control loop");
    };
    let engine = engine.lock().await;
    let payload = serde_json::json!({
        "samples": engine.history_snapshot(),
        "ratePerMinute": engine.rate_per_minute(),
    });
    Json(payload).into_response()
}

async fn handle_set_temperature(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Ok(target) = value.parse::<f64>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value");
    };

    let unit = { state.config.lock().await.temperature_unit };
    let range = match unit {
        TemperatureUnit::F => 40.0..=95.0,
        TemperatureUnit::C => 4.0..=35.0,
    };
    if !target.is_finite() || !range.contains(&target) {
        return error_response(StatusCode::BAD_REQUEST, "Temperature out of range");
    }

    state.set_point.set(target, SetPointSource::User);
    handle_get_status(State(state)).await
}

async fn handle_set_fan(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(enabled) = params.get("value").and_then(|value| parse_switch(value)) else {
        return error_response(StatusCode::BAD_REQUEST, "Expected value=on or value=off");
    };
    let Some(engine) = &state.engine else {
        return error_response(StatusCode::CONFLICT, "This role does not control relays");
    };

    let outcome = engine.lock().await.set_fan_mode(enabled, monotonic_ms());
    forward_outcome(&state.mode_tx, outcome);
    handle_get_status(State(state)).await
}

async fn handle_set_emergency_stop(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(enabled) = params.get("value").and_then(|value| parse_switch(value)) else {
        return error_response(StatusCode::BAD_REQUEST, "Expected value=on or value=off");
    };
    let Some(engine) = &state.engine else {
        return error_response(StatusCode::CONFLICT, "This role does not control relays");
    };

    let outcome = engine
        .lock()
        .await
        .set_emergency_stop(enabled, monotonic_ms());
    forward_outcome(&state.mode_tx, outcome);
    handle_get_status(State(state)).await
}

async fn handle_get_config(State(state): State<AppState>) -> Response {
    let config = state.config.lock().await.clone();
    Json(config).into_response()
}

async fn handle_put_config(
    State(state): State<AppState>,
    Json(update): Json<ConfigUpdate>,
) -> Response {
    let mut updated = { state.config.lock().await.clone() };
    apply_update(&mut updated, &update);

    if let Err(err) = updated.validate() {
        return error_response(StatusCode::BAD_REQUEST, &err.to_string());
    }

    {
        let mut config = state.config.lock().await;
        *config = updated.clone();
    }
    if let Some(engine) = &state.engine {
        engine.lock().await.set_tuning(updated.control_tuning());
    }

    if let Err(err) = persist_config(&state.config_path, &updated).await {
        warn!(%err, "failed to persist configuration update");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist configuration",
        );
    }

    Json(updated).into_response()
}

fn apply_update(config: &mut DeviceConfig, update: &ConfigUpdate) {
    if let Some(value) = update.cooling_offset {
        config.cooling_offset = value;
    }
    if let Some(value) = update.heating_offset {
        config.heating_offset = value;
    }
    if let Some(value) = update.temperature_difference_threshold {
        config.temperature_difference_threshold = value;
    }
    if let Some(value) = update.compressor_min_off_minutes {
        config.compressor_min_off_minutes = value;
    }
    if let Some(value) = update.sensor_poll_interval_seconds {
        config.sensor_poll_interval_seconds = value;
    }
    if let Some(value) = update.data_send_interval_seconds {
        config.data_send_interval_seconds = value;
    }
    if let Some(value) = update.default_user_set_temperature {
        config.default_user_set_temperature = value;
    }
}

async fn persist_config(path: &PathBuf, config: &DeviceConfig) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let payload = serde_json::to_vec_pretty(config)?;
    tokio::fs::write(path, payload).await?;
    Ok(())
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
