use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use heatpump_common::{ControlEngine, TickOutcome, WireMode};

use crate::clock::monotonic_ms;

/// The single control-tick task. Ticks come from one interval on one task,
/// so they can never overlap; on shutdown the engine asserts OFF before
/// the task exits.
pub fn spawn_control_loop(
    engine: Arc<Mutex<ControlEngine>>,
    interval_ms: u64,
    mode_tx: mpsc::Sender<WireMode>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let outcome = {
                        let mut engine = engine.lock().await;
                        engine.tick(monotonic_ms())
                    };
                    forward_outcome(&mode_tx, outcome);
                }
                _ = shutdown.changed() => {
                    let mut engine = engine.lock().await;
                    engine.halt(monotonic_ms());
                    info!("control loop stopped");
                    break;
                }
            }
        }
    })
}

/// Routes an engine outcome to the telemetry side. Shared by the control
/// loop and the API handlers that mutate the engine directly.
pub fn forward_outcome(mode_tx: &mpsc::Sender<WireMode>, outcome: TickOutcome) {
    if outcome.logic_fault {
        error!("control engine reported a logic fault; relays were forced OFF");
    }
    if let Some(mode) = outcome.mode_update {
        if let Err(err) = mode_tx.try_send(mode) {
            warn!(%err, "mode update dropped: telemetry queue is full");
        }
    }
}
