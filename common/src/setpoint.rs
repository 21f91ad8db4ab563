use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

/// Where the current target temperature came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SetPointSource {
    Default,
    Server,
    User,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SetPoint {
    pub target: f64,
    pub source: SetPointSource,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// Thread-safe holder for the user's target temperature. Seeded from the
/// configured default; the boot settings fetch may override it once, and
/// afterwards only the local API mutates it.
#[derive(Debug)]
pub struct SetPointStore {
    cell: Mutex<SetPoint>,
}

impl SetPointStore {
    pub fn new(default_target: f64) -> Self {
        Self {
            cell: Mutex::new(SetPoint {
                target: default_target,
                source: SetPointSource::Default,
                updated_at: Utc::now(),
            }),
        }
    }

    pub fn get(&self) -> f64 {
        self.cell.lock().expect("set-point lock poisoned").target
    }

    pub fn snapshot(&self) -> SetPoint {
        *self.cell.lock().expect("set-point lock poisoned")
    }

    pub fn set(&self, target: f64, source: SetPointSource) {
        let mut cell = self.cell.lock().expect("set-point lock poisoned");
        info!(target, ?source, previous = cell.target, "set point updated");
        *cell = SetPoint {
            target,
            source,
            updated_at: Utc::now(),
        };
    }
}
