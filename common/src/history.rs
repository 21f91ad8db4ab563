use std::collections::VecDeque;

use serde::Serialize;

/// How far back samples are retained. Everything older is dropped on the
/// next insertion.
pub const HISTORY_WINDOW_MS: u64 = 15 * 60 * 1000;

/// Minimum span before a rate is considered meaningful.
const MIN_RATE_SPAN_MS: u64 = 30 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistorySample {
    #[serde(rename = "atMs")]
    pub at_ms: u64,
    pub temperature: f64,
}

/// Bounded FIFO of recent temperature samples, used to estimate how fast
/// the space is actually heating or cooling. Written only by the engine
/// tick; readers take snapshots.
#[derive(Debug, Default)]
pub struct TemperatureHistory {
    samples: VecDeque<HistorySample>,
}

impl TemperatureHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, now_ms: u64, temperature: f64) {
        let horizon = now_ms.saturating_sub(HISTORY_WINDOW_MS);
        while self
            .samples
            .front()
            .is_some_and(|sample| sample.at_ms < horizon)
        {
            self.samples.pop_front();
        }
        self.samples.push_back(HistorySample {
            at_ms: now_ms,
            temperature,
        });
    }

    /// Observed temperature change per minute across the window. Zero when
    /// there is not enough data to say anything useful.
    pub fn rate_per_minute(&self) -> f64 {
        let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        if self.samples.len() < 2 {
            return 0.0;
        }
        let span_ms = last.at_ms.saturating_sub(first.at_ms);
        if span_ms < MIN_RATE_SPAN_MS {
            return 0.0;
        }
        (last.temperature - first.temperature) / (span_ms as f64 / 60_000.0)
    }

    pub fn span_ms(&self) -> u64 {
        match (self.samples.front(), self.samples.back()) {
            (Some(first), Some(last)) => last.at_ms.saturating_sub(first.at_ms),
            _ => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn snapshot(&self) -> Vec<HistorySample> {
        self.samples.iter().copied().collect()
    }
}
