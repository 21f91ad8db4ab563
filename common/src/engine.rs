use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::ControlTuning;
use crate::hardware::Hardware;
use crate::history::TemperatureHistory;
use crate::readings::SharedReadings;
use crate::relay::RelayCommandSet;
use crate::setpoint::SetPointStore;
use crate::types::{RelayMode, StatusSnapshot, TemperatureUnit, WireMode};

/// Minimum time in `Heating` before the strip-heat upgrade is considered.
const MIN_HEATING_RUN_BEFORE_UPGRADE_MS: u64 = 10 * 60 * 1000;

/// Minimum history span backing an upgrade decision.
const UPGRADE_HISTORY_MIN_SPAN_MS: u64 = 10 * 60 * 1000;

/// Poor performance must persist this long before the upgrade fires.
const POOR_PERF_CONFIRM_MS: u64 = 5 * 60 * 1000;

/// Heating rate the pump must sustain, by deficit below target.
fn required_rate_per_minute(deficit: f64) -> f64 {
    if deficit < 3.0 {
        0.04
    } else if deficit < 8.0 {
        0.09
    } else {
        0.15
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlState {
    Off,
    BetweenStates,
    FanOnly,
    Cooling {
        entered_at_ms: u64,
        entry_temperature: f64,
    },
    Heating {
        entered_at_ms: u64,
        entry_temperature: f64,
        poor_perf_since_ms: Option<u64>,
    },
    EmergencyHeat {
        entered_at_ms: u64,
        entry_temperature: f64,
    },
}

impl ControlState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::BetweenStates => "BETWEEN_STATES",
            Self::FanOnly => "FAN_ONLY",
            Self::Cooling { .. } => "COOLING",
            Self::Heating { .. } => "HEATING",
            Self::EmergencyHeat { .. } => "EMERGENCY_HEAT",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Off | Self::BetweenStates | Self::FanOnly)
    }

    pub fn is_active(&self) -> bool {
        !self.is_idle()
    }

    pub fn relay_mode(&self) -> RelayMode {
        match self {
            Self::Off | Self::BetweenStates => RelayMode::Off,
            Self::FanOnly => RelayMode::FanOnly,
            Self::Cooling { .. } => RelayMode::Cool,
            Self::Heating { .. } => RelayMode::Heat,
            Self::EmergencyHeat { .. } => RelayMode::Emergency,
        }
    }

    pub fn wire_mode(&self) -> WireMode {
        match self {
            Self::Off | Self::BetweenStates => WireMode::Off,
            Self::FanOnly => WireMode::Fan,
            Self::Cooling { .. } => WireMode::Cool,
            Self::Heating { .. } => WireMode::Heat,
            Self::EmergencyHeat { .. } => WireMode::Emergency,
        }
    }
}

/// What a tick (or an external operation) produced for the rest of the
/// system. Mode updates are forwarded to the telemetry client by the
/// caller; the engine itself never talks to the network.
#[derive(Debug, Default, Clone, Copy)]
pub struct TickOutcome {
    pub mode_update: Option<WireMode>,
    pub logic_fault: bool,
}

/// The closed-loop thermostat decision core. Ticked from a single periodic
/// task; every tick ends with a committed state, and errors never escape.
/// Relay writes through [`Hardware`] are its only I/O.
pub struct ControlEngine {
    hardware: Arc<dyn Hardware>,
    commands: RelayCommandSet,
    tuning: ControlTuning,
    readings: Arc<SharedReadings>,
    set_point: Arc<SetPointStore>,
    history: TemperatureHistory,
    state: ControlState,
    state_entered_at_ms: u64,
    fan_mode: bool,
    emergency_stop: bool,
    last_compressor_off_ms: Option<u64>,
    last_emitted_mode: Option<WireMode>,
}

impl ControlEngine {
    pub fn new(
        hardware: Arc<dyn Hardware>,
        commands: RelayCommandSet,
        tuning: ControlTuning,
        readings: Arc<SharedReadings>,
        set_point: Arc<SetPointStore>,
    ) -> Self {
        Self {
            hardware,
            commands,
            tuning,
            readings,
            set_point,
            history: TemperatureHistory::new(),
            state: ControlState::Off,
            state_entered_at_ms: 0,
            fan_mode: false,
            emergency_stop: false,
            last_compressor_off_ms: None,
            last_emitted_mode: None,
        }
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    pub fn fan_mode(&self) -> bool {
        self.fan_mode
    }

    pub fn emergency_stop(&self) -> bool {
        self.emergency_stop
    }

    pub fn set_tuning(&mut self, tuning: ControlTuning) {
        info!(
            threshold = tuning.temperature_difference_threshold,
            cooling_offset = tuning.cooling_offset,
            heating_offset = tuning.heating_offset,
            compressor_min_off_ms = tuning.compressor_min_off_ms,
            "control tuning updated"
        );
        self.tuning = tuning;
    }

    /// One pass of the decision loop.
    pub fn tick(&mut self, now_ms: u64) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        // Emergency stop dominates everything; OFF is re-asserted each tick.
        if self.emergency_stop {
            self.apply_relays(RelayMode::Off);
            if self.state != ControlState::Off {
                if self.state.is_active() {
                    self.last_compressor_off_ms = Some(now_ms);
                }
                self.set_state(ControlState::Off, now_ms, &mut outcome);
            }
            return outcome;
        }

        // Without a plausible reading the engine holds its last decision
        // and its last relay output.
        let Some(reading) = self.readings.current() else {
            warn!(state = self.state.name(), "tick skipped: no sensor reading");
            return outcome;
        };
        if reading.temperature <= 0.0 {
            warn!(
                temperature = reading.temperature,
                "tick skipped: implausible sensor reading"
            );
            return outcome;
        }
        let temp = reading.temperature;

        self.history.record(now_ms, temp);

        // Re-read every tick; the API may have moved it since the last one.
        let target = self.set_point.get();
        let diff = temp - target;
        let needs_cooling = diff > self.tuning.temperature_difference_threshold;
        let needs_heating = diff < -self.tuning.temperature_difference_threshold;
        let cooling_cutoff = target - self.tuning.cooling_offset;
        let heating_cutoff = target + self.tuning.heating_offset;

        // Cool-down gate: while the compressor rests, idle states may not
        // start a new cycle no matter the demand.
        if self.state.is_idle() && self.compressor_blocked(now_ms) {
            let idle = self.idle_state();
            if self.state == idle {
                self.apply_relays(idle.relay_mode());
            } else {
                self.set_state(idle, now_ms, &mut outcome);
            }
            return outcome;
        }

        match self.state {
            ControlState::Cooling { .. } => {
                if temp <= cooling_cutoff {
                    info!(temp, cutoff = cooling_cutoff, "cooling cut-off reached");
                    let idle = self.idle_state();
                    self.leave_active(now_ms, idle, &mut outcome);
                } else if needs_heating {
                    // Demand flipped mid-cycle; rest the compressor first.
                    info!(temp, target, "demand flipped to heating; resting compressor");
                    self.leave_active(now_ms, ControlState::BetweenStates, &mut outcome);
                } else {
                    self.apply_relays(RelayMode::Cool);
                }
                return outcome;
            }
            ControlState::Heating { .. } => {
                if temp >= heating_cutoff {
                    info!(temp, cutoff = heating_cutoff, "heating cut-off reached");
                    let idle = self.idle_state();
                    self.leave_active(now_ms, idle, &mut outcome);
                } else if self.heating_ineffective(now_ms, temp, target) {
                    // Upgrade in place: the compressor is already running,
                    // so no idle detour and no cool-down stamp.
                    warn!(
                        temp,
                        target,
                        rate = self.history.rate_per_minute(),
                        "heat pump cannot keep up; engaging emergency strip heat"
                    );
                    self.set_state(
                        ControlState::EmergencyHeat {
                            entered_at_ms: now_ms,
                            entry_temperature: temp,
                        },
                        now_ms,
                        &mut outcome,
                    );
                } else if needs_cooling {
                    info!(temp, target, "demand flipped to cooling; resting compressor");
                    self.leave_active(now_ms, ControlState::BetweenStates, &mut outcome);
                } else {
                    self.apply_relays(RelayMode::Heat);
                }
                return outcome;
            }
            ControlState::EmergencyHeat { .. } => {
                if temp >= heating_cutoff {
                    info!(temp, cutoff = heating_cutoff, "emergency heat cut-off reached");
                    let idle = self.idle_state();
                    self.leave_active(now_ms, idle, &mut outcome);
                } else if needs_cooling {
                    info!(temp, target, "demand flipped to cooling; resting compressor");
                    self.leave_active(now_ms, ControlState::BetweenStates, &mut outcome);
                } else {
                    self.apply_relays(RelayMode::Emergency);
                }
                return outcome;
            }
            ControlState::Off | ControlState::BetweenStates | ControlState::FanOnly => {}
        }

        // Idle, compressor free: settle in the stable band or open a cycle.
        if !needs_cooling && !needs_heating {
            if self.fan_mode && self.state != ControlState::FanOnly {
                self.set_state(ControlState::FanOnly, now_ms, &mut outcome);
            } else if !self.fan_mode && self.state == ControlState::FanOnly {
                self.set_state(ControlState::BetweenStates, now_ms, &mut outcome);
            } else {
                self.apply_relays(self.state.relay_mode());
            }
            return outcome;
        }

        if needs_cooling {
            self.set_state(
                ControlState::Cooling {
                    entered_at_ms: now_ms,
                    entry_temperature: temp,
                },
                now_ms,
                &mut outcome,
            );
            return outcome;
        }

        if needs_heating {
            self.set_state(
                ControlState::Heating {
                    entered_at_ms: now_ms,
                    entry_temperature: temp,
                    poor_perf_since_ms: None,
                },
                now_ms,
                &mut outcome,
            );
            return outcome;
        }

        // Safety net; no reachable input should land here.
        error!(
            state = self.state.name(),
            temp, target, "tick fell through every decision branch; forcing OFF"
        );
        self.set_state(ControlState::Off, now_ms, &mut outcome);
        outcome.logic_fault = true;
        outcome
    }

    /// Continuous-circulation flag. Idempotent; a no-op when the flag does
    /// not change. With the emergency stop engaged the flag is stored but
    /// no relay moves.
    pub fn set_fan_mode(&mut self, enabled: bool, now_ms: u64) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        if self.fan_mode == enabled {
            return outcome;
        }
        self.fan_mode = enabled;
        info!(enabled, "fan mode updated");
        if self.emergency_stop {
            return outcome;
        }
        if matches!(self.state, ControlState::Off | ControlState::BetweenStates) {
            let idle = self.idle_state();
            if self.state != idle {
                self.set_state(idle, now_ms, &mut outcome);
            }
        }
        outcome
    }

    /// Operator kill switch. Enabling forces OFF immediately; disabling
    /// changes nothing until the next tick re-decides.
    pub fn set_emergency_stop(&mut self, enabled: bool, now_ms: u64) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        if self.emergency_stop == enabled {
            return outcome;
        }
        self.emergency_stop = enabled;
        if enabled {
            warn!("emergency stop engaged; forcing OFF");
            if self.state.is_active() {
                self.last_compressor_off_ms = Some(now_ms);
            }
            if self.state != ControlState::Off {
                self.set_state(ControlState::Off, now_ms, &mut outcome);
            } else {
                self.apply_relays(RelayMode::Off);
            }
        } else {
            info!("emergency stop cleared; next tick re-evaluates demand");
        }
        outcome
    }

    /// Shutdown path: assert OFF and park the machine. Ticks stop arriving
    /// once the control loop observes cancellation.
    pub fn halt(&mut self, now_ms: u64) {
        if self.state.is_active() {
            self.last_compressor_off_ms = Some(now_ms);
        }
        self.apply_relays(RelayMode::Off);
        self.state = ControlState::Off;
        self.state_entered_at_ms = now_ms;
        info!("control engine halted");
    }

    pub fn remaining_cooldown_seconds(&self, now_ms: u64) -> u64 {
        let Some(off_ms) = self.last_compressor_off_ms else {
            return 0;
        };
        let elapsed = now_ms.saturating_sub(off_ms);
        self.tuning
            .compressor_min_off_ms
            .saturating_sub(elapsed)
            .div_ceil(1000)
    }

    pub fn state_time_seconds(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.state_entered_at_ms) / 1000
    }

    pub fn heating_time_seconds(&self, now_ms: u64) -> u64 {
        match self.state {
            ControlState::Heating { entered_at_ms, .. }
            | ControlState::EmergencyHeat { entered_at_ms, .. } => {
                now_ms.saturating_sub(entered_at_ms) / 1000
            }
            _ => 0,
        }
    }

    /// Rough ETA to the set point while a cycle runs; zero when idle or
    /// when the observed rate is too small to extrapolate from.
    pub fn estimated_seconds_to_target(&self) -> u64 {
        if !self.state.is_active() {
            return 0;
        }
        let Some(reading) = self.readings.current() else {
            return 0;
        };
        let rate = self.history.rate_per_minute();
        if rate.abs() < 0.005 {
            return 0;
        }
        let deficit = (self.set_point.get() - reading.temperature).abs();
        ((deficit / rate.abs()) * 60.0).round() as u64
    }

    pub fn rate_per_minute(&self) -> f64 {
        self.history.rate_per_minute()
    }

    /// Copy of the recent temperature samples for external readers.
    pub fn history_snapshot(&self) -> Vec<crate::history::HistorySample> {
        self.history.snapshot()
    }

    pub fn status(&self, now_ms: u64, unit: TemperatureUnit) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state.name(),
            mode: self.state.wire_mode(),
            reading: self.readings.current(),
            set_point: self.set_point.snapshot(),
            fan_mode: self.fan_mode,
            emergency_stop: self.emergency_stop,
            cooldown_remaining_sec: self.remaining_cooldown_seconds(now_ms),
            state_time_sec: self.state_time_seconds(now_ms),
            heating_time_sec: self.heating_time_seconds(now_ms),
            estimated_seconds_to_target: self.estimated_seconds_to_target(),
            rate_per_minute: self.history.rate_per_minute(),
            sensor: self.readings.stats(),
            unit: unit.label(),
        }
    }

    fn idle_state(&self) -> ControlState {
        if self.fan_mode {
            ControlState::FanOnly
        } else {
            ControlState::BetweenStates
        }
    }

    fn compressor_blocked(&self, now_ms: u64) -> bool {
        self.last_compressor_off_ms
            .map(|off_ms| now_ms.saturating_sub(off_ms) < self.tuning.compressor_min_off_ms)
            .unwrap_or(false)
    }

    fn apply_relays(&self, mode: RelayMode) {
        self.hardware.write_relay(self.commands.for_mode(mode).bytes());
    }

    /// Commits a transition: relay bytes first, then the state field, then
    /// the (deduplicated) mode event.
    fn set_state(&mut self, next: ControlState, now_ms: u64, outcome: &mut TickOutcome) {
        self.apply_relays(next.relay_mode());
        if matches!(
            next,
            ControlState::Heating { .. } | ControlState::EmergencyHeat { .. }
        ) {
            // Performance metrics start fresh for every heat cycle.
            self.history.clear();
        }
        debug!(from = self.state.name(), to = next.name(), "state transition");
        self.state = next;
        self.state_entered_at_ms = now_ms;
        let wire = next.wire_mode();
        if self.last_emitted_mode != Some(wire) {
            self.last_emitted_mode = Some(wire);
            outcome.mode_update = Some(wire);
        }
    }

    /// Leaves an active state toward an idle one. The cool-down stamp is
    /// written before the state field so readers always see a consistent
    /// pair.
    fn leave_active(&mut self, now_ms: u64, next_idle: ControlState, outcome: &mut TickOutcome) {
        self.last_compressor_off_ms = Some(now_ms);
        self.set_state(next_idle, now_ms, outcome);
    }

    /// The heat-pump performance test behind the strip-heat upgrade.
    /// Mutates the "first seen" marker inside the Heating state.
    fn heating_ineffective(&mut self, now_ms: u64, temp: f64, target: f64) -> bool {
        let span_ok =
            self.history.span_ms() >= UPGRADE_HISTORY_MIN_SPAN_MS && self.history.len() >= 2;
        let rate = self.history.rate_per_minute();
        let ControlState::Heating {
            entered_at_ms,
            poor_perf_since_ms,
            ..
        } = &mut self.state
        else {
            return false;
        };
        if now_ms.saturating_sub(*entered_at_ms) < MIN_HEATING_RUN_BEFORE_UPGRADE_MS || !span_ok {
            return false;
        }
        let deficit = target - temp;
        let required = required_rate_per_minute(deficit);
        if rate >= required {
            if poor_perf_since_ms.is_some() {
                info!(rate, required, "heating rate recovered; clearing poor-performance marker");
                *poor_perf_since_ms = None;
            }
            return false;
        }
        match *poor_perf_since_ms {
            None => {
                warn!(
                    rate,
                    required, deficit, "heating below required rate; confirming before upgrade"
                );
                *poor_perf_since_ms = Some(now_ms);
                false
            }
            Some(first_seen_ms) => now_ms.saturating_sub(first_seen_ms) >= POOR_PERF_CONFIRM_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;

    use super::*;
    use crate::hardware::RawReading;
    use crate::relay::RelayCommandsConfig;
    use crate::setpoint::SetPointSource;
    use crate::types::Reading;

    const MIN: u64 = 60 * 1000;

    const OFF: &[u8] = &[0x00];
    const FAN: &[u8] = &[0x01];
    const COOL: &[u8] = &[0x03];
    const HEAT: &[u8] = &[0x07];
    const EMERGENCY: &[u8] = &[0x09];

    #[derive(Default)]
    struct RecordingHardware {
        writes: Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingHardware {
        fn writes(&self) -> Vec<Vec<u8>> {
            self.writes.lock().unwrap().clone()
        }

        fn last_write(&self) -> Option<Vec<u8>> {
            self.writes.lock().unwrap().last().cloned()
        }
    }

    impl Hardware for RecordingHardware {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn write_relay(&self, command: &[u8]) {
            self.writes.lock().unwrap().push(command.to_vec());
        }

        fn read_sensor(&self) -> Option<RawReading> {
            None
        }

        fn cleanup(&self) {}
    }

    struct Harness {
        engine: ControlEngine,
        hardware: Arc<RecordingHardware>,
        readings: Arc<SharedReadings>,
        set_point: Arc<SetPointStore>,
    }

    impl Harness {
        fn new(target: f64, compressor_min_off_min: u64) -> Self {
            Self::with_tuning(
                target,
                ControlTuning {
                    temperature_difference_threshold: 1.3,
                    cooling_offset: 0.5,
                    heating_offset: 0.5,
                    compressor_min_off_ms: compressor_min_off_min * MIN,
                },
            )
        }

        fn with_tuning(target: f64, tuning: ControlTuning) -> Self {
            let hardware = Arc::new(RecordingHardware::default());
            let readings = Arc::new(SharedReadings::new());
            let set_point = Arc::new(SetPointStore::new(target));
            let commands = RelayCommandSet::parse(&RelayCommandsConfig::default()).unwrap();
            let engine = ControlEngine::new(
                hardware.clone(),
                commands,
                tuning,
                readings.clone(),
                set_point.clone(),
            );
            Self {
                engine,
                hardware,
                readings,
                set_point,
            }
        }

        fn feed(&self, now_ms: u64, temperature: f64) {
            self.readings.publish(Reading {
                temperature,
                humidity: 45.0,
                observed_at: Utc::now(),
                observed_at_ms: now_ms,
            });
        }

        fn tick_at(&mut self, now_ms: u64, temperature: f64) -> TickOutcome {
            self.feed(now_ms, temperature);
            self.engine.tick(now_ms)
        }
    }

    #[test]
    fn cooling_cycle_cuts_out_at_cutoff() {
        let mut h = Harness::new(70.0, 3);

        h.tick_at(0, 70.0);
        assert_eq!(h.engine.state_name(), "OFF");

        let outcome = h.tick_at(30_000, 72.5);
        assert_eq!(h.engine.state_name(), "COOLING");
        assert_eq!(outcome.mode_update, Some(WireMode::Cool));
        assert_eq!(h.hardware.last_write().unwrap(), COOL);

        h.tick_at(2 * MIN, 69.7);
        assert_eq!(h.engine.state_name(), "COOLING");

        let outcome = h.tick_at(3 * MIN, 69.4);
        assert_eq!(h.engine.state_name(), "BETWEEN_STATES");
        assert_eq!(outcome.mode_update, Some(WireMode::Off));
        assert_eq!(h.hardware.last_write().unwrap(), OFF);
        assert_eq!(h.engine.remaining_cooldown_seconds(3 * MIN), 180);
    }

    #[test]
    fn cooldown_blocks_restart_until_elapsed() {
        let mut h = Harness::new(70.0, 3);
        h.tick_at(0, 70.0);
        h.tick_at(30_000, 72.5);
        h.tick_at(3 * MIN, 69.4);
        assert_eq!(h.engine.state_name(), "BETWEEN_STATES");

        // Demand is back but the compressor has only rested 30 seconds.
        h.tick_at(3 * MIN + 30_000, 72.6);
        assert_eq!(h.engine.state_name(), "BETWEEN_STATES");
        assert_eq!(h.hardware.last_write().unwrap(), OFF);

        h.tick_at(6 * MIN + 1_000, 72.6);
        assert_eq!(h.engine.state_name(), "COOLING");
    }

    #[test]
    fn cutoff_is_inclusive() {
        let mut h = Harness::new(70.0, 3);
        h.tick_at(0, 72.5);
        assert_eq!(h.engine.state_name(), "COOLING");

        // Exactly the cut-off temperature ends the cycle.
        h.tick_at(MIN, 69.5);
        assert_eq!(h.engine.state_name(), "BETWEEN_STATES");
    }

    #[test]
    fn dead_band_is_strict() {
        let mut h = Harness::new(70.0, 3);

        h.tick_at(0, 71.3);
        assert_eq!(h.engine.state_name(), "OFF");

        h.tick_at(MIN, 68.7);
        assert_eq!(h.engine.state_name(), "OFF");

        h.tick_at(2 * MIN, 71.301);
        assert_eq!(h.engine.state_name(), "COOLING");
    }

    #[test]
    fn heating_upgrades_to_emergency_in_place() {
        let mut h = Harness::new(72.0, 3);

        h.tick_at(0, 65.0);
        assert_eq!(h.engine.state_name(), "HEATING");

        // Pump limps along at 0.05°/min against a 6+° deficit (needs 0.09).
        // History starts at t=1min: entry clears the queue.
        for minute in 1..=15 {
            h.tick_at(minute * MIN, 65.0 + 0.05 * minute as f64);
            assert_eq!(h.engine.state_name(), "HEATING", "minute {minute}");
        }

        // Marker was stored at t=11min (first tick with >=10min of history);
        // five minutes later the strip heat engages without an idle detour.
        let outcome = h.tick_at(16 * MIN, 65.8);
        assert_eq!(h.engine.state_name(), "EMERGENCY_HEAT");
        assert_eq!(outcome.mode_update, Some(WireMode::Emergency));

        let writes = h.hardware.writes();
        let first_emergency = writes.iter().position(|w| w == EMERGENCY).unwrap();
        assert_eq!(writes[first_emergency - 1], HEAT, "no OFF between heat and strip heat");
    }

    #[test]
    fn recovery_clears_upgrade_marker() {
        let mut h = Harness::new(72.0, 3);
        h.tick_at(0, 65.0);
        for minute in 1..=11 {
            h.tick_at(minute * MIN, 65.0 + 0.05 * minute as f64);
        }
        // Marker is set at t=11min. A burst of real progress clears it.
        h.tick_at(12 * MIN, 67.0);
        assert_eq!(h.engine.state_name(), "HEATING");

        // Performance degrades again; the five-minute clock restarts.
        for minute in 13..=17 {
            h.tick_at(minute * MIN, 65.6 + 0.01 * minute as f64);
            assert_eq!(h.engine.state_name(), "HEATING", "minute {minute}");
        }
        h.tick_at(18 * MIN, 65.8);
        assert_eq!(h.engine.state_name(), "EMERGENCY_HEAT");
    }

    #[test]
    fn emergency_stop_overrides_fan_and_recovers() {
        let mut h = Harness::new(70.0, 3);
        h.engine.set_fan_mode(true, 0);
        assert_eq!(h.engine.state_name(), "FAN_ONLY");
        assert_eq!(h.hardware.last_write().unwrap(), FAN);

        h.engine.set_emergency_stop(true, MIN);
        assert_eq!(h.engine.state_name(), "OFF");
        assert_eq!(h.hardware.last_write().unwrap(), OFF);

        // Ticks keep re-asserting OFF while stopped.
        h.tick_at(2 * MIN, 75.0);
        assert_eq!(h.engine.state_name(), "OFF");
        assert_eq!(h.hardware.last_write().unwrap(), OFF);

        h.engine.set_emergency_stop(false, 3 * MIN);
        assert_eq!(h.engine.state_name(), "OFF");

        // Stable band: circulation resumes.
        h.tick_at(4 * MIN, 70.0);
        assert_eq!(h.engine.state_name(), "FAN_ONLY");

        // With a cooling deficit instead, a fresh cycle opens (the
        // compressor never ran, so nothing blocks it).
        let mut h2 = Harness::new(70.0, 3);
        h2.engine.set_fan_mode(true, 0);
        h2.engine.set_emergency_stop(true, MIN);
        h2.engine.set_emergency_stop(false, 2 * MIN);
        h2.tick_at(3 * MIN, 72.6);
        assert_eq!(h2.engine.state_name(), "COOLING");
    }

    #[test]
    fn no_reading_keeps_engine_off_forever() {
        let mut h = Harness::new(70.0, 3);
        for minute in 0..10 {
            h.engine.tick(minute * MIN);
        }
        assert_eq!(h.engine.state_name(), "OFF");
        assert!(h.hardware.writes().is_empty(), "no relay output without data");
    }

    #[test]
    fn implausible_reading_is_ignored() {
        let mut h = Harness::new(70.0, 3);
        h.tick_at(0, 72.6);
        assert_eq!(h.engine.state_name(), "COOLING");

        // A zero/negative reading holds the current state.
        h.tick_at(MIN, 0.0);
        assert_eq!(h.engine.state_name(), "COOLING");
        h.tick_at(2 * MIN, -12.0);
        assert_eq!(h.engine.state_name(), "COOLING");
    }

    #[test]
    fn fan_mode_is_idempotent() {
        let mut h = Harness::new(70.0, 3);
        let outcome = h.engine.set_fan_mode(true, 0);
        assert_eq!(outcome.mode_update, Some(WireMode::Fan));
        let writes_before = h.hardware.writes().len();

        let outcome = h.engine.set_fan_mode(true, MIN);
        assert!(outcome.mode_update.is_none());
        assert_eq!(h.engine.state_name(), "FAN_ONLY");
        assert_eq!(h.hardware.writes().len(), writes_before);
    }

    #[test]
    fn fan_mode_respects_emergency_stop() {
        let mut h = Harness::new(70.0, 3);
        h.engine.set_emergency_stop(true, 0);
        let writes_before = h.hardware.writes().len();

        let outcome = h.engine.set_fan_mode(true, MIN);
        assert!(outcome.mode_update.is_none());
        assert!(h.engine.fan_mode());
        assert_eq!(h.engine.state_name(), "OFF");
        assert_eq!(h.hardware.writes().len(), writes_before, "no relay touched");
    }

    #[test]
    fn consecutive_off_modes_are_deduplicated() {
        let mut h = Harness::new(70.0, 3);
        h.tick_at(0, 72.6);
        let outcome = h.tick_at(3 * MIN, 69.4);
        assert_eq!(outcome.mode_update, Some(WireMode::Off));

        // BetweenStates -> Off is a state change but the wire mode is the
        // same; nothing new goes to the server.
        let outcome = h.engine.set_emergency_stop(true, 4 * MIN);
        assert_eq!(h.engine.state_name(), "OFF");
        assert!(outcome.mode_update.is_none());
    }

    #[test]
    fn set_point_changes_apply_on_next_tick() {
        let mut h = Harness::new(70.0, 3);
        h.tick_at(0, 70.0);
        assert_eq!(h.engine.state_name(), "OFF");

        h.set_point.set(66.0, SetPointSource::User);
        h.tick_at(MIN, 70.0);
        assert_eq!(h.engine.state_name(), "COOLING");
    }

    #[test]
    fn demand_flip_mid_cycle_rests_compressor() {
        // A lax heating cut-off leaves room for the dead-band to flip the
        // demand while the pump still runs.
        let mut h = Harness::with_tuning(
            70.0,
            ControlTuning {
                temperature_difference_threshold: 1.3,
                cooling_offset: 0.5,
                heating_offset: 3.0,
                compressor_min_off_ms: 3 * MIN,
            },
        );
        h.tick_at(0, 65.0);
        assert_eq!(h.engine.state_name(), "HEATING");

        h.tick_at(MIN, 71.5);
        assert_eq!(h.engine.state_name(), "BETWEEN_STATES");
        assert_eq!(h.hardware.last_write().unwrap(), OFF);
        assert!(h.engine.remaining_cooldown_seconds(MIN) > 0);
    }

    #[test]
    fn emergency_heat_cuts_out_and_cooldown_applies() {
        let mut h = Harness::new(72.0, 3);
        h.tick_at(0, 65.0);
        for minute in 1..=16 {
            h.tick_at(minute * MIN, 65.0 + 0.05 * minute as f64);
        }
        assert_eq!(h.engine.state_name(), "EMERGENCY_HEAT");

        h.tick_at(17 * MIN, 72.5);
        assert_eq!(h.engine.state_name(), "BETWEEN_STATES");
        assert_eq!(h.engine.remaining_cooldown_seconds(17 * MIN), 180);

        // Cool-down gates the next heating start too.
        h.tick_at(18 * MIN, 65.0);
        assert_eq!(h.engine.state_name(), "BETWEEN_STATES");
        h.tick_at(21 * MIN, 65.0);
        assert_eq!(h.engine.state_name(), "HEATING");
    }

    #[test]
    fn fan_flag_settles_idle_states_between_ticks() {
        let mut h = Harness::new(70.0, 3);
        h.tick_at(0, 70.0);
        assert_eq!(h.engine.state_name(), "OFF");

        h.engine.set_fan_mode(true, MIN);
        assert_eq!(h.engine.state_name(), "FAN_ONLY");

        // Turning the fan off from FanOnly waits for the next tick.
        h.engine.set_fan_mode(false, 2 * MIN);
        assert_eq!(h.engine.state_name(), "FAN_ONLY");
        h.tick_at(3 * MIN, 70.0);
        assert_eq!(h.engine.state_name(), "BETWEEN_STATES");
    }

    #[test]
    fn estimated_time_to_target_tracks_rate() {
        let mut h = Harness::new(70.0, 3);
        h.tick_at(0, 73.0);
        assert_eq!(h.engine.state_name(), "COOLING");

        // 0.5°/min of progress, 2° left at t=2min.
        h.tick_at(MIN, 72.5);
        h.tick_at(2 * MIN, 72.0);
        assert_eq!(h.engine.estimated_seconds_to_target(), 240);

        // Idle states report zero.
        let idle = Harness::new(70.0, 3);
        assert_eq!(idle.engine.estimated_seconds_to_target(), 0);
    }

    #[test]
    fn halt_parks_the_machine_off() {
        let mut h = Harness::new(70.0, 3);
        h.tick_at(0, 72.6);
        assert_eq!(h.engine.state_name(), "COOLING");

        h.engine.halt(MIN);
        assert_eq!(h.engine.state_name(), "OFF");
        assert_eq!(h.hardware.last_write().unwrap(), OFF);
        assert!(h.engine.remaining_cooldown_seconds(MIN) > 0);
    }

    #[test]
    fn status_reflects_committed_state() {
        let mut h = Harness::new(70.0, 3);
        h.tick_at(0, 72.6);
        let status = h.engine.status(30_000, TemperatureUnit::F);
        assert_eq!(status.state, "COOLING");
        assert_eq!(status.mode, WireMode::Cool);
        assert_eq!(status.set_point.target, 70.0);
        assert_eq!(status.state_time_sec, 30);
        assert_eq!(status.unit, "°F");
        assert!(!status.emergency_stop);
        assert_eq!(status.reading.unwrap().temperature, 72.6);
    }

    #[test]
    fn history_window_is_bounded_through_long_runs() {
        let mut h = Harness::new(70.0, 3);
        // An hour of ticks in the stable band; the queue must never hold
        // anything older than the window.
        for minute in 0..60 {
            h.tick_at(minute * MIN, 70.0 + (minute % 3) as f64 * 0.1);
            let now_ms = minute * MIN;
            for sample in h.engine.history_snapshot() {
                assert!(now_ms - sample.at_ms <= crate::history::HISTORY_WINDOW_MS);
            }
        }
        assert!(h.engine.history_snapshot().len() <= 16);
    }

    #[test]
    fn cooldown_gate_keeps_fan_running() {
        let mut h = Harness::new(70.0, 3);
        h.engine.set_fan_mode(true, 0);
        h.tick_at(0, 72.6);
        assert_eq!(h.engine.state_name(), "COOLING");

        // Cut-off lands in FanOnly; the gate must hold circulation, not
        // drop to BetweenStates, while the compressor rests.
        h.tick_at(2 * MIN, 69.5);
        assert_eq!(h.engine.state_name(), "FAN_ONLY");

        h.tick_at(3 * MIN, 72.6);
        assert_eq!(h.engine.state_name(), "FAN_ONLY");
        assert_eq!(h.hardware.last_write().unwrap(), FAN);

        h.tick_at(5 * MIN + 1_000, 72.6);
        assert_eq!(h.engine.state_name(), "COOLING");
    }

    #[test]
    fn negligible_rate_yields_no_eta() {
        let mut h = Harness::new(70.0, 3);
        h.tick_at(0, 72.6);
        // Flat readings: no extrapolation to offer.
        h.tick_at(MIN, 72.6);
        h.tick_at(2 * MIN, 72.6);
        assert_eq!(h.engine.state_name(), "COOLING");
        assert_eq!(h.engine.estimated_seconds_to_target(), 0);
    }

    #[test]
    fn required_rate_tiers() {
        assert_eq!(required_rate_per_minute(1.0), 0.04);
        assert_eq!(required_rate_per_minute(2.999), 0.04);
        assert_eq!(required_rate_per_minute(3.0), 0.09);
        assert_eq!(required_rate_per_minute(7.999), 0.09);
        assert_eq!(required_rate_per_minute(8.0), 0.15);
        assert_eq!(required_rate_per_minute(12.0), 0.15);
    }
}
