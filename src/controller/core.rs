//! # Controller Core
//!
//! State shared by every PLC kind: register maps, timers, counters and the
//! alarm log. Kind-specific logic only sees this through `&mut ControllerCore`
//! during its own scan, so one controller can never touch another's alarms.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{Alarm, OutputMap, Quality, SensorReadings, Severity, Value};

/// Faults raised by controller hooks; converted into a scan-error alarm.
#[derive(Debug, Error)]
pub enum LogicError {
    #[error("input {address} holds {found}, expected {expected}")]
    TypeMismatch {
        address: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("invalid controller state: {0}")]
    InvalidState(String),
}

/// Where an input value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSource {
    Sensor,
    Command,
    Default,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputRegister {
    pub value: Value,
    pub timestamp: DateTime<Utc>,
    pub quality: Quality,
    pub source: InputSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputRegister {
    pub value: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timer {
    pub start_time: DateTime<Utc>,
    pub preset: Duration,
    pub done: bool,
}

#[derive(Debug, Clone)]
pub struct ControllerCore {
    pub(crate) id: String,
    pub(crate) node_id: String,
    pub(crate) scan_period: Duration,
    pub(crate) last_scan: DateTime<Utc>,
    pub(crate) active: bool,
    /// Timestamp of the scan currently executing
    now: DateTime<Utc>,
    inputs: BTreeMap<String, InputRegister>,
    outputs: BTreeMap<String, OutputRegister>,
    memory: BTreeMap<String, Value>,
    timers: BTreeMap<String, Timer>,
    counters: BTreeMap<String, u32>,
    alarms: Vec<Alarm>,
}

impl ControllerCore {
    pub fn new(
        id: impl Into<String>,
        node_id: impl Into<String>,
        scan_period: Duration,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            node_id: node_id.into(),
            scan_period,
            last_scan: created_at,
            active: true,
            now: created_at,
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            memory: BTreeMap::new(),
            timers: BTreeMap::new(),
            counters: BTreeMap::new(),
            alarms: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Current scan time
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Scan period in seconds, used as `dt` by integrating logic.
    pub fn dt(&self) -> f64 {
        self.scan_period.num_milliseconds() as f64 / 1000.0
    }

    pub(crate) fn scan_due(&self, now: DateTime<Utc>) -> bool {
        now - self.last_scan >= self.scan_period
    }

    pub(crate) fn begin_scan(&mut self, now: DateTime<Utc>) {
        self.now = now;
    }

    pub(crate) fn complete_scan(&mut self) {
        if self.now > self.last_scan {
            self.last_scan = self.now;
        }
    }

    // ---- inputs -------------------------------------------------------

    /// Write an input register directly (external command path).
    pub fn command_input(&mut self, address: impl Into<String>, value: Value, at: DateTime<Utc>) {
        self.inputs.insert(
            address.into(),
            InputRegister {
                value,
                timestamp: at,
                quality: Quality::Good,
                source: InputSource::Command,
            },
        );
    }

    /// Copy `readings[key]` into `address`.
    ///
    /// A missing reading keeps a commanded value in place; otherwise the input
    /// falls back to `default`, tagged uncertain.
    pub fn latch_input(
        &mut self,
        readings: &SensorReadings,
        key: &str,
        address: &str,
        default: impl Into<Value>,
    ) {
        let register = match readings.get(key) {
            Some(value) => InputRegister {
                value: value.clone(),
                timestamp: self.now,
                quality: Quality::Good,
                source: InputSource::Sensor,
            },
            None => {
                if matches!(
                    self.inputs.get(address).map(|r| r.source),
                    Some(InputSource::Command)
                ) {
                    return;
                }
                InputRegister {
                    value: default.into(),
                    timestamp: self.now,
                    quality: Quality::Uncertain,
                    source: InputSource::Default,
                }
            }
        };
        self.inputs.insert(address.to_string(), register);
    }

    pub fn input(&self, address: &str) -> Option<&InputRegister> {
        self.inputs.get(address)
    }

    pub fn input_f64(&self, address: &str, default: f64) -> Result<f64, LogicError> {
        match self.inputs.get(address) {
            None => Ok(default),
            Some(r) => r.value.as_f64().ok_or_else(|| LogicError::TypeMismatch {
                address: address.to_string(),
                expected: "number",
                found: r.value.type_name(),
            }),
        }
    }

    pub fn input_bool(&self, address: &str, default: bool) -> Result<bool, LogicError> {
        match self.inputs.get(address) {
            None => Ok(default),
            Some(r) => r.value.as_bool().ok_or_else(|| LogicError::TypeMismatch {
                address: address.to_string(),
                expected: "bool",
                found: r.value.type_name(),
            }),
        }
    }

    /// Remove an input so a one-shot command is not evaluated twice.
    pub fn consume_input(&mut self, address: &str) -> Option<InputRegister> {
        self.inputs.remove(address)
    }

    // ---- outputs & memory ----------------------------------------------

    pub fn set_output(&mut self, address: &str, value: impl Into<Value>) {
        self.outputs.insert(
            address.to_string(),
            OutputRegister {
                value: value.into(),
                timestamp: self.now,
            },
        );
    }

    pub fn output(&self, address: &str) -> Option<&Value> {
        self.outputs.get(address).map(|r| &r.value)
    }

    pub fn output_f64(&self, address: &str, default: f64) -> f64 {
        self.output(address).and_then(Value::as_f64).unwrap_or(default)
    }

    pub fn output_bool(&self, address: &str, default: bool) -> bool {
        self.output(address).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn output_values(&self) -> OutputMap {
        self.outputs
            .iter()
            .map(|(k, r)| (k.clone(), r.value.clone()))
            .collect()
    }

    pub fn input_values(&self) -> BTreeMap<String, Value> {
        self.inputs
            .iter()
            .map(|(k, r)| (k.clone(), r.value.clone()))
            .collect()
    }

    pub fn set_memory(&mut self, address: &str, value: impl Into<Value>) {
        self.memory.insert(address.to_string(), value.into());
    }

    pub fn memory(&self) -> &BTreeMap<String, Value> {
        &self.memory
    }

    // ---- alarms ---------------------------------------------------------

    /// Raise an alarm. Re-raising a still-unacknowledged alarm folds into the
    /// existing entry instead of appending a duplicate.
    pub fn add_alarm(&mut self, alarm_id: &str, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        if let Some(existing) = self
            .alarms
            .iter_mut()
            .find(|a| a.alarm_id == alarm_id && !a.acknowledged)
        {
            existing.occurrences = existing.occurrences.saturating_add(1);
            existing.last_raised_at = self.now;
            existing.severity = existing.severity.max(severity);
            existing.message = message;
            return;
        }
        warn!(
            controller_id = %self.id,
            node_id = %self.node_id,
            alarm_id,
            %severity,
            "{}",
            message
        );
        self.alarms
            .push(Alarm::new(alarm_id, severity, message, self.now));
    }

    /// Acknowledge every entry with `alarm_id`; returns whether any matched.
    pub fn acknowledge_alarm(&mut self, alarm_id: &str) -> bool {
        let mut found = false;
        for alarm in self.alarms.iter_mut().filter(|a| a.alarm_id == alarm_id) {
            alarm.acknowledged = true;
            found = true;
        }
        if found {
            info!(controller_id = %self.id, alarm_id, "alarm acknowledged");
        }
        found
    }

    /// Drop acknowledged alarms; returns how many were removed.
    pub fn clear_acknowledged_alarms(&mut self) -> usize {
        let before = self.alarms.len();
        self.alarms.retain(|a| !a.acknowledged);
        before - self.alarms.len()
    }

    pub fn alarms(&self) -> &[Alarm] {
        &self.alarms
    }

    pub fn active_alarm_count(&self) -> usize {
        self.alarms.iter().filter(|a| a.is_active()).count()
    }

    // ---- timers & counters ----------------------------------------------

    /// On-delay timer: starts lazily on first call, done once `preset` elapsed.
    pub fn update_timer(&mut self, name: &str, preset: Duration) -> bool {
        let now = self.now;
        let timer = self.timers.entry(name.to_string()).or_insert(Timer {
            start_time: now,
            preset,
            done: false,
        });
        timer.preset = preset;
        timer.done = now - timer.start_time >= timer.preset;
        timer.done
    }

    pub fn reset_timer(&mut self, name: &str) {
        if let Some(timer) = self.timers.get_mut(name) {
            timer.start_time = self.now;
            timer.done = false;
        }
    }

    pub fn timer(&self, name: &str) -> Option<&Timer> {
        self.timers.get(name)
    }

    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    pub fn increment_counter(&mut self, name: &str, max: u32) -> u32 {
        let count = self.counters.entry(name.to_string()).or_insert(0);
        *count = count.saturating_add(1).min(max);
        *count
    }

    pub fn reset_counter(&mut self, name: &str) {
        self.counters.insert(name.to_string(), 0);
    }

    pub fn counter(&self, name: &str) -> u32 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core() -> ControllerCore {
        ControllerCore::new("PLC_TEST", "N1", Duration::milliseconds(100), Utc::now())
    }

    #[test]
    fn test_clone_is_independent_state() {
        let mut original = core();
        original.set_output("VALVE", true);
        let mut copy = original.clone();
        copy.set_output("VALVE", false);
        copy.add_alarm("HIGH_PRESSURE", Severity::High, "p");

        assert!(original.output_bool("VALVE", false));
        assert!(original.alarms().is_empty());
        assert_eq!(copy.active_alarm_count(), 1);
        assert!(format!("{:?}", copy).contains("PLC_TEST"));
    }

    #[test]
    fn test_latch_input_defaults_as_uncertain() {
        let mut c = core();
        c.latch_input(&SensorReadings::new(), "pressure_N1", "PRESSURE_SENSOR", 50.0);
        let reg = c.input("PRESSURE_SENSOR").unwrap();
        assert_eq!(reg.value, Value::Number(50.0));
        assert_eq!(reg.quality, Quality::Uncertain);
    }

    #[test]
    fn test_commanded_input_survives_missing_reading() {
        let mut c = core();
        let now = c.now();
        c.command_input("MANUAL_STOP", Value::Bool(true), now);
        c.latch_input(&SensorReadings::new(), "manual_stop_N1", "MANUAL_STOP", false);
        assert_eq!(c.input_bool("MANUAL_STOP", false).unwrap(), true);

        let mut readings = SensorReadings::new();
        readings.insert("manual_stop_N1".into(), Value::Bool(false));
        c.latch_input(&readings, "manual_stop_N1", "MANUAL_STOP", false);
        assert_eq!(c.input_bool("MANUAL_STOP", true).unwrap(), false);
    }

    #[test]
    fn test_type_mismatch_is_reported() {
        let mut c = core();
        let now = c.now();
        c.command_input("PRESSURE_SENSOR", Value::from("high"), now);
        assert!(matches!(
            c.input_f64("PRESSURE_SENSOR", 0.0),
            Err(LogicError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_alarm_reraise_folds_into_unacknowledged_entry() {
        let mut c = core();
        c.add_alarm("HIGH_PRESSURE", Severity::High, "first");
        c.add_alarm("HIGH_PRESSURE", Severity::High, "second");
        assert_eq!(c.alarms().len(), 1);
        assert_eq!(c.alarms()[0].occurrences, 2);

        assert!(c.acknowledge_alarm("HIGH_PRESSURE"));
        c.add_alarm("HIGH_PRESSURE", Severity::High, "third");
        assert_eq!(c.alarms().len(), 2);
        assert_eq!(c.active_alarm_count(), 1);

        assert_eq!(c.clear_acknowledged_alarms(), 1);
        assert_eq!(c.alarms().len(), 1);
        assert_eq!(c.alarms()[0].message, "third");
    }

    #[test]
    fn test_acknowledge_unknown_alarm() {
        let mut c = core();
        assert!(!c.acknowledge_alarm("NOPE"));
    }

    #[test]
    fn test_timer_lazily_starts_and_resets() {
        let start = Utc::now();
        let mut c = ControllerCore::new("PLC", "N", Duration::milliseconds(100), start);
        c.begin_scan(start);
        assert!(!c.update_timer("T", Duration::seconds(5)));
        c.begin_scan(start + Duration::seconds(4));
        assert!(!c.update_timer("T", Duration::seconds(5)));
        c.begin_scan(start + Duration::seconds(5));
        assert!(c.update_timer("T", Duration::seconds(5)));
        c.reset_timer("T");
        assert!(!c.update_timer("T", Duration::seconds(5)));
    }

    #[test]
    fn test_counter_saturates() {
        let mut c = core();
        for _ in 0..10 {
            c.increment_counter("STARTS", 3);
        }
        assert_eq!(c.counter("STARTS"), 3);
        c.reset_counter("STARTS");
        assert_eq!(c.counter("STARTS"), 0);
    }
}
