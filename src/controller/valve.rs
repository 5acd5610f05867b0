use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::core::{ControllerCore, LogicError};
use super::{reading_key, ControlLogic};
use crate::domain::{SensorReadings, Severity, Value};

const TRAVEL_TIMER: &str = "TRAVEL_TIMER";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValveSettings {
    /// Expected full-stroke time (s)
    pub travel_time_secs: i64,
    /// Watchdog margin on top of the stroke time (s)
    pub travel_margin_secs: i64,
    /// Auto-positioning dead band (± %)
    pub position_tolerance: f64,
    /// Nm
    pub torque_limit: f64,
}

impl Default for ValveSettings {
    fn default() -> Self {
        Self {
            travel_time_secs: 30,
            travel_margin_secs: 10,
            position_tolerance: 2.0,
            torque_limit: 500.0,
        }
    }
}

/// Motor-operated valve: commanded open/close, auto-positioning, torque
/// protection and a stroke-time watchdog.
#[derive(Debug, Clone)]
pub struct ValveControl {
    settings: ValveSettings,
}

impl ValveControl {
    pub fn new(settings: ValveSettings) -> Self {
        Self { settings }
    }

    fn drive(core: &mut ControllerCore, open: bool, close: bool) {
        core.set_output("VALVE_OPEN", open);
        core.set_output("VALVE_CLOSE", close);
        core.set_output("VALVE_MOVING", open || close);
    }
}

impl ControlLogic for ValveControl {
    fn update_inputs(
        &mut self,
        core: &mut ControllerCore,
        readings: &SensorReadings,
    ) -> Result<(), LogicError> {
        let node = core.node_id().to_string();
        let position_key = reading_key("valve_position", &node);
        let position = readings
            .get(&position_key)
            .cloned()
            .unwrap_or(Value::Number(50.0));
        core.latch_input(readings, &position_key, "MAIN_VALVE_POSITION", 50.0);
        // Positioner feedback mirrors the main position transmitter unless wired separately
        core.latch_input(
            readings,
            &reading_key("position_feedback", &node),
            "POSITION_FEEDBACK",
            position,
        );
        let inputs: [(&str, &str, Value); 6] = [
            ("valve_open", "OPEN_COMMAND", false.into()),
            ("valve_close", "CLOSE_COMMAND", false.into()),
            ("position_setpoint", "POSITION_SETPOINT", 50.0.into()),
            ("valve_fully_open", "FULLY_OPEN_LS", false.into()),
            ("valve_fully_closed", "FULLY_CLOSED_LS", false.into()),
            ("valve_torque", "VALVE_TORQUE", 0.0.into()),
        ];
        for (prefix, address, default) in inputs {
            core.latch_input(readings, &reading_key(prefix, &node), address, default);
        }
        Ok(())
    }

    fn execute_logic(&mut self, core: &mut ControllerCore) -> Result<(), LogicError> {
        let position = core.input_f64("POSITION_FEEDBACK", 50.0)?;
        let setpoint = core.input_f64("POSITION_SETPOINT", 50.0)?;
        let open_cmd = core.input_bool("OPEN_COMMAND", false)?;
        let close_cmd = core.input_bool("CLOSE_COMMAND", false)?;
        let fully_open = core.input_bool("FULLY_OPEN_LS", false)?;
        let fully_closed = core.input_bool("FULLY_CLOSED_LS", false)?;
        let torque = core.input_f64("VALVE_TORQUE", 0.0)?;
        let s = &self.settings;

        let torque_limited = torque > s.torque_limit;
        if torque_limited {
            core.add_alarm(
                "HIGH_TORQUE",
                Severity::High,
                format!("Valve torque {:.1} Nm exceeds limit", torque),
            );
        }
        core.set_output("TORQUE_LIMIT_ACTIVE", torque_limited);

        let error = setpoint - position;
        let in_tolerance = error.abs() <= s.position_tolerance;

        if torque_limited {
            Self::drive(core, false, false);
        } else if open_cmd && !fully_open {
            Self::drive(core, true, false);
        } else if close_cmd && !fully_closed {
            Self::drive(core, false, true);
        } else if !in_tolerance {
            Self::drive(core, error > 0.0, error < 0.0);
        } else {
            Self::drive(core, false, false);
        }

        if core.output_bool("VALVE_MOVING", false) {
            let preset = Duration::seconds(s.travel_time_secs + s.travel_margin_secs);
            if core.update_timer(TRAVEL_TIMER, preset) {
                core.add_alarm(
                    "VALVE_TRAVEL_TIME",
                    Severity::Medium,
                    "Valve travel time exceeded",
                );
                Self::drive(core, false, false);
            }
        } else {
            core.reset_timer(TRAVEL_TIMER);
        }

        let state = if fully_open {
            "FULLY_OPEN"
        } else if fully_closed {
            "FULLY_CLOSED"
        } else if core.output_bool("VALVE_MOVING", false) {
            "MOVING"
        } else {
            "INTERMEDIATE"
        };

        core.set_output("POSITION_IN_TOLERANCE", in_tolerance);
        core.set_output("CURRENT_POSITION", position);
        core.set_output("VALVE_STATE", state);

        core.set_memory("CURRENT_POSITION", position);
        core.set_memory("POSITION_ERROR", error);
        core.set_memory("VALVE_STATE", state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::{readings, Harness};

    #[test]
    fn test_open_command_respects_limit_switch() {
        let mut h = Harness::new(ValveControl::new(ValveSettings::default()), "V1");
        h.scan(&readings(&[("valve_open_V1", Value::Bool(true))]));
        assert_eq!(h.core.output_bool("VALVE_OPEN", false), true);
        assert_eq!(h.core.output("VALVE_STATE"), Some(&Value::from("MOVING")));

        h.scan(&readings(&[
            ("valve_open_V1", Value::Bool(true)),
            ("valve_fully_open_V1", Value::Bool(true)),
        ]));
        assert_eq!(h.core.output_bool("VALVE_OPEN", true), false);
        assert_eq!(h.core.output("VALVE_STATE"), Some(&Value::from("FULLY_OPEN")));
    }

    #[test]
    fn test_torque_limit_overrides_commands() {
        let mut h = Harness::new(ValveControl::new(ValveSettings::default()), "V1");
        h.scan(&readings(&[
            ("valve_open_V1", Value::Bool(true)),
            ("valve_torque_V1", Value::Number(650.0)),
        ]));
        assert_eq!(h.core.output_bool("VALVE_OPEN", true), false);
        assert_eq!(h.core.output_bool("VALVE_MOVING", true), false);
        assert_eq!(h.core.output_bool("TORQUE_LIMIT_ACTIVE", false), true);
        assert_eq!(h.core.alarms()[0].alarm_id, "HIGH_TORQUE");
    }

    #[test]
    fn test_auto_positioning_dead_band() {
        let mut h = Harness::new(ValveControl::new(ValveSettings::default()), "V1");
        h.scan(&readings(&[
            ("valve_position_V1", Value::Number(40.0)),
            ("position_setpoint_V1", Value::Number(60.0)),
        ]));
        assert_eq!(h.core.output_bool("VALVE_OPEN", false), true);

        h.scan(&readings(&[
            ("valve_position_V1", Value::Number(59.0)),
            ("position_setpoint_V1", Value::Number(60.0)),
        ]));
        assert_eq!(h.core.output_bool("VALVE_MOVING", true), false);
        assert_eq!(h.core.output_bool("POSITION_IN_TOLERANCE", false), true);

        h.scan(&readings(&[
            ("valve_position_V1", Value::Number(70.0)),
            ("position_setpoint_V1", Value::Number(60.0)),
        ]));
        assert_eq!(h.core.output_bool("VALVE_CLOSE", false), true);
    }

    #[test]
    fn test_travel_watchdog_aborts_motion() {
        let settings = ValveSettings::default();
        let mut h = Harness::new(ValveControl::new(settings.clone()), "V1");
        // Feedback stuck at 50 while the setpoint asks for 80
        let stuck = readings(&[
            ("valve_position_V1", Value::Number(50.0)),
            ("position_setpoint_V1", Value::Number(80.0)),
        ]);
        h.scan(&stuck);
        assert_eq!(h.core.output_bool("VALVE_MOVING", false), true);

        h.advance(Duration::seconds(settings.travel_time_secs + settings.travel_margin_secs - 1));
        h.scan(&stuck);
        assert_eq!(h.core.output_bool("VALVE_OPEN", false), true);
        assert!(h.core.alarms().is_empty());

        h.advance(Duration::seconds(1));
        h.scan(&stuck);
        assert_eq!(h.core.output_bool("VALVE_OPEN", true), false);
        assert_eq!(h.core.output_bool("VALVE_CLOSE", true), false);
        assert_eq!(h.core.alarms()[0].alarm_id, "VALVE_TRAVEL_TIME");
        assert_eq!(h.core.alarms()[0].severity, Severity::Medium);
    }
}
