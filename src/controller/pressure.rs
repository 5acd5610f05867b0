use serde::{Deserialize, Serialize};

use super::core::{ControllerCore, LogicError};
use super::pid::{PidController, PidGains};
use super::{reading_key, ControlLogic};
use crate::domain::{SensorReadings, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PressureControlSettings {
    /// Regulation setpoint (bar)
    pub setpoint_bar: f64,
    /// In-tolerance band (± bar)
    pub tolerance_bar: f64,
    /// Relief valve opens above this (bar)
    pub high_limit_bar: f64,
    /// Booster starts below this (bar)
    pub low_limit_bar: f64,
    pub gains: PidGains,
}

impl Default for PressureControlSettings {
    fn default() -> Self {
        Self {
            setpoint_bar: 50.0,
            tolerance_bar: 2.0,
            high_limit_bar: 80.0,
            low_limit_bar: 5.0,
            gains: PidGains::default(),
        }
    }
}

/// Source-station pressure regulator: PID-driven control valve plus relief
/// and booster interlocks.
#[derive(Debug, Clone)]
pub struct PressureControl {
    settings: PressureControlSettings,
    pid: PidController,
}

impl PressureControl {
    pub fn new(settings: PressureControlSettings) -> Self {
        let pid = PidController::new(settings.gains);
        Self { settings, pid }
    }
}

impl ControlLogic for PressureControl {
    fn update_inputs(
        &mut self,
        core: &mut ControllerCore,
        readings: &SensorReadings,
    ) -> Result<(), LogicError> {
        let node = core.node_id().to_string();
        core.latch_input(readings, &reading_key("pressure", &node), "PRESSURE_SENSOR", 50.0);
        core.latch_input(
            readings,
            &reading_key("manual_setpoint", &node),
            "MANUAL_SETPOINT",
            self.settings.setpoint_bar,
        );
        Ok(())
    }

    fn execute_logic(&mut self, core: &mut ControllerCore) -> Result<(), LogicError> {
        let pressure = core.input_f64("PRESSURE_SENSOR", 50.0)?;
        let setpoint = core.input_f64("MANUAL_SETPOINT", self.settings.setpoint_bar)?;
        let s = &self.settings;

        let high = pressure > s.high_limit_bar;
        let low = pressure < s.low_limit_bar;
        if high {
            core.add_alarm(
                "HIGH_PRESSURE",
                Severity::High,
                format!(
                    "Pressure {:.1} bar exceeds limit {:.1} bar",
                    pressure, s.high_limit_bar
                ),
            );
        } else if low {
            core.add_alarm(
                "LOW_PRESSURE",
                Severity::Medium,
                format!(
                    "Pressure {:.1} bar below limit {:.1} bar",
                    pressure, s.low_limit_bar
                ),
            );
        }
        core.set_output("PRESSURE_RELIEF_VALVE", high);
        core.set_output("EMERGENCY_VENT", high);
        core.set_output("BOOSTER_PUMP", low);

        let dt = core.dt();
        let pid_output = self.pid.update(setpoint, pressure, dt);
        let valve_position = (50.0 + pid_output).clamp(0.0, 100.0);
        let error = setpoint - pressure;

        core.set_output("CONTROL_VALVE_POSITION", valve_position);
        core.set_output("PRESSURE_IN_TOLERANCE", error.abs() <= s.tolerance_bar);

        core.set_memory("CURRENT_PRESSURE", pressure);
        core.set_memory("PRESSURE_ERROR", error);
        core.set_memory("PID_OUTPUT", pid_output);
        Ok(())
    }
}
