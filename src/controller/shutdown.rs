use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::core::{ControllerCore, LogicError};
use super::{reading_key, ControlLogic};
use crate::domain::{SensorReadings, Severity, Value};

/// One-shot command address that requests release of the shutdown latch
pub const ESD_RESET: &str = "ESD_RESET";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergencyShutdownSettings {
    /// Pressure trip (bar)
    pub trip_pressure_bar: f64,
}

impl Default for EmergencyShutdownSettings {
    fn default() -> Self {
        Self {
            trip_pressure_bar: 90.0,
        }
    }
}

/// Emergency shutdown system.
///
/// Any trigger latches the shutdown. The latch survives the trigger clearing and
/// is only released by an `ESD_RESET` command issued while every trigger is
/// clear.
#[derive(Debug, Clone)]
pub struct EmergencyShutdown {
    settings: EmergencyShutdownSettings,
    latched: bool,
}

impl EmergencyShutdown {
    pub fn new(settings: EmergencyShutdownSettings) -> Self {
        Self {
            settings,
            latched: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.latched
    }
}

impl ControlLogic for EmergencyShutdown {
    fn update_inputs(
        &mut self,
        core: &mut ControllerCore,
        readings: &SensorReadings,
    ) -> Result<(), LogicError> {
        let node = core.node_id().to_string();
        let inputs: [(&str, &str, Value); 4] = [
            ("emergency_button", "EMERGENCY_BUTTON", false.into()),
            ("pressure", "PRESSURE_SENSOR", 50.0.into()),
            ("fire_detector", "FIRE_DETECTED", false.into()),
            ("gas_leak", "GAS_LEAK", false.into()),
        ];
        for (prefix, address, default) in inputs {
            core.latch_input(readings, &reading_key(prefix, &node), address, default);
        }
        Ok(())
    }

    fn execute_logic(&mut self, core: &mut ControllerCore) -> Result<(), LogicError> {
        let button = core.input_bool("EMERGENCY_BUTTON", false)?;
        let pressure = core.input_f64("PRESSURE_SENSOR", 50.0)?;
        let fire = core.input_bool("FIRE_DETECTED", false)?;
        let leak = core.input_bool("GAS_LEAK", false)?;
        let reset = match core.consume_input(ESD_RESET) {
            Some(register) => register.value.as_bool().ok_or_else(|| LogicError::TypeMismatch {
                address: ESD_RESET.to_string(),
                expected: "bool",
                found: register.value.type_name(),
            })?,
            None => false,
        };

        let high_pressure = pressure > self.settings.trip_pressure_bar;
        let tripped = button || high_pressure || fire || leak;

        if reset && self.latched {
            if tripped {
                core.add_alarm(
                    "ESD_RESET_REJECTED",
                    Severity::Medium,
                    "Shutdown reset rejected while a trigger is active",
                );
                warn!(node_id = core.node_id(), "emergency shutdown reset rejected");
            } else {
                self.latched = false;
                info!(node_id = core.node_id(), "emergency shutdown reset");
            }
        }

        if tripped && !self.latched {
            self.latched = true;
            core.add_alarm(
                "EMERGENCY_SHUTDOWN",
                Severity::Critical,
                "Emergency shutdown activated",
            );
            error!(
                node_id = core.node_id(),
                button, high_pressure, fire, leak, "emergency shutdown activated"
            );
        }

        let open = !self.latched;
        core.set_output("ESD_VALVE_1", open);
        core.set_output("ESD_VALVE_2", open);
        core.set_output("MAIN_SUPPLY_VALVE", open);
        core.set_output("COMPRESSOR_STOP", self.latched);
        // Venting to atmosphere is unsafe with a fire present
        core.set_output("VENT_VALVE", self.latched && !fire);
        core.set_output("ESD_ACTIVE", self.latched);

        core.set_memory("HIGH_PRESSURE_TRIP", high_pressure);
        core.set_memory("ESD_ACTIVE", self.latched);
        Ok(())
    }
}
