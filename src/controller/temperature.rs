use serde::{Deserialize, Serialize};

use super::core::{ControllerCore, LogicError};
use super::{reading_key, ControlLogic};
use crate::domain::SensorReadings;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemperatureControlSettings {
    /// °C
    pub setpoint: f64,
    /// ± °C
    pub tolerance: f64,
}

impl Default for TemperatureControlSettings {
    fn default() -> Self {
        Self {
            setpoint: 20.0,
            tolerance: 5.0,
        }
    }
}

/// Bang-bang heating and cooling around a setpoint band.
#[derive(Debug, Clone)]
pub struct TemperatureControl {
    settings: TemperatureControlSettings,
}

impl TemperatureControl {
    pub fn new(settings: TemperatureControlSettings) -> Self {
        Self { settings }
    }
}

impl ControlLogic for TemperatureControl {
    fn update_inputs(
        &mut self,
        core: &mut ControllerCore,
        readings: &SensorReadings,
    ) -> Result<(), LogicError> {
        let key = reading_key("temperature", core.node_id());
        core.latch_input(readings, &key, "TEMPERATURE_SENSOR", self.settings.setpoint);
        Ok(())
    }

    fn execute_logic(&mut self, core: &mut ControllerCore) -> Result<(), LogicError> {
        let s = &self.settings;
        let temperature = core.input_f64("TEMPERATURE_SENSOR", s.setpoint)?;

        core.set_output("COOLING_FAN", temperature > s.setpoint + s.tolerance);
        core.set_output("HEATER", temperature < s.setpoint - s.tolerance);
        core.set_output(
            "TEMPERATURE_OK",
            (temperature - s.setpoint).abs() <= s.tolerance,
        );
        core.set_memory("CURRENT_TEMPERATURE", temperature);
        Ok(())
    }
}
