use serde::{Deserialize, Serialize};

use super::core::{ControllerCore, LogicError};
use super::{reading_key, ControlLogic};
use crate::domain::{SensorReadings, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeakDetectionSettings {
    /// ppm
    pub threshold_ppm: f64,
}

impl Default for LeakDetectionSettings {
    fn default() -> Self {
        Self {
            threshold_ppm: 1000.0,
        }
    }
}

/// Gas-concentration and acoustic leak detection with isolation response.
///
/// The response follows the detector: once the leak clears the isolation valve
/// reopens and ventilation stops.
#[derive(Debug, Clone)]
pub struct LeakDetection {
    settings: LeakDetectionSettings,
}

impl LeakDetection {
    pub fn new(settings: LeakDetectionSettings) -> Self {
        Self { settings }
    }
}

impl ControlLogic for LeakDetection {
    fn update_inputs(
        &mut self,
        core: &mut ControllerCore,
        readings: &SensorReadings,
    ) -> Result<(), LogicError> {
        let node = core.node_id().to_string();
        core.latch_input(
            readings,
            &reading_key("gas_concentration", &node),
            "GAS_CONCENTRATION",
            0.0,
        );
        core.latch_input(
            readings,
            &reading_key("acoustic_leak", &node),
            "ACOUSTIC_DETECTOR",
            false,
        );
        Ok(())
    }

    fn execute_logic(&mut self, core: &mut ControllerCore) -> Result<(), LogicError> {
        let concentration = core.input_f64("GAS_CONCENTRATION", 0.0)?;
        let acoustic = core.input_bool("ACOUSTIC_DETECTOR", false)?;

        let leak = concentration > self.settings.threshold_ppm || acoustic;
        if leak {
            core.add_alarm(
                "GAS_LEAK",
                Severity::Critical,
                format!("Gas leak detected - {:.0} ppm", concentration),
            );
        }

        // Isolation valve output is "open"
        core.set_output("ISOLATION_VALVE", !leak);
        core.set_output("VENTILATION_FAN", leak);
        core.set_output("LEAK_DETECTED", leak);
        core.set_memory("GAS_CONCENTRATION", concentration);
        Ok(())
    }
}
