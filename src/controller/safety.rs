use serde::{Deserialize, Serialize};
use strum::Display;

use super::core::{ControllerCore, LogicError};
use super::{reading_key, ControlLogic};
use crate::domain::{SensorReadings, Severity, Value};

/// Plant safety zone, ordered by escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SafetyZone {
    Normal,
    Warning,
    Alarm,
    Emergency,
}

impl SafetyZone {
    /// Operation may continue in NORMAL and WARNING
    pub fn is_safe(self) -> bool {
        matches!(self, Self::Normal | Self::Warning)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyMonitoringSettings {
    pub alarm_pressure_bar: f64,
    pub warning_high_pressure_bar: f64,
    pub warning_low_pressure_bar: f64,
}

impl Default for SafetyMonitoringSettings {
    fn default() -> Self {
        Self {
            alarm_pressure_bar: 85.0,
            warning_high_pressure_bar: 75.0,
            warning_low_pressure_bar: 10.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SafetyMonitoring {
    settings: SafetyMonitoringSettings,
    zone: SafetyZone,
}

impl SafetyMonitoring {
    pub fn new(settings: SafetyMonitoringSettings) -> Self {
        Self {
            settings,
            zone: SafetyZone::Normal,
        }
    }

    pub fn zone(&self) -> SafetyZone {
        self.zone
    }

    fn classify(&self, pressure: f64, leak: bool, fire: bool, estop: bool) -> SafetyZone {
        let s = &self.settings;
        if estop || fire {
            SafetyZone::Emergency
        } else if leak || pressure > s.alarm_pressure_bar {
            SafetyZone::Alarm
        } else if pressure > s.warning_high_pressure_bar || pressure < s.warning_low_pressure_bar {
            SafetyZone::Warning
        } else {
            SafetyZone::Normal
        }
    }
}

impl ControlLogic for SafetyMonitoring {
    fn update_inputs(
        &mut self,
        core: &mut ControllerCore,
        readings: &SensorReadings,
    ) -> Result<(), LogicError> {
        let node = core.node_id().to_string();
        let inputs: [(&str, &str, Value); 4] = [
            ("pressure", "PRESSURE_SENSOR", 50.0.into()),
            ("gas_leak", "GAS_LEAK_DETECTOR", false.into()),
            ("fire_detector", "FIRE_DETECTOR", false.into()),
            ("emergency_stop", "EMERGENCY_STOP", false.into()),
        ];
        for (prefix, address, default) in inputs {
            core.latch_input(readings, &reading_key(prefix, &node), address, default);
        }
        Ok(())
    }

    fn execute_logic(&mut self, core: &mut ControllerCore) -> Result<(), LogicError> {
        let pressure = core.input_f64("PRESSURE_SENSOR", 50.0)?;
        let leak = core.input_bool("GAS_LEAK_DETECTOR", false)?;
        let fire = core.input_bool("FIRE_DETECTOR", false)?;
        let estop = core.input_bool("EMERGENCY_STOP", false)?;

        self.zone = self.classify(pressure, leak, fire, estop);
        match self.zone {
            SafetyZone::Emergency => core.add_alarm(
                "EMERGENCY",
                Severity::Critical,
                "Emergency condition detected",
            ),
            SafetyZone::Alarm => core.add_alarm(
                "ALARM_CONDITION",
                Severity::High,
                "Alarm condition detected",
            ),
            SafetyZone::Warning | SafetyZone::Normal => {}
        }

        core.set_output("SAFETY_ZONE", self.zone.to_string());
        core.set_output("SAFETY_OK", self.zone.is_safe());
        core.set_memory("SAFETY_ZONE", self.zone.to_string());
        Ok(())
    }
}
