use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::core::{ControllerCore, LogicError};
use super::{reading_key, ControlLogic};
use crate::domain::{SensorReadings, Severity};

const START_ATTEMPTS: &str = "START_ATTEMPTS";
const START_DELAY: &str = "START_DELAY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorSettings {
    /// Auto-start when suction falls to this (bar)
    pub start_pressure_bar: f64,
    /// Auto-stop when suction rises to this (bar)
    pub stop_pressure_bar: f64,
    pub max_suction_pressure_bar: f64,
    pub min_suction_pressure_bar: f64,
    pub max_discharge_pressure_bar: f64,
    /// mm/s
    pub max_vibration: f64,
    /// °C
    pub max_oil_temperature: f64,
    /// Starts allowed inside one cooldown window
    pub max_start_attempts: u32,
    pub start_cooldown_secs: i64,
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self {
            start_pressure_bar: 35.0,
            stop_pressure_bar: 55.0,
            max_suction_pressure_bar: 60.0,
            min_suction_pressure_bar: 10.0,
            max_discharge_pressure_bar: 85.0,
            max_vibration: 5.0,
            max_oil_temperature: 120.0,
            max_start_attempts: 3,
            start_cooldown_secs: 60,
        }
    }
}

/// Compressor station manager: interlocked start/stop with a hysteresis band,
/// anti-cycling and run-hour accounting.
#[derive(Debug, Clone)]
pub struct CompressorManagement {
    settings: CompressorSettings,
    running: bool,
    run_hours: f64,
}

impl CompressorManagement {
    pub fn new(settings: CompressorSettings) -> Self {
        Self {
            settings,
            running: false,
            run_hours: 0.0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Evaluate the interlock chain, raising an alarm for each tripped condition.
    fn interlocks_ok(
        &self,
        core: &mut ControllerCore,
        suction: f64,
        discharge: f64,
        vibration: f64,
        oil_temp: f64,
    ) -> bool {
        let s = &self.settings;
        let mut ok = true;

        if suction > s.max_suction_pressure_bar {
            core.add_alarm(
                "HIGH_SUCTION_PRESSURE",
                Severity::High,
                format!("Suction pressure {:.1} bar too high", suction),
            );
            ok = false;
        }
        if suction < s.min_suction_pressure_bar {
            core.add_alarm(
                "LOW_SUCTION_PRESSURE",
                Severity::High,
                format!("Suction pressure {:.1} bar too low", suction),
            );
            ok = false;
        }
        if discharge > s.max_discharge_pressure_bar {
            core.add_alarm(
                "HIGH_DISCHARGE_PRESSURE",
                Severity::Critical,
                format!("Discharge pressure {:.1} bar exceeds limit", discharge),
            );
            ok = false;
        }
        if vibration > s.max_vibration {
            core.add_alarm(
                "HIGH_VIBRATION",
                Severity::High,
                format!("Compressor vibration {:.1} mm/s too high", vibration),
            );
            ok = false;
        }
        if oil_temp > s.max_oil_temperature {
            core.add_alarm(
                "HIGH_OIL_TEMP",
                Severity::High,
                format!("Oil temperature {:.1}°C too high", oil_temp),
            );
            ok = false;
        }
        ok
    }
}

impl ControlLogic for CompressorManagement {
    fn update_inputs(
        &mut self,
        core: &mut ControllerCore,
        readings: &SensorReadings,
    ) -> Result<(), LogicError> {
        let node = core.node_id().to_string();
        let inputs: [(&str, &str, crate::domain::Value); 8] = [
            ("suction_pressure", "SUCTION_PRESSURE", 40.0.into()),
            ("discharge_pressure", "DISCHARGE_PRESSURE", 50.0.into()),
            ("compressor_speed", "COMPRESSOR_SPEED", 0.0.into()),
            ("vibration", "VIBRATION", 0.5.into()),
            ("oil_temperature", "OIL_TEMPERATURE", 80.0.into()),
            ("gas_temperature", "GAS_TEMPERATURE", 35.0.into()),
            ("manual_start", "MANUAL_START", false.into()),
            ("manual_stop", "MANUAL_STOP", false.into()),
        ];
        for (prefix, address, default) in inputs {
            core.latch_input(readings, &reading_key(prefix, &node), address, default);
        }
        Ok(())
    }

    fn execute_logic(&mut self, core: &mut ControllerCore) -> Result<(), LogicError> {
        let suction = core.input_f64("SUCTION_PRESSURE", 40.0)?;
        let discharge = core.input_f64("DISCHARGE_PRESSURE", 50.0)?;
        let vibration = core.input_f64("VIBRATION", 0.5)?;
        let oil_temp = core.input_f64("OIL_TEMPERATURE", 80.0)?;
        let gas_temp = core.input_f64("GAS_TEMPERATURE", 35.0)?;
        let manual_start = core.input_bool("MANUAL_START", false)?;
        let manual_stop = core.input_bool("MANUAL_STOP", false)?;

        let safety_ok = self.interlocks_ok(core, suction, discharge, vibration, oil_temp);
        let s = &self.settings;

        let should_run = if manual_stop {
            false
        } else if !safety_ok {
            false
        } else if manual_start {
            true
        } else if !self.running && suction <= s.start_pressure_bar {
            true
        } else if self.running && suction >= s.stop_pressure_bar {
            false
        } else {
            self.running
        };

        if should_run && !self.running {
            if core.counter(START_ATTEMPTS) < s.max_start_attempts {
                core.increment_counter(START_ATTEMPTS, s.max_start_attempts);
                core.reset_timer(START_DELAY);
                self.running = true;
                core.set_output("COMPRESSOR_START", true);
                core.set_output("COMPRESSOR_RUN", true);
                info!(
                    controller_id = core.id(),
                    node_id = core.node_id(),
                    attempts = core.counter(START_ATTEMPTS),
                    "compressor started"
                );
            } else {
                core.add_alarm(
                    "MAX_START_ATTEMPTS",
                    Severity::High,
                    "Maximum start attempts exceeded",
                );
            }
        } else if !should_run && self.running {
            self.running = false;
            core.set_output("COMPRESSOR_START", false);
            core.set_output("COMPRESSOR_RUN", false);
            info!(
                controller_id = core.id(),
                node_id = core.node_id(),
                "compressor stopped"
            );
        }

        // Anti-cycling window restarts on every start
        if core.update_timer(START_DELAY, Duration::seconds(s.start_cooldown_secs)) {
            core.reset_counter(START_ATTEMPTS);
        }

        if self.running {
            self.run_hours += core.dt() / 3600.0;
        }

        core.set_output("COMPRESSOR_RUNNING", self.running);
        core.set_output("SAFETY_OK", safety_ok);
        core.set_output("RUN_HOURS", self.run_hours);
        core.set_output("COMPRESSION_RATIO", discharge / suction.max(1.0));
        core.set_output("START_ATTEMPTS", f64::from(core.counter(START_ATTEMPTS)));

        core.set_memory("SUCTION_PRESSURE", suction);
        core.set_memory("DISCHARGE_PRESSURE", discharge);
        core.set_memory("GAS_TEMPERATURE", gas_temp);
        core.set_memory("COMPRESSOR_RUNNING", self.running);
        core.set_memory("RUN_HOURS", self.run_hours);
        Ok(())
    }
}
