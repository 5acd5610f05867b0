use serde::{Deserialize, Serialize};

use super::core::{ControllerCore, LogicError};
use super::{reading_key, ControlLogic};
use crate::domain::{SensorReadings, Severity};

/// Standard reference temperature for flow compensation (K)
const REFERENCE_TEMPERATURE_K: f64 = 293.15;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowRegulationSettings {
    /// kg/s
    pub setpoint: f64,
    pub tolerance: f64,
    pub high_limit: f64,
    pub low_limit: f64,
    /// Control valve step per scan (%)
    pub valve_step_percent: f64,
    /// Rate changes at or beyond this are treated as spikes and not totalized
    pub spike_threshold: f64,
}

impl Default for FlowRegulationSettings {
    fn default() -> Self {
        Self {
            setpoint: 100.0,
            tolerance: 5.0,
            high_limit: 200.0,
            low_limit: 0.0,
            valve_step_percent: 2.0,
            spike_threshold: 100.0,
        }
    }
}

/// Delivery-point flow regulator with temperature compensation and a running
/// totalizer.
#[derive(Debug, Clone)]
pub struct FlowRegulation {
    settings: FlowRegulationSettings,
    total_flow: f64,
    previous_rate: f64,
}

impl FlowRegulation {
    pub fn new(settings: FlowRegulationSettings) -> Self {
        Self {
            settings,
            total_flow: 0.0,
            previous_rate: 0.0,
        }
    }

    pub fn total_flow(&self) -> f64 {
        self.total_flow
    }
}

impl ControlLogic for FlowRegulation {
    fn update_inputs(
        &mut self,
        core: &mut ControllerCore,
        readings: &SensorReadings,
    ) -> Result<(), LogicError> {
        let node = core.node_id().to_string();
        core.latch_input(readings, &reading_key("flow", &node), "FLOW_METER", 100.0);
        core.latch_input(
            readings,
            &reading_key("differential_pressure", &node),
            "DIFFERENTIAL_PRESSURE",
            10.0,
        );
        core.latch_input(
            readings,
            &reading_key("flow_setpoint", &node),
            "FLOW_SETPOINT",
            self.settings.setpoint,
        );
        core.latch_input(readings, &reading_key("temperature", &node), "TEMPERATURE", 20.0);
        Ok(())
    }

    fn execute_logic(&mut self, core: &mut ControllerCore) -> Result<(), LogicError> {
        let flow = core.input_f64("FLOW_METER", 100.0)?;
        let setpoint = core.input_f64("FLOW_SETPOINT", self.settings.setpoint)?;
        let temperature = core.input_f64("TEMPERATURE", 20.0)?;
        let s = &self.settings;

        let temp_factor = (temperature + 273.15) / REFERENCE_TEMPERATURE_K;
        let compensated = flow * temp_factor;

        let too_high = compensated > s.high_limit;
        let too_low = !too_high && compensated < s.low_limit && setpoint > 0.0;
        if too_high {
            core.add_alarm(
                "HIGH_FLOW",
                Severity::Medium,
                format!("Flow rate {:.1} kg/s exceeds limit", compensated),
            );
        } else if too_low {
            core.add_alarm(
                "LOW_FLOW",
                Severity::Medium,
                format!("Flow rate {:.1} kg/s below expected", compensated),
            );
        }
        core.set_output("FLOW_LIMITER_VALVE", too_high);
        core.set_output("FLOW_BOOSTER", too_low);

        let flow_error = setpoint - compensated;
        let position = core.output_f64("FLOW_CONTROL_VALVE", 50.0);
        let position = if flow_error.abs() > s.tolerance {
            if flow_error > 0.0 {
                (position + s.valve_step_percent).min(100.0)
            } else {
                (position - s.valve_step_percent).max(0.0)
            }
        } else {
            position
        };
        core.set_output("FLOW_CONTROL_VALVE", position);

        if (flow - self.previous_rate).abs() < s.spike_threshold {
            self.total_flow += flow * core.dt();
        }
        self.previous_rate = flow;

        core.set_output("FLOW_IN_TOLERANCE", flow_error.abs() <= s.tolerance);
        core.set_output("FLOW_TOTALIZER", self.total_flow);

        core.set_memory("CURRENT_FLOW", compensated);
        core.set_memory("FLOW_ERROR", flow_error);
        core.set_memory("TOTAL_FLOW", self.total_flow);
        Ok(())
    }
}
