/// PID (Proportional-Integral-Derivative) controller
///
/// Computes a correction from the difference between a setpoint and a measured
/// process variable:
///
/// Output = Kp * error + Ki * ∫error*dt + Kd * d(error)/dt
///
/// `dt` is supplied by the caller; PLC logic passes its scan period so the
/// loop behaves identically whatever the wall-clock jitter.
use serde::{Deserialize, Serialize};

/// Tuning gains
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        // Pressure loop defaults: brisk proportional action, slow integral
        // correction, light damping.
        Self {
            kp: 1.0,
            ki: 0.1,
            kd: 0.01,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PidController {
    gains: PidGains,

    /// Accumulated integral of the error
    integral: f64,
    /// Previous error for the derivative term
    previous_error: f64,

    /// Integral windup limits
    integral_min: f64,
    integral_max: f64,

    /// Output limits
    output_min: f64,
    output_max: f64,
}

impl PidController {
    /// Unbounded output, integral clamped to ±1000
    pub fn new(gains: PidGains) -> Self {
        Self::with_limits(gains, -1000.0, 1000.0, f64::NEG_INFINITY, f64::INFINITY)
    }

    pub fn with_limits(
        gains: PidGains,
        integral_min: f64,
        integral_max: f64,
        output_min: f64,
        output_max: f64,
    ) -> Self {
        Self {
            gains,
            integral: 0.0,
            previous_error: 0.0,
            integral_min,
            integral_max,
            output_min,
            output_max,
        }
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    pub fn set_gains(&mut self, gains: PidGains) {
        self.gains = gains;
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.previous_error = 0.0;
    }

    /// Advance the loop by `dt` seconds for the given setpoint and measurement.
    pub fn update(&mut self, setpoint: f64, process_value: f64, dt: f64) -> f64 {
        let error = setpoint - process_value;

        let p_term = self.gains.kp * error;

        self.integral = (self.integral + error * dt).clamp(self.integral_min, self.integral_max);
        let i_term = self.gains.ki * self.integral;

        let d_term = if dt > 0.0 {
            self.gains.kd * (error - self.previous_error) / dt
        } else {
            0.0
        };

        self.previous_error = error;

        (p_term + i_term + d_term).clamp(self.output_min, self.output_max)
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn previous_error(&self) -> f64 {
        self.previous_error
    }
}
