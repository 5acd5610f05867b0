//! # Sensor Model
//!
//! Field instrumentation for the network. Each channel derives a noisy reading
//! from ground truth (node pressure, pipe pressure drop) or from its own
//! stochastic model. All noise is drawn from one seeded generator in sensor
//! creation order, so a fixed seed reproduces the whole reading sequence.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{NetworkTopology, NodeKind, Quality, SensorReadings, Value};

/// Probability that a detector reports true on any tick
const DETECTOR_TRIP_PROBABILITY: f64 = 0.001;
/// Probability that a compressor is sensed running on any tick
const COMPRESSOR_RUN_PROBABILITY: f64 = 0.8;
const VALVE_LAG_GAIN: f64 = 0.1;
const DEFAULT_VALVE_TARGET: f64 = 50.0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SensorError {
    #[error("duplicate sensor id: {0}")]
    DuplicateSensor(String),
    #[error("no valve position sensor on pipe {0}")]
    UnknownValve(String),
}

/// Measured quantity; each one also names the reading-key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    Pressure,
    SuctionPressure,
    DischargePressure,
    DifferentialPressure,
    Temperature,
    OilTemperature,
    Flow,
    Vibration,
    GasComposition,
    GasLeak,
    FireDetector,
    ValvePosition,
    CompressorSpeed,
}

impl Quantity {
    pub fn prefix(self) -> &'static str {
        match self {
            Quantity::Pressure => "pressure",
            Quantity::SuctionPressure => "suction_pressure",
            Quantity::DischargePressure => "discharge_pressure",
            Quantity::DifferentialPressure => "differential_pressure",
            Quantity::Temperature => "temperature",
            Quantity::OilTemperature => "oil_temperature",
            Quantity::Flow => "flow",
            Quantity::Vibration => "vibration",
            Quantity::GasComposition => "gas_composition",
            Quantity::GasLeak => "gas_leak",
            Quantity::FireDetector => "fire_detector",
            Quantity::ValvePosition => "valve_position",
            Quantity::CompressorSpeed => "compressor_speed",
        }
    }

    fn initial_value(self) -> Value {
        match self {
            Quantity::Pressure | Quantity::SuctionPressure | Quantity::DischargePressure => {
                Value::Number(50.0)
            }
            Quantity::DifferentialPressure => Value::Number(0.0),
            Quantity::Temperature => Value::Number(20.0),
            Quantity::OilTemperature => Value::Number(80.0),
            Quantity::Flow => Value::Number(100.0),
            Quantity::Vibration => Value::Number(0.5),
            Quantity::GasComposition => Value::Number(95.0),
            Quantity::GasLeak | Quantity::FireDetector => Value::Bool(false),
            Quantity::ValvePosition => Value::Number(DEFAULT_VALVE_TARGET),
            Quantity::CompressorSpeed => Value::Number(0.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sensor {
    pub id: String,
    pub quantity: Quantity,
    /// Node or pipe id
    pub location: String,
    pub value: Value,
    pub quality: Quality,
    pub last_update: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SensorModel {
    sensors: Vec<Sensor>,
    index: HashMap<String, usize>,
    valve_targets: HashMap<String, f64>,
    rng: StdRng,
}

impl SensorModel {
    /// Instrument every node and pipe of `topology`.
    pub fn new(
        topology: &NetworkTopology,
        seed: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<Self, SensorError> {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut model = Self {
            sensors: Vec::new(),
            index: HashMap::new(),
            valve_targets: HashMap::new(),
            rng,
        };

        for node in &topology.nodes {
            model.add_sensor(Quantity::Pressure, &node.id, now)?;
            model.add_sensor(Quantity::Temperature, &node.id, now)?;
            match node.kind {
                NodeKind::Source => {
                    model.add_sensor(Quantity::Flow, &node.id, now)?;
                    model.add_sensor(Quantity::GasComposition, &node.id, now)?;
                }
                NodeKind::Compressor => {
                    model.add_sensor(Quantity::CompressorSpeed, &node.id, now)?;
                    model.add_sensor(Quantity::Vibration, &node.id, now)?;
                    model.add_sensor(Quantity::OilTemperature, &node.id, now)?;
                    model.add_sensor(Quantity::SuctionPressure, &node.id, now)?;
                    model.add_sensor(Quantity::DischargePressure, &node.id, now)?;
                }
                NodeKind::Sink => {
                    model.add_sensor(Quantity::Flow, &node.id, now)?;
                }
                NodeKind::Junction => {}
            }
            model.add_sensor(Quantity::GasLeak, &node.id, now)?;
            model.add_sensor(Quantity::FireDetector, &node.id, now)?;
        }

        for pipe in &topology.pipes {
            model.add_sensor(Quantity::ValvePosition, &pipe.id, now)?;
            model.add_sensor(Quantity::Flow, &pipe.id, now)?;
            model.add_sensor(Quantity::DifferentialPressure, &pipe.id, now)?;
        }

        info!(count = model.sensors.len(), "initialized sensors");
        Ok(model)
    }

    fn add_sensor(
        &mut self,
        quantity: Quantity,
        location: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SensorError> {
        let id = format!("{}_{}", quantity.prefix(), location);
        if self.index.contains_key(&id) {
            return Err(SensorError::DuplicateSensor(id));
        }
        self.index.insert(id.clone(), self.sensors.len());
        self.sensors.push(Sensor {
            id,
            quantity,
            location: location.to_string(),
            value: quantity.initial_value(),
            quality: Quality::Good,
            last_update: now,
        });
        Ok(())
    }

    /// Sample every sensor once. `elapsed_secs` is simulation time since start.
    pub fn update_all(
        &mut self,
        topology: &NetworkTopology,
        elapsed_secs: f64,
        now: DateTime<Utc>,
    ) -> SensorReadings {
        for sensor in self.sensors.iter_mut() {
            let target = self
                .valve_targets
                .get(&sensor.location)
                .copied()
                .unwrap_or(DEFAULT_VALVE_TARGET);
            let next = sample(&mut self.rng, sensor, topology, elapsed_secs, target);

            let finite = next.as_f64().map_or(true, f64::is_finite);
            if finite {
                sensor.value = next;
                sensor.quality = Quality::Good;
            } else {
                if sensor.quality != Quality::Bad {
                    warn!(sensor_id = %sensor.id, "non-finite reading, holding last value");
                }
                sensor.quality = Quality::Bad;
            }
            sensor.last_update = now;
        }
        self.readings()
    }

    /// Current value of every sensor
    pub fn readings(&self) -> SensorReadings {
        self.sensors
            .iter()
            .map(|s| (s.id.clone(), s.value.clone()))
            .collect()
    }

    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    pub fn get(&self, sensor_id: &str) -> Option<&Sensor> {
        self.index.get(sensor_id).map(|&i| &self.sensors[i])
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Sensors currently reporting GOOD quality
    pub fn active_count(&self) -> usize {
        self.sensors
            .iter()
            .filter(|s| s.quality == Quality::Good)
            .count()
    }

    /// Move the position a pipe's valve sensor lags toward.
    pub fn set_valve_target(&mut self, pipe_id: &str, target: f64) -> Result<(), SensorError> {
        let id = format!("{}_{}", Quantity::ValvePosition.prefix(), pipe_id);
        if !self.index.contains_key(&id) {
            return Err(SensorError::UnknownValve(pipe_id.to_string()));
        }
        self.valve_targets
            .insert(pipe_id.to_string(), target.clamp(0.0, 100.0));
        Ok(())
    }
}

fn gaussian(rng: &mut StdRng, std_dev: f64) -> f64 {
    Normal::new(0.0, std_dev)
        .map(|n| n.sample(rng))
        .unwrap_or(0.0)
}

/// `max(v, 0)` that lets NaN through so the caller can flag it
fn floor_zero(v: f64) -> f64 {
    if v.is_nan() {
        v
    } else {
        v.max(0.0)
    }
}

fn sample(
    rng: &mut StdRng,
    sensor: &Sensor,
    topology: &NetworkTopology,
    t: f64,
    valve_target: f64,
) -> Value {
    let node = topology.node(&sensor.location);
    let current = sensor.value.as_f64().unwrap_or(0.0);

    match sensor.quantity {
        Quantity::Pressure | Quantity::SuctionPressure | Quantity::DischargePressure => {
            let base = node.map_or(50.0, |n| n.pressure);
            Value::Number(floor_zero(base + gaussian(rng, 0.5)))
        }
        Quantity::DifferentialPressure => {
            let drop = topology.pipe(&sensor.location).map_or(0.0, |p| p.pressure_drop);
            Value::Number(drop + gaussian(rng, 0.5))
        }
        Quantity::Temperature | Quantity::OilTemperature => {
            let baseline = if sensor.quantity == Quantity::OilTemperature {
                80.0
            } else {
                20.0
            };
            Value::Number(baseline + 5.0 * (t / 8640.0).sin() + gaussian(rng, 0.1))
        }
        Quantity::Flow => Value::Number((100.0 + gaussian(rng, 5.0)).max(0.0)),
        Quantity::Vibration => {
            let wear = (t / 100_000.0).min(2.0);
            Value::Number((0.5 + wear + gaussian(rng, 0.1)).max(0.0))
        }
        Quantity::GasComposition => Value::Number((95.0 + gaussian(rng, 0.5)).clamp(90.0, 100.0)),
        Quantity::GasLeak | Quantity::FireDetector => {
            Value::Bool(rng.gen::<f64>() < DETECTOR_TRIP_PROBABILITY)
        }
        Quantity::ValvePosition => {
            let next = current + VALVE_LAG_GAIN * (valve_target - current);
            Value::Number(next.clamp(0.0, 100.0))
        }
        Quantity::CompressorSpeed => {
            let at_compressor = node.map_or(false, |n| n.kind == NodeKind::Compressor);
            if at_compressor && rng.gen::<f64>() < COMPRESSOR_RUN_PROBABILITY {
                Value::Number(3000.0 + gaussian(rng, 50.0))
            } else {
                Value::Number(0.0)
            }
        }
    }
}
