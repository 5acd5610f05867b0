//! # Physics Step
//!
//! Coarse per-tick update of ground-truth node and pipe state. The new state is
//! computed into side buffers and only written back once every node and pipe
//! has been evaluated, so a failing step leaves the topology untouched.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use thiserror::Error;

use crate::controller::reading_key;
use crate::domain::{NetworkTopology, NodeKind, SensorReadings};

const AMBIENT_TEMPERATURE: f64 = 20.0;
const COMPRESSOR_MAX_PRESSURE: f64 = 80.0;
const COMPRESSOR_MIN_PRESSURE: f64 = 30.0;
const COMPRESSOR_BOOST: f64 = 3.0;
const COMPRESSOR_DECAY: f64 = 1.0;
/// rpm above which a sensed compressor counts as running
const COMPRESSOR_RUNNING_RPM: f64 = 1000.0;
const SINK_MIN_PRESSURE: f64 = 25.0;
const SINK_DEFAULT_CONSUMPTION: f64 = 50.0;

#[derive(Debug, Error, PartialEq)]
pub enum PhysicsError {
    #[error("pipe {pipe} references unknown node {node}")]
    UnknownNode { pipe: String, node: String },
    #[error("reading {key} holds {found}, expected a number")]
    InvalidReading { key: String, found: &'static str },
    #[error("non-finite {quantity} computed for {id}")]
    NonFinite { id: String, quantity: &'static str },
}

#[derive(Debug, Clone, Copy)]
struct NodeState {
    pressure: f64,
    temperature: f64,
}

#[derive(Debug, Clone, Copy)]
struct PipeState {
    flow_rate: f64,
    pressure_drop: f64,
}

#[derive(Debug, Clone)]
pub struct PhysicsEngine {
    rng: StdRng,
}

impl PhysicsEngine {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// Advance ground truth by one tick.
    ///
    /// `compressor_running` reports the controller view for a node, or `None`
    /// when no compressor controller is bound there; the speed reading is used
    /// instead in that case.
    pub fn advance<F>(
        &mut self,
        topology: &mut NetworkTopology,
        readings: &SensorReadings,
        compressor_running: F,
    ) -> Result<(), PhysicsError>
    where
        F: Fn(&str) -> Option<bool>,
    {
        let (nodes, pipes) = self.compute(topology, readings, compressor_running)?;

        for (node, state) in topology.nodes.iter_mut().zip(nodes) {
            node.pressure = state.pressure;
            node.temperature = state.temperature;
        }
        for (pipe, state) in topology.pipes.iter_mut().zip(pipes) {
            pipe.flow_rate = state.flow_rate;
            pipe.pressure_drop = state.pressure_drop;
        }
        Ok(())
    }

    fn compute<F>(
        &mut self,
        topology: &NetworkTopology,
        readings: &SensorReadings,
        compressor_running: F,
    ) -> Result<(Vec<NodeState>, Vec<PipeState>), PhysicsError>
    where
        F: Fn(&str) -> Option<bool>,
    {
        let mut nodes = Vec::with_capacity(topology.nodes.len());
        for node in &topology.nodes {
            let p = node.pressure;
            let pressure = match node.kind {
                NodeKind::Source => p + self.gaussian(0.5),
                NodeKind::Junction => p + self.gaussian(0.2),
                NodeKind::Compressor => {
                    let running = match compressor_running(&node.id) {
                        Some(running) => running,
                        None => {
                            let key = reading_key("compressor_speed", &node.id);
                            numeric_reading(readings, &key, 0.0)? > COMPRESSOR_RUNNING_RPM
                        }
                    };
                    if running {
                        (p + COMPRESSOR_BOOST).min(COMPRESSOR_MAX_PRESSURE)
                    } else {
                        (p - COMPRESSOR_DECAY).max(COMPRESSOR_MIN_PRESSURE)
                    }
                }
                NodeKind::Sink => {
                    let key = reading_key("flow", &node.id);
                    let consumption = numeric_reading(readings, &key, SINK_DEFAULT_CONSUMPTION)?;
                    (p - consumption / 100.0).max(SINK_MIN_PRESSURE)
                }
            };
            let temperature = AMBIENT_TEMPERATURE + self.gaussian(1.0);

            if !pressure.is_finite() {
                return Err(PhysicsError::NonFinite {
                    id: node.id.clone(),
                    quantity: "pressure",
                });
            }
            nodes.push(NodeState {
                pressure: pressure.max(0.0),
                temperature,
            });
        }

        let mut pipes = Vec::with_capacity(topology.pipes.len());
        for pipe in &topology.pipes {
            let lookup = |id: &str| {
                topology
                    .node_index(id)
                    .map(|i| nodes[i].pressure)
                    .ok_or_else(|| PhysicsError::UnknownNode {
                        pipe: pipe.id.clone(),
                        node: id.to_string(),
                    })
            };
            let delta = lookup(&pipe.from_node)? - lookup(&pipe.to_node)?;
            let capacity = pipe.diameter.powi(2) * 100.0;
            let flow_rate = (delta * capacity / pipe.length).max(0.0);

            if !flow_rate.is_finite() {
                return Err(PhysicsError::NonFinite {
                    id: pipe.id.clone(),
                    quantity: "flow rate",
                });
            }
            pipes.push(PipeState {
                flow_rate,
                pressure_drop: delta,
            });
        }

        Ok((nodes, pipes))
    }

    fn gaussian(&mut self, std_dev: f64) -> f64 {
        Normal::new(0.0, std_dev)
            .map(|n| n.sample(&mut self.rng))
            .unwrap_or(0.0)
    }
}

fn numeric_reading(readings: &SensorReadings, key: &str, default: f64) -> Result<f64, PhysicsError> {
    match readings.get(key) {
        None => Ok(default),
        Some(value) => value.as_f64().ok_or_else(|| PhysicsError::InvalidReading {
            key: key.to_string(),
            found: value.type_name(),
        }),
    }
}
