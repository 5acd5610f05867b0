//! # Pipeline Simulation
//!
//! One tick runs, in order:
//!
//! 1. **Sensors**: sample every channel from ground truth
//! 2. **Physics**: advance node pressures/temperatures and pipe flows
//! 3. **Fleet**: one scan pass over every controller
//! 4. **Supervisory**: fold active alarms into the plant status
//!
//! [`SimulationContext`] owns all of that state; [`Simulator`] runs it on a
//! cancellable tokio task behind a single mutex.
//!
//! ```rust,no_run
//! use gas_pipeline_twin::config::Config;
//! use gas_pipeline_twin::domain::NetworkTopology;
//! use gas_pipeline_twin::simulation::SimulationContext;
//!
//! let cfg = Config::default();
//! let mut ctx = SimulationContext::new(NetworkTopology::reference(), &cfg, chrono::Utc::now())?;
//! let record = ctx.tick();
//! println!("{} at tick {}", record.plant_status.level, record.tick);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod lifecycle;
pub mod physics;
pub mod sensors;
pub mod sink;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error};
use uuid::Uuid;

use crate::config::Config;
use crate::controller::{ControllerFleet, ControllerStatus, FleetError};
use crate::domain::{
    AlarmRecord, NetworkTopology, Node, OutputMap, Pipe, PlantStatus, SensorReadings, Value,
};
use crate::supervisory::SupervisoryAggregator;

pub use lifecycle::{CommandOutcome, Simulator, StartOutcome, StopOutcome};
pub use physics::{PhysicsEngine, PhysicsError};
pub use sensors::{Quantity, Sensor, SensorError, SensorModel};
pub use sink::{JsonLinesSink, NullSink, TelemetrySink};

/// Simulation time: advances by exactly one tick period per tick.
#[derive(Debug, Clone, Copy)]
pub struct SimClock {
    start: DateTime<Utc>,
    now: DateTime<Utc>,
    period: Duration,
    tick: u64,
}

impl SimClock {
    pub fn new(start: DateTime<Utc>, period: Duration) -> Self {
        Self {
            start,
            now: start,
            period,
            tick: 0,
        }
    }

    pub fn advance(&mut self) -> DateTime<Utc> {
        self.tick += 1;
        self.now += self.period;
        self.now
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn elapsed_secs(&self) -> f64 {
        (self.now - self.start).num_milliseconds() as f64 / 1000.0
    }
}

/// Everything produced by one tick; this is what persistence sinks receive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickRecord {
    pub run_id: Uuid,
    pub tick: u64,
    pub timestamp: DateTime<Utc>,
    pub plant_status: PlantStatus,
    pub readings: SensorReadings,
    /// Keyed by controller id; empty when the controller did not scan
    pub outputs: BTreeMap<String, OutputMap>,
    pub active_alarms: Vec<AlarmRecord>,
    pub physics_ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationStatus {
    pub running: bool,
    pub run_id: Uuid,
    pub tick: u64,
    pub node_count: usize,
    pub pipe_count: usize,
    pub active_controller_count: usize,
    pub active_sensor_count: usize,
    pub plant_status: PlantStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub tick: u64,
    pub timestamp: DateTime<Utc>,
    pub nodes: Vec<Node>,
    pub pipes: Vec<Pipe>,
    pub sensor_values: SensorReadings,
    pub controller_statuses: BTreeMap<String, ControllerStatus>,
    pub plant_status: PlantStatus,
}

/// Sole owner of simulation state for one run
#[derive(Debug)]
pub struct SimulationContext {
    run_id: Uuid,
    clock: SimClock,
    topology: NetworkTopology,
    sensors: SensorModel,
    physics: PhysicsEngine,
    fleet: ControllerFleet,
    aggregator: SupervisoryAggregator,
}

impl SimulationContext {
    pub fn new(
        topology: NetworkTopology,
        cfg: &Config,
        start: DateTime<Utc>,
    ) -> Result<Self, SensorError> {
        let seed = cfg.simulation.random_seed;
        let sensors = SensorModel::new(&topology, seed, start)?;
        // Separate stream so physics noise does not shift sensor noise
        let physics = PhysicsEngine::new(seed.map(|s| s.wrapping_add(1)));
        let fleet = ControllerFleet::new(
            &topology,
            &cfg.controllers,
            cfg.simulation.scan_period(),
            start,
        );

        Ok(Self {
            run_id: Uuid::new_v4(),
            clock: SimClock::new(start, cfg.simulation.tick_period()),
            topology,
            sensors,
            physics,
            fleet,
            aggregator: SupervisoryAggregator::new(start),
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn topology(&self) -> &NetworkTopology {
        &self.topology
    }

    pub fn sensors(&self) -> &SensorModel {
        &self.sensors
    }

    pub fn fleet(&self) -> &ControllerFleet {
        &self.fleet
    }

    pub fn plant_status(&self) -> &PlantStatus {
        self.aggregator.status()
    }

    /// Run one full tick.
    pub fn tick(&mut self) -> TickRecord {
        let now = self.clock.advance();
        let tick = self.clock.tick();

        let readings = self
            .sensors
            .update_all(&self.topology, self.clock.elapsed_secs(), now);

        let fleet = &self.fleet;
        let physics_ok = match self.physics.advance(&mut self.topology, &readings, |node| {
            fleet.compressor_running(node)
        }) {
            Ok(()) => true,
            Err(e) => {
                error!(tick, error = %e, "physics step failed, ground truth held");
                false
            }
        };

        let outputs = self.fleet.run_scans(&readings, now);
        let alarms = self.fleet.alarms();
        let plant_status = self.aggregator.update(&alarms, now);

        debug!(
            tick,
            level = %plant_status.level,
            active_alarms = plant_status.active_alarm_count,
            "tick complete"
        );

        TickRecord {
            run_id: self.run_id,
            tick,
            timestamp: now,
            plant_status,
            readings,
            outputs,
            active_alarms: alarms.into_iter().filter(|a| a.alarm.is_active()).collect(),
            physics_ok,
        }
    }

    pub fn status(&self, running: bool) -> SimulationStatus {
        SimulationStatus {
            running,
            run_id: self.run_id,
            tick: self.clock.tick(),
            node_count: self.topology.nodes.len(),
            pipe_count: self.topology.pipes.len(),
            active_controller_count: self.fleet.active_count(),
            active_sensor_count: self.sensors.active_count(),
            plant_status: self.aggregator.status().clone(),
        }
    }

    pub fn snapshot(&self) -> NetworkSnapshot {
        NetworkSnapshot {
            tick: self.clock.tick(),
            timestamp: self.clock.now(),
            nodes: self.topology.nodes.clone(),
            pipes: self.topology.pipes.clone(),
            sensor_values: self.sensors.readings(),
            controller_statuses: self.fleet.statuses(),
            plant_status: self.aggregator.status().clone(),
        }
    }

    pub fn send_command(
        &mut self,
        controller_id: &str,
        command: &BTreeMap<String, Value>,
    ) -> Result<(), FleetError> {
        let now = self.clock.now();
        self.fleet.send_command(controller_id, command, now)
    }

    pub fn acknowledge_alarm(&mut self, controller_id: &str, alarm_id: &str) -> Result<(), FleetError> {
        self.fleet.acknowledge_alarm(controller_id, alarm_id)
    }

    pub fn clear_acknowledged_alarms(&mut self, controller_id: &str) -> Result<usize, FleetError> {
        self.fleet.clear_acknowledged_alarms(controller_id)
    }

    pub fn set_controller_active(&mut self, controller_id: &str, active: bool) -> Result<(), FleetError> {
        self.fleet.set_active(controller_id, active)
    }

    /// Steer the simulated valve on a pipe; its position sensor lags toward it.
    pub fn set_valve_target(&mut self, pipe_id: &str, target: f64) -> Result<(), SensorError> {
        self.sensors.set_valve_target(pipe_id, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PlantLevel;

    fn seeded(seed: u64) -> Config {
        let mut cfg = Config::default();
        cfg.simulation.random_seed = Some(seed);
        cfg
    }

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_clock_advances_one_period_per_tick() {
        let mut clock = SimClock::new(start(), Duration::milliseconds(100));
        for _ in 0..25 {
            clock.advance();
        }
        assert_eq!(clock.tick(), 25);
        assert_eq!(clock.now() - start(), Duration::milliseconds(2500));
        assert!((clock.elapsed_secs() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_tick_produces_outputs_for_every_controller() {
        let mut ctx = SimulationContext::new(NetworkTopology::reference(), &seeded(11), start()).unwrap();
        let record = ctx.tick();
        assert_eq!(record.tick, 1);
        assert_eq!(record.outputs.len(), 8);
        assert!(record.physics_ok);
        assert!(record.outputs.values().all(|o| !o.is_empty()));
        assert_eq!(record.run_id, ctx.run_id());
    }

    #[test]
    fn test_same_seed_same_run() {
        let mut a = SimulationContext::new(NetworkTopology::reference(), &seeded(5), start()).unwrap();
        let mut b = SimulationContext::new(NetworkTopology::reference(), &seeded(5), start()).unwrap();
        for _ in 0..100 {
            let ra = a.tick();
            let rb = b.tick();
            assert_eq!(ra.readings, rb.readings);
            assert_eq!(ra.outputs, rb.outputs);
            assert_eq!(ra.plant_status.level, rb.plant_status.level);
        }
        let pa: Vec<f64> = a.topology().nodes.iter().map(|n| n.pressure).collect();
        let pb: Vec<f64> = b.topology().nodes.iter().map(|n| n.pressure).collect();
        assert_eq!(pa, pb);
    }

    #[test]
    fn test_physics_fault_is_silent_and_holds_state() {
        let mut topology = NetworkTopology::reference();
        // A pipe pointing nowhere makes every physics step fail
        topology.pipes[0].to_node = "Nowhere".to_string();
        let mut ctx = SimulationContext::new(topology, &seeded(3), start()).unwrap();
        let before: Vec<f64> = ctx.topology().nodes.iter().map(|n| n.pressure).collect();

        let record = ctx.tick();
        assert!(!record.physics_ok);
        let after: Vec<f64> = ctx.topology().nodes.iter().map(|n| n.pressure).collect();
        assert_eq!(before, after);
        // Controllers still ran
        assert!(record.outputs.values().all(|o| !o.is_empty()));
    }

    #[test]
    fn test_valve_target_steers_position_reading() {
        let mut ctx = SimulationContext::new(NetworkTopology::reference(), &seeded(2), start()).unwrap();
        let pipe = ctx.topology().pipes[0].id.clone();
        ctx.set_valve_target(&pipe, 0.0).unwrap();
        let key = format!("valve_position_{}", pipe);
        let mut last = f64::MAX;
        for _ in 0..10 {
            let position = ctx.tick().readings[&key].as_f64().unwrap();
            assert!(position < last);
            last = position;
        }
        assert!(matches!(
            ctx.set_valve_target("P_NONE", 10.0),
            Err(SensorError::UnknownValve(_))
        ));
    }

    #[test]
    fn test_status_and_snapshot() {
        let mut ctx = SimulationContext::new(NetworkTopology::reference(), &seeded(8), start()).unwrap();
        ctx.tick();
        let status = ctx.status(false);
        assert_eq!(status.node_count, 8);
        assert_eq!(status.pipe_count, 7);
        assert_eq!(status.active_controller_count, 8);
        assert_eq!(status.active_sensor_count, ctx.sensors().len());
        assert_eq!(status.tick, 1);

        let snapshot = ctx.snapshot();
        assert_eq!(snapshot.controller_statuses.len(), 8);
        assert_eq!(snapshot.sensor_values.len(), ctx.sensors().len());
    }

    #[test]
    fn test_emergency_command_escalates_plant_status() {
        let mut ctx = SimulationContext::new(NetworkTopology::reference(), &seeded(21), start()).unwrap();
        let mut command = BTreeMap::new();
        command.insert("EMERGENCY_BUTTON".to_string(), Value::Bool(true));
        ctx.send_command("PLC_EMERGENCY_SHUTDOWN_Junction_1", &command).unwrap();

        let record = ctx.tick();
        assert_eq!(record.plant_status.level, PlantLevel::Critical);
        assert!(record
            .active_alarms
            .iter()
            .any(|a| a.alarm.alarm_id == "EMERGENCY_SHUTDOWN"));

        assert!(matches!(
            ctx.send_command("PLC_UNKNOWN", &command),
            Err(FleetError::ControllerNotFound(_))
        ));
    }
}
