pub mod topology;
pub mod types;

pub use topology::{NetworkTopology, Node, NodeKind, Pipe, TopologyError};
pub use types::{
    Alarm, AlarmRecord, OutputMap, PlantLevel, PlantStatus, Quality, SensorReadings, Severity,
    Value,
};
