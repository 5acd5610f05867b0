//! # Controller Fleet
//!
//! Binds one controller to each network node and drives the per-tick scan
//! pass in a stable order.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use strum::IntoEnumIterator;
use thiserror::Error;
use tracing::{debug, info};

use super::{Controller, ControllerKind, ControllerLogic, ControllerSettings, ControllerStatus};
use crate::domain::{AlarmRecord, NetworkTopology, OutputMap, SensorReadings, Value};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FleetError {
    #[error("PLC {0} not found")]
    ControllerNotFound(String),
    #[error("alarm {alarm_id} not found on PLC {controller_id}")]
    AlarmNotFound {
        controller_id: String,
        alarm_id: String,
    },
}

/// Choose a controller kind for every node, in topology order.
///
/// Role nodes (source, compressor, sink) get their role kind and the rest
/// cycle through the general-purpose kinds. At least one emergency shutdown
/// controller always exists: if none was assigned naturally it takes the
/// first general-purpose slot, or the first slot when there is none. Networks
/// with fewer nodes than controller kinds cycle every kind instead.
pub fn assign_kinds(topology: &NetworkTopology) -> Vec<(String, ControllerKind)> {
    let all_kinds: Vec<ControllerKind> = ControllerKind::iter().collect();

    if topology.nodes.len() < all_kinds.len() {
        return topology
            .nodes
            .iter()
            .zip(all_kinds.iter().cycle())
            .map(|(node, kind)| (node.id.clone(), *kind))
            .collect();
    }

    let mut next_general = 0usize;
    let mut assignments: Vec<(String, ControllerKind)> = topology
        .nodes
        .iter()
        .map(|node| {
            let kind = ControllerKind::for_role(node.kind).unwrap_or_else(|| {
                let kind = ControllerKind::GENERAL_PURPOSE
                    [next_general % ControllerKind::GENERAL_PURPOSE.len()];
                next_general += 1;
                kind
            });
            (node.id.clone(), kind)
        })
        .collect();

    if !assignments
        .iter()
        .any(|(_, kind)| *kind == ControllerKind::EmergencyShutdown)
    {
        let slot = assignments
            .iter()
            .position(|(_, kind)| kind.is_general_purpose())
            .unwrap_or(0);
        if let Some(entry) = assignments.get_mut(slot) {
            entry.1 = ControllerKind::EmergencyShutdown;
        }
    }

    assignments
}

#[derive(Debug, Clone)]
pub struct ControllerFleet {
    controllers: Vec<Controller>,
    index: HashMap<String, usize>,
}

impl ControllerFleet {
    pub fn new(
        topology: &NetworkTopology,
        settings: &ControllerSettings,
        scan_period: Duration,
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut controllers = Vec::with_capacity(topology.nodes.len());
        let mut index = HashMap::with_capacity(topology.nodes.len());

        for (node_id, kind) in assign_kinds(topology) {
            let controller = Controller::new(kind, &node_id, settings, scan_period, created_at);
            info!(
                controller_id = controller.id(),
                node_id = %node_id,
                kind = %kind,
                "created PLC"
            );
            index.insert(controller.id().to_string(), controllers.len());
            controllers.push(controller);
        }

        info!(count = controllers.len(), "initialized PLC fleet");
        Self { controllers, index }
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Controllers in scan order
    pub fn controllers(&self) -> &[Controller] {
        &self.controllers
    }

    pub fn get(&self, controller_id: &str) -> Option<&Controller> {
        self.index.get(controller_id).map(|&i| &self.controllers[i])
    }

    fn get_mut(&mut self, controller_id: &str) -> Result<&mut Controller, FleetError> {
        match self.index.get(controller_id) {
            Some(&i) => Ok(&mut self.controllers[i]),
            None => Err(FleetError::ControllerNotFound(controller_id.to_string())),
        }
    }

    pub fn active_count(&self) -> usize {
        self.controllers.iter().filter(|c| c.is_active()).count()
    }

    /// One scan pass over every controller; skipped and failed scans map to
    /// an empty output map.
    pub fn run_scans(
        &mut self,
        readings: &SensorReadings,
        now: DateTime<Utc>,
    ) -> BTreeMap<String, OutputMap> {
        let outputs: BTreeMap<String, OutputMap> = self
            .controllers
            .iter_mut()
            .map(|controller| {
                let out = controller.execute_scan(readings, now);
                (controller.id().to_string(), out)
            })
            .collect();
        debug!(
            scanned = outputs.values().filter(|o| !o.is_empty()).count(),
            "fleet scan pass complete"
        );
        outputs
    }

    /// Write command values straight into a controller's input registers.
    pub fn send_command(
        &mut self,
        controller_id: &str,
        command: &BTreeMap<String, Value>,
        at: DateTime<Utc>,
    ) -> Result<(), FleetError> {
        let controller = self.get_mut(controller_id)?;
        for (address, value) in command {
            controller
                .core_mut()
                .command_input(address.clone(), value.clone(), at);
        }
        info!(
            controller_id,
            addresses = command.len(),
            "command applied"
        );
        Ok(())
    }

    pub fn acknowledge_alarm(
        &mut self,
        controller_id: &str,
        alarm_id: &str,
    ) -> Result<(), FleetError> {
        let controller = self.get_mut(controller_id)?;
        if controller.core_mut().acknowledge_alarm(alarm_id) {
            Ok(())
        } else {
            Err(FleetError::AlarmNotFound {
                controller_id: controller_id.to_string(),
                alarm_id: alarm_id.to_string(),
            })
        }
    }

    /// Drop acknowledged alarms from one controller's log, returning how many went.
    pub fn clear_acknowledged_alarms(&mut self, controller_id: &str) -> Result<usize, FleetError> {
        Ok(self
            .get_mut(controller_id)?
            .core_mut()
            .clear_acknowledged_alarms())
    }

    pub fn set_active(&mut self, controller_id: &str, active: bool) -> Result<(), FleetError> {
        self.get_mut(controller_id)?.set_active(active);
        info!(controller_id, active, "PLC activation changed");
        Ok(())
    }

    /// Every alarm in the fleet, in scan order then raise order
    pub fn alarms(&self) -> Vec<AlarmRecord> {
        self.controllers
            .iter()
            .flat_map(|controller| {
                controller.core().alarms().iter().map(|alarm| AlarmRecord {
                    controller_id: controller.id().to_string(),
                    node_id: controller.node_id().to_string(),
                    alarm: alarm.clone(),
                })
            })
            .collect()
    }

    pub fn statuses(&self) -> BTreeMap<String, ControllerStatus> {
        self.controllers
            .iter()
            .map(|c| (c.id().to_string(), c.status()))
            .collect()
    }

    /// Running state of the compressor controller bound to `node_id`, if any
    pub fn compressor_running(&self, node_id: &str) -> Option<bool> {
        self.controllers
            .iter()
            .filter(|c| c.node_id() == node_id)
            .find_map(|c| match c.logic() {
                ControllerLogic::CompressorManagement(logic) => Some(logic.is_running()),
                _ => None,
            })
    }
}
