pub mod compressor;
pub mod core;
pub mod fleet;
pub mod flow;
pub mod leak;
pub mod pid;
pub mod pressure;
pub mod safety;
pub mod shutdown;
pub mod temperature;
pub mod valve;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumIter};
use tracing::error;

use crate::domain::{NodeKind, OutputMap, SensorReadings, Severity, Value};

pub use self::core::{ControllerCore, InputRegister, InputSource, LogicError};
pub use compressor::{CompressorManagement, CompressorSettings};
pub use fleet::{ControllerFleet, FleetError};
pub use flow::{FlowRegulation, FlowRegulationSettings};
pub use leak::{LeakDetection, LeakDetectionSettings};
pub use pid::{PidController, PidGains};
pub use pressure::{PressureControl, PressureControlSettings};
pub use safety::{SafetyMonitoring, SafetyMonitoringSettings, SafetyZone};
pub use shutdown::{EmergencyShutdown, EmergencyShutdownSettings, ESD_RESET};
pub use temperature::{TemperatureControl, TemperatureControlSettings};
pub use valve::{ValveControl, ValveSettings};

/// The two kind-specific hooks of a scan cycle.
///
/// `update_inputs` copies the readings this kind cares about into input
/// registers; `execute_logic` evaluates the kind's rules against those
/// registers and writes outputs, memory and alarms.
pub trait ControlLogic {
    fn update_inputs(
        &mut self,
        core: &mut ControllerCore,
        readings: &SensorReadings,
    ) -> Result<(), LogicError>;

    fn execute_logic(&mut self, core: &mut ControllerCore) -> Result<(), LogicError>;
}

/// Sensor reading key for a quantity at a node, e.g. `pressure_Source_1`.
pub fn reading_key(prefix: &str, node_id: &str) -> String {
    format!("{}_{}", prefix, node_id)
}

/// Controller kinds, in the order used when cycling small networks
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerKind {
    PressureControl,
    FlowRegulation,
    CompressorManagement,
    ValveControl,
    SafetyMonitoring,
    LeakDetection,
    TemperatureControl,
    EmergencyShutdown,
}

impl ControllerKind {
    /// Kinds handed out round-robin to nodes without a role-specific kind
    pub const GENERAL_PURPOSE: [ControllerKind; 4] = [
        ControllerKind::ValveControl,
        ControllerKind::SafetyMonitoring,
        ControllerKind::LeakDetection,
        ControllerKind::TemperatureControl,
    ];

    /// Role-specific kind for a node, if its type has one
    pub fn for_role(kind: NodeKind) -> Option<Self> {
        match kind {
            NodeKind::Source => Some(Self::PressureControl),
            NodeKind::Compressor => Some(Self::CompressorManagement),
            NodeKind::Sink => Some(Self::FlowRegulation),
            NodeKind::Junction => None,
        }
    }

    pub fn is_general_purpose(self) -> bool {
        Self::GENERAL_PURPOSE.contains(&self)
    }

    /// `PLC_<KIND>_<node>`
    pub fn controller_id(self, node_id: &str) -> String {
        format!("PLC_{}_{}", self, node_id)
    }
}

/// Tunables for every controller kind
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    pub pressure_control: PressureControlSettings,
    pub flow_regulation: FlowRegulationSettings,
    pub compressor_management: CompressorSettings,
    pub valve_control: ValveSettings,
    pub safety_monitoring: SafetyMonitoringSettings,
    pub leak_detection: LeakDetectionSettings,
    pub temperature_control: TemperatureControlSettings,
    pub emergency_shutdown: EmergencyShutdownSettings,
}

/// Kind-specific state of a controller
#[derive(Debug, Clone)]
pub enum ControllerLogic {
    PressureControl(PressureControl),
    FlowRegulation(FlowRegulation),
    CompressorManagement(CompressorManagement),
    ValveControl(ValveControl),
    SafetyMonitoring(SafetyMonitoring),
    LeakDetection(LeakDetection),
    TemperatureControl(TemperatureControl),
    EmergencyShutdown(EmergencyShutdown),
}

macro_rules! dispatch {
    ($value:expr, $logic:ident => $body:expr) => {
        match $value {
            ControllerLogic::PressureControl($logic) => $body,
            ControllerLogic::FlowRegulation($logic) => $body,
            ControllerLogic::CompressorManagement($logic) => $body,
            ControllerLogic::ValveControl($logic) => $body,
            ControllerLogic::SafetyMonitoring($logic) => $body,
            ControllerLogic::LeakDetection($logic) => $body,
            ControllerLogic::TemperatureControl($logic) => $body,
            ControllerLogic::EmergencyShutdown($logic) => $body,
        }
    };
}

impl ControllerLogic {
    pub fn new(kind: ControllerKind, settings: &ControllerSettings) -> Self {
        match kind {
            ControllerKind::PressureControl => {
                Self::PressureControl(PressureControl::new(settings.pressure_control.clone()))
            }
            ControllerKind::FlowRegulation => {
                Self::FlowRegulation(FlowRegulation::new(settings.flow_regulation.clone()))
            }
            ControllerKind::CompressorManagement => Self::CompressorManagement(
                CompressorManagement::new(settings.compressor_management.clone()),
            ),
            ControllerKind::ValveControl => {
                Self::ValveControl(ValveControl::new(settings.valve_control.clone()))
            }
            ControllerKind::SafetyMonitoring => {
                Self::SafetyMonitoring(SafetyMonitoring::new(settings.safety_monitoring.clone()))
            }
            ControllerKind::LeakDetection => {
                Self::LeakDetection(LeakDetection::new(settings.leak_detection.clone()))
            }
            ControllerKind::TemperatureControl => Self::TemperatureControl(
                TemperatureControl::new(settings.temperature_control.clone()),
            ),
            ControllerKind::EmergencyShutdown => Self::EmergencyShutdown(EmergencyShutdown::new(
                settings.emergency_shutdown.clone(),
            )),
        }
    }

    pub fn kind(&self) -> ControllerKind {
        match self {
            Self::PressureControl(_) => ControllerKind::PressureControl,
            Self::FlowRegulation(_) => ControllerKind::FlowRegulation,
            Self::CompressorManagement(_) => ControllerKind::CompressorManagement,
            Self::ValveControl(_) => ControllerKind::ValveControl,
            Self::SafetyMonitoring(_) => ControllerKind::SafetyMonitoring,
            Self::LeakDetection(_) => ControllerKind::LeakDetection,
            Self::TemperatureControl(_) => ControllerKind::TemperatureControl,
            Self::EmergencyShutdown(_) => ControllerKind::EmergencyShutdown,
        }
    }
}

impl ControlLogic for ControllerLogic {
    fn update_inputs(
        &mut self,
        core: &mut ControllerCore,
        readings: &SensorReadings,
    ) -> Result<(), LogicError> {
        dispatch!(self, logic => logic.update_inputs(core, readings))
    }

    fn execute_logic(&mut self, core: &mut ControllerCore) -> Result<(), LogicError> {
        dispatch!(self, logic => logic.execute_logic(core))
    }
}

/// Status view of one controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub controller_id: String,
    pub node_id: String,
    pub kind: ControllerKind,
    pub active: bool,
    pub last_scan: DateTime<Utc>,
    pub inputs: BTreeMap<String, Value>,
    pub outputs: OutputMap,
    pub memory: BTreeMap<String, Value>,
    pub active_alarm_count: usize,
    pub timer_count: usize,
    pub counter_count: usize,
}

/// A PLC bound to one network node
#[derive(Debug, Clone)]
pub struct Controller {
    core: ControllerCore,
    logic: ControllerLogic,
}

impl Controller {
    pub fn new(
        kind: ControllerKind,
        node_id: &str,
        settings: &ControllerSettings,
        scan_period: Duration,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            core: ControllerCore::new(kind.controller_id(node_id), node_id, scan_period, created_at),
            logic: ControllerLogic::new(kind, settings),
        }
    }

    pub fn id(&self) -> &str {
        self.core.id()
    }

    pub fn node_id(&self) -> &str {
        self.core.node_id()
    }

    pub fn kind(&self) -> ControllerKind {
        self.logic.kind()
    }

    pub fn is_active(&self) -> bool {
        self.core.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.core.active = active;
    }

    pub fn last_scan(&self) -> DateTime<Utc> {
        self.core.last_scan
    }

    pub fn core(&self) -> &ControllerCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut ControllerCore {
        &mut self.core
    }

    pub fn logic(&self) -> &ControllerLogic {
        &self.logic
    }

    /// Run one scan cycle if the controller is active and its scan is due.
    ///
    /// Returns the full output map after a successful scan and an empty map
    /// when the scan is skipped or fails. A failed scan is recorded as a HIGH
    /// `SCAN_ERROR_<id>` alarm and still counts as the scan for this period.
    pub fn execute_scan(&mut self, readings: &SensorReadings, now: DateTime<Utc>) -> OutputMap {
        if !self.core.active || !self.core.scan_due(now) {
            return OutputMap::new();
        }

        self.core.begin_scan(now);
        let result = self.run_hooks(readings);
        self.core.complete_scan();

        match result {
            Ok(()) => self.core.output_values(),
            Err(e) => {
                error!(
                    controller_id = self.core.id(),
                    node_id = self.core.node_id(),
                    error = %e,
                    "controller scan failed"
                );
                let alarm_id = format!("SCAN_ERROR_{}", self.core.id());
                self.core
                    .add_alarm(&alarm_id, Severity::High, format!("PLC scan error: {}", e));
                OutputMap::new()
            }
        }
    }

    fn run_hooks(&mut self, readings: &SensorReadings) -> Result<(), LogicError> {
        self.logic.update_inputs(&mut self.core, readings)?;
        self.logic.execute_logic(&mut self.core)
    }

    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            controller_id: self.core.id().to_string(),
            node_id: self.core.node_id().to_string(),
            kind: self.kind(),
            active: self.core.active,
            last_scan: self.core.last_scan,
            inputs: self.core.input_values(),
            outputs: self.core.output_values(),
            memory: self.core.memory().clone(),
            active_alarm_count: self.core.active_alarm_count(),
            timer_count: self.core.timer_count(),
            counter_count: self.core.counter_count(),
        }
    }
}

/// Scan drivers for exercising a single kind in isolation
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use chrono::TimeZone;

    pub const SCAN_PERIOD_MILLIS: i64 = 100;

    pub fn scan_period() -> Duration {
        Duration::milliseconds(SCAN_PERIOD_MILLIS)
    }

    pub fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    pub fn readings(pairs: &[(&str, Value)]) -> SensorReadings {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    fn drive<L: ControlLogic>(
        logic: &mut L,
        core: &mut ControllerCore,
        now: DateTime<Utc>,
        readings: &SensorReadings,
    ) {
        core.begin_scan(now);
        logic.update_inputs(core, readings).unwrap();
        logic.execute_logic(core).unwrap();
        core.complete_scan();
    }

    /// Owns a logic block and its core, advancing a simulated clock per scan
    pub struct Harness<L> {
        pub logic: L,
        pub core: ControllerCore,
        clock: DateTime<Utc>,
    }

    impl<L: ControlLogic> Harness<L> {
        pub fn new(logic: L, node_id: &str) -> Self {
            Self {
                logic,
                core: ControllerCore::new(format!("PLC_TEST_{}", node_id), node_id, scan_period(), epoch()),
                clock: epoch(),
            }
        }

        pub fn advance(&mut self, by: Duration) {
            self.clock += by;
        }

        pub fn scan(&mut self, readings: &SensorReadings) {
            self.advance(scan_period());
            drive(&mut self.logic, &mut self.core, self.clock, readings);
        }
    }

    pub fn scan_sequence<L, I>(logic: &mut L, node_id: &str, sequence: I) -> ControllerCore
    where
        L: ControlLogic,
        I: IntoIterator<Item = SensorReadings>,
    {
        let mut core =
            ControllerCore::new(format!("PLC_TEST_{}", node_id), node_id, scan_period(), epoch());
        let mut clock = epoch();
        for readings in sequence {
            clock += scan_period();
            drive(logic, &mut core, clock, &readings);
        }
        core
    }

    pub fn scan_once<L: ControlLogic>(
        logic: &mut L,
        node_id: &str,
        readings: &SensorReadings,
    ) -> ControllerCore {
        scan_sequence(logic, node_id, std::iter::once(readings.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{epoch, readings, scan_period};
    use super::*;
    use strum::IntoEnumIterator;

    fn controller(kind: ControllerKind, node: &str) -> Controller {
        Controller::new(kind, node, &ControllerSettings::default(), scan_period(), epoch())
    }

    #[test]
    fn test_controller_id_format() {
        assert_eq!(
            ControllerKind::PressureControl.controller_id("Source_1"),
            "PLC_PRESSURE_CONTROL_Source_1"
        );
        assert_eq!(ControllerKind::iter().count(), 8);
    }

    #[test]
    fn test_scan_skipped_until_period_elapses() {
        let mut plc = controller(ControllerKind::TemperatureControl, "J1");
        let r = readings(&[("temperature_J1", Value::Number(30.0))]);

        assert!(plc.execute_scan(&r, epoch() + Duration::milliseconds(50)).is_empty());
        let outputs = plc.execute_scan(&r, epoch() + Duration::milliseconds(100));
        assert_eq!(outputs.get("COOLING_FAN"), Some(&Value::Bool(true)));
        assert!(plc.execute_scan(&r, epoch() + Duration::milliseconds(150)).is_empty());
        assert_eq!(plc.last_scan(), epoch() + Duration::milliseconds(100));
    }

    #[test]
    fn test_inactive_controller_never_scans() {
        let mut plc = controller(ControllerKind::TemperatureControl, "J1");
        plc.set_active(false);
        assert!(plc
            .execute_scan(&SensorReadings::new(), epoch() + Duration::seconds(10))
            .is_empty());
        assert_eq!(plc.last_scan(), epoch());
    }

    #[test]
    fn test_type_fault_becomes_scan_error_alarm() {
        let mut plc = controller(ControllerKind::PressureControl, "N1");
        let bad = readings(&[("pressure_N1", Value::from("not a number"))]);
        let at = epoch() + Duration::milliseconds(100);

        let outputs = plc.execute_scan(&bad, at);
        assert!(outputs.is_empty());
        let alarm = &plc.core().alarms()[0];
        assert_eq!(alarm.alarm_id, "SCAN_ERROR_PLC_PRESSURE_CONTROL_N1");
        assert_eq!(alarm.severity, Severity::High);
        // The failed scan still consumes its slot
        assert_eq!(plc.last_scan(), at);

        let ok = readings(&[("pressure_N1", Value::Number(50.0))]);
        assert!(!plc.execute_scan(&ok, at + Duration::milliseconds(100)).is_empty());
    }

    #[test]
    fn test_status_reflects_core() {
        let mut plc = controller(ControllerKind::EmergencyShutdown, "J4");
        plc.execute_scan(
            &readings(&[("emergency_button_J4", Value::Bool(true))]),
            epoch() + Duration::milliseconds(100),
        );
        let status = plc.status();
        assert_eq!(status.kind, ControllerKind::EmergencyShutdown);
        assert_eq!(status.active_alarm_count, 1);
        assert_eq!(status.outputs.get("ESD_ACTIVE"), Some(&Value::Bool(true)));
        assert_eq!(status.inputs.get("EMERGENCY_BUTTON"), Some(&Value::Bool(true)));
    }
}
