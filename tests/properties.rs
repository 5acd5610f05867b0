use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;
use strum::IntoEnumIterator;

use gas_pipeline_twin::controller::{Controller, ControllerKind, ControllerSettings};
use gas_pipeline_twin::domain::{NetworkTopology, SensorReadings};
use gas_pipeline_twin::simulation::SensorModel;

fn epoch() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

proptest! {
    #[test]
    fn scans_never_closer_than_period(
        period_ms in 10i64..1_000,
        steps in prop::collection::vec(1i64..400, 1..60),
        kind_index in 0usize..8,
    ) {
        let kind = ControllerKind::iter().nth(kind_index).unwrap();
        let period = Duration::milliseconds(period_ms);
        let mut controller = Controller::new(kind, "N1", &ControllerSettings::default(), period, epoch());

        let mut now = epoch();
        let mut last = epoch();
        for step in steps {
            now += Duration::milliseconds(step);
            let outputs = controller.execute_scan(&SensorReadings::new(), now);
            if now - last >= period {
                prop_assert!(!outputs.is_empty());
                prop_assert_eq!(controller.last_scan(), now);
                last = now;
            } else {
                prop_assert!(outputs.is_empty());
                prop_assert_eq!(controller.last_scan(), last);
            }
        }
    }

    #[test]
    fn seeded_sensor_models_agree(seed in any::<u64>(), ticks in 1usize..20) {
        let topology = NetworkTopology::reference();
        let mut a = SensorModel::new(&topology, Some(seed), epoch()).unwrap();
        let mut b = SensorModel::new(&topology, Some(seed), epoch()).unwrap();
        let mut now = epoch();
        for i in 0..ticks {
            now += Duration::milliseconds(100);
            let t = (i + 1) as f64 * 0.1;
            prop_assert_eq!(a.update_all(&topology, t, now), b.update_all(&topology, t, now));
        }
    }
}
