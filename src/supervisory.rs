//! # Supervisory Aggregator
//!
//! Folds every controller's active alarms into a single plant status level.
//! The level is recomputed from scratch each tick; it holds no memory of
//! earlier ticks beyond the last result.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::domain::{Alarm, AlarmRecord, PlantLevel, PlantStatus, Severity};

/// Plant level for a set of alarms; acknowledged alarms are ignored.
///
/// Any CRITICAL gives CRITICAL, more than two HIGH give ALARM, one or two HIGH
/// give WARNING. LOW and MEDIUM alarms never raise the level.
pub fn classify<'a, I>(alarms: I) -> PlantLevel
where
    I: IntoIterator<Item = &'a Alarm>,
{
    let mut high = 0usize;
    for alarm in alarms.into_iter().filter(|a| a.is_active()) {
        match alarm.severity {
            Severity::Critical => return PlantLevel::Critical,
            Severity::High => high += 1,
            Severity::Medium | Severity::Low => {}
        }
    }
    match high {
        0 => PlantLevel::Normal,
        1..=2 => PlantLevel::Warning,
        _ => PlantLevel::Alarm,
    }
}

#[derive(Debug, Clone)]
pub struct SupervisoryAggregator {
    status: PlantStatus,
}

impl SupervisoryAggregator {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            status: PlantStatus::normal(now),
        }
    }

    pub fn status(&self) -> &PlantStatus {
        &self.status
    }

    pub fn update(&mut self, alarms: &[AlarmRecord], now: DateTime<Utc>) -> PlantStatus {
        let level = classify(alarms.iter().map(|r| &r.alarm));
        let active_alarm_count = alarms.iter().filter(|r| r.alarm.is_active()).count();

        if level != self.status.level {
            if level > self.status.level {
                warn!(from = %self.status.level, to = %level, active_alarm_count, "plant status escalated");
            } else {
                info!(from = %self.status.level, to = %level, active_alarm_count, "plant status relaxed");
            }
        }

        self.status = PlantStatus {
            level,
            active_alarm_count,
            timestamp: now,
        };
        self.status.clone()
    }
}
