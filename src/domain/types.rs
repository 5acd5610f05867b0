use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use strum::Display;

/// A register value as seen by sensors and controllers.
///
/// Field devices report booleans (switches, detectors), analog values and the
/// odd status string, so registers are dynamically typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    /// Numeric view; booleans read as 1.0 / 0.0.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(_) => None,
        }
    }

    /// Boolean view; numbers are true when non-zero.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Number(v) => Some(*v != 0.0),
            Value::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Text(_) => "text",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(v) => write!(f, "{:.3}", v),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Latest sensor values keyed by sensor id (`pressure_Source_1`, ...).
pub type SensorReadings = BTreeMap<String, Value>;

/// Controller output registers keyed by address.
pub type OutputMap = BTreeMap<String, Value>;

/// Signal quality tag carried with every input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Quality {
    Good,
    Bad,
    Uncertain,
}

/// Alarm severity, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// An alarm entry in a controller's log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alarm {
    pub alarm_id: String,
    pub severity: Severity,
    pub message: String,
    pub raised_at: DateTime<Utc>,
    /// Most recent time the condition was re-raised while unacknowledged
    pub last_raised_at: DateTime<Utc>,
    /// Number of times the condition was raised into this entry
    pub occurrences: u32,
    pub acknowledged: bool,
}

impl Alarm {
    pub fn new(
        alarm_id: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
        raised_at: DateTime<Utc>,
    ) -> Self {
        Self {
            alarm_id: alarm_id.into(),
            severity,
            message: message.into(),
            raised_at,
            last_raised_at: raised_at,
            occurrences: 1,
            acknowledged: false,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.acknowledged
    }
}

/// An alarm tagged with the controller that raised it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmRecord {
    pub controller_id: String,
    pub node_id: String,
    #[serde(flatten)]
    pub alarm: Alarm,
}

/// Plant-wide status level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PlantLevel {
    Normal,
    Warning,
    Alarm,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlantStatus {
    pub level: PlantLevel,
    pub active_alarm_count: usize,
    pub timestamp: DateTime<Utc>,
}

impl PlantStatus {
    pub fn normal(timestamp: DateTime<Utc>) -> Self {
        Self {
            level: PlantLevel::Normal,
            active_alarm_count: 0,
            timestamp,
        }
    }
}
