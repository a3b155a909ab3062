// Alarm domain model - threshold rules and alarm records
use crate::domain::telemetry::{Parameter, Snapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmLevel {
    Normal,
    Warning,
    Critical,
}

impl AlarmLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmLevel::Normal => "normal",
            AlarmLevel::Warning => "warning",
            AlarmLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for AlarmLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upper-only bounds (current).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SingleSidedBounds {
    pub warning: f64,
    pub critical: f64,
}

/// Low/high band (rpm, voltage). All comparisons are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DoubleSidedBounds {
    pub warning_low: f64,
    pub warning_high: f64,
    pub critical_low: f64,
    pub critical_high: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSet {
    pub current: SingleSidedBounds,
    pub rpm: DoubleSidedBounds,
    pub voltage: DoubleSidedBounds,
}

impl Default for ThresholdSet {
    fn default() -> Self {
        Self {
            current: SingleSidedBounds {
                warning: 15.0,
                critical: 20.0,
            },
            rpm: DoubleSidedBounds {
                warning_low: 1.0,
                warning_high: 19.0,
                critical_low: 0.0,
                critical_high: 20.0,
            },
            voltage: DoubleSidedBounds {
                warning_low: 210.0,
                warning_high: 225.0,
                critical_low: 180.0,
                critical_high: 240.0,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundSide {
    Low,
    High,
}

/// One parameter outside its band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub parameter: Parameter,
    pub level: AlarmLevel,
    pub side: BoundSide,
    pub value: f64,
    pub threshold: f64,
}

impl Violation {
    /// Operator-facing text, carries the live value.
    pub fn message(&self) -> String {
        let label = self.parameter.label();
        match (self.parameter, self.level) {
            (Parameter::Current, AlarmLevel::Critical) => format!(
                "Critical: {} at {:.2}A exceeds {}A limit",
                label, self.value, self.threshold
            ),
            (Parameter::Current, _) => format!(
                "Warning: {} at {:.2}A approaching {}A limit",
                label, self.value, self.threshold
            ),
            (_, AlarmLevel::Critical) => format!(
                "Critical: {} at {:.1} outside safe range (limit {})",
                label, self.value, self.threshold
            ),
            (_, _) => format!(
                "Warning: {} at {:.1} approaching limits (limit {})",
                label, self.value, self.threshold
            ),
        }
    }

    /// Stable text for the persisted log. Excludes the value so repeated
    /// firings of the same condition share one message.
    pub fn log_message(&self) -> &'static str {
        match (self.parameter, self.level, self.side) {
            (Parameter::Current, AlarmLevel::Critical, _) => "Critical Overcurrent",
            (Parameter::Current, _, _) => "High Current Warning",
            (Parameter::Voltage, AlarmLevel::Critical, BoundSide::High) => "Overvoltage",
            (Parameter::Voltage, AlarmLevel::Critical, BoundSide::Low) => "Critical Undervoltage",
            (Parameter::Voltage, _, BoundSide::High) => "High Voltage Warning",
            (Parameter::Voltage, _, BoundSide::Low) => "Undervoltage",
            (Parameter::Rpm, AlarmLevel::Critical, BoundSide::High) => "Critical Overspeed",
            (Parameter::Rpm, AlarmLevel::Critical, BoundSide::Low) => "Critical Underspeed",
            (Parameter::Rpm, _, BoundSide::High) => "Overspeed Warning",
            (Parameter::Rpm, _, BoundSide::Low) => "Underspeed Warning",
            (Parameter::Power, _, _) => "Power Limit",
        }
    }

    pub fn into_alarm(self, timestamp: DateTime<Utc>) -> Alarm {
        Alarm {
            id: format!(
                "{}-{}-{}",
                self.parameter,
                self.level,
                timestamp.timestamp_millis()
            ),
            timestamp,
            level: self.level,
            parameter: self.parameter,
            message: self.message(),
            value: self.value,
            threshold: self.threshold,
        }
    }
}

/// Result of applying a threshold set to one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub level: AlarmLevel,
    pub violations: Vec<Violation>,
}

impl Evaluation {
    pub fn normal() -> Self {
        Self {
            level: AlarmLevel::Normal,
            violations: Vec::new(),
        }
    }

    pub fn is_normal(&self) -> bool {
        self.violations.is_empty()
    }
}

impl ThresholdSet {
    /// Check current, rpm and voltage. Power is informational and never alarmed.
    pub fn evaluate(&self, snapshot: &Snapshot) -> Evaluation {
        let violations: Vec<Violation> = [
            check_single_sided(Parameter::Current, snapshot.current, &self.current),
            check_double_sided(Parameter::Rpm, snapshot.rpm, &self.rpm),
            check_double_sided(Parameter::Voltage, snapshot.voltage, &self.voltage),
        ]
        .into_iter()
        .flatten()
        .collect();

        let level = violations
            .iter()
            .map(|v| v.level)
            .max()
            .unwrap_or(AlarmLevel::Normal);

        Evaluation { level, violations }
    }
}

fn check_single_sided(parameter: Parameter, value: f64, bounds: &SingleSidedBounds) -> Option<Violation> {
    let (level, threshold) = if value >= bounds.critical {
        (AlarmLevel::Critical, bounds.critical)
    } else if value >= bounds.warning {
        (AlarmLevel::Warning, bounds.warning)
    } else {
        return None;
    };

    Some(Violation {
        parameter,
        level,
        side: BoundSide::High,
        value,
        threshold,
    })
}

fn check_double_sided(parameter: Parameter, value: f64, bounds: &DoubleSidedBounds) -> Option<Violation> {
    let (level, side, threshold) = if value <= bounds.critical_low {
        (AlarmLevel::Critical, BoundSide::Low, bounds.critical_low)
    } else if value >= bounds.critical_high {
        (AlarmLevel::Critical, BoundSide::High, bounds.critical_high)
    } else if value <= bounds.warning_low {
        (AlarmLevel::Warning, BoundSide::Low, bounds.warning_low)
    } else if value >= bounds.warning_high {
        (AlarmLevel::Warning, BoundSide::High, bounds.warning_high)
    } else {
        return None;
    };

    Some(Violation {
        parameter,
        level,
        side,
        value,
        threshold,
    })
}

/// In-memory alarm raised by an evaluation. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: AlarmLevel,
    pub parameter: Parameter,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlarmStatus {
    Active,
}

impl AlarmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmStatus::Active => "ACTIVE",
        }
    }
}

/// Row to be appended to the alarm log.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlarmLog {
    pub timestamp: DateTime<Utc>,
    pub level: AlarmLevel,
    pub message: String,
}

impl NewAlarmLog {
    pub fn from_violation(violation: &Violation, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            level: violation.level,
            message: violation.log_message().to_string(),
        }
    }
}

/// Persisted alarm log row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmLogEntry {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub level: AlarmLevel,
    pub message: String,
    pub status: AlarmStatus,
    pub source: String,
}

pub const ALARM_LOG_SOURCE: &str = "SYSTEM";
