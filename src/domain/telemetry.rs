// Telemetry data domain models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Motor quantities carried by the sensor topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parameter {
    Voltage,
    Current,
    Rpm,
    Power,
}

impl Parameter {
    pub const ALL: [Parameter; 4] = [
        Parameter::Voltage,
        Parameter::Current,
        Parameter::Rpm,
        Parameter::Power,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Parameter::Voltage => "voltage",
            Parameter::Current => "current",
            Parameter::Rpm => "rpm",
            Parameter::Power => "power",
        }
    }

    /// Label used in operator-facing alarm text
    pub fn label(&self) -> &'static str {
        match self {
            Parameter::Voltage => "Voltage",
            Parameter::Current => "Current",
            Parameter::Rpm => "RPM",
            Parameter::Power => "Power",
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single most recent set of sensor values. Overwritten in place, never queued.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub voltage: f64,
    pub current: f64,
    pub rpm: f64,
    pub power: f64,
    pub timestamp: DateTime<Utc>,
}

impl Snapshot {
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            voltage: 0.0,
            current: 0.0,
            rpm: 0.0,
            power: 0.0,
            timestamp,
        }
    }

    pub fn get(&self, parameter: Parameter) -> f64 {
        match parameter {
            Parameter::Voltage => self.voltage,
            Parameter::Current => self.current,
            Parameter::Rpm => self.rpm,
            Parameter::Power => self.power,
        }
    }

    pub fn set(&mut self, parameter: Parameter, value: f64) {
        match parameter {
            Parameter::Voltage => self.voltage = value,
            Parameter::Current => self.current = value,
            Parameter::Rpm => self.rpm = value,
            Parameter::Power => self.power = value,
        }
    }

    pub fn apply(&mut self, reading: &SensorReading) {
        for (parameter, value) in &reading.values {
            self.set(*parameter, *value);
        }
        self.timestamp = reading.received_at;
    }

    pub fn to_sample(&self) -> Sample {
        Sample {
            timestamp: self.timestamp,
            voltage: self.voltage,
            current: self.current,
            rpm: self.rpm,
            power: self.power,
        }
    }
}

/// Persisted row of the samples table. Immutable once written.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub voltage: f64,
    pub current: f64,
    pub rpm: f64,
    pub power: f64,
}

impl Sample {
    pub fn get(&self, parameter: Parameter) -> f64 {
        match parameter {
            Parameter::Voltage => self.voltage,
            Parameter::Current => self.current,
            Parameter::Rpm => self.rpm,
            Parameter::Power => self.power,
        }
    }

    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            voltage: self.voltage,
            current: self.current,
            rpm: self.rpm,
            power: self.power,
            timestamp: self.timestamp,
        }
    }
}

/// Normalized values decoded from one transport message.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub values: Vec<(Parameter, f64)>,
    pub received_at: DateTime<Utc>,
    /// Fields that could not be read as numbers and were replaced by 0.
    pub coerced: Vec<Parameter>,
}

impl SensorReading {
    pub fn value(&self, parameter: Parameter) -> Option<f64> {
        self.values
            .iter()
            .find(|(p, _)| *p == parameter)
            .map(|(_, v)| *v)
    }
}

/// Shapes a sensor value arrives in. Some HMI encodings wrap the number in a
/// single-element array, others quote it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SensorValue {
    Scalar(f64),
    Sequence(Vec<SensorValue>),
    Text(String),
    Other(serde_json::Value),
}

impl SensorValue {
    /// Scalar view of the value: the number itself, the first element of a
    /// sequence, or a numeric string. `None` for anything else.
    pub fn normalize(&self) -> Option<f64> {
        match self {
            SensorValue::Scalar(v) if v.is_finite() => Some(*v),
            SensorValue::Scalar(_) => None,
            SensorValue::Sequence(items) => items.first().and_then(SensorValue::normalize),
            SensorValue::Text(text) => text.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            SensorValue::Other(_) => None,
        }
    }

    /// Normalize and coerce unreadable input to 0.
    ///
    /// This deliberately absorbs malformed device payloads instead of failing the
    /// message. The second element reports whether coercion happened so callers
    /// can count it.
    pub fn normalize_or_zero(value: Option<&SensorValue>) -> (f64, bool) {
        match value.and_then(SensorValue::normalize) {
            Some(v) => (v, false),
            None => (0.0, true),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub time_ms: i64,
    pub value: f64,
}

impl TimeSeriesPoint {
    pub fn new(time_ms: i64, value: f64) -> Self {
        Self { time_ms, value }
    }
}

/// Downsample time series points using bucket averaging
pub fn downsample_points(points: Vec<TimeSeriesPoint>, max_points: usize) -> Vec<TimeSeriesPoint> {
    if points.is_empty() || max_points == 0 || points.len() <= max_points {
        return points;
    }

    let bucket_size = (points.len() as f64 / max_points as f64).ceil() as usize;
    let mut downsampled = Vec::with_capacity(max_points);

    for chunk in points.chunks(bucket_size) {
        // Use middle point's timestamp and average value
        let mid_idx = chunk.len() / 2;
        let avg_value = chunk.iter().map(|p| p.value).sum::<f64>() / chunk.len() as f64;

        downsampled.push(TimeSeriesPoint::new(chunk[mid_idx].time_ms, avg_value));
    }

    downsampled
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(json: &str) -> SensorValue {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_scalar_and_single_element_sequence_normalize_identically() {
        assert_eq!(decode("5").normalize(), Some(5.0));
        assert_eq!(decode("[5]").normalize(), Some(5.0));
        assert_eq!(decode("5").normalize(), decode("[5]").normalize());
    }

    #[test]
    fn test_sequence_takes_first_element() {
        assert_eq!(decode("[220.5, 1.0]").normalize(), Some(220.5));
        assert_eq!(decode("[\"12\"]").normalize(), Some(12.0));
    }

    #[test]
    fn test_unreadable_values_coerce_to_zero() {
        for json in ["null", "[]", "\"abc\"", "{\"v\": 1}", "true"] {
            let value = decode(json);
            assert_eq!(SensorValue::normalize_or_zero(Some(&value)), (0.0, true), "{json}");
        }
        assert_eq!(SensorValue::normalize_or_zero(None), (0.0, true));
    }

    #[test]
    fn test_downsample_averages_buckets() {
        let points: Vec<_> = (0..10).map(|i| TimeSeriesPoint::new(i, i as f64)).collect();
        let downsampled = downsample_points(points.clone(), 5);
        assert_eq!(downsampled.len(), 5);
        assert_eq!(downsampled[0], TimeSeriesPoint::new(1, 0.5));
        assert_eq!(downsampled[4], TimeSeriesPoint::new(9, 8.5));

        assert_eq!(downsample_points(points.clone(), 20), points);
    }

    #[test]
    fn test_snapshot_apply_overwrites_only_reported_fields() {
        let start = Utc::now();
        let mut snapshot = Snapshot::empty(start);
        snapshot.voltage = 220.0;

        let reading = SensorReading {
            values: vec![(Parameter::Current, 1.5)],
            received_at: start + chrono::Duration::seconds(1),
            coerced: Vec::new(),
        };
        snapshot.apply(&reading);

        assert_eq!(snapshot.voltage, 220.0);
        assert_eq!(snapshot.current, 1.5);
        assert_eq!(snapshot.timestamp, reading.received_at);
    }
}
