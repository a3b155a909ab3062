// Time range selection shared by the data API and the dashboard
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "live")]
    Live,
    #[serde(rename = "30m")]
    Minutes30,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "6h")]
    Hours6,
    #[serde(rename = "12h")]
    Hours12,
    #[serde(rename = "24h")]
    Hours24,
    #[serde(rename = "7d")]
    Days7,
    #[serde(rename = "30d")]
    Days30,
}

#[derive(Debug, Error, PartialEq)]
#[error("unknown time range `{0}`")]
pub struct UnknownTimeRange(pub String);

impl TimeRange {
    pub const HISTORY: [TimeRange; 7] = [
        TimeRange::Minutes30,
        TimeRange::Hour1,
        TimeRange::Hours6,
        TimeRange::Hours12,
        TimeRange::Hours24,
        TimeRange::Days7,
        TimeRange::Days30,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::Live => "live",
            TimeRange::Minutes30 => "30m",
            TimeRange::Hour1 => "1h",
            TimeRange::Hours6 => "6h",
            TimeRange::Hours12 => "12h",
            TimeRange::Hours24 => "24h",
            TimeRange::Days7 => "7d",
            TimeRange::Days30 => "30d",
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, TimeRange::Live)
    }

    /// Trailing window covered by a history range. `None` for live.
    pub fn window(&self) -> Option<Duration> {
        match self {
            TimeRange::Live => None,
            TimeRange::Minutes30 => Some(Duration::minutes(30)),
            TimeRange::Hour1 => Some(Duration::hours(1)),
            TimeRange::Hours6 => Some(Duration::hours(6)),
            TimeRange::Hours12 => Some(Duration::hours(12)),
            TimeRange::Hours24 => Some(Duration::hours(24)),
            TimeRange::Days7 => Some(Duration::days(7)),
            TimeRange::Days30 => Some(Duration::days(30)),
        }
    }
}

impl FromStr for TimeRange {
    type Err = UnknownTimeRange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        std::iter::once(TimeRange::Live)
            .chain(TimeRange::HISTORY)
            .find(|range| range.as_str() == s.trim())
            .ok_or_else(|| UnknownTimeRange(s.to_string()))
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
