// Display unit conversions for speed and power
use serde::{Deserialize, Serialize};

const POWER_FACTOR: f64 = 0.85;
const SQRT_3: f64 = 1.732;
const WATTS_PER_HP: f64 = 745.7;
const RAD_S_PER_RPM: f64 = 0.10472;
/// 4-pole motor: f = rpm * poles / 120
const RPM_PER_HZ: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SpeedUnit {
    #[default]
    #[serde(rename = "rpm")]
    Rpm,
    #[serde(rename = "hz")]
    Hz,
    #[serde(rename = "rad/s")]
    RadPerSec,
}

impl SpeedUnit {
    pub fn convert(&self, rpm: f64) -> f64 {
        match self {
            SpeedUnit::Rpm => rpm,
            SpeedUnit::Hz => rpm / RPM_PER_HZ,
            SpeedUnit::RadPerSec => rpm * RAD_S_PER_RPM,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SpeedUnit::Rpm => "RPM",
            SpeedUnit::Hz => "Hz",
            SpeedUnit::RadPerSec => "rad/s",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerUnit {
    #[default]
    Watt,
    Kw,
    Hp,
}

impl PowerUnit {
    pub fn convert(&self, watts: f64) -> f64 {
        match self {
            PowerUnit::Watt => watts,
            PowerUnit::Kw => watts / 1000.0,
            PowerUnit::Hp => watts / WATTS_PER_HP,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PowerUnit::Watt => "W",
            PowerUnit::Kw => "kW",
            PowerUnit::Hp => "HP",
        }
    }
}

/// Three-phase apparent power estimate in watts.
pub fn estimate_power_watts(voltage: f64, current: f64) -> f64 {
    voltage * current * SQRT_3 * POWER_FACTOR
}
