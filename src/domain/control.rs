// Control command domain model
use crate::domain::units::{PowerUnit, SpeedUnit};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlAction {
    Start,
    Stop,
    SetDir,
    SetPid,
    SetSpeedSp,
    SetSpeedUnit,
    SetPowerUnit,
    SetMode,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Start => "START",
            ControlAction::Stop => "STOP",
            ControlAction::SetDir => "SET_DIR",
            ControlAction::SetPid => "SET_PID",
            ControlAction::SetSpeedSp => "SET_SPEED_SP",
            ControlAction::SetSpeedUnit => "SET_SPEED_UNIT",
            ControlAction::SetPowerUnit => "SET_POWER_UNIT",
            ControlAction::SetMode => "SET_MODE",
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControlMode {
    Auto,
    #[default]
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    #[default]
    Fwd,
    Rev,
}

impl Direction {
    /// Raw value the PLC expects on the direction topic.
    pub fn plc_value(&self) -> u8 {
        match self {
            Direction::Fwd => 1,
            Direction::Rev => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 1.5,
            ki: 0.5,
            kd: 0.1,
        }
    }
}

/// Body of `POST /control` as the dashboard sends it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ControlRequest {
    pub action: Option<ControlAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, rename = "speedValue", skip_serializing_if = "Option::is_none")]
    pub speed_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ki: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kd: Option<f64>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ControlError {
    #[error("missing action")]
    MissingAction,
    #[error("{action} requires field `{field}`")]
    MissingField {
        action: ControlAction,
        field: &'static str,
    },
    #[error("{action}: invalid value for `{field}`: {value}")]
    InvalidValue {
        action: ControlAction,
        field: &'static str,
        value: String,
    },
}

/// Validated control command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlCommand {
    Start { mode: ControlMode, speed: Option<f64> },
    Stop,
    SetDirection(Direction),
    SetPid(PidGains),
    SetSpeedSetpoint(f64),
    SetSpeedUnit(SpeedUnit),
    SetPowerUnit(PowerUnit),
    SetMode(ControlMode),
}

impl ControlCommand {
    pub fn action(&self) -> ControlAction {
        match self {
            ControlCommand::Start { .. } => ControlAction::Start,
            ControlCommand::Stop => ControlAction::Stop,
            ControlCommand::SetDirection(_) => ControlAction::SetDir,
            ControlCommand::SetPid(_) => ControlAction::SetPid,
            ControlCommand::SetSpeedSetpoint(_) => ControlAction::SetSpeedSp,
            ControlCommand::SetSpeedUnit(_) => ControlAction::SetSpeedUnit,
            ControlCommand::SetPowerUnit(_) => ControlAction::SetPowerUnit,
            ControlCommand::SetMode(_) => ControlAction::SetMode,
        }
    }

    /// Normalized payload republished to every dashboard.
    pub fn sync_payload(&self) -> SyncPayload {
        let mut payload = SyncPayload::new(self.action());
        match *self {
            ControlCommand::Start { mode, speed } => {
                payload.value = Some(serde_json::to_value(mode).unwrap_or(Value::Null));
                payload.speed = speed;
            }
            ControlCommand::Stop => {}
            ControlCommand::SetDirection(direction) => {
                payload.value = Some(serde_json::to_value(direction).unwrap_or(Value::Null));
            }
            ControlCommand::SetPid(gains) => {
                payload.kp = Some(gains.kp);
                payload.ki = Some(gains.ki);
                payload.kd = Some(gains.kd);
            }
            ControlCommand::SetSpeedSetpoint(speed) => {
                payload.value = Some(Value::from(speed));
                payload.speed = Some(speed);
            }
            ControlCommand::SetSpeedUnit(unit) => {
                payload.value = Some(serde_json::to_value(unit).unwrap_or(Value::Null));
            }
            ControlCommand::SetPowerUnit(unit) => {
                payload.value = Some(serde_json::to_value(unit).unwrap_or(Value::Null));
            }
            ControlCommand::SetMode(mode) => {
                payload.value = Some(serde_json::to_value(mode).unwrap_or(Value::Null));
            }
        }
        payload
    }
}

impl TryFrom<ControlRequest> for ControlCommand {
    type Error = ControlError;

    fn try_from(request: ControlRequest) -> Result<Self, Self::Error> {
        let action = request.action.ok_or(ControlError::MissingAction)?;
        let command = match action {
            ControlAction::Start => {
                let mode = match &request.value {
                    Some(value) => parse_enum(action, "value", value)?,
                    None => ControlMode::default(),
                };
                let speed = request
                    .speed_value
                    .as_ref()
                    .map(|value| parse_number(action, "speedValue", value))
                    .transpose()?;
                ControlCommand::Start { mode, speed }
            }
            ControlAction::Stop => ControlCommand::Stop,
            ControlAction::SetDir => {
                ControlCommand::SetDirection(parse_enum(action, "value", required(action, "value", &request.value)?)?)
            }
            ControlAction::SetPid => ControlCommand::SetPid(PidGains {
                kp: request.kp.ok_or(ControlError::MissingField { action, field: "kp" })?,
                ki: request.ki.ok_or(ControlError::MissingField { action, field: "ki" })?,
                kd: request.kd.ok_or(ControlError::MissingField { action, field: "kd" })?,
            }),
            ControlAction::SetSpeedSp => ControlCommand::SetSpeedSetpoint(parse_number(
                action,
                "value",
                required(action, "value", &request.value)?,
            )?),
            ControlAction::SetSpeedUnit => {
                ControlCommand::SetSpeedUnit(parse_enum(action, "value", required(action, "value", &request.value)?)?)
            }
            ControlAction::SetPowerUnit => {
                ControlCommand::SetPowerUnit(parse_enum(action, "value", required(action, "value", &request.value)?)?)
            }
            ControlAction::SetMode => {
                ControlCommand::SetMode(parse_enum(action, "value", required(action, "value", &request.value)?)?)
            }
        };
        Ok(command)
    }
}

fn required<'a>(
    action: ControlAction,
    field: &'static str,
    value: &'a Option<Value>,
) -> Result<&'a Value, ControlError> {
    value
        .as_ref()
        .filter(|v| !v.is_null())
        .ok_or(ControlError::MissingField { action, field })
}

fn parse_enum<T: serde::de::DeserializeOwned>(
    action: ControlAction,
    field: &'static str,
    value: &Value,
) -> Result<T, ControlError> {
    serde_json::from_value(value.clone()).map_err(|_| ControlError::InvalidValue {
        action,
        field,
        value: value.to_string(),
    })
}

/// Accepts a JSON number or a numeric string, as form inputs send both.
fn parse_number(action: ControlAction, field: &'static str, value: &Value) -> Result<f64, ControlError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| ControlError::InvalidValue {
            action,
            field,
            value: value.to_string(),
        })
}

/// Broadcast message consumed by all dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPayload {
    pub command: ControlAction,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ki: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kd: Option<f64>,
}

impl SyncPayload {
    fn new(command: ControlAction) -> Self {
        Self {
            command,
            value: None,
            speed: None,
            kp: None,
            ki: None,
            kd: None,
        }
    }
}

/// Control-panel state every dashboard converges to by applying broadcasts.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ControlPanelState {
    pub motor_on: bool,
    pub mode: ControlMode,
    pub speed_setpoint: f64,
    pub direction: Direction,
    pub pid: PidGains,
    pub speed_unit: SpeedUnit,
    pub power_unit: PowerUnit,
}

impl ControlPanelState {
    /// Apply one broadcast. Returns false when the payload carried a value
    /// this panel could not interpret; the rest of the state is kept.
    pub fn apply(&mut self, payload: &SyncPayload) -> bool {
        let value = payload.value.as_ref();
        match payload.command {
            ControlAction::Start => {
                self.motor_on = true;
                if let Some(mode) = value.and_then(decode::<ControlMode>) {
                    self.mode = mode;
                }
                if let Some(speed) = payload.speed {
                    self.speed_setpoint = speed;
                }
                true
            }
            ControlAction::Stop => {
                self.motor_on = false;
                true
            }
            ControlAction::SetDir => assign(&mut self.direction, value.and_then(decode)),
            ControlAction::SetPid => match (payload.kp, payload.ki, payload.kd) {
                (Some(kp), Some(ki), Some(kd)) => {
                    self.pid = PidGains { kp, ki, kd };
                    true
                }
                _ => false,
            },
            ControlAction::SetMode => assign(&mut self.mode, value.and_then(decode)),
            ControlAction::SetSpeedSp => {
                assign(&mut self.speed_setpoint, value.and_then(Value::as_f64).or(payload.speed))
            }
            ControlAction::SetSpeedUnit => assign(&mut self.speed_unit, value.and_then(decode)),
            ControlAction::SetPowerUnit => assign(&mut self.power_unit, value.and_then(decode)),
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: &Value) -> Option<T> {
    serde_json::from_value(value.clone()).ok()
}

fn assign<T>(slot: &mut T, value: Option<T>) -> bool {
    match value {
        Some(v) => {
            *slot = v;
            true
        }
        None => false,
    }
}
