use crate::domain::alarm::ThresholdSet;
use crate::domain::telemetry::Parameter;
use crate::domain::time_range::TimeRange;
use crate::domain::user::Role;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const ENV_PREFIX: &str = "MOTOR";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub mqtt: MqttSettings,
    #[serde(default)]
    pub ingest: IngestSettings,
    #[serde(default)]
    pub control: ControlSettings,
    #[serde(default)]
    pub alarms: AlarmSettings,
    #[serde(default)]
    pub thresholds: ThresholdSet,
    #[serde(default)]
    pub auth: AuthSettings,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DashboardConfig {
    #[serde(default)]
    pub mqtt: MqttSettings,
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub ingest: IngestSettings,
    #[serde(default)]
    pub control: ControlSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub alarms: AlarmSettings,
    #[serde(default)]
    pub thresholds: ThresholdSet,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SimulatorConfig {
    #[serde(default)]
    pub mqtt: MqttSettings,
    #[serde(default)]
    pub ingest: IngestSettings,
    #[serde(default = "default_publish_interval_ms")]
    pub publish_interval_ms: u64,
}

impl SimulatorConfig {
    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Influx,
    #[default]
    Memory,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: StorageBackend,
    pub influx: Option<InfluxSettings>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InfluxSettings {
    pub host: String,
    pub token: String,
    #[serde(default)]
    pub org: String,
    pub database: String,
    pub retention_policy: String,
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

impl InfluxSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MqttSettings {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Random suffix is appended when empty
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl MqttSettings {
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: String::new(),
            keep_alive_secs: default_keep_alive_secs(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// One sensor topic and the JSON keys that may carry its value.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ChannelConfig {
    pub parameter: Parameter,
    pub topic: String,
    pub keys: Vec<String>,
    #[serde(default = "default_scale")]
    pub scale: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestSettings {
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelConfig>,
    /// Legacy topic carrying every field in one object
    #[serde(default = "default_combined_topic")]
    pub combined_topic: Option<String>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            combined_topic: default_combined_topic(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ControlTopics {
    #[serde(default = "default_auto_mode_topic")]
    pub auto_mode: String,
    #[serde(default = "default_manual_mode_topic")]
    pub manual_mode: String,
    #[serde(default = "default_off_mode_topic")]
    pub off_mode: String,
    #[serde(default = "default_speed_setpoint_topic")]
    pub speed_setpoint: String,
    #[serde(default = "default_direction_topic")]
    pub direction: String,
    #[serde(default = "default_pid_topic")]
    pub pid: String,
    #[serde(default = "default_broadcast_topic")]
    pub broadcast: String,
}

impl Default for ControlTopics {
    fn default() -> Self {
        Self {
            auto_mode: default_auto_mode_topic(),
            manual_mode: default_manual_mode_topic(),
            off_mode: default_off_mode_topic(),
            speed_setpoint: default_speed_setpoint_topic(),
            direction: default_direction_topic(),
            pid: default_pid_topic(),
            broadcast: default_broadcast_topic(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ControlSettings {
    #[serde(default)]
    pub topics: ControlTopics,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MotorStateMode {
    /// Motor on/off follows START/STOP commands only
    #[default]
    Explicit,
    /// Motor latches on once current or rpm exceeds the activity epsilon
    Inferred,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlarmSettings {
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,
    #[serde(default = "default_notification_cooldown_ms")]
    pub notification_cooldown_ms: u64,
    #[serde(default = "default_history_dedup_window_ms")]
    pub history_dedup_window_ms: u64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_log_debounce_secs")]
    pub log_debounce_secs: u64,
    #[serde(default = "default_recent_alarm_limit")]
    pub recent_alarm_limit: usize,
    #[serde(default)]
    pub motor_state: MotorStateMode,
    #[serde(default = "default_activity_epsilon")]
    pub activity_epsilon: f64,
}

impl AlarmSettings {
    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }
}

impl Default for AlarmSettings {
    fn default() -> Self {
        Self {
            startup_delay_ms: default_startup_delay_ms(),
            notification_cooldown_ms: default_notification_cooldown_ms(),
            history_dedup_window_ms: default_history_dedup_window_ms(),
            history_capacity: default_history_capacity(),
            log_debounce_secs: default_log_debounce_secs(),
            recent_alarm_limit: default_recent_alarm_limit(),
            motor_state: MotorStateMode::default(),
            activity_epsilon: default_activity_epsilon(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineSettings {
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_history_max_points")]
    pub history_max_points: usize,
    #[serde(default = "default_initial_range")]
    pub initial_range: TimeRange,
}

impl PipelineSettings {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            window_capacity: default_window_capacity(),
            tick_ms: default_tick_ms(),
            history_max_points: default_history_max_points(),
            initial_range: default_initial_range(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiSettings {
    #[serde(default = "default_api_url")]
    pub base_url: String,
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

impl ApiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: default_api_url(),
            timeout_ms: default_http_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AccountConfig {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub role: Role,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthSettings {
    #[serde(default = "default_accounts")]
    pub accounts: Vec<AccountConfig>,
    #[serde(default = "default_token")]
    pub token: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            accounts: default_accounts(),
            token: default_token(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}
fn default_mqtt_host() -> String {
    "localhost".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_keep_alive_secs() -> u64 {
    30
}
fn default_reconnect_backoff_ms() -> u64 {
    2000
}
fn default_channel_capacity() -> usize {
    100
}
fn default_scale() -> f64 {
    1.0
}
fn default_combined_topic() -> Option<String> {
    Some("motor/data".to_string())
}
fn default_auto_mode_topic() -> String {
    "vsd/mode/autos".to_string()
}
fn default_manual_mode_topic() -> String {
    "vsd/mode/manuals".to_string()
}
fn default_off_mode_topic() -> String {
    "vsd/mode/offs".to_string()
}
fn default_speed_setpoint_topic() -> String {
    "motor/inputspeeds".to_string()
}
fn default_direction_topic() -> String {
    "motor/stats".to_string()
}
fn default_pid_topic() -> String {
    "motor/pid".to_string()
}
fn default_broadcast_topic() -> String {
    "motor/control".to_string()
}
fn default_startup_delay_ms() -> u64 {
    5000
}
fn default_notification_cooldown_ms() -> u64 {
    3000
}
fn default_history_dedup_window_ms() -> u64 {
    5000
}
fn default_history_capacity() -> usize {
    100
}
fn default_log_debounce_secs() -> u64 {
    10
}
fn default_recent_alarm_limit() -> usize {
    50
}
fn default_activity_epsilon() -> f64 {
    0.1
}
fn default_window_capacity() -> usize {
    30
}
fn default_tick_ms() -> u64 {
    1000
}
fn default_history_max_points() -> usize {
    150
}
fn default_initial_range() -> TimeRange {
    TimeRange::Live
}
fn default_publish_interval_ms() -> u64 {
    1000
}
fn default_http_timeout_ms() -> u64 {
    5000
}
fn default_api_url() -> String {
    "http://localhost:3000".to_string()
}
fn default_token() -> String {
    "dummy-token-12345".to_string()
}

fn default_channels() -> Vec<ChannelConfig> {
    let channel = |parameter, topic: &str, keys: &[&str], scale| ChannelConfig {
        parameter,
        topic: topic.to_string(),
        keys: keys.iter().map(|k| k.to_string()).collect(),
        scale,
    };
    vec![
        channel(Parameter::Voltage, "pm/tegangan", &["tegangan", "voltage"], 1.0),
        channel(Parameter::Current, "pm/arus", &["arus", "current"], 1.0),
        channel(Parameter::Rpm, "vsd/actualspeed", &["actualspeed", "rpm"], 1.0),
        // devices report kW, samples are stored in W
        channel(Parameter::Power, "pm/power", &["power"], 1000.0),
    ]
}

fn default_accounts() -> Vec<AccountConfig> {
    vec![AccountConfig {
        id: 1,
        username: "operator".to_string(),
        password: "operator123".to_string(),
        role: Role::Operator,
        name: Some("Operator Produksi".to_string()),
    }]
}

fn load<T: serde::de::DeserializeOwned>(path: &str) -> anyhow::Result<T> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;

    Ok(settings.try_deserialize()?)
}

pub fn load_server_config() -> anyhow::Result<ServerConfig> {
    load("config/server")
}

pub fn load_dashboard_config() -> anyhow::Result<DashboardConfig> {
    load("config/dashboard")
}

pub fn load_simulator_config() -> anyhow::Result<SimulatorConfig> {
    load("config/simulator")
}

/// Replace template variables in a query string
pub fn prepare_query(query: &str, vars: &HashMap<String, String>) -> String {
    let mut result = query.to_string();
    for (key, value) in vars {
        let placeholder = format!("${{{}}}", key);
        result = result.replace(&placeholder, value);
    }
    result
}
