// InfluxDB repository implementation
use crate::application::telemetry_repository::TelemetryRepository;
use crate::domain::alarm::{AlarmLevel, AlarmLogEntry, AlarmStatus, NewAlarmLog, ALARM_LOG_SOURCE};
use crate::domain::telemetry::Sample;
use crate::infrastructure::config::{prepare_query, InfluxSettings};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use influxdb2::models::DataPoint;
use serde::Deserialize;
use std::collections::HashMap;

const SAMPLES_MEASUREMENT: &str = "motor_data";
const ALARM_LOG_MEASUREMENT: &str = "alarm_logs";

const SAMPLES_SINCE_QUERY: &str = "SELECT \"voltage\", \"current\", \"rpm\", \"power\" FROM \"${measurement}\" WHERE time > '${since}' ORDER BY time ASC";
const MESSAGE_SINCE_QUERY: &str = "SELECT count(\"message\") FROM \"${measurement}\" WHERE \"message\" = '${message}' AND time > '${since}'";
const RECENT_ALARMS_QUERY: &str = "SELECT \"message\", \"level\", \"status\", \"source\" FROM \"${measurement}\" ORDER BY time DESC LIMIT ${limit}";

pub struct InfluxRepository {
    host: String,
    token: String,
    database: String,
    retention_policy: String,
    http: reqwest::Client,
    writer: influxdb2::Client,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResponse {
    results: Vec<InfluxQLResult>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResult {
    #[serde(default)]
    series: Option<Vec<InfluxQLSeries>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLSeries {
    #[allow(dead_code)]
    name: String,
    columns: Vec<String>,
    values: Vec<Vec<serde_json::Value>>,
}

impl InfluxQLSeries {
    fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

impl InfluxQLResponse {
    fn series(&self) -> impl Iterator<Item = &InfluxQLSeries> {
        self.results
            .iter()
            .filter_map(|r| r.series.as_ref())
            .flatten()
    }
}

impl InfluxRepository {
    /// Every request is bounded by `settings.timeout`: ingest writes run inline
    /// in the MQTT poll loop.
    pub fn new(settings: &InfluxSettings) -> Result<Self> {
        let host = settings.host.trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .context("Failed to build InfluxDB HTTP client")?;
        Ok(Self {
            writer: influxdb2::Client::new(host.clone(), settings.org.clone(), settings.token.clone()),
            host,
            token: settings.token.clone(),
            database: settings.database.clone(),
            retention_policy: settings.retention_policy.clone(),
            http,
        })
    }

    /// v1-compatible bucket name: `database/retention_policy`
    fn bucket(&self) -> String {
        format!("{}/{}", self.database, self.retention_policy)
    }

    fn build_query_url(&self, query: &str) -> String {
        let encoded_query = urlencoding::encode(query);
        format!(
            "{}/query?db={}&rp={}&q={}",
            self.host, self.database, self.retention_policy, encoded_query
        )
    }

    async fn execute_query(&self, query: &str) -> Result<InfluxQLResponse> {
        self.send(self.http.get(self.build_query_url(query))).await
    }

    /// Statements that modify state must be POSTed
    async fn execute_statement(&self, statement: &str) -> Result<InfluxQLResponse> {
        self.send(self.http.post(self.build_query_url(statement))).await
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<InfluxQLResponse> {
        let response = request
            .header("Authorization", format!("Token {}", self.token))
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to send request to InfluxDB")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("InfluxDB query failed with status {}: {}", status, body);
        }

        let data = response
            .json::<InfluxQLResponse>()
            .await
            .context("Failed to parse InfluxDB response")?;

        if let Some(error) = data.results.iter().find_map(|r| r.error.as_ref()) {
            anyhow::bail!("InfluxDB query error: {}", error);
        }

        Ok(data)
    }

    async fn write_point(&self, point: DataPoint) -> Result<()> {
        self.writer
            .write(&self.bucket(), futures::stream::iter(vec![point]))
            .await
            .context("Failed to write point to InfluxDB")
    }
}

fn query_vars(pairs: &[(&str, String)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn rfc3339(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn timestamp_nanos(time: DateTime<Utc>) -> i64 {
    time.timestamp_nanos_opt().unwrap_or_else(|| time.timestamp_millis() * 1_000_000)
}

/// InfluxQL string literal escaping
fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn parse_time(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    let text = value.as_str()?;
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn parse_level(value: Option<&serde_json::Value>) -> AlarmLevel {
    match value.and_then(|v| v.as_str()) {
        Some("critical") => AlarmLevel::Critical,
        _ => AlarmLevel::Warning,
    }
}

#[async_trait]
impl TelemetryRepository for InfluxRepository {
    async fn ensure_schema(&self) -> Result<()> {
        // Measurements are created on first write; only the database must exist.
        let statement = format!("CREATE DATABASE \"{}\"", self.database);
        self.execute_statement(&statement).await?;
        tracing::info!(database = %self.database, "InfluxDB database ready");
        Ok(())
    }

    async fn append_sample(&self, sample: &Sample) -> Result<()> {
        let point = DataPoint::builder(SAMPLES_MEASUREMENT)
            .field("voltage", sample.voltage)
            .field("current", sample.current)
            .field("rpm", sample.rpm)
            .field("power", sample.power)
            .timestamp(timestamp_nanos(sample.timestamp))
            .build()
            .context("Failed to build sample point")?;
        self.write_point(point).await
    }

    async fn samples_since(&self, since: DateTime<Utc>) -> Result<Vec<Sample>> {
        let vars = query_vars(&[
            ("measurement", SAMPLES_MEASUREMENT.to_string()),
            ("since", rfc3339(since)),
        ]);
        let query = prepare_query(SAMPLES_SINCE_QUERY, &vars);
        tracing::debug!("Executing samples query: {}", query);
        let response = self.execute_query(&query).await?;

        let mut samples = Vec::new();
        for s in response.series() {
            let time_idx = s.column("time").unwrap_or(0);
            let idx = |name| s.column(name);
            let (voltage_idx, current_idx, rpm_idx, power_idx) =
                (idx("voltage"), idx("current"), idx("rpm"), idx("power"));

            for row in &s.values {
                let Some(timestamp) = row.get(time_idx).and_then(parse_time) else {
                    continue;
                };
                let field = |i: Option<usize>| {
                    i.and_then(|i| row.get(i))
                        .and_then(|v| v.as_f64())
                        .unwrap_or(0.0)
                };
                samples.push(Sample {
                    timestamp,
                    voltage: field(voltage_idx),
                    current: field(current_idx),
                    rpm: field(rpm_idx),
                    power: field(power_idx),
                });
            }
        }

        Ok(samples)
    }

    async fn append_alarm_log(&self, entry: &NewAlarmLog) -> Result<()> {
        let point = DataPoint::builder(ALARM_LOG_MEASUREMENT)
            .tag("level", entry.level.as_str())
            .tag("status", AlarmStatus::Active.as_str())
            .tag("source", ALARM_LOG_SOURCE)
            .field("message", entry.message.clone())
            .timestamp(timestamp_nanos(entry.timestamp))
            .build()
            .context("Failed to build alarm log point")?;
        self.write_point(point).await
    }

    async fn alarm_message_logged_since(&self, message: &str, since: DateTime<Utc>) -> Result<bool> {
        let vars = query_vars(&[
            ("measurement", ALARM_LOG_MEASUREMENT.to_string()),
            ("message", escape_literal(message)),
            ("since", rfc3339(since)),
        ]);
        let response = self
            .execute_query(&prepare_query(MESSAGE_SINCE_QUERY, &vars))
            .await?;

        let found = response.series().any(|s| {
            let count_idx = s.column("count").unwrap_or(1);
            s.values.iter().any(|row| {
                row.get(count_idx)
                    .and_then(|v| v.as_f64())
                    .is_some_and(|count| count > 0.0)
            })
        });
        Ok(found)
    }

    async fn recent_alarm_logs(&self, limit: usize) -> Result<Vec<AlarmLogEntry>> {
        let vars = query_vars(&[
            ("measurement", ALARM_LOG_MEASUREMENT.to_string()),
            ("limit", limit.to_string()),
        ]);
        let response = self
            .execute_query(&prepare_query(RECENT_ALARMS_QUERY, &vars))
            .await?;

        let mut entries = Vec::new();
        for s in response.series() {
            let time_idx = s.column("time").unwrap_or(0);
            let message_idx = s.column("message");
            let level_idx = s.column("level");
            let source_idx = s.column("source");

            for row in &s.values {
                let Some(timestamp) = row.get(time_idx).and_then(parse_time) else {
                    continue;
                };
                let text = |i: Option<usize>| {
                    i.and_then(|i| row.get(i))
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                };
                entries.push(AlarmLogEntry {
                    // InfluxDB has no serial key; the timestamp identifies the row
                    id: timestamp.timestamp_millis(),
                    timestamp,
                    level: parse_level(level_idx.and_then(|i| row.get(i))),
                    message: text(message_idx).unwrap_or_default(),
                    status: AlarmStatus::Active,
                    source: text(source_idx).unwrap_or_else(|| ALARM_LOG_SOURCE.to_string()),
                });
            }
        }

        Ok(entries)
    }
}
