// In-process repository used for tests and brokerless demo runs
use crate::application::telemetry_repository::TelemetryRepository;
use crate::domain::alarm::{AlarmLogEntry, AlarmStatus, NewAlarmLog, ALARM_LOG_SOURCE};
use crate::domain::telemetry::Sample;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryRepository {
    samples: RwLock<Vec<Sample>>,
    alarm_logs: RwLock<Vec<AlarmLogEntry>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TelemetryRepository for MemoryRepository {
    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn append_sample(&self, sample: &Sample) -> Result<()> {
        let mut samples = self.samples.write().await;
        // keep ascending order even if a late message carries an older timestamp
        let idx = samples.partition_point(|s| s.timestamp <= sample.timestamp);
        samples.insert(idx, *sample);
        Ok(())
    }

    async fn samples_since(&self, since: DateTime<Utc>) -> Result<Vec<Sample>> {
        let samples = self.samples.read().await;
        let start = samples.partition_point(|s| s.timestamp <= since);
        Ok(samples[start..].to_vec())
    }

    async fn append_alarm_log(&self, entry: &NewAlarmLog) -> Result<()> {
        let mut logs = self.alarm_logs.write().await;
        let id = logs.len() as i64 + 1;
        logs.push(AlarmLogEntry {
            id,
            timestamp: entry.timestamp,
            level: entry.level,
            message: entry.message.clone(),
            status: AlarmStatus::Active,
            source: ALARM_LOG_SOURCE.to_string(),
        });
        Ok(())
    }

    async fn alarm_message_logged_since(&self, message: &str, since: DateTime<Utc>) -> Result<bool> {
        let logs = self.alarm_logs.read().await;
        Ok(logs
            .iter()
            .any(|row| row.message == message && row.timestamp > since))
    }

    async fn recent_alarm_logs(&self, limit: usize) -> Result<Vec<AlarmLogEntry>> {
        let logs = self.alarm_logs.read().await;
        let mut rows = logs.clone();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        rows.truncate(limit);
        Ok(rows)
    }
}
