// Repository trait for telemetry data access
use crate::domain::alarm::{AlarmLogEntry, NewAlarmLog};
use crate::domain::telemetry::Sample;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait TelemetryRepository: Send + Sync {
    /// Create the backing tables/databases if they do not exist
    async fn ensure_schema(&self) -> anyhow::Result<()>;

    /// Append one snapshot to the samples table
    async fn append_sample(&self, sample: &Sample) -> anyhow::Result<()>;

    /// Samples newer than `since`, ascending by time
    async fn samples_since(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<Sample>>;

    /// Append an alarm log row unconditionally
    async fn append_alarm_log(&self, entry: &NewAlarmLog) -> anyhow::Result<()>;

    /// Whether a row with exactly this message was logged after `since`
    async fn alarm_message_logged_since(
        &self,
        message: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// Most recent alarm log rows, newest first
    async fn recent_alarm_logs(&self, limit: usize) -> anyhow::Result<Vec<AlarmLogEntry>>;
}
