// Ingest service - Normalize sensor messages, keep the snapshot, persist and alarm
use crate::application::alarm_service::{AlarmEvaluator, AlarmLogWriter};
use crate::application::telemetry_repository::TelemetryRepository;
use crate::domain::alarm::NewAlarmLog;
use crate::domain::telemetry::{Parameter, SensorReading, SensorValue, Snapshot};
use crate::infrastructure::config::{ChannelConfig, IngestSettings};
use crate::infrastructure::metrics::IngestMetrics;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};

const SNAPSHOT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed payload on `{topic}`: {source}")]
    Malformed {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("no channel for topic `{0}`")]
    UnknownTopic(String),
}

/// Maps transport topics to parameters and decodes their payloads.
#[derive(Debug, Clone)]
pub struct TopicRouter {
    channels: HashMap<String, Vec<ChannelConfig>>,
    combined_topic: Option<String>,
}

impl TopicRouter {
    pub fn new(settings: &IngestSettings) -> Self {
        let mut channels: HashMap<String, Vec<ChannelConfig>> = HashMap::new();
        for channel in &settings.channels {
            channels
                .entry(channel.topic.clone())
                .or_default()
                .push(channel.clone());
        }
        Self {
            channels,
            combined_topic: settings.combined_topic.clone(),
        }
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.channels.keys().cloned().collect();
        topics.sort();
        if let Some(combined) = &self.combined_topic {
            if !topics.contains(combined) {
                topics.push(combined.clone());
            }
        }
        topics
    }

    pub fn decode(
        &self,
        topic: &str,
        payload: &[u8],
        received_at: DateTime<Utc>,
    ) -> Result<SensorReading, IngestError> {
        let is_combined = self.combined_topic.as_deref() == Some(topic);
        let channels = self.channels.get(topic);
        if channels.is_none() && !is_combined {
            return Err(IngestError::UnknownTopic(topic.to_string()));
        }

        let fields: HashMap<String, SensorValue> =
            serde_json::from_slice(payload).map_err(|source| IngestError::Malformed {
                topic: topic.to_string(),
                source,
            })?;

        let mut reading = SensorReading {
            values: Vec::new(),
            received_at,
            coerced: Vec::new(),
        };

        if is_combined {
            for parameter in Parameter::ALL {
                let (value, coerced) = SensorValue::normalize_or_zero(fields.get(parameter.as_str()));
                reading.values.push((parameter, value));
                if coerced {
                    reading.coerced.push(parameter);
                }
            }
        }

        for channel in channels.into_iter().flatten() {
            let raw = channel.keys.iter().find_map(|key| fields.get(key));
            let (value, coerced) = SensorValue::normalize_or_zero(raw);
            reading.values.retain(|(p, _)| *p != channel.parameter);
            reading.values.push((channel.parameter, value * channel.scale));
            if coerced {
                reading.coerced.push(channel.parameter);
            }
        }

        Ok(reading)
    }
}

/// Owns the current snapshot. Every inbound message overwrites it, then the
/// sample is persisted and the alarm rules run.
pub struct IngestService {
    router: TopicRouter,
    snapshot: Mutex<Snapshot>,
    repository: Arc<dyn TelemetryRepository>,
    evaluator: Arc<AlarmEvaluator>,
    log_writer: AlarmLogWriter,
    metrics: Arc<IngestMetrics>,
    updates: broadcast::Sender<Snapshot>,
}

impl IngestService {
    pub fn new(
        router: TopicRouter,
        repository: Arc<dyn TelemetryRepository>,
        evaluator: Arc<AlarmEvaluator>,
        log_writer: AlarmLogWriter,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        let (updates, _) = broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY);
        Self {
            router,
            snapshot: Mutex::new(Snapshot::empty(Utc::now())),
            repository,
            evaluator,
            log_writer,
            metrics,
            updates,
        }
    }

    pub fn topics(&self) -> Vec<String> {
        self.router.topics()
    }

    pub async fn latest(&self) -> Snapshot {
        *self.snapshot.lock().await
    }

    /// Receive every snapshot update. Slow receivers skip updates.
    pub fn subscribe(&self) -> broadcast::Receiver<Snapshot> {
        self.updates.subscribe()
    }

    pub async fn handle_message(&self, topic: &str, payload: &[u8]) -> Option<Snapshot> {
        self.handle_message_at(topic, payload, Utc::now()).await
    }

    /// Nothing here is fatal: a bad message or a failed write is counted,
    /// logged and dropped.
    pub async fn handle_message_at(
        &self,
        topic: &str,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Option<Snapshot> {
        IngestMetrics::incr(&self.metrics.messages_received);

        let reading = match self.router.decode(topic, payload, now) {
            Ok(reading) => reading,
            Err(e @ IngestError::UnknownTopic(_)) => {
                IngestMetrics::incr(&self.metrics.unknown_topics);
                tracing::debug!("Dropping message: {}", e);
                return None;
            }
            Err(e) => {
                IngestMetrics::incr(&self.metrics.malformed_payloads);
                tracing::warn!("Dropping message: {}", e);
                return None;
            }
        };

        if !reading.coerced.is_empty() {
            IngestMetrics::add(&self.metrics.coerced_values, reading.coerced.len() as u64);
            tracing::warn!(topic, fields = ?reading.coerced, "Unreadable sensor values coerced to 0");
        }

        let snapshot = {
            let mut current = self.snapshot.lock().await;
            current.apply(&reading);
            *current
        };
        let _ = self.updates.send(snapshot);

        match self.repository.append_sample(&snapshot.to_sample()).await {
            Ok(()) => IngestMetrics::incr(&self.metrics.samples_written),
            Err(e) => {
                IngestMetrics::incr(&self.metrics.persistence_failures);
                tracing::error!("Failed to persist sample: {:#}", e);
            }
        }

        self.evaluator.observe_activity(&snapshot).await;
        let evaluation = self.evaluator.evaluate(&snapshot).await;
        for violation in &evaluation.violations {
            let entry = NewAlarmLog::from_violation(violation, now);
            if let Err(e) = self.log_writer.write(&entry).await {
                IngestMetrics::incr(&self.metrics.alarm_log_failures);
                tracing::error!(message = %entry.message, "Failed to write alarm log: {:#}", e);
            }
        }

        Some(snapshot)
    }
}
