// Counters for every accept/drop point of the ingest and control paths
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

#[derive(Debug, Default)]
pub struct IngestMetrics {
    pub messages_received: AtomicU64,
    pub malformed_payloads: AtomicU64,
    pub unknown_topics: AtomicU64,
    pub coerced_values: AtomicU64,
    pub samples_written: AtomicU64,
    pub persistence_failures: AtomicU64,
    pub alarms_logged: AtomicU64,
    pub alarm_logs_deduplicated: AtomicU64,
    pub alarm_log_failures: AtomicU64,
    pub control_commands: AtomicU64,
    pub control_publish_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestMetricsSnapshot {
    pub messages_received: u64,
    pub malformed_payloads: u64,
    pub unknown_topics: u64,
    pub coerced_values: u64,
    pub samples_written: u64,
    pub persistence_failures: u64,
    pub alarms_logged: u64,
    pub alarm_logs_deduplicated: u64,
    pub alarm_log_failures: u64,
    pub control_commands: u64,
    pub control_publish_failures: u64,
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngestMetricsSnapshot {
        IngestMetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            malformed_payloads: self.malformed_payloads.load(Ordering::Relaxed),
            unknown_topics: self.unknown_topics.load(Ordering::Relaxed),
            coerced_values: self.coerced_values.load(Ordering::Relaxed),
            samples_written: self.samples_written.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            alarms_logged: self.alarms_logged.load(Ordering::Relaxed),
            alarm_logs_deduplicated: self.alarm_logs_deduplicated.load(Ordering::Relaxed),
            alarm_log_failures: self.alarm_log_failures.load(Ordering::Relaxed),
            control_commands: self.control_commands.load(Ordering::Relaxed),
            control_publish_failures: self.control_publish_failures.load(Ordering::Relaxed),
        }
    }

    pub fn report(&self) {
        let snap = self.snapshot();
        info!(
            received = snap.messages_received,
            malformed = snap.malformed_payloads,
            unknown_topic = snap.unknown_topics,
            coerced = snap.coerced_values,
            samples = snap.samples_written,
            persistence_failures = snap.persistence_failures,
            alarms_logged = snap.alarms_logged,
            alarms_deduplicated = snap.alarm_logs_deduplicated,
            alarm_log_failures = snap.alarm_log_failures,
            control = snap.control_commands,
            control_failures = snap.control_publish_failures,
            "Ingest metrics"
        );
    }
}
