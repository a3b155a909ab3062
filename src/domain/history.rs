// Operator event history with consecutive-run grouping
use crate::domain::alarm::{Alarm, AlarmLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryEvent {
    Start,
    Stop,
    Warning,
    Critical,
    Maintenance,
}

impl From<AlarmLevel> for HistoryEvent {
    fn from(level: AlarmLevel) -> Self {
        match level {
            AlarmLevel::Critical => HistoryEvent::Critical,
            _ => HistoryEvent::Warning,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub event: HistoryEvent,
    pub description: String,
    pub count: u32,
    pub since: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Newest-first event list. A run of identical events collapses into one entry.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
    /// Keeps ids unique when two events share a millisecond.
    next_seq: u64,
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            next_seq: 0,
        }
    }

    pub fn record(&mut self, event: HistoryEvent, description: impl Into<String>, at: DateTime<Utc>) {
        let description = description.into();

        if let Some(newest) = self.entries.front_mut() {
            if newest.event == event && newest.description == description {
                newest.count += 1;
                newest.last_seen = at;
                return;
            }
        }

        if self.entries.len() == self.capacity {
            self.entries.pop_back();
        }
        self.next_seq += 1;
        self.entries.push_front(HistoryEntry {
            id: format!("event-{}-{}", at.timestamp_millis(), self.next_seq),
            event,
            description,
            count: 1,
            since: at,
            last_seen: at,
        });
    }

    pub fn record_alarm(&mut self, alarm: &Alarm) {
        self.record(
            HistoryEvent::from(alarm.level),
            format!("{} {}", alarm.parameter.label(), alarm.level),
            alarm.timestamp,
        );
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_consecutive_runs_collapse() {
        let start = Utc::now();
        let mut log = HistoryLog::default();

        log.record(HistoryEvent::Warning, "Current warning", start);
        log.record(HistoryEvent::Warning, "Current warning", start + Duration::seconds(5));
        log.record(HistoryEvent::Warning, "Current warning", start + Duration::seconds(9));

        assert_eq!(log.len(), 1);
        let entry = log.entries().next().unwrap();
        assert_eq!(entry.count, 3);
        assert_eq!(entry.since, start);
        assert_eq!(entry.last_seen, start + Duration::seconds(9));
    }

    #[test]
    fn test_interleaved_events_start_new_runs() {
        let start = Utc::now();
        let mut log = HistoryLog::default();

        log.record(HistoryEvent::Start, "Motor started", start);
        log.record(HistoryEvent::Critical, "RPM critical", start + Duration::seconds(6));
        log.record(HistoryEvent::Start, "Motor started", start + Duration::seconds(7));

        let events: Vec<_> = log.entries().map(|e| (e.event, e.count)).collect();
        assert_eq!(
            events,
            vec![
                (HistoryEvent::Start, 1),
                (HistoryEvent::Critical, 1),
                (HistoryEvent::Start, 1),
            ]
        );
    }

    #[test]
    fn test_ids_unique_within_same_millisecond() {
        let now = Utc::now();
        let mut log = HistoryLog::default();
        log.record(HistoryEvent::Start, "Motor started", now);
        log.record(HistoryEvent::Critical, "RPM critical", now);

        let ids: Vec<_> = log.entries().map(|e| e.id.clone()).collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let start = Utc::now();
        let mut log = HistoryLog::with_capacity(2);
        for i in 0..3 {
            log.record(HistoryEvent::Maintenance, format!("check {i}"), start + Duration::seconds(i));
        }
        let descriptions: Vec<_> = log.entries().map(|e| e.description.as_str()).collect();
        assert_eq!(descriptions, vec!["check 2", "check 1"]);
    }
}
