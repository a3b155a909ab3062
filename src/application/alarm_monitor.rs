// Dashboard-side alarm notifications and operator history
use crate::application::alarm_service::{AlarmEvaluator, MotorPhase};
use crate::domain::alarm::{Alarm, Evaluation};
use crate::domain::history::{HistoryEvent, HistoryLog};
use crate::domain::telemetry::Snapshot;
use crate::infrastructure::config::AlarmSettings;
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::sync::Arc;

/// Cooldown and (parameter, level) dedup in front of the rolling alarm history.
#[derive(Debug)]
pub struct NotificationPolicy {
    cooldown: Duration,
    dedup_window: Duration,
    capacity: usize,
    last_notification: Option<DateTime<Utc>>,
    history: VecDeque<Alarm>,
}

impl NotificationPolicy {
    pub fn new(settings: &AlarmSettings) -> Self {
        let capacity = settings.history_capacity.max(1);
        Self {
            cooldown: Duration::milliseconds(settings.notification_cooldown_ms as i64),
            dedup_window: Duration::milliseconds(settings.history_dedup_window_ms as i64),
            capacity,
            last_notification: None,
            history: VecDeque::with_capacity(capacity),
        }
    }

    /// Offer a batch of alarms raised at `now`; returns the ones that made it
    /// into the history.
    ///
    /// Within the cooldown the whole batch is dropped, whatever parameter it
    /// concerns. An empty batch never restarts the cooldown; a non-empty one
    /// does, even when dedup then drops every alarm in it.
    pub fn admit(&mut self, alarms: Vec<Alarm>, now: DateTime<Utc>) -> Vec<Alarm> {
        if let Some(last) = self.last_notification {
            if now - last < self.cooldown {
                return Vec::new();
            }
        }
        if alarms.is_empty() {
            return Vec::new();
        }
        self.last_notification = Some(now);

        let cutoff = now - self.dedup_window;
        let admitted: Vec<Alarm> = alarms
            .into_iter()
            .filter(|alarm| {
                !self.history.iter().any(|seen| {
                    seen.parameter == alarm.parameter
                        && seen.level == alarm.level
                        && seen.timestamp > cutoff
                })
            })
            .collect();

        for alarm in admitted.iter().rev() {
            self.history.push_front(alarm.clone());
        }
        self.history.truncate(self.capacity);

        admitted
    }

    /// Newest first
    pub fn history(&self) -> impl Iterator<Item = &Alarm> {
        self.history.iter()
    }
}

#[derive(Debug, Clone)]
pub struct Observation {
    pub phase: MotorPhase,
    pub evaluation: Evaluation,
    pub notified: Vec<Alarm>,
}

/// Evaluator, notification policy and grouped operator history for one dashboard.
pub struct AlarmMonitor {
    evaluator: Arc<AlarmEvaluator>,
    policy: NotificationPolicy,
    history: HistoryLog,
    motor_on: bool,
}

impl AlarmMonitor {
    pub fn new(evaluator: Arc<AlarmEvaluator>, settings: &AlarmSettings) -> Self {
        Self {
            evaluator,
            policy: NotificationPolicy::new(settings),
            history: HistoryLog::with_capacity(settings.history_capacity),
            motor_on: false,
        }
    }

    pub async fn set_motor_on(&mut self, on: bool, now: DateTime<Utc>) {
        self.evaluator.set_motor_on(on).await;
        if on == self.motor_on {
            return;
        }
        self.motor_on = on;
        let (event, description) = if on {
            (HistoryEvent::Start, "Motor started")
        } else {
            (HistoryEvent::Stop, "Motor stopped")
        };
        self.history.record(event, description, now);
    }

    pub async fn observe(&mut self, snapshot: &Snapshot, now: DateTime<Utc>) -> Observation {
        let phase = self.evaluator.phase().await;
        let evaluation = self.evaluator.evaluate(snapshot).await;
        let alarms = evaluation
            .violations
            .iter()
            .map(|v| v.into_alarm(now))
            .collect();

        let notified = self.policy.admit(alarms, now);
        for alarm in &notified {
            self.history.record_alarm(alarm);
        }

        Observation {
            phase,
            evaluation,
            notified,
        }
    }

    pub fn alarm_history(&self) -> impl Iterator<Item = &Alarm> {
        self.policy.history()
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::alarm::{AlarmLevel, ThresholdSet};
    use crate::domain::telemetry::Parameter;

    fn alarm(parameter: Parameter, level: AlarmLevel, at: DateTime<Utc>) -> Alarm {
        Alarm {
            id: format!("{parameter}-{level}-{}", at.timestamp_millis()),
            timestamp: at,
            level,
            parameter,
            message: String::new(),
            value: 0.0,
            threshold: 0.0,
        }
    }

    #[test]
    fn test_same_parameter_and_level_within_window_appears_once() {
        let mut policy = NotificationPolicy::new(&AlarmSettings::default());
        let start = Utc::now();

        let first = policy.admit(vec![alarm(Parameter::Rpm, AlarmLevel::Critical, start)], start);
        assert_eq!(first.len(), 1);

        // past the 3s cooldown, inside the 5s dedup window
        let later = start + Duration::seconds(4);
        let second = policy.admit(vec![alarm(Parameter::Rpm, AlarmLevel::Critical, later)], later);
        assert!(second.is_empty());
        assert_eq!(policy.history().count(), 1);

        // the deduped batch at 4s still restarted the cooldown
        let blocked_at = start + Duration::seconds(6);
        assert!(policy
            .admit(vec![alarm(Parameter::Rpm, AlarmLevel::Critical, blocked_at)], blocked_at)
            .is_empty());

        let much_later = start + Duration::seconds(7);
        let third = policy.admit(
            vec![alarm(Parameter::Rpm, AlarmLevel::Critical, much_later)],
            much_later,
        );
        assert_eq!(third.len(), 1);
        assert_eq!(policy.history().count(), 2);
    }

    #[test]
    fn test_cooldown_blocks_other_parameters() {
        let mut policy = NotificationPolicy::new(&AlarmSettings::default());
        let start = Utc::now();

        policy.admit(vec![alarm(Parameter::Current, AlarmLevel::Warning, start)], start);
        let soon = start + Duration::seconds(1);
        let blocked = policy.admit(vec![alarm(Parameter::Voltage, AlarmLevel::Critical, soon)], soon);
        assert!(blocked.is_empty());
    }

    #[test]
    fn test_empty_batch_does_not_restart_cooldown() {
        let mut policy = NotificationPolicy::new(&AlarmSettings::default());
        let start = Utc::now();

        policy.admit(vec![alarm(Parameter::Current, AlarmLevel::Warning, start)], start);
        policy.admit(Vec::new(), start + Duration::seconds(3));
        let at = start + Duration::seconds(4);
        let admitted = policy.admit(vec![alarm(Parameter::Voltage, AlarmLevel::Warning, at)], at);
        assert_eq!(admitted.len(), 1);
    }

    #[test]
    fn test_mixed_levels_both_kept_newest_first() {
        let mut policy = NotificationPolicy::new(&AlarmSettings::default());
        let start = Utc::now();
        policy.admit(
            vec![
                alarm(Parameter::Current, AlarmLevel::Warning, start),
                alarm(Parameter::Voltage, AlarmLevel::Critical, start),
            ],
            start,
        );
        let later = start + Duration::seconds(10);
        policy.admit(vec![alarm(Parameter::Rpm, AlarmLevel::Warning, later)], later);

        let order: Vec<_> = policy.history().map(|a| a.parameter).collect();
        assert_eq!(order, vec![Parameter::Rpm, Parameter::Current, Parameter::Voltage]);
    }

    #[test]
    fn test_history_capacity() {
        let settings = AlarmSettings {
            history_capacity: 3,
            notification_cooldown_ms: 0,
            history_dedup_window_ms: 0,
            ..AlarmSettings::default()
        };
        let mut policy = NotificationPolicy::new(&settings);
        let start = Utc::now();
        for i in 0..5 {
            let at = start + Duration::seconds(i);
            policy.admit(vec![alarm(Parameter::Current, AlarmLevel::Warning, at)], at);
        }
        assert_eq!(policy.history().count(), 3);
        assert_eq!(
            policy.history().next().unwrap().timestamp,
            start + Duration::seconds(4)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_records_transitions_and_alarms() {
        let settings = AlarmSettings::default();
        let evaluator = Arc::new(AlarmEvaluator::new(ThresholdSet::default(), &settings));
        let mut monitor = AlarmMonitor::new(evaluator, &settings);
        let start = Utc::now();
        let snapshot = Snapshot {
            voltage: 220.0,
            current: 16.0,
            rpm: 10.0,
            power: 0.0,
            timestamp: start,
        };

        monitor.set_motor_on(true, start).await;
        let starting = monitor.observe(&snapshot, start).await;
        assert_eq!(starting.phase, MotorPhase::Starting);
        assert!(starting.notified.is_empty());

        tokio::time::sleep(std::time::Duration::from_millis(5001)).await;
        let at = start + Duration::seconds(6);
        let steady = monitor.observe(&snapshot, at).await;
        assert_eq!(steady.phase, MotorPhase::Steady);
        assert_eq!(steady.notified.len(), 1);
        assert_eq!(steady.notified[0].level, AlarmLevel::Warning);

        monitor.set_motor_on(false, at).await;
        let events: Vec<_> = monitor.history().entries().map(|e| e.event).collect();
        assert_eq!(
            events,
            vec![HistoryEvent::Stop, HistoryEvent::Warning, HistoryEvent::Start]
        );
        assert_eq!(monitor.alarm_history().count(), 1);
    }
}
