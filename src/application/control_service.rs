// Control dispatcher - Device-facing publishes followed by one broadcast sync
use crate::application::alarm_service::AlarmEvaluator;
use crate::domain::control::{ControlCommand, ControlMode};
use crate::infrastructure::config::ControlTopics;
use crate::infrastructure::metrics::IngestMetrics;
use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    AtMostOnce,
    AtLeastOnce,
}

/// Fire-and-forget publisher. Returning Ok means the message was handed to
/// the transport, not that the device acted on it.
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>, delivery: Delivery) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub topic: String,
    pub payload: Value,
    pub delivery: Delivery,
}

impl Publication {
    fn new(topic: &str, payload: Value, delivery: Delivery) -> Self {
        Self {
            topic: topic.to_string(),
            payload,
            delivery,
        }
    }
}

/// Ordered publishes for one command. Device topics come first, the broadcast
/// sync payload is always the last element.
pub fn plan(command: &ControlCommand, topics: &ControlTopics) -> Vec<Publication> {
    use Delivery::*;

    let mut publications = Vec::new();
    match *command {
        ControlCommand::Start { mode: ControlMode::Auto, .. } => {
            publications.push(Publication::new(&topics.auto_mode, json!({"mode": 1}), AtLeastOnce));
        }
        ControlCommand::Start { mode: ControlMode::Manual, speed } => {
            publications.push(Publication::new(&topics.manual_mode, json!({"mode": 1}), AtLeastOnce));
            if let Some(speed) = speed {
                publications.push(Publication::new(&topics.speed_setpoint, json!({"speed": speed}), AtLeastOnce));
            }
        }
        ControlCommand::Stop => {
            // Zero both mode bits so the drive never latches AUTO and MANUAL together.
            publications.push(Publication::new(&topics.off_mode, json!({"off": 1}), AtLeastOnce));
            publications.push(Publication::new(&topics.auto_mode, json!({"mode": 0}), AtLeastOnce));
            publications.push(Publication::new(&topics.manual_mode, json!({"mode": 0}), AtLeastOnce));
        }
        ControlCommand::SetDirection(direction) => {
            publications.push(Publication::new(
                &topics.direction,
                json!({"direction": direction.plc_value()}),
                AtLeastOnce,
            ));
        }
        ControlCommand::SetPid(gains) => {
            publications.push(Publication::new(
                &topics.pid,
                json!({"command": "SET_PID", "kp": gains.kp, "ki": gains.ki, "kd": gains.kd}),
                AtMostOnce,
            ));
        }
        ControlCommand::SetSpeedSetpoint(speed) => {
            publications.push(Publication::new(&topics.speed_setpoint, json!({"speed": speed}), AtLeastOnce));
        }
        // dashboard-only settings
        ControlCommand::SetSpeedUnit(_) | ControlCommand::SetPowerUnit(_) | ControlCommand::SetMode(_) => {}
    }

    let sync = serde_json::to_value(command.sync_payload()).unwrap_or(Value::Null);
    publications.push(Publication::new(&topics.broadcast, sync, AtMostOnce));
    publications
}

pub struct ControlService {
    publisher: Arc<dyn CommandPublisher>,
    topics: ControlTopics,
    evaluator: Arc<AlarmEvaluator>,
    metrics: Arc<IngestMetrics>,
}

impl ControlService {
    pub fn new(
        publisher: Arc<dyn CommandPublisher>,
        topics: ControlTopics,
        evaluator: Arc<AlarmEvaluator>,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            publisher,
            topics,
            evaluator,
            metrics,
        }
    }

    /// Publish the command in order. Stops at the first publish failure, so a
    /// broadcast is never sent for a command whose device publish failed.
    pub async fn dispatch(&self, command: ControlCommand) -> anyhow::Result<()> {
        IngestMetrics::incr(&self.metrics.control_commands);
        tracing::info!(action = %command.action(), "Dispatching control command");

        for publication in plan(&command, &self.topics) {
            let payload = serde_json::to_vec(&publication.payload)?;
            if let Err(e) = self
                .publisher
                .publish(&publication.topic, payload, publication.delivery)
                .await
                .with_context(|| format!("Failed to publish to {}", publication.topic))
            {
                IngestMetrics::incr(&self.metrics.control_publish_failures);
                tracing::error!(action = %command.action(), "{:#}", e);
                return Err(e);
            }
        }

        match command {
            ControlCommand::Start { .. } => self.evaluator.set_motor_on(true).await,
            ControlCommand::Stop => self.evaluator.set_motor_on(false).await,
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::alarm_service::MotorPhase;
    use crate::domain::alarm::ThresholdSet;
    use crate::domain::control::{Direction, PidGains};
    use crate::domain::units::SpeedUnit;
    use crate::infrastructure::config::AlarmSettings;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<(String, Value, Delivery)>>,
        fail_topic: Option<String>,
    }

    #[async_trait]
    impl CommandPublisher for RecordingPublisher {
        async fn publish(&self, topic: &str, payload: Vec<u8>, delivery: Delivery) -> anyhow::Result<()> {
            if self.fail_topic.as_deref() == Some(topic) {
                anyhow::bail!("broker unavailable");
            }
            let payload: Value = serde_json::from_slice(&payload)?;
            self.sent.lock().await.push((topic.to_string(), payload, delivery));
            Ok(())
        }
    }

    fn topics_of(publications: &[Publication]) -> Vec<&str> {
        publications.iter().map(|p| p.topic.as_str()).collect()
    }

    #[test]
    fn test_stop_zeroes_both_mode_bits_before_broadcast() {
        let publications = plan(&ControlCommand::Stop, &ControlTopics::default());
        assert_eq!(
            topics_of(&publications),
            vec!["vsd/mode/offs", "vsd/mode/autos", "vsd/mode/manuals", "motor/control"]
        );
        assert_eq!(publications[0].payload, json!({"off": 1}));
        assert_eq!(publications[1].payload, json!({"mode": 0}));
        assert_eq!(publications[2].payload, json!({"mode": 0}));
        assert_eq!(publications[3].payload, json!({"command": "STOP", "value": null}));
    }

    #[test]
    fn test_start_manual_sends_speed() {
        let command = ControlCommand::Start {
            mode: ControlMode::Manual,
            speed: Some(12.0),
        };
        let publications = plan(&command, &ControlTopics::default());
        assert_eq!(
            topics_of(&publications),
            vec!["vsd/mode/manuals", "motor/inputspeeds", "motor/control"]
        );
        assert_eq!(publications[1].payload, json!({"speed": 12.0}));
        assert_eq!(publications[1].delivery, Delivery::AtLeastOnce);
    }

    #[test]
    fn test_every_command_ends_with_exactly_one_broadcast() {
        let topics = ControlTopics::default();
        let commands = [
            ControlCommand::Start {
                mode: ControlMode::Auto,
                speed: None,
            },
            ControlCommand::Stop,
            ControlCommand::SetDirection(Direction::Rev),
            ControlCommand::SetPid(PidGains::default()),
            ControlCommand::SetSpeedSetpoint(10.0),
            ControlCommand::SetSpeedUnit(SpeedUnit::Hz),
            ControlCommand::SetMode(ControlMode::Auto),
        ];
        for command in commands {
            let publications = plan(&command, &topics);
            let broadcasts = publications.iter().filter(|p| p.topic == topics.broadcast).count();
            assert_eq!(broadcasts, 1, "{command:?}");
            assert_eq!(publications.last().map(|p| p.topic.as_str()), Some("motor/control"));
        }

        let direction = plan(&ControlCommand::SetDirection(Direction::Rev), &topics);
        assert_eq!(direction[0].payload, json!({"direction": 2}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_publishes_in_order_and_drives_gate() {
        let publisher = Arc::new(RecordingPublisher::default());
        let evaluator = Arc::new(AlarmEvaluator::new(ThresholdSet::default(), &AlarmSettings::default()));
        let metrics = Arc::new(IngestMetrics::new());
        let service = ControlService::new(publisher.clone(), ControlTopics::default(), evaluator.clone(), metrics.clone());

        service
            .dispatch(ControlCommand::Start {
                mode: ControlMode::Auto,
                speed: None,
            })
            .await
            .unwrap();
        assert_eq!(evaluator.phase().await, MotorPhase::Starting);

        service.dispatch(ControlCommand::Stop).await.unwrap();
        assert_eq!(evaluator.phase().await, MotorPhase::Off);

        let sent = publisher.sent.lock().await;
        let topics: Vec<&str> = sent.iter().map(|(t, _, _)| t.as_str()).collect();
        assert_eq!(
            topics,
            vec![
                "vsd/mode/autos",
                "motor/control",
                "vsd/mode/offs",
                "vsd/mode/autos",
                "vsd/mode/manuals",
                "motor/control"
            ]
        );
        assert_eq!(metrics.snapshot().control_commands, 2);
    }

    #[tokio::test]
    async fn test_publish_failure_skips_broadcast_and_is_counted() {
        let publisher = Arc::new(RecordingPublisher {
            fail_topic: Some("motor/inputspeeds".to_string()),
            ..RecordingPublisher::default()
        });
        let evaluator = Arc::new(AlarmEvaluator::new(ThresholdSet::default(), &AlarmSettings::default()));
        let metrics = Arc::new(IngestMetrics::new());
        let service = ControlService::new(publisher.clone(), ControlTopics::default(), evaluator, metrics.clone());

        assert!(service.dispatch(ControlCommand::SetSpeedSetpoint(5.0)).await.is_err());
        assert!(publisher.sent.lock().await.is_empty());
        assert_eq!(metrics.snapshot().control_publish_failures, 1);
    }
}
