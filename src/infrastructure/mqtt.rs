// MQTT transport - event loop with resubscribe on reconnect, live feed and command publisher
use crate::application::control_service::{CommandPublisher, Delivery};
use crate::application::ingest_service::TopicRouter;
use crate::application::pipeline::{LiveFeed, LiveSubscription};
use crate::domain::control::SyncPayload;
use crate::infrastructure::config::MqttSettings;
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, Publish, QoS};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Client id from settings, or `<prefix>-<random hex>` when none is configured.
/// Dashboards always need distinct ids or the broker kicks the older session.
pub fn client_id(settings: &MqttSettings, prefix: &str) -> String {
    if !settings.client_id.is_empty() {
        return settings.client_id.clone();
    }
    let suffix: u32 = rand::thread_rng().r#gen();
    format!("{}-{:08x}", prefix, suffix)
}

pub fn connect(settings: &MqttSettings, client_id: &str) -> (AsyncClient, EventLoop) {
    let mut options = MqttOptions::new(client_id, &settings.host, settings.port);
    options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs.max(5)));
    options.set_clean_session(true);
    AsyncClient::new(options, settings.channel_capacity.max(10))
}

fn qos(delivery: Delivery) -> QoS {
    match delivery {
        Delivery::AtMostOnce => QoS::AtMostOnce,
        Delivery::AtLeastOnce => QoS::AtLeastOnce,
    }
}

/// Poll the connection forever. Every ConnAck (first connect and each
/// reconnect) re-issues the subscriptions; a connection error waits out the
/// fixed backoff before polling again. Stops when `handler` returns false.
pub async fn run_event_loop<H, Fut>(
    client: AsyncClient,
    mut eventloop: EventLoop,
    topics: Vec<String>,
    backoff: Duration,
    mut handler: H,
) where
    H: FnMut(Publish) -> Fut,
    Fut: Future<Output = bool>,
{
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!(topics = ?topics, "MQTT connected, subscribing");
                for topic in &topics {
                    // try_subscribe: awaiting here would wait on the loop we are driving
                    if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                        tracing::error!(topic = %topic, "Subscribe failed: {}", e);
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if !handler(publish).await {
                    tracing::debug!("MQTT consumer gone, leaving event loop");
                    return;
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("MQTT connection error: {}, retrying in {:?}", e, backoff);
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Live sensor feed for one dashboard: its own connection, decoded readings.
pub struct MqttLiveFeed {
    settings: MqttSettings,
    router: TopicRouter,
}

impl MqttLiveFeed {
    pub fn new(settings: MqttSettings, router: TopicRouter) -> Self {
        Self { settings, router }
    }
}

#[async_trait]
impl LiveFeed for MqttLiveFeed {
    async fn open(&self) -> anyhow::Result<LiveSubscription> {
        let id = client_id(&self.settings, "dashboard");
        let (client, eventloop) = connect(&self.settings, &id);
        let (tx, rx) = mpsc::channel(self.settings.channel_capacity.max(1));
        let router = self.router.clone();
        let topics = router.topics();
        let backoff = self.settings.reconnect_backoff();

        let task = tokio::spawn(run_event_loop(client, eventloop, topics, backoff, move |publish| {
            let decoded = router.decode(&publish.topic, &publish.payload, Utc::now());
            let tx = tx.clone();
            async move {
                match decoded {
                    Ok(reading) => tx.send(reading).await.is_ok(),
                    Err(e) => {
                        tracing::warn!("Dropping live message: {}", e);
                        true
                    }
                }
            }
        }));

        tracing::info!(client_id = %id, "Live feed opened");
        Ok(LiveSubscription::new(rx, task))
    }
}

/// Follow the control broadcast topic. Payloads that do not decode are
/// logged and skipped.
pub fn spawn_sync_listener(
    settings: &MqttSettings,
    topic: &str,
) -> (mpsc::Receiver<SyncPayload>, JoinHandle<()>) {
    let id = client_id(settings, "dashboard-sync");
    let (client, eventloop) = connect(settings, &id);
    let (tx, rx) = mpsc::channel(settings.channel_capacity.max(1));
    let topics = vec![topic.to_string()];

    let task = tokio::spawn(run_event_loop(
        client,
        eventloop,
        topics,
        settings.reconnect_backoff(),
        move |publish| {
            let decoded = serde_json::from_slice::<SyncPayload>(&publish.payload);
            let tx = tx.clone();
            async move {
                match decoded {
                    Ok(payload) => tx.send(payload).await.is_ok(),
                    Err(e) => {
                        tracing::warn!(topic = %publish.topic, "Ignoring sync payload: {}", e);
                        true
                    }
                }
            }
        },
    ));
    (rx, task)
}

#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CommandPublisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>, delivery: Delivery) -> anyhow::Result<()> {
        self.client
            .publish(topic, qos(delivery), false, payload)
            .await
            .with_context(|| format!("MQTT publish to {} failed", topic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_client_ids_are_distinct() {
        let settings = MqttSettings::default();
        let a = client_id(&settings, "dashboard");
        let b = client_id(&settings, "dashboard");
        assert!(a.starts_with("dashboard-"));
        assert_eq!(a.len(), "dashboard-".len() + 8);
        assert_ne!(a, b);
    }

    #[test]
    fn test_configured_client_id_wins() {
        let settings = MqttSettings {
            client_id: "backend".to_string(),
            ..MqttSettings::default()
        };
        assert_eq!(client_id(&settings, "server"), "backend");
    }

    #[test]
    fn test_delivery_maps_to_qos() {
        assert_eq!(qos(Delivery::AtLeastOnce), QoS::AtLeastOnce);
        assert_eq!(qos(Delivery::AtMostOnce), QoS::AtMostOnce);
    }
}
