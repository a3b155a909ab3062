// Sensor simulator - publishes plausible motor readings on the device topics
use anyhow::Context;
use rand::Rng;
use rumqttc::QoS;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use motor_telemetry::domain::telemetry::Parameter;
use motor_telemetry::infrastructure::config::{load_simulator_config, ChannelConfig};
use motor_telemetry::infrastructure::mqtt::{client_id, connect, run_event_loop};

const POWER_FACTOR: f64 = 0.85;

/// One round of readings in device units (power in kW).
fn simulate(rng: &mut impl Rng) -> Vec<(Parameter, f64)> {
    let voltage = rng.gen_range(218.0..=222.0);
    let current = rng.gen_range(0.5..=2.0);
    let rpm: f64 = rng.gen_range(10.0..=20.0);
    let power_kw = voltage * current * POWER_FACTOR / 1000.0;
    vec![
        (Parameter::Voltage, voltage),
        (Parameter::Current, current),
        (Parameter::Rpm, rpm.round()),
        (Parameter::Power, power_kw),
    ]
}

/// Payload in the shape the real devices send. The drive wraps speed in a
/// one-element array.
fn payload(channel: &ChannelConfig, value: f64) -> Option<Value> {
    let key = channel.keys.first()?;
    let value = match channel.parameter {
        Parameter::Rpm => json!([value]),
        _ => json!((value * 100.0).round() / 100.0),
    };
    let mut body = serde_json::Map::new();
    body.insert(key.clone(), value);
    Some(Value::Object(body))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_simulator_config().context("Failed to load simulator configuration")?;
    let id = client_id(&config.mqtt, "motor-simulator");
    let (client, eventloop) = connect(&config.mqtt, &id);

    // publish-only: drive the connection, never subscribe
    tokio::spawn(run_event_loop(
        client.clone(),
        eventloop,
        Vec::new(),
        config.mqtt.reconnect_backoff(),
        |_| async { true },
    ));

    tracing::info!(host = %config.mqtt.host, port = config.mqtt.port, "Simulator publishing");
    let mut interval = tokio::time::interval(config.publish_interval());

    loop {
        interval.tick().await;
        let readings = simulate(&mut rand::thread_rng());

        for channel in &config.ingest.channels {
            let Some(value) = readings
                .iter()
                .find(|(p, _)| *p == channel.parameter)
                .map(|(_, v)| *v)
            else {
                continue;
            };
            let Some(body) = payload(channel, value) else {
                continue;
            };
            if let Err(e) = client
                .publish(channel.topic.as_str(), QoS::AtMostOnce, false, body.to_string())
                .await
            {
                tracing::warn!(topic = %channel.topic, "Publish failed: {}", e);
            }
        }
        tracing::debug!(?readings, "Published readings");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motor_telemetry::infrastructure::config::IngestSettings;

    #[test]
    fn test_readings_stay_in_range() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let readings = simulate(&mut rng);
            let get = |p| readings.iter().find(|(q, _)| *q == p).unwrap().1;
            assert!((218.0..=222.0).contains(&get(Parameter::Voltage)));
            assert!((0.5..=2.0).contains(&get(Parameter::Current)));
            assert!((10.0..=20.0).contains(&get(Parameter::Rpm)));
            let expected = get(Parameter::Voltage) * get(Parameter::Current) * 0.85 / 1000.0;
            assert!((get(Parameter::Power) - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_rpm_is_array_encoded() {
        let settings = IngestSettings::default();
        let rpm = settings.channels.iter().find(|c| c.parameter == Parameter::Rpm).unwrap();
        assert_eq!(payload(rpm, 15.0), Some(json!({"actualspeed": [15.0]})));
        let voltage = settings.channels.iter().find(|c| c.parameter == Parameter::Voltage).unwrap();
        assert_eq!(payload(voltage, 220.456), Some(json!({"tegangan": 220.46})));
    }
}
