// Main entry point - Dependency injection and server setup
use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use motor_telemetry::application::alarm_service::{AlarmEvaluator, AlarmLogWriter};
use motor_telemetry::application::auth_service::AuthService;
use motor_telemetry::application::control_service::ControlService;
use motor_telemetry::application::ingest_service::{IngestService, TopicRouter};
use motor_telemetry::application::telemetry_repository::TelemetryRepository;
use motor_telemetry::infrastructure::config::{load_server_config, StorageBackend, StorageSettings};
use motor_telemetry::infrastructure::influx_repository::InfluxRepository;
use motor_telemetry::infrastructure::memory_repository::MemoryRepository;
use motor_telemetry::infrastructure::metrics::IngestMetrics;
use motor_telemetry::infrastructure::mqtt::{client_id, connect, run_event_loop, MqttPublisher};
use motor_telemetry::presentation::app_state::AppState;
use motor_telemetry::presentation::router::router;

const METRICS_REPORT_INTERVAL: Duration = Duration::from_secs(60);

fn build_repository(storage: &StorageSettings) -> anyhow::Result<Arc<dyn TelemetryRepository>> {
    match storage.backend {
        StorageBackend::Influx => {
            let influx = storage
                .influx
                .as_ref()
                .context("storage.backend is influx but [storage.influx] is missing")?;
            tracing::info!(host = %influx.host, database = %influx.database, "Using InfluxDB storage");
            Ok(Arc::new(InfluxRepository::new(influx)?))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage, samples are lost on restart");
            Ok(Arc::new(MemoryRepository::new()))
        }
    }
}

/// Storage being down at boot is not fatal: samples are dropped and counted
/// until it comes back.
async fn prepare_storage(repository: &dyn TelemetryRepository) -> bool {
    match repository.ensure_schema().await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("Failed to prepare storage schema, continuing without it: {:#}", e);
            false
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_server_config().context("Failed to load server configuration")?;

    // Infrastructure
    let repository = build_repository(&config.storage)?;
    prepare_storage(repository.as_ref()).await;
    let metrics = Arc::new(IngestMetrics::new());

    let id = client_id(&config.mqtt, "motor-backend");
    let (mqtt_client, eventloop) = connect(&config.mqtt, &id);
    let publisher = Arc::new(MqttPublisher::new(mqtt_client.clone()));

    // Application services
    let evaluator = Arc::new(AlarmEvaluator::new(config.thresholds, &config.alarms));
    let log_writer = AlarmLogWriter::new(
        repository.clone(),
        chrono::Duration::seconds(config.alarms.log_debounce_secs as i64),
        metrics.clone(),
    );
    let ingest = Arc::new(IngestService::new(
        TopicRouter::new(&config.ingest),
        repository.clone(),
        evaluator.clone(),
        log_writer,
        metrics.clone(),
    ));
    let control = Arc::new(ControlService::new(
        publisher,
        config.control.topics.clone(),
        evaluator,
        metrics.clone(),
    ));

    // MQTT ingest loop
    let topics = ingest.topics();
    let ingest_handle = ingest.clone();
    tracing::info!(client_id = %id, host = %config.mqtt.host, port = config.mqtt.port, "Starting MQTT ingest");
    tokio::spawn(run_event_loop(
        mqtt_client,
        eventloop,
        topics,
        config.mqtt.reconnect_backoff(),
        move |publish| {
            let ingest = ingest_handle.clone();
            async move {
                ingest.handle_message(&publish.topic, &publish.payload).await;
                true
            }
        },
    ));

    let report_metrics = metrics.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(METRICS_REPORT_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            report_metrics.report();
        }
    });

    let state = Arc::new(AppState {
        ingest,
        repository,
        control,
        auth: AuthService::new(config.auth.clone()),
        metrics,
        recent_alarm_limit: config.alarms.recent_alarm_limit,
    });

    // Start server
    let addr: SocketAddr = config
        .http
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.http.bind))?;
    tracing::info!("Starting motor-telemetry service on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router(state)).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use motor_telemetry::domain::alarm::{AlarmLogEntry, NewAlarmLog};
    use motor_telemetry::domain::telemetry::Sample;

    struct UnreachableStorage;

    #[async_trait]
    impl TelemetryRepository for UnreachableStorage {
        async fn ensure_schema(&self) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
        async fn append_sample(&self, _sample: &Sample) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
        async fn samples_since(&self, _since: DateTime<Utc>) -> anyhow::Result<Vec<Sample>> {
            anyhow::bail!("connection refused")
        }
        async fn append_alarm_log(&self, _entry: &NewAlarmLog) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
        async fn alarm_message_logged_since(&self, _message: &str, _since: DateTime<Utc>) -> anyhow::Result<bool> {
            anyhow::bail!("connection refused")
        }
        async fn recent_alarm_logs(&self, _limit: usize) -> anyhow::Result<Vec<AlarmLogEntry>> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn test_schema_failure_does_not_stop_startup() {
        assert!(!prepare_storage(&UnreachableStorage).await);
        assert!(prepare_storage(&MemoryRepository::new()).await);
    }
}
