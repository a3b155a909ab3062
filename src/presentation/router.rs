// Route table, mounted at the root and under /api
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    current_user, get_alarms, get_data, get_stats, health_check, login, post_control, stream_snapshots,
};
use axum::http::Method;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn router(state: Arc<AppState>) -> Router {
    // Compression is done per handler, so no CompressionLayer here.
    let routes = Router::new()
        .route("/healthz", get(health_check))
        .route("/data", get(get_data))
        .route("/motor", get(get_data))
        .route("/alarms", get(get_alarms))
        .route("/control", post(post_control))
        .route("/auth/login", post(login))
        .route("/auth/me", get(current_user))
        .route("/stats", get(get_stats))
        .route("/stream", get(stream_snapshots));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .merge(routes.clone())
        .nest("/api", routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::alarm_service::{AlarmEvaluator, AlarmLogWriter, MotorPhase};
    use crate::application::auth_service::AuthService;
    use crate::application::control_service::{CommandPublisher, ControlService, Delivery};
    use crate::application::ingest_service::{IngestService, TopicRouter};
    use crate::application::telemetry_repository::TelemetryRepository;
    use crate::domain::alarm::{AlarmLevel, NewAlarmLog, ThresholdSet};
    use crate::domain::telemetry::Sample;
    use crate::infrastructure::config::{AlarmSettings, AuthSettings, ControlTopics, IngestSettings};
    use crate::infrastructure::memory_repository::MemoryRepository;
    use crate::infrastructure::metrics::IngestMetrics;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use chrono::{Duration, Utc};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct RecordingPublisher {
        topics: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandPublisher for RecordingPublisher {
        async fn publish(&self, topic: &str, _payload: Vec<u8>, _delivery: Delivery) -> anyhow::Result<()> {
            self.topics.lock().await.push(topic.to_string());
            Ok(())
        }
    }

    struct Harness {
        app: Router,
        repository: Arc<MemoryRepository>,
        publisher: Arc<RecordingPublisher>,
        evaluator: Arc<AlarmEvaluator>,
    }

    fn harness() -> Harness {
        let settings = AlarmSettings::default();
        let repository = Arc::new(MemoryRepository::new());
        let publisher = Arc::new(RecordingPublisher::default());
        let metrics = Arc::new(IngestMetrics::new());
        let evaluator = Arc::new(AlarmEvaluator::new(ThresholdSet::default(), &settings));
        let writer = AlarmLogWriter::new(repository.clone(), Duration::seconds(10), metrics.clone());
        let ingest = IngestService::new(
            TopicRouter::new(&IngestSettings::default()),
            repository.clone(),
            evaluator.clone(),
            writer,
            metrics.clone(),
        );
        let control = ControlService::new(
            publisher.clone(),
            ControlTopics::default(),
            evaluator.clone(),
            metrics.clone(),
        );
        let state = AppState {
            ingest: Arc::new(ingest),
            repository: repository.clone(),
            control: Arc::new(control),
            auth: AuthService::new(AuthSettings::default()),
            metrics,
            recent_alarm_limit: settings.recent_alarm_limit,
        };
        Harness {
            app: router(Arc::new(state)),
            repository,
            publisher,
            evaluator,
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_healthz_on_both_mounts() {
        let h = harness();
        for uri in ["/healthz", "/api/healthz"] {
            let response = h.app.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{uri}");
            let body = response.into_body().collect().await.unwrap().to_bytes();
            assert_eq!(&body[..], b"ok");
        }
    }

    #[tokio::test]
    async fn test_data_returns_ascending_rows_within_range() {
        let h = harness();
        let now = Utc::now();
        for minutes in [90, 20, 45] {
            h.repository
                .append_sample(&Sample {
                    timestamp: now - Duration::minutes(minutes),
                    voltage: 220.0,
                    current: 1.0,
                    rpm: minutes as f64,
                    power: 187.0,
                })
                .await
                .unwrap();
        }

        let (status, body) = send(&h.app, get("/api/data?range=24h")).await;
        assert_eq!(status, StatusCode::OK);
        let rpms: Vec<f64> = body.as_array().unwrap().iter().map(|r| r["rpm"].as_f64().unwrap()).collect();
        assert_eq!(rpms, vec![90.0, 45.0, 20.0]);

        // unknown range reads the last hour
        let (_, body) = send(&h.app, get("/data?range=bogus")).await;
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_alarms_newest_first() {
        let h = harness();
        let now = Utc::now();
        for (i, message) in ["Overvoltage", "Critical Overcurrent"].into_iter().enumerate() {
            h.repository
                .append_alarm_log(&NewAlarmLog {
                    timestamp: now + Duration::seconds(i as i64),
                    level: AlarmLevel::Critical,
                    message: message.to_string(),
                })
                .await
                .unwrap();
        }

        let (status, body) = send(&h.app, get("/alarms")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["message"], "Critical Overcurrent");
        assert_eq!(body[0]["status"], "ACTIVE");
        assert_eq!(body[1]["message"], "Overvoltage");
    }

    #[tokio::test(start_paused = true)]
    async fn test_control_dispatches_and_drives_gate() {
        let h = harness();
        let (status, body) = send(&h.app, post_json("/api/control", json!({"action": "STOP"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true}));
        assert_eq!(
            *h.publisher.topics.lock().await,
            vec!["vsd/mode/offs", "vsd/mode/autos", "vsd/mode/manuals", "motor/control"]
        );

        let (status, _) = send(&h.app, post_json("/control", json!({"action": "START", "value": "AUTO"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(h.evaluator.phase().await, MotorPhase::Starting);
    }

    #[tokio::test]
    async fn test_control_rejects_invalid_requests() {
        let h = harness();
        let (status, body) = send(&h.app, post_json("/control", json!({"action": "SET_DIR"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, _) = send(&h.app, post_json("/control", json!({"action": "LAUNCH"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(h.publisher.topics.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_login_and_me() {
        let h = harness();
        let (status, body) = send(
            &h.app,
            post_json("/api/auth/login", json!({"username": "operator", "password": "operator123"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["user"]["role"], "operator");
        let token = body["token"].as_str().unwrap().to_string();

        let (status, body) = send(
            &h.app,
            post_json("/api/auth/login", json!({"username": "operator", "password": "nope"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid credentials");

        let request = Request::builder()
            .uri("/auth/me")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&h.app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["username"], "operator");

        let (status, _) = send(&h.app, get("/auth/me")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_stats_counts_control_commands() {
        let h = harness();
        send(&h.app, post_json("/control", json!({"action": "SET_SPEED_UNIT", "value": "hz"}))).await;
        let (status, body) = send(&h.app, get("/stats")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["control_commands"], 1);
        assert_eq!(body["malformed_payloads"], 0);
    }
}
