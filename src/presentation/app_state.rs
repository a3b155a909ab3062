// Application state for HTTP handlers
use crate::application::auth_service::AuthService;
use crate::application::control_service::ControlService;
use crate::application::ingest_service::IngestService;
use crate::application::telemetry_repository::TelemetryRepository;
use crate::infrastructure::metrics::IngestMetrics;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub ingest: Arc<IngestService>,
    pub repository: Arc<dyn TelemetryRepository>,
    pub control: Arc<ControlService>,
    pub auth: AuthService,
    pub metrics: Arc<IngestMetrics>,
    pub recent_alarm_limit: usize,
}
