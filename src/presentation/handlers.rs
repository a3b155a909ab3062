// HTTP request handlers
use crate::domain::control::{ControlCommand, ControlRequest};
use crate::domain::time_range::TimeRange;
use crate::domain::user::Credentials;
use crate::infrastructure::chunked_json::{chunked_json_stream, snapshot_stream};
use crate::infrastructure::http_response::{accepts_brotli, json_response};
use crate::presentation::app_state::AppState;
use crate::presentation::error::ApiError;
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Deserialize)]
pub struct RangeQuery {
    pub range: Option<String>,
}

/// Unknown, missing and `live` ranges all read the last hour.
pub fn resolve_range(raw: Option<&str>) -> TimeRange {
    match raw.map(str::parse::<TimeRange>) {
        Some(Ok(range)) if !range.is_live() => range,
        _ => TimeRange::Hour1,
    }
}

async fn respond<T: serde::Serialize>(status: StatusCode, data: &T, headers: &HeaderMap) -> Response {
    match json_response(status, data, accepts_brotli(headers)).await {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Samples for the requested window, oldest first
pub async fn get_data(
    Query(query): Query<RangeQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let range = resolve_range(query.range.as_deref());
    let window = range.window().unwrap_or_else(|| chrono::Duration::hours(1));
    let rows = state
        .repository
        .samples_since(Utc::now() - window)
        .await
        .map_err(ApiError::Storage)?;

    tracing::debug!(range = %range, rows = rows.len(), "Serving samples");
    Ok(respond(StatusCode::OK, &rows, &headers).await)
}

pub async fn get_alarms(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let rows = state
        .repository
        .recent_alarm_logs(state.recent_alarm_limit)
        .await
        .map_err(ApiError::Storage)?;
    Ok(respond(StatusCode::OK, &rows, &headers).await)
}

pub async fn post_control(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ControlRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let command = ControlCommand::try_from(request).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    state.control.dispatch(command).await.map_err(ApiError::Dispatch)?;
    Ok(Json(json!({"success": true})))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(credentials) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    match state.auth.login(&credentials) {
        Some(session) => Ok(Json(session).into_response()),
        None => {
            tracing::warn!(username = %credentials.username, "Login rejected");
            Err(ApiError::InvalidCredentials)
        }
    }
}

pub async fn current_user(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;
    let user = state.auth.user_for_token(token.trim()).ok_or(ApiError::Unauthorized)?;
    Ok(Json(json!({"success": true, "user": user})).into_response())
}

pub async fn get_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// Live snapshot stream, one frame per ingested message
pub async fn stream_snapshots(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let compress = accepts_brotli(&headers);
    let current = state.ingest.latest().await;
    let stream = snapshot_stream(current, state.ingest.subscribe());

    match chunked_json_stream(stream, compress) {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}
