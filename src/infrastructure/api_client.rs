// Backend HTTP client used by the dashboard: history rows and control commands
use crate::application::pipeline::HistorySource;
use crate::domain::control::ControlRequest;
use crate::domain::telemetry::Sample;
use crate::domain::time_range::TimeRange;
use crate::infrastructure::config::ApiSettings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ControlResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(settings: &ApiSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .context("Failed to build backend HTTP client")?;
        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn data_url(&self, range: TimeRange) -> String {
        format!("{}/data?range={}", self.base_url, urlencoding::encode(range.as_str()))
    }

    pub async fn send_control(&self, request: &ControlRequest) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/control", self.base_url))
            .json(request)
            .send()
            .await
            .context("Failed to reach backend")?;

        let status = response.status();
        let body: ControlResponse = response
            .json()
            .await
            .with_context(|| format!("Unexpected control response ({})", status))?;
        if !body.success {
            anyhow::bail!(
                "Control rejected ({}): {}",
                status,
                body.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        Ok(())
    }
}

#[async_trait]
impl HistorySource for ApiClient {
    async fn fetch(&self, range: TimeRange) -> Result<Vec<Sample>> {
        let url = self.data_url(range);
        tracing::debug!("Fetching history: {}", url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("Failed to reach backend")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("History request failed with status {}: {}", status, body);
        }

        response
            .json::<Vec<Sample>>()
            .await
            .context("Failed to parse history rows")
    }
}
