//! REST client for the vital-signs backend

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::error::{MonitorError, Result};
use crate::io::HttpClient;
use crate::reading::{BackendHealth, PatientReading, Statistics};

const API_ROOT: [&str; 2] = ["api", "pacientes"];

/// Typed access to the backend's patient endpoints
pub struct ApiClient {
    base_url: String,
    http: Arc<dyn HttpClient>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, http: Arc<dyn HttpClient>) -> Self {
        let base_url = base_url.into();
        tracing::debug!("Created ApiClient for {}", base_url);
        Self { base_url, http }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Latest reading of every patient (full snapshot)
    pub async fn recent_readings(&self) -> Result<Vec<PatientReading>> {
        let url = self.endpoint(&["dados", "recentes"])?;
        self.get_json(&url).await
    }

    /// Reading history of a single patient
    pub async fn patient_readings(&self, patient_id: &str) -> Result<Vec<PatientReading>> {
        let url = self.endpoint(&[patient_id, "dados"])?;
        self.get_json(&url).await
    }

    pub async fn statistics(&self) -> Result<Statistics> {
        let url = self.endpoint(&["estatisticas"])?;
        self.get_json(&url).await
    }

    pub async fn health(&self) -> Result<BackendHealth> {
        let url = self.endpoint(&["health"])?;
        let response = self.http.get(&url).await?;
        if !response.is_success() {
            return Err(MonitorError::Status {
                url,
                status: response.status,
            });
        }
        Ok(BackendHealth::from_body(&response.body))
    }

    fn endpoint(&self, segments: &[&str]) -> Result<String> {
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| {
            MonitorError::Config(format!("Invalid API base URL '{}': {}", self.base_url, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                MonitorError::Config(format!(
                    "API base URL '{}' cannot carry a path",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(API_ROOT)
            .extend(segments);
        Ok(url.to_string())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.http.get(url).await?;
        if !response.is_success() {
            tracing::debug!("Non-2xx response from {}: status={}", url, response.status);
            return Err(MonitorError::Status {
                url: url.to_string(),
                status: response.status,
            });
        }
        Ok(serde_json::from_str(&response.body)?)
    }
}
