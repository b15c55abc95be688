//! Configuration types for the vitals monitor

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::MonitorError;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

/// Endpoints of the vital-signs backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            ws_url: default_ws_url(),
        }
    }
}

/// Periodic snapshot refresh settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_polling_interval")]
    pub interval_seconds: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_polling_interval(),
        }
    }
}

/// Stream reconnection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay unit; attempt `n` waits `n * base_delay_ms`
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// Attempts allowed after a connection drops before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Dashboard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_dashboard_port")]
    pub port: u16,
    #[serde(default = "default_notice_history_size")]
    pub notice_history_size: usize,
    #[serde(default = "default_notice_ttl")]
    pub notice_ttl_ms: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_dashboard_port(),
            notice_history_size: default_notice_history_size(),
            notice_ttl_ms: default_notice_ttl(),
        }
    }
}

impl Config {
    /// Reject settings the service cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        check_scheme("backend.api_url", &self.backend.api_url, &["http", "https"])?;
        check_scheme("backend.ws_url", &self.backend.ws_url, &["ws", "wss"])?;

        if self.polling.interval_seconds == 0 {
            return Err(MonitorError::Config(
                "polling.interval_seconds must be greater than zero".to_string(),
            ));
        }
        if self.reconnect.base_delay_ms == 0 {
            return Err(MonitorError::Config(
                "reconnect.base_delay_ms must be greater than zero".to_string(),
            ));
        }
        if self.dashboard.notice_history_size == 0 {
            return Err(MonitorError::Config(
                "dashboard.notice_history_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_scheme(field: &str, value: &str, allowed: &[&str]) -> crate::Result<()> {
    let url = reqwest::Url::parse(value)
        .map_err(|e| MonitorError::Config(format!("{} '{}' is not a valid URL: {}", field, value, e)))?;
    if !allowed.contains(&url.scheme()) {
        return Err(MonitorError::Config(format!(
            "{} '{}' must use one of: {}",
            field,
            value,
            allowed.join(", ")
        )));
    }
    Ok(())
}

fn default_api_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_ws_url() -> String {
    "ws://localhost:8080/ws".to_string()
}

fn default_polling_interval() -> u64 {
    5
}

fn default_base_delay() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_dashboard_port() -> u16 {
    11120
}

fn default_notice_history_size() -> usize {
    50
}

fn default_notice_ttl() -> u64 {
    6000
}

/// Load configuration from a JSON file
pub fn load_config(path: &Path) -> crate::Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        MonitorError::Config(format!("Failed to read config file {:?}: {}", path, e))
    })?;
    let config: Config = serde_json::from_str(&content)?;
    Ok(config)
}
