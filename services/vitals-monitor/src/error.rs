//! Error types for the vitals monitor

/// Errors that can occur in the vitals monitor
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stream connection error: {0}")]
    Connection(String),

    #[error("Invalid state for operation: {0}")]
    InvalidState(String),

    #[error("Dashboard error: {0}")]
    Dashboard(String),
}

/// Result type alias for vitals monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;
