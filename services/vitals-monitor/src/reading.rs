//! Patient reading types as delivered by the backend
//!
//! Field names follow the backend's JSON. The camelCase spellings some
//! endpoints emit are accepted as aliases when deserializing.

use std::fmt;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Clinical status attached to a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadingStatus {
    #[serde(rename = "NORMAL")]
    Normal,
    #[serde(rename = "ALERTA", alias = "ALERT")]
    Alert,
}

impl ReadingStatus {
    /// Severity tag used for badges and notices
    pub fn severity(&self) -> &'static str {
        match self {
            ReadingStatus::Normal => "success",
            ReadingStatus::Alert => "error",
        }
    }
}

impl fmt::Display for ReadingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingStatus::Normal => write!(f, "Normal"),
            ReadingStatus::Alert => write!(f, "Alert"),
        }
    }
}

/// One observation snapshot for one patient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientReading {
    /// Server-assigned record id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub timestamp: String,
    #[serde(rename = "paciente_id", alias = "pacienteId")]
    pub patient_id: String,
    #[serde(rename = "paciente_nome", alias = "pacienteNome")]
    pub patient_name: String,
    #[serde(rename = "paciente_cpf", alias = "pacienteCpf")]
    pub patient_document_id: String,
    #[serde(rename = "freq_cardiaca", alias = "freqCardiaca")]
    pub heart_rate: u32,
    #[serde(rename = "saturacao_o2", alias = "saturacaoO2")]
    pub oxygen_saturation: u32,
    #[serde(rename = "pressao_sistolica", alias = "pressaoSistolica")]
    pub systolic_pressure: u32,
    #[serde(rename = "pressao_diastolica", alias = "pressaoDiastolica")]
    pub diastolic_pressure: u32,
    #[serde(rename = "temperatura")]
    pub temperature: f64,
    #[serde(rename = "freq_respiratoria", alias = "freqRespiratoria")]
    pub respiratory_rate: u32,
    pub status: ReadingStatus,
    /// Server-assigned creation time, opaque to the client
    #[serde(
        rename = "dataCriacao",
        alias = "data_criacao",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<String>,
}

/// Labelled vital values for plotting a single reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VitalsChart {
    pub patient_id: String,
    pub labels: Vec<&'static str>,
    pub values: Vec<f64>,
}

pub const CHART_LABELS: [&str; 6] = [
    "Heart rate",
    "SpO2",
    "Systolic",
    "Diastolic",
    "Temperature",
    "Resp. rate",
];

impl PatientReading {
    /// Parse a single stream payload
    pub fn from_json(payload: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    pub fn is_alert(&self) -> bool {
        self.status == ReadingStatus::Alert
    }

    /// Project the six vitals onto one chart scale.
    ///
    /// Temperature is scaled by 10 so it is visible next to the other values.
    pub fn chart(&self) -> VitalsChart {
        VitalsChart {
            patient_id: self.patient_id.clone(),
            labels: CHART_LABELS.to_vec(),
            values: vec![
                f64::from(self.heart_rate),
                f64::from(self.oxygen_saturation),
                f64::from(self.systolic_pressure),
                f64::from(self.diastolic_pressure),
                self.temperature * 10.0,
                f64::from(self.respiratory_rate),
            ],
        }
    }

    /// Observation time as `HH:MM:SS`, or the raw timestamp if it does not parse
    pub fn display_time(&self) -> String {
        format_timestamp(&self.timestamp)
    }
}

/// Render an ISO-8601 timestamp as a wall-clock time
pub fn format_timestamp(timestamp: &str) -> String {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(timestamp) {
        return parsed.format("%H:%M:%S").to_string();
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S%.f") {
        return parsed.format("%H:%M:%S").to_string();
    }
    timestamp.to_string()
}

/// Aggregate record counts reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    #[serde(rename = "totalRegistros", alias = "totalRecords")]
    pub total_records: u64,
    #[serde(rename = "registrosNormais", alias = "normalRecords")]
    pub normal_records: u64,
    #[serde(rename = "registrosAlertas", alias = "alertRecords")]
    pub alert_records: u64,
}

/// Backend health answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub status: String,
}

impl BackendHealth {
    /// Accept either `{"status": ...}` or a plain text body
    pub fn from_body(body: &str) -> Self {
        match serde_json::from_str::<BackendHealth>(body) {
            Ok(health) => health,
            Err(_) => BackendHealth {
                status: body.trim().to_string(),
            },
        }
    }
}
