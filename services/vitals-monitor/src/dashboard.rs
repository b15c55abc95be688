//! Local web dashboard: patient cards plus a JSON API

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::ApiClient;
use crate::connection::ConnectionManager;
use crate::events::{current_epoch_ms, NoticeLogHandle, Severity};
use crate::poller::RefreshTrigger;
use crate::reading::PatientReading;
use crate::synchronizer::StoreHandle;
use crate::MonitorError;

/// Dashboard application state
#[derive(Clone)]
pub struct DashboardState {
    pub store: StoreHandle,
    pub notices: NoticeLogHandle,
    pub connection: Arc<ConnectionManager>,
    pub api: Arc<ApiClient>,
    pub refresh: RefreshTrigger,
    pub notice_ttl: Duration,
}

/// Build the dashboard axum router
pub fn build_router(state: DashboardState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/readings", get(readings_handler))
        .route("/api/patients/{patient_id}/chart", get(chart_handler))
        .route("/api/patients/{patient_id}/history", get(history_handler))
        .route("/api/statistics", get(statistics_handler))
        .route("/api/connection", get(connection_handler))
        .route("/api/notices", get(notices_handler))
        .route("/api/refresh", post(refresh_handler))
        .route("/api/reconnect", post(reconnect_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn index_handler(State(dashboard): State<DashboardState>) -> impl IntoResponse {
    let connected = dashboard.connection.is_connected().await;
    let (chip_label, (chip_color, chip_bg)) = if connected {
        ("Connected", palette("success"))
    } else {
        ("Disconnected", palette("error"))
    };

    let banner = {
        let notices = dashboard.notices.read().await;
        match notices.active(current_epoch_ms(), dashboard.notice_ttl) {
            Some(notice) => {
                let (color, bg) = match notice.severity {
                    Severity::Success => palette("success"),
                    Severity::Error => palette("error"),
                };
                format!(
                    r#"<div style="padding: 0.75rem; margin-bottom: 1rem; border-radius: 0.25rem; color: {}; background-color: {};">{}</div>"#,
                    color,
                    bg,
                    escape_html(&notice.message)
                )
            }
            None => String::new(),
        }
    };

    let (cards, patient_count, alert_count) = {
        let store = dashboard.store.read().await;
        let cards = if store.is_empty() {
            r#"<p style="color: #6c757d;">Waiting for patient data...</p>"#.to_string()
        } else {
            store.readings().iter().map(patient_card).collect()
        };
        (cards, store.len(), store.alert_count())
    };

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <meta http-equiv="refresh" content="5">
    <title>Vital Signs Monitor</title>
</head>
<body style="font-family: system-ui, sans-serif; max-width: 1200px; margin: 0 auto; padding: 1rem;">
    <header style="display: flex; justify-content: space-between; align-items: center; gap: 1rem;">
        <h1>Vital Signs Monitor</h1>
        <span>{patient_count} patients, <strong id="alert-count">{alert_count}</strong> in alert</span>
        <div style="display: flex; gap: 0.5rem; align-items: center;">
            <form method="post" action="/api/refresh" style="margin: 0;"><button type="submit">Refresh</button></form>
            <form method="post" action="/api/reconnect" style="margin: 0;"><button type="submit">Reconnect</button></form>
            <span style="padding: 0.25em 0.75em; border-radius: 1rem; font-weight: 600; color: {chip_color}; background-color: {chip_bg};">{chip_label}</span>
        </div>
    </header>
    {banner}
    <section style="display: grid; grid-template-columns: repeat(auto-fill, minmax(260px, 1fr)); gap: 1rem;">
        {cards}
    </section>
</body>
</html>"#,
        patient_count = patient_count,
        alert_count = alert_count,
        chip_color = chip_color,
        chip_bg = chip_bg,
        chip_label = chip_label,
        banner = banner,
        cards = cards,
    );

    Html(html)
}

/// Foreground and background colours for a severity tag
fn palette(severity: &str) -> (&'static str, &'static str) {
    match severity {
        "success" => ("#155724", "#d4edda"),
        "error" => ("#721c24", "#f8d7da"),
        _ => ("#383d41", "#e2e3e5"),
    }
}

fn patient_card(reading: &PatientReading) -> String {
    let (color, bg) = palette(reading.status.severity());
    format!(
        r#"<article style="border: 1px solid #dee2e6; border-radius: 0.5rem; padding: 1rem;">
            <div style="display: flex; justify-content: space-between; align-items: center;">
                <h3 style="margin: 0;">{name}</h3>
                <span style="padding: 0.25em 0.6em; border-radius: 0.25rem; font-size: 0.85em; font-weight: 600; color: {color}; background-color: {bg};">{status}</span>
            </div>
            <table style="width: 100%; margin-top: 0.5rem;">
                <tr><td>Heart rate</td><td>{heart_rate} bpm</td></tr>
                <tr><td>SpO2</td><td>{spo2}%</td></tr>
                <tr><td>Blood pressure</td><td>{systolic}/{diastolic} mmHg</td></tr>
                <tr><td>Temperature</td><td>{temperature:.1} °C</td></tr>
                <tr><td>Respiratory rate</td><td>{respiratory} rpm</td></tr>
            </table>
            {chart}
            <small style="color: #6c757d;">Last update: {time}</small>
        </article>"#,
        name = escape_html(&reading.patient_name),
        color = color,
        bg = bg,
        status = reading.status,
        heart_rate = reading.heart_rate,
        spo2 = reading.oxygen_saturation,
        systolic = reading.systolic_pressure,
        diastolic = reading.diastolic_pressure,
        temperature = reading.temperature,
        respiratory = reading.respiratory_rate,
        chart = chart_bars(reading),
        time = escape_html(&reading.display_time()),
    )
}

/// Horizontal bars for the chart projection, scaled to the largest value
fn chart_bars(reading: &PatientReading) -> String {
    let chart = reading.chart();
    let max = chart.values.iter().cloned().fold(0.0_f64, f64::max);
    let (color, _) = palette(reading.status.severity());

    let rows: String = chart
        .labels
        .iter()
        .zip(&chart.values)
        .map(|(label, value)| {
            let width = if max > 0.0 { value / max * 100.0 } else { 0.0 };
            format!(
                r#"<div style="display: flex; align-items: center; gap: 0.5rem; font-size: 0.75em;">
                    <span style="width: 7em;">{label}</span>
                    <div style="flex: 1; background-color: #e9ecef; height: 0.6em; border-radius: 0.3em;">
                        <div class="chart-bar" style="width: {width:.1}%; height: 100%; border-radius: 0.3em; background-color: {color};"></div>
                    </div>
                    <span style="width: 3em; text-align: right;">{value}</span>
                </div>"#,
                label = label,
                width = width,
                color = color,
                value = value,
            )
        })
        .collect();

    format!(
        r#"<div class="vitals-chart" data-patient="{}" style="margin: 0.5rem 0;">{}</div>"#,
        escape_html(&chart.patient_id),
        rows
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

async fn readings_handler(State(dashboard): State<DashboardState>) -> impl IntoResponse {
    let store = dashboard.store.read().await;
    Json(store.readings().to_vec())
}

async fn chart_handler(
    State(dashboard): State<DashboardState>,
    Path(patient_id): Path<String>,
) -> Response {
    let store = dashboard.store.read().await;
    match store.get(&patient_id) {
        Some(reading) => Json(reading.chart()).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("No reading held for patient '{}'", patient_id),
        ),
    }
}

async fn history_handler(
    State(dashboard): State<DashboardState>,
    Path(patient_id): Path<String>,
) -> Response {
    match dashboard.api.patient_readings(&patient_id).await {
        Ok(readings) => Json(readings).into_response(),
        Err(e) => backend_error(e),
    }
}

async fn statistics_handler(State(dashboard): State<DashboardState>) -> Response {
    match dashboard.api.statistics().await {
        Ok(statistics) => Json(statistics).into_response(),
        Err(e) => backend_error(e),
    }
}

async fn connection_handler(State(dashboard): State<DashboardState>) -> impl IntoResponse {
    Json(dashboard.connection.status().await)
}

async fn notices_handler(State(dashboard): State<DashboardState>) -> impl IntoResponse {
    let notices = dashboard.notices.read().await;
    Json(notices.iter().cloned().collect::<Vec<_>>())
}

async fn refresh_handler(
    State(dashboard): State<DashboardState>,
    headers: HeaderMap,
) -> Response {
    dashboard.refresh.trigger();
    if from_form(&headers) {
        return Redirect::to("/").into_response();
    }
    StatusCode::ACCEPTED.into_response()
}

async fn reconnect_handler(
    State(dashboard): State<DashboardState>,
    headers: HeaderMap,
) -> Response {
    match dashboard.connection.connect().await {
        Ok(()) => {
            tracing::info!("Manual reconnect requested from dashboard");
            if from_form(&headers) {
                return Redirect::to("/").into_response();
            }
            StatusCode::ACCEPTED.into_response()
        }
        Err(e @ MonitorError::InvalidState(_)) => error_response(StatusCode::CONFLICT, e.to_string()),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Browser form posts are answered with a redirect back to the page
fn from_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"))
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}

fn backend_error(e: MonitorError) -> Response {
    tracing::warn!("Backend request failed: {}", e);
    error_response(StatusCode::BAD_GATEWAY, e.to_string())
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
