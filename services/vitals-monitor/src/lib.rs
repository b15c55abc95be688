//! Vitals Monitor - patient vital-signs dashboard client
//!
//! Keeps a live collection of the latest reading per patient, built from
//! periodic REST snapshots and merged with push-stream updates, and serves
//! it on a local dashboard.

pub mod api;
pub mod config;
pub mod connection;
pub mod dashboard;
pub mod error;
pub mod events;
pub mod io;
pub mod poller;
pub mod reading;
pub mod synchronizer;

pub use config::{load_config, Config};
pub use connection::{ConnectionManager, ConnectionState, ReconnectPolicy};
pub use error::{MonitorError, Result};
pub use reading::{PatientReading, ReadingStatus};
pub use synchronizer::{ReadingStore, StoreHandle};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::api::ApiClient;
use crate::dashboard::DashboardState;
use crate::events::EVENT_CHANNEL_CAPACITY;
use crate::io::{ReqwestHttpClient, WebSocketConnector};
use crate::poller::SnapshotPoller;

/// Run the vitals monitor with the given configuration
pub async fn run(config: Config) -> Result<()> {
    config.validate()?;

    let http: Arc<dyn io::HttpClient> = Arc::new(ReqwestHttpClient::new());
    let cancel = CancellationToken::new();
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    let store = synchronizer::new_store_handle();
    let notices = events::new_notice_log(config.dashboard.notice_history_size);
    let collector = events::spawn_notice_collector(
        event_tx.subscribe(),
        Arc::clone(&notices),
        cancel.clone(),
    );

    let api = Arc::new(ApiClient::new(config.backend.api_url.clone(), http));
    match api.health().await {
        Ok(health) => tracing::info!("Backend at {} reports: {}", api.base_url(), health.status),
        Err(e) => tracing::warn!("Backend health check failed: {}", e),
    }

    let connection = Arc::new(ConnectionManager::new(
        config.backend.ws_url.clone(),
        ReconnectPolicy::from(&config.reconnect),
        Arc::new(WebSocketConnector::new()),
        Arc::clone(&store),
        event_tx.clone(),
    ));

    let poller = SnapshotPoller::new(
        Arc::clone(&api),
        Arc::clone(&store),
        event_tx.clone(),
        Duration::from_secs(config.polling.interval_seconds),
    );

    connection.connect().await?;

    // Setup shutdown handler
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        cancel_for_signal.cancel();
    });

    // Start dashboard if enabled
    if config.dashboard.enabled {
        let dashboard_port = config.dashboard.port;
        let dashboard_state = DashboardState {
            store: Arc::clone(&store),
            notices: Arc::clone(&notices),
            connection: Arc::clone(&connection),
            api: Arc::clone(&api),
            refresh: poller.trigger(),
            notice_ttl: Duration::from_millis(config.dashboard.notice_ttl_ms),
        };
        let cancel_for_dashboard = cancel.clone();

        tokio::spawn(async move {
            let router = dashboard::build_router(dashboard_state);
            let addr = SocketAddr::from(([0, 0, 0, 0], dashboard_port));

            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(e) => {
                    tracing::error!(
                        "Failed to bind dashboard to port {}: {}. Continuing without dashboard.",
                        dashboard_port,
                        e
                    );
                    return;
                }
            };
            tracing::info!("Dashboard listening on http://{}", addr);

            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    cancel_for_dashboard.cancelled().await;
                })
                .await
            {
                tracing::error!("{}", MonitorError::Dashboard(e.to_string()));
            }

            tracing::debug!("Dashboard stopped");
        });
    }

    tracing::info!("Vitals monitor started");

    // Blocks until cancelled
    poller.run(cancel.clone()).await;

    connection.disconnect().await;
    cancel.cancel();
    let _ = collector.await;
    tracing::info!("Vitals monitor stopped");

    Ok(())
}
