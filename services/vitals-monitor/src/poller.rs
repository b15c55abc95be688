//! Periodic full-snapshot refresh

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Notify};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::api::ApiClient;
use crate::error::Result;
use crate::events::MonitorEvent;
use crate::synchronizer::StoreHandle;

/// Requests an out-of-schedule refresh from a running poller
#[derive(Debug, Clone, Default)]
pub struct RefreshTrigger(Arc<Notify>);

impl RefreshTrigger {
    pub fn trigger(&self) {
        self.0.notify_one();
    }

    /// Resolves once a refresh has been requested
    pub async fn requested(&self) {
        self.0.notified().await;
    }
}

/// Fetches the recent-readings snapshot on a fixed interval and replaces
/// the store contents with it
pub struct SnapshotPoller {
    api: Arc<ApiClient>,
    store: StoreHandle,
    events: broadcast::Sender<MonitorEvent>,
    interval: Duration,
    refresh: RefreshTrigger,
}

impl SnapshotPoller {
    pub fn new(
        api: Arc<ApiClient>,
        store: StoreHandle,
        events: broadcast::Sender<MonitorEvent>,
        interval: Duration,
    ) -> Self {
        Self {
            api,
            store,
            events,
            interval,
            refresh: RefreshTrigger::default(),
        }
    }

    pub fn trigger(&self) -> RefreshTrigger {
        self.refresh.clone()
    }

    /// Fetch one snapshot and apply it; the store is untouched on failure
    pub async fn refresh_once(&self) -> Result<usize> {
        match self.api.recent_readings().await {
            Ok(readings) => {
                let count = readings.len();
                self.store.write().await.apply_snapshot(readings);
                tracing::debug!("Applied snapshot with {} readings", count);
                let _ = self.events.send(MonitorEvent::SnapshotApplied { count });
                Ok(count)
            }
            Err(e) => {
                tracing::warn!("Snapshot refresh failed: {}", e);
                let _ = self.events.send(MonitorEvent::SnapshotFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Refresh immediately, then every interval, until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.refresh.requested() => {
                    tracing::debug!("Manual snapshot refresh requested");
                }
                _ = cancel.cancelled() => {
                    tracing::debug!("Snapshot poller cancelled");
                    break;
                }
            }

            // Failures are reported as events; the next tick retries
            let _ = self.refresh_once().await;
        }
    }
}
