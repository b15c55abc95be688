//! Monitor events and the user-facing notices derived from them

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

/// Capacity of the event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Something the connection manager or the poller wants observers to know
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    Connected,
    Disconnected {
        reason: String,
    },
    ReconnectScheduled {
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
    },
    ReconnectExhausted {
        attempts: u32,
    },
    SnapshotApplied {
        count: usize,
    },
    SnapshotFailed {
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Success,
    Error,
}

/// A transient banner message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub severity: Severity,
    pub message: String,
    pub timestamp_epoch_ms: u64,
}

impl MonitorEvent {
    /// The notice to show for this event, if any
    pub fn notice(&self, now_ms: u64) -> Option<Notice> {
        let (severity, message) = match self {
            MonitorEvent::Connected => (Severity::Success, "Connected to real-time server"),
            MonitorEvent::Disconnected { .. } => (Severity::Error, "Disconnected from server"),
            MonitorEvent::ReconnectExhausted { .. } => {
                (Severity::Error, "Maximum reconnection attempts reached")
            }
            MonitorEvent::SnapshotFailed { .. } => {
                (Severity::Error, "Failed to load recent readings")
            }
            MonitorEvent::ReconnectScheduled { .. } | MonitorEvent::SnapshotApplied { .. } => {
                return None
            }
        };
        Some(Notice {
            severity,
            message: message.to_string(),
            timestamp_epoch_ms: now_ms,
        })
    }
}

/// Bounded history of notices, newest last
#[derive(Debug)]
pub struct NoticeLog {
    notices: VecDeque<Notice>,
    max_size: usize,
}

impl NoticeLog {
    pub fn new(max_size: usize) -> Self {
        Self {
            notices: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    pub fn push(&mut self, notice: Notice) {
        if self.notices.len() >= self.max_size {
            self.notices.pop_front();
        }
        self.notices.push_back(notice);
    }

    pub fn latest(&self) -> Option<&Notice> {
        self.notices.back()
    }

    /// The latest notice, if it is still younger than `ttl`
    pub fn active(&self, now_ms: u64, ttl: Duration) -> Option<&Notice> {
        self.latest()
            .filter(|n| Duration::from_millis(now_ms.saturating_sub(n.timestamp_epoch_ms)) < ttl)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notice> {
        self.notices.iter()
    }

    pub fn len(&self) -> usize {
        self.notices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notices.is_empty()
    }
}

pub type NoticeLogHandle = Arc<RwLock<NoticeLog>>;

pub fn new_notice_log(max_size: usize) -> NoticeLogHandle {
    Arc::new(RwLock::new(NoticeLog::new(max_size)))
}

/// Record a notice for every noteworthy event until cancelled
pub fn spawn_notice_collector(
    mut events: broadcast::Receiver<MonitorEvent>,
    log: NoticeLogHandle,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                received = events.recv() => received,
                _ = cancel.cancelled() => break,
            };
            match received {
                Ok(event) => {
                    if let Some(notice) = event.notice(current_epoch_ms()) {
                        tracing::debug!("Notice ({:?}): {}", notice.severity, notice.message);
                        log.write().await.push(notice);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Notice collector lagged, {} events skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!("Notice collector stopped");
    })
}

pub fn current_epoch_ms() -> u64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(message: &str, at: u64) -> Notice {
        Notice {
            severity: Severity::Error,
            message: message.to_string(),
            timestamp_epoch_ms: at,
        }
    }

    #[test]
    fn connection_events_map_to_notices() {
        let connected = MonitorEvent::Connected.notice(10).unwrap();
        assert_eq!(connected.severity, Severity::Success);
        assert_eq!(connected.timestamp_epoch_ms, 10);

        let lost = MonitorEvent::Disconnected {
            reason: "closed".to_string(),
        }
        .notice(20)
        .unwrap();
        assert_eq!(lost.severity, Severity::Error);

        let exhausted = MonitorEvent::ReconnectExhausted { attempts: 5 }
            .notice(30)
            .unwrap();
        assert_eq!(exhausted.message, "Maximum reconnection attempts reached");
    }

    #[test]
    fn routine_events_have_no_notice() {
        assert!(MonitorEvent::SnapshotApplied { count: 3 }.notice(0).is_none());
        assert!(MonitorEvent::ReconnectScheduled {
            attempt: 1,
            max_attempts: 5,
            delay: Duration::from_secs(1),
        }
        .notice(0)
        .is_none());
    }

    #[test]
    fn log_respects_max_size() {
        let mut log = NoticeLog::new(2);
        for i in 0..5 {
            log.push(notice(&format!("n{}", i), i));
        }
        let messages: Vec<&str> = log.iter().map(|n| n.message.as_str()).collect();
        assert_eq!(messages, vec!["n3", "n4"]);
        assert_eq!(log.latest().unwrap().message, "n4");
    }

    #[test]
    fn active_notice_expires_after_ttl() {
        let mut log = NoticeLog::new(10);
        assert!(log.active(0, Duration::from_millis(6000)).is_none());

        log.push(notice("lost", 1_000));
        let ttl = Duration::from_millis(6000);
        assert!(log.active(6_999, ttl).is_some());
        assert!(log.active(7_000, ttl).is_none());
    }

    #[test]
    fn active_notice_with_huge_ttl_never_expires() {
        let mut log = NoticeLog::new(10);
        log.push(notice("lost", 0));

        // A TTL beyond u64 milliseconds must not wrap to a short one
        let ttl = Duration::from_millis(u64::MAX) + Duration::from_secs(1);
        assert!(log.active(u64::MAX, ttl).is_some());
        assert!(log.active(u64::MAX, Duration::MAX).is_some());
        assert!(log.active(5_000, Duration::from_secs(5)).is_none());
    }

    #[tokio::test]
    async fn collector_records_notices_until_cancelled() {
        let (tx, rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let log = new_notice_log(10);
        let cancel = CancellationToken::new();
        let handle = spawn_notice_collector(rx, Arc::clone(&log), cancel.clone());

        tx.send(MonitorEvent::Connected).unwrap();
        tx.send(MonitorEvent::SnapshotApplied { count: 1 }).unwrap();
        tx.send(MonitorEvent::SnapshotFailed {
            reason: "timeout".to_string(),
        })
        .unwrap();

        // The collector drains the channel before it observes the closed sender
        drop(tx);
        handle.await.unwrap();

        let log = log.read().await;
        assert_eq!(log.len(), 2);
        assert_eq!(log.latest().unwrap().message, "Failed to load recent readings");
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn collector_stops_on_cancel() {
        let (_tx, rx) = broadcast::channel::<MonitorEvent>(EVENT_CHANNEL_CAPACITY);
        let log = new_notice_log(10);
        let cancel = CancellationToken::new();
        let handle = spawn_notice_collector(rx, Arc::clone(&log), cancel.clone());

        cancel.cancel();
        handle.await.unwrap();
        assert!(log.read().await.is_empty());
    }
}
