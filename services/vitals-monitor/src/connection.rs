//! Push-stream connection management
//!
//! `ConnectionMachine` is the pure state machine: it decides what each
//! stream event means and when to back off or give up. `ConnectionManager`
//! owns one machine, drives it from a background task, and feeds decoded
//! readings into the shared store.
//!
//! Reconnection uses a linear backoff: attempt `n` waits `n * base_delay`.
//! Once `max_attempts` consecutive attempts have failed the machine enters
//! `Failed` and stays there until the caller connects again.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ReconnectConfig;
use crate::error::{MonitorError, Result};
use crate::events::MonitorEvent;
use crate::io::StreamConnector;
use crate::reading::PatientReading;
use crate::synchronizer::{StoreHandle, UpdateOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Input to the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Opened,
    Message(String),
    Closed,
    Error(String),
}

/// What the driver should do after an event
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Connected,
    Reading(PatientReading),
    /// Message could not be decoded; the connection stays up
    Discarded(String),
    Reconnect {
        attempt: u32,
        delay: Duration,
    },
    Exhausted {
        attempts: u32,
    },
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delay before the 1-indexed `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_attempts: config.max_attempts,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    attempts: u32,
    policy: ReconnectPolicy,
}

impl ConnectionMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Begin opening a stream
    ///
    /// Connecting out of `Failed` is a manual recovery and starts a fresh
    /// attempt budget.
    pub fn connect(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Reconnecting => {}
            ConnectionState::Failed => {
                debug!("Leaving failed state after {} attempts", self.attempts);
                self.attempts = 0;
            }
            ConnectionState::Connecting | ConnectionState::Connected => {
                return Err(MonitorError::InvalidState(format!(
                    "cannot connect while {}",
                    self.state
                )));
            }
        }
        self.state = ConnectionState::Connecting;
        Ok(())
    }

    pub fn handle(&mut self, event: StreamEvent) -> Transition {
        match (self.state, event) {
            (ConnectionState::Connecting, StreamEvent::Opened) => {
                self.state = ConnectionState::Connected;
                self.attempts = 0;
                Transition::Connected
            }
            (ConnectionState::Connected, StreamEvent::Message(payload)) => {
                match PatientReading::from_json(&payload) {
                    Ok(reading) => Transition::Reading(reading),
                    Err(e) => Transition::Discarded(e.to_string()),
                }
            }
            (
                ConnectionState::Connected | ConnectionState::Connecting,
                StreamEvent::Closed | StreamEvent::Error(_),
            ) => self.schedule_reconnect(),
            _ => Transition::Ignored,
        }
    }

    /// Caller-initiated teardown
    pub fn disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.attempts = 0;
    }

    fn schedule_reconnect(&mut self) -> Transition {
        if self.attempts >= self.policy.max_attempts {
            self.state = ConnectionState::Failed;
            return Transition::Exhausted {
                attempts: self.attempts,
            };
        }
        self.attempts += 1;
        self.state = ConnectionState::Reconnecting;
        Transition::Reconnect {
            attempt: self.attempts,
            delay: self.policy.delay_for(self.attempts),
        }
    }
}

/// Snapshot of the connection for status displays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub connected: bool,
    pub attempts: u32,
    pub max_attempts: u32,
}

/// Everything the stream task needs, shared with the manager
#[derive(Clone)]
struct StreamContext {
    url: String,
    connector: Arc<dyn StreamConnector>,
    machine: Arc<RwLock<ConnectionMachine>>,
    store: StoreHandle,
    events: broadcast::Sender<MonitorEvent>,
}

struct StreamTask {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Owns the push stream and its reconnect timer
pub struct ConnectionManager {
    ctx: StreamContext,
    task: Mutex<Option<StreamTask>>,
}

impl ConnectionManager {
    pub fn new(
        url: impl Into<String>,
        policy: ReconnectPolicy,
        connector: Arc<dyn StreamConnector>,
        store: StoreHandle,
        events: broadcast::Sender<MonitorEvent>,
    ) -> Self {
        Self {
            ctx: StreamContext {
                url: url.into(),
                connector,
                machine: Arc::new(RwLock::new(ConnectionMachine::new(policy))),
                store,
                events,
            },
            task: Mutex::new(None),
        }
    }

    /// Start the stream task
    ///
    /// A no-op while a live task is connecting, connected or waiting to
    /// reconnect. From `Failed` or `Disconnected` any leftover task is reaped
    /// and a fresh one is started.
    pub async fn connect(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        let state = self.ctx.machine.read().await.state();
        let alive = task.as_ref().is_some_and(|t| !t.handle.is_finished());
        if alive && is_active(state) {
            debug!("Stream task already {} for {}", state, self.ctx.url);
            return Ok(());
        }

        if let Some(old) = task.take() {
            old.cancel.cancel();
            if let Err(e) = old.handle.await {
                warn!("Previous stream task ended abnormally: {}", e);
            }
        }

        {
            let mut machine = self.ctx.machine.write().await;
            if is_active(machine.state()) {
                debug!("Resetting stale {} state", machine.state());
                machine.disconnect();
            }
            machine.connect()?;
        }
        info!("Connecting to {}", self.ctx.url);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(drive(self.ctx.clone(), cancel.clone()));
        *task = Some(StreamTask { handle, cancel });
        Ok(())
    }

    /// Close the stream and cancel any pending reconnect
    pub async fn disconnect(&self) {
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                warn!("Stream task ended abnormally: {}", e);
            }
        }
        self.ctx.machine.write().await.disconnect();
        info!("Disconnected from {}", self.ctx.url);
    }

    pub async fn is_connected(&self) -> bool {
        self.ctx.machine.read().await.is_connected()
    }

    pub async fn state(&self) -> ConnectionState {
        self.ctx.machine.read().await.state()
    }

    pub async fn status(&self) -> ConnectionStatus {
        let machine = self.ctx.machine.read().await;
        ConnectionStatus {
            state: machine.state(),
            connected: machine.is_connected(),
            attempts: machine.attempts(),
            max_attempts: machine.policy().max_attempts,
        }
    }
}

fn is_active(state: ConnectionState) -> bool {
    matches!(
        state,
        ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting
    )
}

async fn drive(ctx: StreamContext, cancel: CancellationToken) {
    loop {
        match run_once(&ctx, &cancel).await {
            Transition::Reconnect { attempt, delay } => {
                let max_attempts = ctx.machine.read().await.policy().max_attempts;
                info!(
                    "Reconnecting to {} in {:?} (attempt {}/{})",
                    ctx.url, delay, attempt, max_attempts
                );
                ctx.emit(MonitorEvent::ReconnectScheduled {
                    attempt,
                    max_attempts,
                    delay,
                });

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        debug!("Pending reconnect to {} cancelled", ctx.url);
                        return;
                    }
                }

                if let Err(e) = ctx.machine.write().await.connect() {
                    warn!("Reconnect aborted: {}", e);
                    return;
                }
            }
            Transition::Exhausted { attempts } => {
                warn!(
                    "Giving up on {} after {} reconnection attempts",
                    ctx.url, attempts
                );
                ctx.emit(MonitorEvent::ReconnectExhausted { attempts });
                return;
            }
            _ => return,
        }
    }
}

/// Open one stream and pump it until it ends
///
/// Returns the transition the loss of the stream produced, or `Ignored`
/// when cancelled.
async fn run_once(ctx: &StreamContext, cancel: &CancellationToken) -> Transition {
    let opened = tokio::select! {
        opened = ctx.connector.connect(&ctx.url) => opened,
        _ = cancel.cancelled() => return Transition::Ignored,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            debug!("Connection attempt failed: {}", e);
            return ctx.lost(StreamEvent::Error(e.to_string())).await;
        }
    };

    if ctx.machine.write().await.handle(StreamEvent::Opened) != Transition::Connected {
        let _ = stream.close().await;
        return Transition::Ignored;
    }
    info!("Connected to {}", ctx.url);
    ctx.emit(MonitorEvent::Connected);

    loop {
        let received = tokio::select! {
            received = stream.next_message() => Some(received),
            _ = cancel.cancelled() => None,
        };
        let event = match received {
            None => {
                if let Err(e) = stream.close().await {
                    debug!("Error closing stream: {}", e);
                }
                return Transition::Ignored;
            }
            Some(Ok(Some(payload))) => StreamEvent::Message(payload),
            Some(Ok(None)) => StreamEvent::Closed,
            Some(Err(e)) => StreamEvent::Error(e.to_string()),
        };

        if !matches!(event, StreamEvent::Message(_)) {
            return ctx.lost(event).await;
        }

        let transition = ctx.machine.write().await.handle(event);
        match transition {
            Transition::Reading(reading) => {
                let patient_id = reading.patient_id.clone();
                match ctx.store.write().await.apply_update(reading) {
                    UpdateOutcome::Inserted(index) => {
                        debug!("New patient {} at position {}", patient_id, index)
                    }
                    UpdateOutcome::Replaced(index) => {
                        debug!("Updated patient {} at position {}", patient_id, index)
                    }
                }
            }
            Transition::Discarded(reason) => {
                warn!("Discarding malformed stream message: {}", reason);
            }
            _ => return Transition::Ignored,
        }
    }
}

impl StreamContext {
    async fn lost(&self, event: StreamEvent) -> Transition {
        let reason = match &event {
            StreamEvent::Error(e) => e.clone(),
            _ => "connection closed".to_string(),
        };
        let transition = self.machine.write().await.handle(event);
        if matches!(
            transition,
            Transition::Reconnect { .. } | Transition::Exhausted { .. }
        ) {
            info!("Lost connection to {}: {}", self.url, reason);
            self.emit(MonitorEvent::Disconnected { reason });
        }
        transition
    }

    fn emit(&self, event: MonitorEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EVENT_CHANNEL_CAPACITY;
    use crate::io::{MockMessageStream, MockStreamConnector};
    use crate::reading::ReadingStatus;
    use crate::synchronizer::new_store_handle;

    const P1_ALERT: &str = r#"{"timestamp": "2025-06-01T10:00:05", "paciente_id": "P1",
        "paciente_nome": "Ana", "paciente_cpf": "1", "freq_cardiaca": 140,
        "saturacao_o2": 90, "pressao_sistolica": 150, "pressao_diastolica": 95,
        "temperatura": 38.4, "freq_respiratoria": 24, "status": "ALERTA"}"#;

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(1000),
            max_attempts,
        }
    }

    fn connected_machine() -> ConnectionMachine {
        let mut machine = ConnectionMachine::new(policy(5));
        machine.connect().unwrap();
        assert_eq!(machine.handle(StreamEvent::Opened), Transition::Connected);
        machine
    }

    #[test]
    fn policy_from_config_defaults() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.base_delay, Duration::from_millis(1000));
        assert_eq!(policy.max_attempts, 5);
    }

    #[test]
    fn backoff_is_linear() {
        let policy = policy(5);
        let delays: Vec<u128> = (1..=5).map(|n| policy.delay_for(n).as_millis()).collect();
        assert_eq!(delays, vec![1000, 2000, 3000, 4000, 5000]);
    }

    #[test]
    fn initial_state_is_disconnected() {
        let machine = ConnectionMachine::new(policy(5));
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert_eq!(machine.attempts(), 0);
        assert!(!machine.is_connected());
    }

    #[test]
    fn open_connects_and_resets_attempts() {
        let mut machine = connected_machine();
        machine.handle(StreamEvent::Closed);
        assert_eq!(machine.attempts(), 1);

        machine.connect().unwrap();
        assert_eq!(machine.handle(StreamEvent::Opened), Transition::Connected);
        assert_eq!(machine.state(), ConnectionState::Connected);
        assert_eq!(machine.attempts(), 0);
    }

    #[test]
    fn connect_while_connected_is_rejected() {
        let mut machine = connected_machine();
        assert!(matches!(
            machine.connect(),
            Err(MonitorError::InvalidState(_))
        ));
        assert!(machine.is_connected());
    }

    #[test]
    fn message_while_connected_decodes_reading() {
        let mut machine = connected_machine();
        match machine.handle(StreamEvent::Message(P1_ALERT.to_string())) {
            Transition::Reading(reading) => {
                assert_eq!(reading.patient_id, "P1");
                assert_eq!(reading.status, ReadingStatus::Alert);
            }
            other => panic!("expected reading, got {other:?}"),
        }
    }

    #[test]
    fn malformed_message_is_discarded_without_state_change() {
        let mut machine = connected_machine();
        let transition = machine.handle(StreamEvent::Message("{not json".to_string()));
        assert!(matches!(transition, Transition::Discarded(_)));
        assert!(machine.is_connected());
        assert_eq!(machine.attempts(), 0);
    }

    #[test]
    fn message_outside_connected_is_ignored() {
        let mut machine = ConnectionMachine::new(policy(5));
        assert_eq!(
            machine.handle(StreamEvent::Message(P1_ALERT.to_string())),
            Transition::Ignored
        );
    }

    #[test]
    fn five_failures_then_exhausted_once() {
        let mut machine = connected_machine();

        let mut schedule = Vec::new();
        let mut transition = machine.handle(StreamEvent::Closed);
        while let Transition::Reconnect { attempt, delay } = transition {
            schedule.push((attempt, delay.as_millis()));
            machine.connect().unwrap();
            transition = machine.handle(StreamEvent::Error("refused".to_string()));
        }

        assert_eq!(
            schedule,
            vec![(1, 1000), (2, 2000), (3, 3000), (4, 4000), (5, 5000)]
        );
        assert_eq!(transition, Transition::Exhausted { attempts: 5 });
        assert_eq!(machine.state(), ConnectionState::Failed);

        // Further loss reports are not repeated
        assert_eq!(machine.handle(StreamEvent::Closed), Transition::Ignored);
        assert_eq!(
            machine.handle(StreamEvent::Error("again".to_string())),
            Transition::Ignored
        );
    }

    #[test]
    fn error_followed_by_close_counts_once() {
        let mut machine = connected_machine();
        assert!(matches!(
            machine.handle(StreamEvent::Error("reset".to_string())),
            Transition::Reconnect { attempt: 1, .. }
        ));
        assert_eq!(machine.handle(StreamEvent::Closed), Transition::Ignored);
        assert_eq!(machine.attempts(), 1);
    }

    #[test]
    fn zero_max_attempts_fails_immediately() {
        let mut machine = ConnectionMachine::new(policy(0));
        machine.connect().unwrap();
        machine.handle(StreamEvent::Opened);
        assert_eq!(
            machine.handle(StreamEvent::Closed),
            Transition::Exhausted { attempts: 0 }
        );
    }

    #[test]
    fn connect_from_failed_starts_fresh_budget() {
        let mut machine = ConnectionMachine::new(policy(1));
        machine.connect().unwrap();
        machine.handle(StreamEvent::Error("refused".to_string()));
        machine.connect().unwrap();
        machine.handle(StreamEvent::Error("refused".to_string()));
        assert_eq!(machine.state(), ConnectionState::Failed);

        machine.connect().unwrap();
        assert_eq!(machine.state(), ConnectionState::Connecting);
        assert_eq!(machine.attempts(), 0);
    }

    #[test]
    fn disconnect_resets_everything() {
        let mut machine = connected_machine();
        machine.handle(StreamEvent::Closed);
        machine.disconnect();
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert_eq!(machine.attempts(), 0);
        assert_eq!(machine.handle(StreamEvent::Closed), Transition::Ignored);
    }

    #[test]
    fn state_serializes_snake_case() {
        let status = ConnectionStatus {
            state: ConnectionState::Reconnecting,
            connected: false,
            attempts: 2,
            max_attempts: 5,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "reconnecting");
        assert_eq!(json["attempts"], 2);
    }

    fn build_manager(
        connector: MockStreamConnector,
        max_attempts: u32,
    ) -> (ConnectionManager, StoreHandle, broadcast::Receiver<MonitorEvent>) {
        let store = new_store_handle();
        let (events, rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let manager = ConnectionManager::new(
            "ws://localhost:8080/ws",
            policy(max_attempts),
            Arc::new(connector),
            Arc::clone(&store),
            events,
        );
        (manager, store, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn manager_applies_streamed_reading() {
        let mut connector = MockStreamConnector::new();
        connector.expect_connect().times(1).returning(|_| {
            Box::pin(async {
                let mut stream = MockMessageStream::new();
                let mut sent = false;
                stream.expect_next_message().returning(move || {
                    let first = !sent;
                    sent = true;
                    Box::pin(async move {
                        if first {
                            Ok(Some(P1_ALERT.to_string()))
                        } else {
                            std::future::pending().await
                        }
                    })
                });
                stream
                    .expect_close()
                    .returning(|| Box::pin(async { Ok(()) }));
                Ok(Box::new(stream) as Box<dyn crate::io::MessageStream>)
            })
        });

        let (manager, store, mut rx) = build_manager(connector, 5);
        manager.connect().await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), MonitorEvent::Connected);
        while store.read().await.is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(manager.is_connected().await);
        assert_eq!(store.read().await.get("P1").unwrap().heart_rate, 140);

        manager.disconnect().await;
        assert_eq!(manager.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn manager_gives_up_after_refused_attempts() {
        let mut connector = MockStreamConnector::new();
        connector.expect_connect().times(3).returning(|_| {
            Box::pin(async { Err(MonitorError::Connection("refused".to_string())) })
        });

        let (manager, _store, mut rx) = build_manager(connector, 2);
        manager.connect().await.unwrap();

        let mut scheduled = Vec::new();
        loop {
            match rx.recv().await.unwrap() {
                MonitorEvent::ReconnectScheduled { attempt, delay, .. } => {
                    scheduled.push((attempt, delay))
                }
                MonitorEvent::ReconnectExhausted { attempts } => {
                    assert_eq!(attempts, 2);
                    break;
                }
                MonitorEvent::Disconnected { .. } => {}
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(
            scheduled,
            vec![
                (1, Duration::from_millis(1000)),
                (2, Duration::from_millis(2000))
            ]
        );

        // Let the task finish before inspecting state
        while manager.state().await != ConnectionState::Failed {
            tokio::task::yield_now().await;
        }
        let status = manager.status().await;
        assert!(!status.connected);
        assert_eq!(status.max_attempts, 2);
    }

    #[tokio::test]
    async fn second_connect_while_running_is_noop() {
        let mut connector = MockStreamConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(|_| Box::pin(std::future::pending()));

        let (manager, _store, _rx) = build_manager(connector, 5);
        manager.connect().await.unwrap();
        manager.connect().await.unwrap();
        assert_eq!(manager.state().await, ConnectionState::Connecting);

        manager.disconnect().await;
        assert_eq!(manager.state().await, ConnectionState::Disconnected);
    }
}
