//! Public log stream client.
//!
//! `LogStreamClient` composes the connection manager, the event bus and a
//! background signal pump. All transport callbacks and retry timers funnel
//! through one task, so state changes are applied one at a time; listeners
//! run after the manager lock is released and may call back into the client.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::stream::buffer::{MessageBuffer, DEFAULT_BUFFER_CAPACITY};
use crate::stream::events::{EventBus, EventKind, StreamEvent, Subscription};
use crate::stream::manager::{ConnectionManager, ConnectionState};
use crate::stream::proto::{Entry, OutboundPayload};
use crate::stream::reconnect::{
    ReconnectPolicy, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY,
};
use crate::stream::transport::{Connector, TransportSignal, WsConnector};

/// Default log stream endpoint of the log backend.
pub const DEFAULT_LOG_STREAM_ENDPOINT: &str = "ws://localhost:5002/ws/logs";

/// Client configuration.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    /// Websocket endpoint, e.g. `ws://host:port/path`.
    pub url: String,
    /// Retries allowed after a connection loss before giving up.
    pub max_reconnect_attempts: u32,
    /// Wait before each retry, in milliseconds.
    pub reconnect_delay_ms: u64,
    /// Whether connection loss triggers automatic retries.
    pub auto_reconnect: bool,
    /// Number of entries kept in memory.
    pub buffer_capacity: usize,
}

impl StreamConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end().to_string(),
            ..Self::default()
        }
    }

    /// Parses a JSON config document; missing fields take their defaults.
    pub fn from_json_str(text: &str) -> Result<Self, StreamClientError> {
        let mut config: Self = serde_json::from_str(text)?;
        config.url = config.url.trim_end().to_string();
        Ok(config)
    }

    pub fn with_reconnect_attempts(mut self, max_reconnect_attempts: u32) -> Self {
        self.max_reconnect_attempts = max_reconnect_attempts;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = duration_millis(delay);
        self
    }

    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    pub fn with_buffer_capacity(mut self, buffer_capacity: usize) -> Self {
        self.buffer_capacity = buffer_capacity;
        self
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Fixed-delay policy described by this config.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::fixed(
            self.max_reconnect_attempts,
            self.reconnect_delay(),
            self.auto_reconnect,
        )
    }

    pub fn validate(&self) -> Result<(), StreamClientError> {
        if self.url.trim().is_empty() {
            return Err(StreamClientError::InvalidConfig(
                "url must not be empty".to_string(),
            ));
        }
        if self.buffer_capacity == 0 {
            return Err(StreamClientError::InvalidConfig(
                "buffer_capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_LOG_STREAM_ENDPOINT.to_string(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay_ms: duration_millis(DEFAULT_RECONNECT_DELAY),
            auto_reconnect: true,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

/// Connection failures surfaced as the client's last error and to `error`
/// listeners.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConnectionError {
    /// Transport-level failure reported by the socket.
    #[error("websocket error: {0}")]
    Transport(String),

    /// The retry budget ran out.
    #[error("maximum reconnect attempts exceeded ({attempts})")]
    ReconnectExhausted { attempts: u32 },

    /// The transport could not be constructed.
    #[error("failed to initialize websocket: {0}")]
    Initialization(String),
}

/// Errors produced while building a client.
#[derive(Debug, Error)]
pub enum StreamClientError {
    /// Config value rejected by validation.
    #[error("invalid stream config: {0}")]
    InvalidConfig(String),

    /// The client was built outside of a tokio runtime.
    #[error("stream client must be created inside a tokio runtime")]
    NoRuntime,

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Builder for [`LogStreamClient`].
pub struct LogStreamClientBuilder {
    config: StreamConfig,
    policy: Option<ReconnectPolicy>,
    connector: Box<dyn Connector>,
}

impl LogStreamClientBuilder {
    /// Overrides the policy derived from the config, e.g. to plug in a
    /// different backoff.
    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Replaces the websocket connector.
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Box::new(connector);
        self
    }

    /// Builds an idle client. Must be called inside a tokio runtime with the
    /// time driver enabled.
    pub fn build(self) -> Result<LogStreamClient, StreamClientError> {
        self.config.validate()?;
        let runtime = Handle::try_current().map_err(|_| StreamClientError::NoRuntime)?;

        let policy = self
            .policy
            .unwrap_or_else(|| self.config.reconnect_policy());
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(
            self.config.url.clone(),
            self.connector,
            policy,
            MessageBuffer::with_capacity(self.config.buffer_capacity),
            runtime.clone(),
            signals_tx,
        );
        let manager = Arc::new(Mutex::new(manager));
        let events = EventBus::new();

        let pump = runtime.spawn(pump_signals(
            Arc::downgrade(&manager),
            events.clone(),
            signals_rx,
        ));

        Ok(LogStreamClient {
            manager,
            events,
            pump,
        })
    }

    /// Builds the client and calls [`LogStreamClient::connect`].
    pub fn open(self) -> Result<LogStreamClient, StreamClientError> {
        let client = self.build()?;
        client.connect();
        Ok(client)
    }
}

/// Realtime log stream client with bounded history and automatic reconnects.
pub struct LogStreamClient {
    manager: Arc<Mutex<ConnectionManager>>,
    events: EventBus,
    pump: JoinHandle<()>,
}

impl LogStreamClient {
    pub fn builder(config: StreamConfig) -> LogStreamClientBuilder {
        LogStreamClientBuilder {
            config,
            policy: None,
            connector: Box::new(WsConnector),
        }
    }

    /// Builds an idle client using the websocket connector.
    pub fn new(config: StreamConfig) -> Result<Self, StreamClientError> {
        Self::builder(config).build()
    }

    /// Builds a client and starts connecting right away.
    pub fn open(config: StreamConfig) -> Result<Self, StreamClientError> {
        Self::builder(config).open()
    }

    /// (Re)connects, tearing down any existing transport and pending retry
    /// first. Failures are reported through [`LogStreamClient::last_error`]
    /// and `error` listeners.
    pub fn connect(&self) {
        let events = self.lock().connect();
        self.dispatch(&events);
    }

    /// Closes the transport and cancels any pending retry. No automatic
    /// reconnection happens until the next [`LogStreamClient::connect`].
    pub fn disconnect(&self) {
        self.lock().disconnect();
    }

    /// Sends a payload when connected. Text is sent as-is, JSON values are
    /// encoded. Returns whether the frame was handed to the transport;
    /// nothing is queued while disconnected.
    pub fn send_message(&self, payload: impl Into<OutboundPayload>) -> bool {
        let text = match payload.into().into_text() {
            Ok(text) => text,
            Err(err) => {
                warn!(event = "stream_send_encode_failed", error = %err);
                return false;
            }
        };
        self.lock().send_text(text)
    }

    /// Registers a listener for `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(kind, callback)
    }

    /// Empties the received history.
    pub fn clear_messages(&self) {
        self.lock().clear_entries();
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Snapshot of the received history in arrival order.
    pub fn messages(&self) -> Vec<Entry> {
        self.lock().entries().to_vec()
    }

    pub fn last_error(&self) -> Option<ConnectionError> {
        self.lock().last_error().cloned()
    }

    /// Retries scheduled since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.lock().attempts()
    }

    pub fn url(&self) -> String {
        self.lock().url().to_string()
    }

    fn dispatch(&self, events: &[StreamEvent]) {
        for event in events {
            self.events.dispatch(event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionManager> {
        lock_manager(&self.manager)
    }
}

impl Drop for LogStreamClient {
    fn drop(&mut self) {
        self.pump.abort();
        self.lock().disconnect();
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn lock_manager(manager: &Mutex<ConnectionManager>) -> MutexGuard<'_, ConnectionManager> {
    manager.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn pump_signals(
    manager: Weak<Mutex<ConnectionManager>>,
    events: EventBus,
    mut signals: mpsc::UnboundedReceiver<TransportSignal>,
) {
    while let Some(signal) = signals.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        let dispatched = lock_manager(&manager).handle_signal(signal);
        drop(manager);

        for event in &dispatched {
            events.dispatch(event);
        }
    }
}
