//! Connection state machine.
//!
//! `ConnectionManager` exclusively owns the live transport, the pending retry
//! timer and the received history. It is driven by [`TransportSignal`]s and
//! by the facade's `connect`/`disconnect`/`send` calls. Operations return
//! the events to fan out instead of dispatching them, so callers can release
//! their lock first.

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::stream::buffer::MessageBuffer;
use crate::stream::client::ConnectionError;
use crate::stream::events::StreamEvent;
use crate::stream::proto::Entry;
use crate::stream::reconnect::{ReconnectDecision, ReconnectPolicy};
use crate::stream::transport::{CloseInfo, Connector, SignalSink, Transport, TransportSignal};

/// Observable connection status.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }

    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

pub struct ConnectionManager {
    url: String,
    connector: Box<dyn Connector>,
    policy: ReconnectPolicy,
    runtime: Handle,
    signals: mpsc::UnboundedSender<TransportSignal>,
    state: ConnectionState,
    attempts: u32,
    generation: u64,
    opened: bool,
    transport: Option<Box<dyn Transport>>,
    retry_timer: Option<JoinHandle<()>>,
    buffer: MessageBuffer,
    last_error: Option<ConnectionError>,
}

impl ConnectionManager {
    pub fn new(
        url: impl Into<String>,
        connector: Box<dyn Connector>,
        policy: ReconnectPolicy,
        buffer: MessageBuffer,
        runtime: Handle,
        signals: mpsc::UnboundedSender<TransportSignal>,
    ) -> Self {
        Self {
            url: url.into(),
            connector,
            policy,
            runtime,
            signals,
            state: ConnectionState::Disconnected,
            attempts: 0,
            generation: 0,
            opened: false,
            transport: None,
            retry_timer: None,
            buffer,
            last_error: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Retries scheduled since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Generation of the current connection attempt.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn last_error(&self) -> Option<&ConnectionError> {
        self.last_error.as_ref()
    }

    pub fn entries(&self) -> &[Entry] {
        self.buffer.as_slice()
    }

    pub fn clear_entries(&mut self) {
        self.buffer.clear();
    }

    pub fn retry_pending(&self) -> bool {
        self.retry_timer.is_some()
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// Tears down any existing transport and timer, then opens a new
    /// transport. Resets the retry budget.
    pub fn connect(&mut self) -> Vec<StreamEvent> {
        info!(event = "stream_connect_requested", url = %self.url);
        self.attempts = 0;
        self.open_transport()
    }

    /// Closes the transport, cancels any pending retry and stays idle until
    /// the next `connect`.
    pub fn disconnect(&mut self) {
        info!(event = "stream_disconnect_requested", url = %self.url);
        self.teardown();
        self.state = ConnectionState::Disconnected;
    }

    /// Transmits `text` when connected. Never queues.
    pub fn send_text(&mut self, text: String) -> bool {
        if !self.state.is_connected() {
            return false;
        }
        self.transport
            .as_mut()
            .is_some_and(|transport| transport.send_text(text))
    }

    pub fn handle_signal(&mut self, signal: TransportSignal) -> Vec<StreamEvent> {
        if signal.generation() != self.generation {
            debug!(
                event = "stream_stale_signal_ignored",
                generation = signal.generation(),
                current = self.generation
            );
            return Vec::new();
        }

        match signal {
            TransportSignal::Opened { .. } => self.on_opened(),
            TransportSignal::Frame { text, .. } => self.on_frame(&text),
            TransportSignal::Errored { message, .. } => self.on_errored(message),
            TransportSignal::Closed { info, .. } => self.on_closed(info),
            TransportSignal::RetryElapsed { .. } => self.on_retry_elapsed(),
        }
    }

    fn on_opened(&mut self) -> Vec<StreamEvent> {
        if self.state != ConnectionState::Connecting {
            return Vec::new();
        }
        info!(event = "stream_connected", url = %self.url);
        self.opened = true;
        self.state = ConnectionState::Connected;
        self.attempts = 0;
        self.last_error = None;
        vec![StreamEvent::Open]
    }

    fn on_frame(&mut self, text: &str) -> Vec<StreamEvent> {
        if self.state != ConnectionState::Connected {
            return Vec::new();
        }
        let entry = Entry::decode(text);
        if self.buffer.push(entry.clone()) {
            debug!(
                event = "stream_history_reset",
                capacity = self.buffer.capacity()
            );
        }
        vec![StreamEvent::Message(entry)]
    }

    fn on_errored(&mut self, message: String) -> Vec<StreamEvent> {
        if !self.transport_live() {
            return Vec::new();
        }
        warn!(event = "stream_transport_error", url = %self.url, error = %message);
        let error = ConnectionError::Transport(message);
        self.last_error = Some(error.clone());
        vec![StreamEvent::Error(error)]
    }

    fn on_closed(&mut self, info: CloseInfo) -> Vec<StreamEvent> {
        if !self.transport_live() {
            return Vec::new();
        }
        self.transport = None;
        let was_opened = std::mem::take(&mut self.opened);
        info!(
            event = "stream_closed",
            url = %self.url,
            code = info.code,
            reason = %info.reason
        );

        let mut events = Vec::new();
        match self.policy.decide(self.attempts) {
            ReconnectDecision::Retry { attempt, delay } => {
                self.attempts = attempt;
                self.state = ConnectionState::Reconnecting;
                info!(
                    event = "stream_retry_scheduled",
                    attempt,
                    max_attempts = self.policy.max_attempts,
                    delay_ms = delay.as_millis() as u64
                );
                self.schedule_retry(delay);
                events.push(StreamEvent::Close(info));
            }
            ReconnectDecision::Exhausted => {
                self.state = ConnectionState::Failed;
                warn!(
                    event = "stream_reconnect_exhausted",
                    attempts = self.attempts,
                    url = %self.url
                );
                let error = ConnectionError::ReconnectExhausted {
                    attempts: self.attempts,
                };
                self.last_error = Some(error.clone());
                events.push(StreamEvent::Close(info));
                events.push(StreamEvent::Error(error));
            }
            ReconnectDecision::Disabled => {
                self.state = if was_opened {
                    ConnectionState::Disconnected
                } else {
                    ConnectionState::Failed
                };
                events.push(StreamEvent::Close(info));
            }
        }
        events
    }

    fn on_retry_elapsed(&mut self) -> Vec<StreamEvent> {
        if self.state != ConnectionState::Reconnecting {
            return Vec::new();
        }
        self.retry_timer = None;
        debug!(event = "stream_retry_started", attempt = self.attempts);
        self.open_transport()
    }

    fn transport_live(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        )
    }

    fn open_transport(&mut self) -> Vec<StreamEvent> {
        self.teardown();
        self.state = ConnectionState::Connecting;

        let sink = SignalSink::new(self.generation, self.signals.clone());
        match self.connector.open(&self.url, sink, &self.runtime) {
            Ok(transport) => {
                self.transport = Some(transport);
                Vec::new()
            }
            Err(error) => {
                warn!(event = "stream_init_failed", url = %self.url, error = %error);
                self.state = ConnectionState::Failed;
                self.last_error = Some(error.clone());
                vec![StreamEvent::Error(error)]
            }
        }
    }

    fn schedule_retry(&mut self, delay: std::time::Duration) {
        let signals = self.signals.clone();
        let generation = self.generation;
        let timer = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = signals.send(TransportSignal::RetryElapsed { generation });
        });
        self.retry_timer = Some(timer);
    }

    /// Detaches and closes the transport and cancels the retry timer. Bumping
    /// the generation makes any report still in flight from them stale.
    fn teardown(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.opened = false;
        self.generation += 1;
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}
