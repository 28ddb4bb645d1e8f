//! Transport seam between the connection manager and the network.
//!
//! A [`Connector`] opens one transport per connection attempt and reports its
//! lifecycle through a [`SignalSink`]. Every signal carries the generation of
//! the attempt that produced it so the manager can drop reports from
//! transports it has already torn down.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::retry::with_timeout;
use crate::stream::client::ConnectionError;

/// Close code reported when the connection dropped without a close frame.
pub const ABNORMAL_CLOSE_CODE: u16 = 1006;
const GRACEFUL_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Close details forwarded to `close` listeners.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CloseInfo {
    pub code: Option<u16>,
    pub reason: String,
}

impl CloseInfo {
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: Some(ABNORMAL_CLOSE_CODE),
            reason: reason.into(),
        }
    }
}

impl From<CloseFrame<'_>> for CloseInfo {
    fn from(frame: CloseFrame<'_>) -> Self {
        Self {
            code: Some(u16::from(frame.code)),
            reason: frame.reason.to_string(),
        }
    }
}

/// Lifecycle report consumed by the connection manager.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportSignal {
    Opened { generation: u64 },
    Frame { generation: u64, text: String },
    Closed { generation: u64, info: CloseInfo },
    Errored { generation: u64, message: String },
    /// The retry timer scheduled for `generation` fired.
    RetryElapsed { generation: u64 },
}

impl TransportSignal {
    pub fn generation(&self) -> u64 {
        match self {
            Self::Opened { generation }
            | Self::Frame { generation, .. }
            | Self::Closed { generation, .. }
            | Self::Errored { generation, .. }
            | Self::RetryElapsed { generation } => *generation,
        }
    }
}

/// Generation-tagged reporter handed to a transport.
#[derive(Clone, Debug)]
pub struct SignalSink {
    generation: u64,
    tx: mpsc::UnboundedSender<TransportSignal>,
}

impl SignalSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<TransportSignal>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn opened(&self) {
        self.emit(TransportSignal::Opened {
            generation: self.generation,
        });
    }

    pub fn frame(&self, text: impl Into<String>) {
        self.emit(TransportSignal::Frame {
            generation: self.generation,
            text: text.into(),
        });
    }

    pub fn closed(&self, info: CloseInfo) {
        self.emit(TransportSignal::Closed {
            generation: self.generation,
            info,
        });
    }

    pub fn errored(&self, message: impl Into<String>) {
        self.emit(TransportSignal::Errored {
            generation: self.generation,
            message: message.into(),
        });
    }

    fn emit(&self, signal: TransportSignal) {
        // The manager may already be gone; late reports are meaningless then.
        let _ = self.tx.send(signal);
    }
}

/// A live connection attempt.
pub trait Transport: Send {
    /// Hands a text frame to the transport. Returns `false` when it can no
    /// longer send.
    fn send_text(&mut self, text: String) -> bool;

    /// Starts closing the transport. Signals reported afterwards are ignored.
    fn close(&mut self);
}

/// Opens transports for the connection manager.
pub trait Connector: Send {
    /// Starts a connection attempt to `url`.
    ///
    /// Construction failures are returned directly; everything that happens
    /// afterwards is reported through `sink`.
    fn open(
        &mut self,
        url: &str,
        sink: SignalSink,
        runtime: &Handle,
    ) -> Result<Box<dyn Transport>, ConnectionError>;
}

/// Websocket connector backed by tokio-tungstenite.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(
        &mut self,
        url: &str,
        sink: SignalSink,
        runtime: &Handle,
    ) -> Result<Box<dyn Transport>, ConnectionError> {
        let request = url
            .into_client_request()
            .map_err(|err| ConnectionError::Initialization(err.to_string()))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        runtime.spawn(run_socket(request, outbound_rx, sink));

        Ok(Box::new(WsTransport {
            outbound: Some(outbound_tx),
        }))
    }
}

struct WsTransport {
    outbound: Option<mpsc::UnboundedSender<String>>,
}

impl Transport for WsTransport {
    fn send_text(&mut self, text: String) -> bool {
        self.outbound
            .as_ref()
            .is_some_and(|tx| tx.send(text).is_ok())
    }

    fn close(&mut self) {
        // Dropping the sender is the shutdown request for the socket task.
        self.outbound = None;
    }
}

async fn run_socket(
    request: Request,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    sink: SignalSink,
) {
    // Nothing is sent before the manager sees `Opened`, so during the
    // handshake the channel only matters for the cancel signal.
    let mut socket = tokio::select! {
        result = connect_async(request) => match result {
            Ok((socket, _)) => socket,
            Err(err) => {
                sink.errored(err.to_string());
                sink.closed(CloseInfo::abnormal(err.to_string()));
                return;
            }
        },
        None = outbound_rx.recv() => {
            debug!(event = "ws_connect_cancelled", generation = sink.generation());
            return;
        }
    };

    sink.opened();

    loop {
        tokio::select! {
            maybe_outbound = outbound_rx.recv() => {
                match maybe_outbound {
                    Some(text) => {
                        if let Err(err) = socket.send(Message::Text(text)).await {
                            sink.errored(err.to_string());
                            sink.closed(CloseInfo::abnormal(err.to_string()));
                            return;
                        }
                    }
                    None => {
                        let _ = with_timeout(GRACEFUL_CLOSE_TIMEOUT, socket.close(None)).await;
                        return;
                    }
                }
            }
            maybe_inbound = socket.next() => {
                match maybe_inbound {
                    Some(Ok(Message::Text(text))) => sink.frame(text),
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            sink.closed(CloseInfo::abnormal("failed to answer ping"));
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        sink.closed(frame.map(CloseInfo::from).unwrap_or_default());
                        return;
                    }
                    Some(Ok(_)) => {
                        debug!(event = "ws_non_text_frame_ignored", generation = sink.generation());
                    }
                    Some(Err(err)) => {
                        sink.errored(err.to_string());
                        sink.closed(CloseInfo::abnormal(err.to_string()));
                        return;
                    }
                    None => {
                        sink.closed(CloseInfo::abnormal("stream ended"));
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio::runtime::Handle;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    use super::{CloseInfo, Connector, SignalSink, Transport, TransportSignal, WsConnector};
    use crate::stream::client::ConnectionError;

    #[test]
    fn sink_tags_signals_with_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = SignalSink::new(4, tx);
        sink.opened();
        sink.frame("hello");
        sink.closed(CloseInfo::abnormal("gone"));

        let signals: Vec<TransportSignal> =
            std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(signals.len(), 3);
        assert!(signals.iter().all(|signal| signal.generation() == 4));
        assert_eq!(
            signals[1],
            TransportSignal::Frame {
                generation: 4,
                text: "hello".to_string(),
            }
        );
    }

    #[test]
    fn ws_connector_rejects_malformed_urls_at_construction() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = WsConnector.open("not a url", SignalSink::new(1, tx), runtime.handle());
        match result {
            Err(ConnectionError::Initialization(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("malformed url should not open"),
        }
    }

    #[test]
    fn close_frame_code_and_reason_are_kept() {
        let info = CloseInfo::from(CloseFrame {
            code: CloseCode::from(4000),
            reason: "bye".into(),
        });
        assert_eq!(
            info,
            CloseInfo {
                code: Some(4000),
                reason: "bye".to_string(),
            }
        );
    }

    #[test]
    fn closing_during_handshake_ends_socket_task_without_signals() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        runtime.block_on(async {
            // Accepted by the kernel backlog but never answered, so the
            // handshake stays pending.
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
            let addr = listener.local_addr().expect("listener address");
            let (tx, mut rx) = mpsc::unbounded_channel();

            let mut transport = WsConnector
                .open(
                    &format!("ws://{addr}/ws/logs"),
                    SignalSink::new(1, tx),
                    &Handle::current(),
                )
                .expect("open transport");
            tokio::task::yield_now().await;

            transport.close();
            assert!(!transport.send_text("late".to_string()));

            // The sink is dropped with the task, which closes the channel.
            let next = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("socket task should finish after close");
            assert_eq!(next, None);
            drop(listener);
        });
    }
}
