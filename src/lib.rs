//! Resilient realtime log stream client.
//!
//! The crate is organized by transport surface:
//! - `stream`: websocket log stream client with bounded history, bounded
//!   reconnects and per-kind event listeners.
//! - `news_api`: HTTP client for the latest-record read endpoint.
//! - `retry`: shared retry and timeout utilities.

/// Latest-record HTTP client.
pub mod news_api;
/// Retry and timeout helpers used across the SDK.
pub mod retry;
/// Realtime log stream client and its building blocks.
pub mod stream;

pub use stream::client::{
    ConnectionError, LogStreamClient, LogStreamClientBuilder, StreamClientError, StreamConfig,
};
pub use stream::events::{EventKind, StreamEvent, Subscription};
pub use stream::manager::ConnectionState;
pub use stream::proto::{Entry, LogRecord, OutboundPayload};
pub use stream::reconnect::ReconnectPolicy;
