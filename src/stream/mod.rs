//! Realtime log stream modules.
//!
//! - `client`: public facade, configuration and error types.
//! - `manager`: connection state machine and reconnect scheduling.
//! - `transport`: transport seam and the websocket connector.
//! - `reconnect`: pure reconnect policy with pluggable backoff.
//! - `buffer`: bounded history of received entries.
//! - `events`: per-client listener registry.
//! - `proto`: received entries and outbound payload framing.

/// Bounded received-entry history.
pub mod buffer;
/// Log stream client facade.
pub mod client;
/// Listener registry and event payloads.
pub mod events;
/// Connection state machine.
pub mod manager;
/// Entry decoding and outbound framing.
pub mod proto;
/// Reconnect policy.
pub mod reconnect;
/// Transport abstraction and websocket connector.
pub mod transport;
