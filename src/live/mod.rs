//! # Realtime Channel
//!
//! The connection to the hosted voice model: the JSON message types and the
//! WebSocket transport that carries them.

pub mod protocol;
pub mod transport;

pub use protocol::{LiveConnectConfig, OutboundFrame, ServerMessage};
pub use transport::{LiveChannel, LiveConnector, Outbound, TransportEvent, WsConnector};
