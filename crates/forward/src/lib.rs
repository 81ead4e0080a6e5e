//! Device-side TCP port forwarding through the ADB server.
//!
//! This crate provides:
//! - The bridge handshake that asks the ADB server to forward a port
//! - Pair relaying between an accepted socket and its bridge socket
//! - `PortForwarder`, one listener plus the sessions it owns
//! - `ForwardManager` for running a forwarder per configured port

pub mod bridge;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod manager;
pub mod pair;

#[cfg(test)]
mod testing;

pub use bridge::{encode_request, forward_command, BridgeDialer};
pub use config::{ForwardConfig, DEFAULT_PORTS};
pub use error::{ForwardError, Result};
pub use forwarder::{ForwarderHandle, PortForwarder};
pub use manager::ForwardManager;
pub use pair::{ConnectionPair, Direction, PairId};
