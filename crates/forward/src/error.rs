use std::net::SocketAddr;

use thiserror::Error;

/// Errors that can occur while forwarding a port through the bridge.
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("Port forwarding failed for port {port}: {message}")]
    PortForward { port: u16, message: String },

    #[error("Local port {0} is already in use")]
    PortInUse(u16),

    #[error("Bridge at {addr} is unreachable: {source}")]
    BridgeConnect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Bridge refused to forward port {port} (status {status:?}){}", reason_suffix(.reason))]
    BridgeRejected {
        port: u16,
        status: String,
        reason: Option<String>,
    },

    #[error("Bridge closed the connection before acknowledging port {port}")]
    BridgeHangup { port: u16 },

    #[error("Bridge command is {0} bytes, longer than the 4-digit length prefix allows")]
    CommandTooLong(usize),

    #[error("No port could be forwarded")]
    NoForwarders,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn reason_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(reason) => format!(": {reason}"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, ForwardError>;
