//! Forwarder configuration and the constants of the ADB host protocol.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Address of the ADB server on the device side of the connection.
pub const BRIDGE_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5037);

/// Host the bridge is asked to connect to on the far side.
pub const REMOTE_ADDRESS: &str = "127.0.0.1";

/// Ports the layout-test HTTP servers listen on.
pub const DEFAULT_PORTS: &[u16] = &[
    8000, // http
    8080, // http (alternate)
    8443, // https
];

/// Socket buffer size applied to listening and bridge sockets.
pub const SOCKET_BUFFER_SIZE: u32 = 4096;

/// Maximum bytes moved per read in each relay direction.
pub const RELAY_CHUNK_SIZE: usize = 4096;

/// Pending-connection backlog for each listener.
pub const LISTEN_BACKLOG: u32 = 50;

/// Settings shared by every forwarder started from one manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardConfig {
    /// Local address the listeners bind to.
    pub bind_addr: IpAddr,
    /// Where the ADB server accepts host-protocol requests.
    pub bridge_addr: SocketAddr,
    /// Address the bridge forwards each port to.
    pub remote_address: String,
    /// `SO_RCVBUF`/`SO_SNDBUF` for listening and bridge sockets; `None`
    /// leaves the kernel defaults.
    pub socket_buffer_size: Option<u32>,
    pub chunk_size: usize,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            bridge_addr: BRIDGE_ADDR,
            remote_address: REMOTE_ADDRESS.to_string(),
            socket_buffer_size: Some(SOCKET_BUFFER_SIZE),
            chunk_size: RELAY_CHUNK_SIZE,
        }
    }
}

impl ForwardConfig {
    /// Configuration bound to loopback only, talking to the bridge at `bridge_addr`.
    pub fn loopback(bridge_addr: SocketAddr) -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            bridge_addr,
            ..Self::default()
        }
    }
}
