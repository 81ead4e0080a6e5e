//! Client side of the ADB host protocol, just enough of it to request a
//! port forward.
//!
//! A request is `<4 uppercase hex digits: command length><command>`; the
//! server answers with a 4-byte status, `OKAY` or `FAIL`. A `FAIL` is
//! followed by a reason framed the same way as the request.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tracing::{debug, trace};

use crate::config::ForwardConfig;
use crate::error::{ForwardError, Result};

/// Status returned when the bridge accepted the request.
pub const STATUS_OKAY: &[u8; STATUS_LEN] = b"OKAY";

/// Status returned when the bridge refused the request.
pub const STATUS_FAIL: &[u8; STATUS_LEN] = b"FAIL";

/// Every bridge status is exactly this many bytes.
pub const STATUS_LEN: usize = 4;

/// Largest command a 4-hex-digit length prefix can describe.
const MAX_COMMAND_LEN: usize = 0xFFFF;

/// How long to wait for the reason that follows a `FAIL` status.
const FAILURE_REASON_TIMEOUT: Duration = Duration::from_millis(250);

/// The service name asking the bridge to connect to `remote_address:port`.
pub fn forward_command(port: u16, remote_address: &str) -> String {
    format!("tcp:{port}:{remote_address}")
}

/// Frame `command` with its length as four uppercase hex digits.
pub fn encode_request(command: &str) -> Result<Vec<u8>> {
    if command.len() > MAX_COMMAND_LEN {
        return Err(ForwardError::CommandTooLong(command.len()));
    }

    let mut request = format!("{:04X}", command.len()).into_bytes();
    request.extend_from_slice(command.as_bytes());
    Ok(request)
}

/// Opens bridge connections that carry one forwarded session each.
#[derive(Debug, Clone)]
pub struct BridgeDialer {
    bridge_addr: SocketAddr,
    remote_address: String,
    socket_buffer_size: Option<u32>,
}

impl BridgeDialer {
    pub fn new(config: &ForwardConfig) -> Self {
        Self {
            bridge_addr: config.bridge_addr,
            remote_address: config.remote_address.clone(),
            socket_buffer_size: config.socket_buffer_size,
        }
    }

    pub fn bridge_addr(&self) -> SocketAddr {
        self.bridge_addr
    }

    /// Connect to the bridge and ask it to forward `port`.
    ///
    /// On success the returned stream is the far end of the session and
    /// carries raw bytes from then on. On any failure the bridge socket has
    /// already been closed.
    pub async fn dial(&self, port: u16) -> Result<TcpStream> {
        let command = forward_command(port, &self.remote_address);
        let request = encode_request(&command)?;

        let mut stream = self.connect().await?;
        trace!(port, %command, "sending bridge request");
        stream.write_all(&request).await?;
        stream.flush().await?;

        // The status is read until all four bytes arrive; a short read on a
        // slow link is not a refusal.
        let mut status = [0_u8; STATUS_LEN];
        match stream.read_exact(&mut status).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(ForwardError::BridgeHangup { port });
            }
            Err(e) => return Err(ForwardError::Io(e)),
        }

        if &status == STATUS_OKAY {
            debug!(port, bridge = %self.bridge_addr, "bridge accepted forward");
            return Ok(stream);
        }

        let reason = if &status == STATUS_FAIL {
            read_failure_reason(&mut stream).await
        } else {
            None
        };
        drop(stream);

        Err(ForwardError::BridgeRejected {
            port,
            status: String::from_utf8_lossy(&status).into_owned(),
            reason,
        })
    }

    async fn connect(&self) -> Result<TcpStream> {
        let addr = self.bridge_addr;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|source| ForwardError::BridgeConnect { addr, source })?;

        if let Some(size) = self.socket_buffer_size {
            socket.set_recv_buffer_size(size)?;
            socket.set_send_buffer_size(size)?;
        }

        socket
            .connect(addr)
            .await
            .map_err(|source| ForwardError::BridgeConnect { addr, source })
    }
}

/// Best-effort read of the `<len><reason>` trailer of a `FAIL` status.
async fn read_failure_reason(stream: &mut TcpStream) -> Option<String> {
    let read = async {
        let mut len_buf = [0_u8; 4];
        stream.read_exact(&mut len_buf).await.ok()?;
        let len = usize::from_str_radix(std::str::from_utf8(&len_buf).ok()?, 16).ok()?;

        let mut reason = vec![0_u8; len];
        stream.read_exact(&mut reason).await.ok()?;
        Some(String::from_utf8_lossy(&reason).into_owned())
    };

    tokio::time::timeout(FAILURE_REASON_TIMEOUT, read)
        .await
        .ok()
        .flatten()
}
