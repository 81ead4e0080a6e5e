use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::bridge::BridgeDialer;
use crate::config::{ForwardConfig, LISTEN_BACKLOG};
use crate::error::{ForwardError, Result};
use crate::pair::{ActivePairs, ConnectionPair};

/// Control handle for a running forwarder.
///
/// Dropping the handle requests shutdown.
#[derive(Debug)]
pub struct ForwarderHandle {
    port: u16,
    local_addr: SocketAddr,
    pairs: Arc<ActivePairs>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ForwarderHandle {
    /// The forwarded port, which is also the port named to the bridge.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sessions currently being relayed.
    pub fn active_pairs(&self) -> usize {
        self.pairs.len()
    }

    /// Sessions that have ended on their own since the forwarder started.
    pub fn completed_sessions(&self) -> u64 {
        self.pairs.completed()
    }

    /// Whether the accept loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Close the listener; the accept loop then closes every open session.
    ///
    /// Returns immediately and may be called repeatedly.
    pub fn request_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Request shutdown and wait for the accept loop to finish tearing down.
    pub async fn shutdown(mut self) {
        self.request_shutdown();
        if let Err(e) = (&mut self.task).await {
            warn!(port = self.port, %e, "forwarder task did not exit cleanly");
        }
    }
}

impl Drop for ForwarderHandle {
    fn drop(&mut self) {
        self.request_shutdown();
    }
}

/// Forwards one local TCP port through the bridge.
pub struct PortForwarder;

impl PortForwarder {
    /// Bind `port` and start accepting.
    ///
    /// A bind failure is returned to the caller and nothing is started.
    /// Binding port 0 forwards whichever port the kernel picks.
    pub async fn start(port: u16, config: &ForwardConfig) -> Result<ForwarderHandle> {
        let listener = bind_listener(port, config)?;
        let local_addr = listener.local_addr()?;
        let port = local_addr.port();

        let pairs = Arc::new(ActivePairs::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dialer = Arc::new(BridgeDialer::new(config));

        let task = tokio::spawn(accept_loop(
            listener,
            port,
            dialer.clone(),
            pairs.clone(),
            config.chunk_size,
            shutdown_rx,
        ));

        info!(
            "Forwarding {} -> bridge {} -> {}:{}",
            local_addr,
            dialer.bridge_addr(),
            config.remote_address,
            port
        );

        Ok(ForwarderHandle {
            port,
            local_addr,
            pairs,
            shutdown_tx,
            task,
        })
    }
}

fn bind_listener(port: u16, config: &ForwardConfig) -> Result<TcpListener> {
    let addr = SocketAddr::new(config.bind_addr, port);
    let bind_error = |e: std::io::Error| {
        if e.kind() == std::io::ErrorKind::AddrInUse {
            ForwardError::PortInUse(port)
        } else {
            ForwardError::PortForward {
                port,
                message: format!("Failed to bind: {}", e),
            }
        }
    };

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_error)?;

    socket.set_reuseaddr(true).map_err(bind_error)?;
    if let Some(size) = config.socket_buffer_size {
        socket.set_recv_buffer_size(size).map_err(bind_error)?;
    }
    socket.bind(addr).map_err(bind_error)?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_error)
}

#[instrument(name = "forwarder", skip_all, fields(port = port))]
async fn accept_loop(
    listener: TcpListener,
    port: u16,
    dialer: Arc<BridgeDialer>,
    pairs: Arc<ActivePairs>,
    chunk_size: usize,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    // Handed to dial tasks; `shutdown_rx` stays borrowed by the select below.
    let dial_rx = shutdown_rx.clone();

    loop {
        tokio::select! {
            _ = shutdown_rx.wait_for(|stop| *stop) => {
                debug!("Shutdown requested, closing listener");
                break;
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        debug!(%peer, "accepted local connection");
                        tokio::spawn(establish(
                            stream,
                            peer,
                            port,
                            dialer.clone(),
                            pairs.clone(),
                            chunk_size,
                            dial_rx.clone(),
                        ));
                    }
                    Err(e) => {
                        error!(%e, "accept failed, closing listener");
                        break;
                    }
                }
            }
        }
    }
    drop(listener);

    let remaining = pairs.drain();
    let force_closed = remaining.len();
    for pair in remaining {
        pair.stop_forwarding();
    }

    info!(
        force_closed,
        completed = pairs.completed(),
        "Stopped forwarding port {}",
        port
    );
}

/// Dial the bridge for one accepted connection and start relaying.
async fn establish(
    stream: TcpStream,
    peer: SocketAddr,
    port: u16,
    dialer: Arc<BridgeDialer>,
    pairs: Arc<ActivePairs>,
    chunk_size: usize,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let bridge = tokio::select! {
        result = dialer.dial(port) => result,
        _ = shutdown_rx.wait_for(|stop| *stop) => {
            debug!(port, %peer, "shutdown during bridge handshake, dropping connection");
            return;
        }
    };

    match bridge {
        Ok(bridge) => {
            ConnectionPair::start(stream, bridge, &pairs, chunk_size);
        }
        Err(e) => {
            warn!(port, %peer, "{}; closing local connection", e);
            drop(stream);
        }
    }
}
