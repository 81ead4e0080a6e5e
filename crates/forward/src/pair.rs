//! Relaying one forwarded session between the accepted socket and the
//! bridge socket.
//!
//! Each pair runs two copy tasks, one per direction. Whichever ends first
//! stops the pair, which closes both sockets together: a test timeout that
//! makes the server drop a keep-alive connection must not leave the client
//! side open, or the client's next request would be sent into a dead pair.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, trace};

pub type PairId = u64;

/// Direction of one copy task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local client to bridge.
    Upstream,
    /// Bridge to local client.
    Downstream,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Upstream => write!(f, "upstream"),
            Self::Downstream => write!(f, "downstream"),
        }
    }
}

/// An accepted socket and its bridge socket, relayed as one session.
#[derive(Debug)]
pub struct ConnectionPair {
    id: PairId,
    peer: SocketAddr,
    active: AtomicBool,
    stop_tx: watch::Sender<bool>,
    owner: Weak<ActivePairs>,
}

impl ConnectionPair {
    /// Register a pair with `owner` and start relaying.
    ///
    /// Returns `None`, with both sockets closed, when the owner is already
    /// shutting down.
    pub(crate) fn start(
        local: TcpStream,
        bridge: TcpStream,
        owner: &Arc<ActivePairs>,
        chunk_size: usize,
    ) -> Option<Arc<Self>> {
        let peer = local
            .peer_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
        let (stop_tx, _) = watch::channel(false);

        let pair = Arc::new(Self {
            id: owner.next_id(),
            peer,
            active: AtomicBool::new(true),
            stop_tx,
            owner: Arc::downgrade(owner),
        });

        if !owner.insert(pair.clone()) {
            debug!(pair = pair.id, %peer, "forwarder shutting down, dropping new session");
            pair.stop_forwarding();
            return None;
        }

        let (local_read, local_write) = local.into_split();
        let (bridge_read, bridge_write) = bridge.into_split();

        tokio::spawn(pair.clone().forward_until_end(
            local_read,
            bridge_write,
            Direction::Upstream,
            chunk_size,
        ));
        tokio::spawn(pair.clone().forward_until_end(
            bridge_read,
            local_write,
            Direction::Downstream,
            chunk_size,
        ));

        debug!(pair = pair.id, %peer, "session started");
        Some(pair)
    }

    pub fn id(&self) -> PairId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Close both sockets of the pair.
    ///
    /// Safe to call any number of times from any task; only the first call
    /// does anything, and only that call returns `true`.
    pub fn stop_forwarding(&self) -> bool {
        if self
            .active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        // Both copy tasks watch this flag and drop their socket halves as
        // soon as it flips, whatever they were blocked on.
        self.stop_tx.send_replace(true);
        trace!(pair = self.id, "stop requested");
        true
    }

    /// Copy `input` to `output` until either side ends or the pair stops.
    async fn forward_until_end(
        self: Arc<Self>,
        mut input: OwnedReadHalf,
        mut output: OwnedWriteHalf,
        direction: Direction,
        chunk_size: usize,
    ) {
        let mut stop_rx = self.stop_tx.subscribe();
        let mut buffer = vec![0_u8; chunk_size.max(1)];
        let mut copied: u64 = 0;

        let copy = async {
            loop {
                let n = match input.read(&mut buffer).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        trace!(pair = self.id, %direction, %e, "read ended");
                        break;
                    }
                };
                if output.write_all(&buffer[..n]).await.is_err() || output.flush().await.is_err()
                {
                    break;
                }
                copied += n as u64;
            }
        };

        tokio::select! {
            _ = copy => {}
            _ = stop_rx.wait_for(|stopped| *stopped) => {}
        }

        drop(input);
        drop(output);
        debug!(
            pair = self.id,
            peer = %self.peer(),
            %direction,
            bytes = copied,
            "relay direction finished"
        );

        self.finish();
    }

    /// Stop the pair and, if this call did the stopping, tell the owner.
    fn finish(&self) {
        if self.stop_forwarding() {
            if let Some(owner) = self.owner.upgrade() {
                owner.forwarding_stopped(self.id);
            }
        }
    }
}

/// The set of sessions a forwarder has open.
#[derive(Debug, Default)]
pub(crate) struct ActivePairs {
    next_id: AtomicU64,
    completed: AtomicU64,
    state: Mutex<PairSet>,
}

#[derive(Debug, Default)]
struct PairSet {
    pairs: HashMap<PairId, Arc<ConnectionPair>>,
    closed: bool,
}

impl ActivePairs {
    fn lock(&self) -> MutexGuard<'_, PairSet> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_id(&self) -> PairId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Track `pair`; refused once the set has been drained for shutdown.
    fn insert(&self, pair: Arc<ConnectionPair>) -> bool {
        let mut set = self.lock();
        if set.closed {
            return false;
        }
        set.pairs.insert(pair.id, pair);
        true
    }

    /// Called by a pair that ended on its own.
    fn forwarding_stopped(&self, id: PairId) {
        if self.lock().pairs.remove(&id).is_some() {
            self.completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take every open pair and refuse new ones.
    pub(crate) fn drain(&self) -> Vec<Arc<ConnectionPair>> {
        let mut set = self.lock();
        set.closed = true;
        std::mem::take(&mut set.pairs).into_values().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().pairs.len()
    }

    /// Sessions that ended on their own rather than by shutdown.
    pub(crate) fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}
