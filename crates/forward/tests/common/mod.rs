//! Common test utilities and helpers
#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Find an available TCP port for testing
pub fn find_available_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind to random port");
    listener.local_addr().unwrap().port()
}

/// Simple echo TCP server standing in for a host-side test server
pub struct EchoServer {
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl EchoServer {
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind echo server");
        let addr = listener.local_addr().unwrap();

        let task = tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (mut reader, mut writer) = socket.split();
                    let _ = tokio::io::copy(&mut reader, &mut writer).await;
                });
            }
        });

        Self { addr, task }
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Records one request per connection, sends a fixed response, then closes
/// the connection the way an HTTP/1.0 server would.
pub struct RecordingServer {
    pub addr: SocketAddr,
    pub received: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl RecordingServer {
    pub async fn start(response: Vec<u8>) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind recording server");
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();

        let task = tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let received = received_clone.clone();
                let response = response.clone();

                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    if let Ok(n) = socket.read(&mut buf).await {
                        received.lock().await.extend_from_slice(&buf[..n]);
                    }
                    let _ = socket.write_all(&response).await;
                });
            }
        });

        Self {
            addr,
            received,
            task,
        }
    }

    pub async fn get_received(&self) -> Vec<u8> {
        self.received.lock().await.clone()
    }
}

impl Drop for RecordingServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// How the fake ADB server answers forward requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdbMode {
    /// Answer `OKAY` and connect the session to the target.
    Forward,
    /// Answer `FAIL` with a reason.
    Refuse,
}

/// Minimal ADB server: answers `tcp:<port>:<host>` requests and relays the
/// session to `target` (where the real host would connect to `host:port`).
pub struct FakeAdbServer {
    pub addr: SocketAddr,
    pub requests: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl FakeAdbServer {
    pub async fn start(target: SocketAddr, mode: AdbMode) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake adb server");
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let requests_clone = requests.clone();

        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let requests = requests_clone.clone();
                tokio::spawn(serve_adb(socket, target, mode, requests));
            }
        });

        Self {
            addr,
            requests,
            task,
        }
    }

    pub async fn get_requests(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }
}

impl Drop for FakeAdbServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_adb(
    mut socket: TcpStream,
    target: SocketAddr,
    mode: AdbMode,
    requests: Arc<Mutex<Vec<String>>>,
) {
    let mut len_buf = [0u8; 4];
    if socket.read_exact(&mut len_buf).await.is_err() {
        return;
    }
    let len = match std::str::from_utf8(&len_buf)
        .ok()
        .and_then(|s| usize::from_str_radix(s, 16).ok())
    {
        Some(len) => len,
        None => return,
    };
    let mut command = vec![0u8; len];
    if socket.read_exact(&mut command).await.is_err() {
        return;
    }
    requests
        .lock()
        .await
        .push(String::from_utf8_lossy(&command).into_owned());

    match mode {
        AdbMode::Refuse => {
            let reason = "cannot bind to socket";
            let _ = socket
                .write_all(format!("FAIL{:04x}{}", reason.len(), reason).as_bytes())
                .await;
        }
        AdbMode::Forward => {
            let mut upstream = match TcpStream::connect(target).await {
                Ok(s) => s,
                Err(_) => {
                    let _ = socket.write_all(b"FAIL0000").await;
                    return;
                }
            };
            if socket.write_all(b"OKAY").await.is_err() {
                return;
            }
            let _ = tokio::io::copy_bidirectional(&mut socket, &mut upstream).await;
        }
    }
}

/// Read until EOF or error, with a timeout; returns what was read.
pub async fn read_to_close(stream: &mut TcpStream, timeout: Duration) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    tokio::time::timeout(timeout, async {
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => out.extend_from_slice(&buf[..n]),
            }
        }
    })
    .await
    .ok()?;
    Some(out)
}

/// Wait for a condition to be true, with timeout
pub async fn wait_for<F>(mut condition: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(timeout_ms);

    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    false
}
