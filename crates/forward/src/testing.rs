//! In-process stand-in for the ADB server used by the unit tests.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// How the fake bridge answers a forward request.
#[derive(Debug, Clone, Copy)]
pub(crate) enum BridgeReply {
    /// `OKAY`, then echo everything back.
    Okay,
    /// `FAIL` followed by a framed reason, then close.
    Fail(&'static str),
    /// Exactly these bytes, then close.
    Status(&'static [u8]),
    /// These bytes one at a time, then echo.
    Trickle(&'static [u8]),
    /// Read the request and never answer.
    Silent,
}

pub(crate) struct FakeBridge {
    pub addr: SocketAddr,
    commands: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl FakeBridge {
    pub async fn start(reply: BridgeReply) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let recorded = commands.clone();

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = recorded.clone();
                tokio::spawn(serve(stream, reply, recorded));
            }
        });

        Self {
            addr,
            commands,
            task,
        }
    }

    /// Commands received so far, in arrival order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl Drop for FakeBridge {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(mut stream: TcpStream, reply: BridgeReply, recorded: Arc<Mutex<Vec<String>>>) {
    let Some(command) = read_request(&mut stream).await else {
        return;
    };
    recorded.lock().unwrap().push(command);

    match reply {
        BridgeReply::Okay => {
            let _ = stream.write_all(b"OKAY").await;
            echo(stream).await;
        }
        BridgeReply::Fail(reason) => {
            let _ = stream
                .write_all(format!("FAIL{:04x}{reason}", reason.len()).as_bytes())
                .await;
        }
        BridgeReply::Status(bytes) => {
            let _ = stream.write_all(bytes).await;
        }
        BridgeReply::Trickle(bytes) => {
            let _ = stream.set_nodelay(true);
            for byte in bytes {
                let _ = stream.write_all(std::slice::from_ref(byte)).await;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            echo(stream).await;
        }
        BridgeReply::Silent => {
            let mut sink = [0_u8; 64];
            while matches!(stream.read(&mut sink).await, Ok(n) if n > 0) {}
        }
    }
}

async fn read_request(stream: &mut TcpStream) -> Option<String> {
    let mut len_buf = [0_u8; 4];
    stream.read_exact(&mut len_buf).await.ok()?;
    let len = usize::from_str_radix(std::str::from_utf8(&len_buf).ok()?, 16).ok()?;
    let mut command = vec![0_u8; len];
    stream.read_exact(&mut command).await.ok()?;
    String::from_utf8(command).ok()
}

async fn echo(mut stream: TcpStream) {
    let (mut reader, mut writer) = stream.split();
    let _ = tokio::io::copy(&mut reader, &mut writer).await;
}

/// A connected loopback socket pair: `(client, server)`.
pub(crate) async fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (client.unwrap(), accepted.unwrap().0)
}
