//! Shared helpers for the integration tests: a mock broker that plays the
//! parodus side of the bus, plus port and logging utilities.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;

use parodus_client::{PushSocket, WrpMessage};

/// Install a subscriber for test runs driven by `RUST_LOG`.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Reserve a free TCP port by binding and immediately dropping a listener.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}

pub fn url_for(port: u16) -> String {
    format!("tcp://127.0.0.1:{}", port)
}

/// The broker side of the bus: accepts push connections from the client,
/// decodes every frame it receives, and counts distinct connections.
pub struct MockBroker {
    port: u16,
    url: String,
    frames: mpsc::Receiver<WrpMessage>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockBroker {
    /// Bind the broker endpoint. A `port` of 0 picks an ephemeral port.
    pub async fn start(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel(64);
        let connections = Arc::new(AtomicUsize::new(0));
        let accepted = connections.clone();
        let task = tokio::spawn(async move {
            let mut readers = JoinSet::new();
            loop {
                match listener.accept().await {
                    Ok((stream, _peer)) => {
                        accepted.fetch_add(1, Ordering::SeqCst);
                        readers.spawn(read_messages(stream, tx.clone()));
                    }
                    Err(_) => break,
                }
            }
        });
        Ok(Self {
            port: addr.port(),
            url: format!("tcp://{}", addr),
            frames: rx,
            connections,
            task,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Number of connections accepted so far.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Wait for the next decoded message from the client.
    pub async fn expect_message(&mut self, budget: Duration) -> Result<WrpMessage> {
        timeout(budget, self.frames.recv())
            .await
            .map_err(|_| anyhow!("no message from client within {:?}", budget))?
            .ok_or_else(|| anyhow!("broker frame channel closed"))
    }

    /// Assert that nothing arrives for the whole budget.
    pub async fn expect_silence(&mut self, budget: Duration) -> Result<()> {
        match timeout(budget, self.frames.recv()).await {
            Err(_) => Ok(()),
            Ok(Some(msg)) => Err(anyhow!("unexpected {} message", msg.kind())),
            Ok(None) => Err(anyhow!("broker frame channel closed")),
        }
    }

    /// Stop listening and drop every accepted connection.
    pub fn stop(self) {
        self.task.abort();
    }
}

async fn read_messages(mut stream: TcpStream, tx: mpsc::Sender<WrpMessage>) {
    loop {
        let mut len_bytes = [0u8; 4];
        if stream.read_exact(&mut len_bytes).await.is_err() {
            break;
        }
        let len = u32::from_le_bytes(len_bytes) as usize;
        let mut frame = vec![0u8; len];
        if stream.read_exact(&mut frame).await.is_err() {
            break;
        }
        let Ok(msg) = WrpMessage::decode(&frame) else {
            break;
        };
        if tx.send(msg).await.is_err() {
            break;
        }
    }
}

/// Open a broker-side push connection to the client's inbound endpoint.
pub async fn connect_to_client(client_url: &str) -> Result<PushSocket> {
    Ok(PushSocket::connect(client_url).await?)
}

/// Push one encoded message at the client.
pub async fn push_message(sock: &mut PushSocket, msg: &WrpMessage) -> Result<()> {
    sock.send(&msg.encode()?).await?;
    Ok(())
}
