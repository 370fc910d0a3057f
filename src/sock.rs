//! # One-Way Socket Façade
//!
//! Push/pull socket pair used to talk to the broker, implemented on top of
//! Tokio's TCP and Unix-domain primitives.
//!
//! ## Semantics
//!
//! - [`PullSocket`] *binds* an endpoint URL and receives framed messages
//!   from any number of peers that connect to it. Frames from all peers are
//!   funneled, in arrival order, into a single channel drained by
//!   [`PullSocket::recv`]. An optional receive timeout (the keepalive
//!   budget) is reported distinctly from transport errors.
//! - [`PushSocket`] *connects* to an endpoint URL and sends framed messages
//!   with a fixed 2000 ms budget per send. If the peer went away since the
//!   last send, one transparent re-dial is attempted before the error is
//!   surfaced, matching the lazy re-connect behavior of one-way pipe
//!   transports.
//!
//! ## Wire Framing
//!
//! Every message is a 4-byte little-endian length prefix followed by the
//! message bytes. Frames larger than 16 MB are rejected as corrupt.
//!
//! ## Endpoint URLs
//!
//! `tcp://host:port` for TCP, `ipc:///path` for Unix domain sockets. A TCP
//! port of `0` binds an ephemeral port; the bound URL is available from
//! [`PullSocket::url`].

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::defaults;

/// Frames larger than this are treated as stream corruption.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Depth of the channel between connection readers and [`PullSocket::recv`].
const FRAME_CHANNEL_DEPTH: usize = 64;

/// Socket façade failure, by operation.
#[derive(Debug, Error)]
pub enum SockError {
    /// The endpoint URL has an unknown scheme or an empty address.
    #[error("invalid endpoint url: {0}")]
    Url(String),

    /// Binding the pull endpoint failed.
    #[error("could not bind pull endpoint")]
    Bind(#[source] io::Error),

    /// Connecting the push endpoint failed.
    #[error("could not connect push endpoint")]
    Connect(#[source] io::Error),

    /// Setting a socket option failed.
    #[error("could not set socket option")]
    Setopt(#[source] io::Error),

    /// A framed write failed.
    #[error("socket send failed")]
    Send(#[source] io::Error),

    /// A framed write exceeded the fixed send budget.
    #[error("socket send timed out")]
    SendTimedOut,

    /// The pull endpoint is gone; no more frames will arrive.
    #[error("pull endpoint closed")]
    Closed,
}

impl SockError {
    /// Raw OS error number, `0` when no OS error applies.
    pub fn os_err(&self) -> i32 {
        match self {
            SockError::Bind(e)
            | SockError::Connect(e)
            | SockError::Setopt(e)
            | SockError::Send(e) => e.raw_os_error().unwrap_or(0),
            _ => 0,
        }
    }
}

/// Parsed endpoint address.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Endpoint {
    Tcp(String),
    Ipc(PathBuf),
}

impl Endpoint {
    fn parse(url: &str) -> Result<Self, SockError> {
        if let Some(addr) = url.strip_prefix("tcp://") {
            if addr.is_empty() {
                return Err(SockError::Url(url.to_string()));
            }
            return Ok(Endpoint::Tcp(addr.to_string()));
        }
        if let Some(path) = url.strip_prefix("ipc://") {
            if path.is_empty() {
                return Err(SockError::Url(url.to_string()));
            }
            return Ok(Endpoint::Ipc(PathBuf::from(path)));
        }
        Err(SockError::Url(url.to_string()))
    }
}

/// Read one length-prefixed frame.
async fn read_frame<S>(stream: &mut S) -> io::Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {} bytes", len),
        ));
    }
    let mut frame = vec![0u8; len];
    stream.read_exact(&mut frame).await?;
    Ok(frame)
}

/// Write one length-prefixed frame.
async fn write_frame<S>(stream: &mut S, frame: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    let len = frame.len() as u32;
    stream.write_all(&len.to_le_bytes()).await?;
    stream.write_all(frame).await?;
    stream.flush().await
}

/// Forward frames from one accepted connection into the shared channel.
async fn read_frames<S>(mut stream: S, frames: mpsc::Sender<Vec<u8>>)
where
    S: AsyncRead + Unpin,
{
    loop {
        match read_frame(&mut stream).await {
            Ok(frame) => {
                if frames.send(frame).await.is_err() {
                    // receiver side is gone, nothing left to deliver to
                    break;
                }
            }
            Err(e) => {
                if e.kind() != io::ErrorKind::UnexpectedEof {
                    debug!("inbound connection dropped: {}", e);
                }
                break;
            }
        }
    }
}

async fn accept_loop_tcp(listener: TcpListener, frames: mpsc::Sender<Vec<u8>>) {
    let mut readers = JoinSet::new();
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("accepted inbound connection from {}", peer);
                let _ = stream.set_nodelay(true);
                readers.spawn(read_frames(stream, frames.clone()));
            }
            Err(e) => {
                error!("inbound accept failed: {}", e);
                break;
            }
        }
    }
}

async fn accept_loop_ipc(listener: UnixListener, frames: mpsc::Sender<Vec<u8>>) {
    let mut readers = JoinSet::new();
    loop {
        match listener.accept().await {
            Ok((stream, _peer)) => {
                debug!("accepted inbound ipc connection");
                readers.spawn(read_frames(stream, frames.clone()));
            }
            Err(e) => {
                error!("inbound ipc accept failed: {}", e);
                break;
            }
        }
    }
}

/// Outcome of a timed pull receive.
#[derive(Debug)]
pub enum SockRecv {
    /// One complete frame.
    Frame(Vec<u8>),
    /// The receive timeout elapsed with no frame.
    TimedOut,
}

/// Bound pull endpoint delivering frames from any connected peer.
pub struct PullSocket {
    url: String,
    frames: mpsc::Receiver<Vec<u8>>,
    recv_timeout: Option<Duration>,
    accept_task: JoinHandle<()>,
}

impl PullSocket {
    /// Bind `url` and start accepting peers.
    ///
    /// `keepalive_timeout_secs`, when positive, becomes the receive timeout
    /// applied by [`recv`](Self::recv).
    pub async fn bind(url: &str, keepalive_timeout_secs: u32) -> Result<Self, SockError> {
        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);
        let (bound_url, accept_task) = match Endpoint::parse(url)? {
            Endpoint::Tcp(addr) => {
                let listener = TcpListener::bind(&addr).await.map_err(SockError::Bind)?;
                let local = listener.local_addr().map_err(SockError::Bind)?;
                (
                    format!("tcp://{}", local),
                    tokio::spawn(accept_loop_tcp(listener, tx)),
                )
            }
            Endpoint::Ipc(path) => {
                // a stale socket file from an earlier bind blocks rebinding
                let _ = std::fs::remove_file(&path);
                let listener = UnixListener::bind(&path).map_err(SockError::Bind)?;
                (url.to_string(), tokio::spawn(accept_loop_ipc(listener, tx)))
            }
        };
        debug!("pull socket bound at {}", bound_url);
        Ok(Self {
            url: bound_url,
            frames: rx,
            recv_timeout: if keepalive_timeout_secs > 0 {
                Some(Duration::from_secs(u64::from(keepalive_timeout_secs)))
            } else {
                None
            },
            accept_task,
        })
    }

    /// The bound endpoint URL. For TCP this reflects the actual port, which
    /// matters when the socket was bound with port `0`.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Receive the next frame, a timeout, or the closed error.
    pub async fn recv(&mut self) -> Result<SockRecv, SockError> {
        match self.recv_timeout {
            Some(budget) => match timeout(budget, self.frames.recv()).await {
                Err(_) => Ok(SockRecv::TimedOut),
                Ok(Some(frame)) => Ok(SockRecv::Frame(frame)),
                Ok(None) => Err(SockError::Closed),
            },
            None => match self.frames.recv().await {
                Some(frame) => Ok(SockRecv::Frame(frame)),
                None => Err(SockError::Closed),
            },
        }
    }

    /// Tear the endpoint down and wait until the listener is released, so
    /// the same address can be bound again immediately afterwards.
    pub async fn shutdown(mut self) {
        self.accept_task.abort();
        let _ = (&mut self.accept_task).await;
    }
}

impl Drop for PullSocket {
    fn drop(&mut self) {
        // dropping the accept task also drops its JoinSet, aborting the
        // per-connection readers
        self.accept_task.abort();
    }
}

enum PushStream {
    Tcp(TcpStream),
    Ipc(UnixStream),
}

impl PushStream {
    fn as_write(&mut self) -> &mut (dyn AsyncWrite + Unpin + Send) {
        match self {
            PushStream::Tcp(s) => s,
            PushStream::Ipc(s) => s,
        }
    }
}

fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::WriteZero
    )
}

/// Connected push endpoint with a fixed per-send timeout.
pub struct PushSocket {
    url: String,
    endpoint: Endpoint,
    stream: PushStream,
}

impl PushSocket {
    /// Dial `url`.
    pub async fn connect(url: &str) -> Result<Self, SockError> {
        let endpoint = Endpoint::parse(url)?;
        let stream = Self::dial(&endpoint).await?;
        debug!("push socket connected to {}", url);
        Ok(Self {
            url: url.to_string(),
            endpoint,
            stream,
        })
    }

    async fn dial(endpoint: &Endpoint) -> Result<PushStream, SockError> {
        match endpoint {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await.map_err(SockError::Connect)?;
                stream.set_nodelay(true).map_err(SockError::Setopt)?;
                Ok(PushStream::Tcp(stream))
            }
            Endpoint::Ipc(path) => UnixStream::connect(path)
                .await
                .map(PushStream::Ipc)
                .map_err(SockError::Connect),
        }
    }

    /// Send one frame within the fixed send budget.
    ///
    /// If the write fails at the connection level, the peer is re-dialed
    /// once and the frame re-sent. This keeps sends working across a broker
    /// restart or an inbound endpoint rebind without the caller tracking
    /// connection state.
    pub async fn send(&mut self, frame: &[u8]) -> Result<(), SockError> {
        match self.try_send(frame).await {
            Err(SockError::Send(ref e)) if is_connection_error(e) => {
                warn!("push endpoint {} went away, redialing", self.url);
                self.stream = Self::dial(&self.endpoint).await?;
                self.try_send(frame).await
            }
            other => other,
        }
    }

    async fn try_send(&mut self, frame: &[u8]) -> Result<(), SockError> {
        let budget = Duration::from_millis(defaults::SOCK_SEND_TIMEOUT_MS);
        match timeout(budget, write_frame(self.stream.as_write(), frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SockError::Send(e)),
            Err(_) => Err(SockError::SendTimedOut),
        }
    }
}
