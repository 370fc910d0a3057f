//! # Client Instance and Lifecycle API
//!
//! [`ParodusClient`] owns everything one bus participant needs: the bound
//! inbound pull socket, the connected outbound push socket, a self-wake
//! push socket pointed at its own inbound endpoint, the bounded inbound
//! queue, and the receiver task draining the inbound socket.
//!
//! ## Lifecycle
//!
//! ```text
//! init ──▶ RUNNING ──▶ shutdown ──▶ DONE
//! ```
//!
//! `init` acquires resources in a fixed order and sends the registration
//! frame; any intermediate failure unwinds the resources acquired so far.
//! `shutdown` is idempotent: it wakes the receiver task by writing the
//! end-of-stream sentinel into its own inbound socket, joins the task,
//! drains the queue, and drops the sockets.
//!
//! ## Concurrency
//!
//! The outbound socket has a single writer: every send goes through the
//! instance's send mutex, including the registration frames issued by the
//! reconnect path. `run_state` and the counters are plain atomics read
//! without locks; the receiver task checks `run_state` on every iteration.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::defaults;
use crate::error::{init_connect_error, Error, SendFault};
use crate::queue::{MessageQueue, QueueError, QueueItem};
use crate::receiver;
use crate::sock::{PullSocket, PushSocket};
use crate::wrp::WrpMessage;

/// Shutdown sentinel written by the client to its own inbound socket to
/// wake the receiver task. A frame beginning with these bytes terminates
/// the task.
pub const END_OF_STREAM: &[u8] = b"---END-PARODUS---\n";

const RUN_STATE_IDLE: u8 = 0;
const RUN_STATE_RUNNING: u8 = 1;
const RUN_STATE_DONE: u8 = 2;

/// Outcome of a timed [`ParodusClient::receive`].
#[derive(Debug)]
pub enum ReceiveOutcome {
    /// A message addressed to this service.
    Message(WrpMessage),
    /// Nothing arrived within the timeout.
    TimedOut,
    /// The close marker submitted by [`ParodusClient::close_receiver`];
    /// no further items should be expected by this consumer.
    Closed,
}

struct SendPath {
    sock: Option<PushSocket>,
}

/// State shared between the public API and the receiver task.
pub(crate) struct Shared {
    pub(crate) service_name: String,
    pub(crate) keepalive_timeout_secs: u32,
    pub(crate) parodus_url: String,
    pub(crate) client_url: String,
    pub(crate) connect_on_every_send: bool,
    pub(crate) run_state: AtomicU8,
    pub(crate) auth_received: AtomicBool,
    pub(crate) keep_alive_count: AtomicU32,
    pub(crate) reconnect_count: AtomicU32,
    pub(crate) queue: Option<MessageQueue>,
    send_path: Mutex<SendPath>,
}

impl Shared {
    pub(crate) fn is_running(&self) -> bool {
        self.run_state.load(Ordering::Relaxed) == RUN_STATE_RUNNING
    }

    /// Drop the cached outbound connection. The next send re-dials lazily.
    /// The reconnect path calls this so its re-registration always goes out
    /// on a fresh connection instead of a half-dead one.
    pub(crate) async fn reset_send_path(&self) {
        self.send_path.lock().await.sock = None;
    }

    pub(crate) async fn send_registration(&self) -> Result<(), SendFault> {
        let msg = WrpMessage::ServiceRegistration {
            service_name: self.service_name.clone(),
            url: self.client_url.clone(),
        };
        info!("sending registration for service {}", self.service_name);
        self.wrp_sock_send(&msg).await
    }

    /// The outbound send path: encode and push under the send mutex.
    pub(crate) async fn wrp_sock_send(&self, msg: &WrpMessage) -> Result<(), SendFault> {
        let mut path = self.send_path.lock().await;
        let frame = msg.encode().map_err(SendFault::Encode)?;

        let mut sock = match path.sock.take() {
            Some(sock) if !self.connect_on_every_send => sock,
            _ => PushSocket::connect(&self.parodus_url)
                .await
                .map_err(SendFault::Connect)?,
        };
        let result = sock.send(&frame).await.map_err(SendFault::Socket);
        // a failed send (timeout included) can leave a partial frame on the
        // stream, which would desync the broker's frame reader; never reuse
        // that connection
        if result.is_ok() && !self.connect_on_every_send {
            path.sock = Some(sock);
        }
        result
    }
}

/// Handle to one registered bus participant.
///
/// Dropping the handle aborts a still-running receiver task; call
/// [`shutdown`](Self::shutdown) for the orderly teardown.
pub struct ParodusClient {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    stop_rcv: Option<PushSocket>,
    shutdown_tx: watch::Sender<bool>,
}

impl ParodusClient {
    /// Initialize a client: bind the inbound endpoint, connect the outbound
    /// endpoint, start the receiver task, and register with the broker.
    ///
    /// Resources acquired before a failing step are released before the
    /// error is returned. An underlying `EINVAL` classifies as
    /// [`Error::InitCfg`], other connect failures as [`Error::InitConnect`].
    pub async fn init(cfg: Config) -> Result<Self, Error> {
        if cfg.service_name.is_empty() {
            error!("empty service name in config");
            return Err(Error::InitCfg(None));
        }
        let urls = cfg.resolve_urls();
        info!("parodus url is {}", urls.parodus_url);
        info!("client url is {}", urls.client_url);

        let rcv_sock = if cfg.receive {
            debug!("connecting receiver to {}", urls.client_url);
            Some(
                PullSocket::bind(&urls.client_url, cfg.keepalive_timeout_secs)
                    .await
                    .map_err(init_connect_error)?,
            )
        } else {
            debug!("init without receiver");
            None
        };

        let send_sock = if !urls.connect_on_every_send {
            let sock = PushSocket::connect(&urls.parodus_url)
                .await
                .map_err(init_connect_error)?;
            info!("connected sender to {}", urls.parodus_url);
            Some(sock)
        } else {
            None
        };

        // the stop socket pushes the end-of-stream sentinel into our own
        // receive socket at shutdown
        let stop_rcv = if cfg.receive {
            Some(
                PushSocket::connect(&urls.client_url)
                    .await
                    .map_err(init_connect_error)?,
            )
        } else {
            None
        };

        let queue = if cfg.receive {
            Some(MessageQueue::new(
                cfg.queue_name(),
                defaults::WRP_QUEUE_CAPACITY,
            ))
        } else {
            None
        };

        let shared = Arc::new(Shared {
            service_name: cfg.service_name.clone(),
            keepalive_timeout_secs: cfg.keepalive_timeout_secs,
            parodus_url: urls.parodus_url,
            client_url: urls.client_url,
            connect_on_every_send: urls.connect_on_every_send,
            run_state: AtomicU8::new(RUN_STATE_RUNNING),
            auth_received: AtomicBool::new(false),
            keep_alive_count: AtomicU32::new(0),
            reconnect_count: AtomicU32::new(0),
            queue,
            send_path: Mutex::new(SendPath { sock: send_sock }),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = rcv_sock
            .map(|rcv| tokio::spawn(receiver::run(rcv, shared.clone(), shutdown_rx)));

        let mut client = Self {
            shared,
            worker,
            stop_rcv,
            shutdown_tx,
        };

        let need_registration = cfg.receive || cfg!(feature = "require-registration");
        if need_registration {
            if let Err(fault) = client.shared.send_registration().await {
                error!("error sending registration msg: {}", fault);
                client.teardown().await;
                return Err(Error::InitRegister(fault));
            }
            debug!("sent registration message");
        }
        Ok(client)
    }

    /// Send a message to the broker.
    pub async fn send(&self, msg: &WrpMessage) -> Result<(), Error> {
        if !self.shared.is_running() {
            error!("not running at send");
            return Err(Error::SendState);
        }
        debug!("sending {} message", msg.kind());
        self.shared
            .wrp_sock_send(msg)
            .await
            .map_err(|fault| match fault {
                SendFault::Encode(e) => Error::SendEncode(e),
                fault => Error::SendSocket(fault),
            })
    }

    /// Receive the next message addressed to this service, waiting up to
    /// `budget`.
    pub async fn receive(&self, budget: Duration) -> Result<ReceiveOutcome, Error> {
        let queue = match self.shared.queue.as_ref() {
            Some(queue) => queue,
            None => {
                error!("no receive option at receive");
                return Err(Error::ReceiveCfg);
            }
        };
        if !self.shared.is_running() {
            error!("not running at receive");
            return Err(Error::ReceiveState);
        }
        match queue.receive(budget).await {
            Ok(Some(QueueItem::Message(msg))) => {
                debug!("received {} message from queue", msg.kind());
                Ok(ReceiveOutcome::Message(msg))
            }
            Ok(Some(QueueItem::Closed)) => {
                info!("closed marker received");
                Ok(ReceiveOutcome::Closed)
            }
            Ok(None) => Ok(ReceiveOutcome::TimedOut),
            Err(e) => Err(Error::ReceiveQueue(e)),
        }
    }

    /// Ask the receive side to deliver [`ReceiveOutcome::Closed`] to the
    /// consumer. This is a consumer-side signal only: inbound messages keep
    /// being enqueued until [`shutdown`](Self::shutdown).
    pub async fn close_receiver(&self) -> Result<(), Error> {
        let queue = match self.shared.queue.as_ref() {
            Some(queue) => queue,
            None => {
                error!("no receive option at close receiver");
                return Err(Error::CloseReceiverCfg);
            }
        };
        if !self.shared.is_running() {
            error!("not running at close receiver");
            return Err(Error::CloseReceiverState);
        }
        let budget = Duration::from_millis(defaults::WRP_QUEUE_SEND_TIMEOUT_MS);
        match queue.send(QueueItem::Closed, budget).await {
            Ok(()) => {
                info!("sent closed marker");
                Ok(())
            }
            Err(QueueError::SendTimedOut) => Err(Error::CloseReceiverTimedOut),
            Err(e) => Err(Error::CloseReceiverSend(e)),
        }
    }

    /// Orderly teardown. Idempotent: a handle that is not running tears
    /// down nothing and returns success.
    pub async fn shutdown(&mut self) -> Result<(), Error> {
        if !self.shared.is_running() {
            debug!("not running at shutdown");
            return Ok(());
        }
        info!("shutting down");
        self.teardown().await;
        Ok(())
    }

    async fn teardown(&mut self) {
        self.shared
            .run_state
            .store(RUN_STATE_DONE, Ordering::Relaxed);
        let _ = self.shutdown_tx.send(true);

        if let Some(worker) = self.worker.take() {
            if let Some(stop) = self.stop_rcv.as_mut() {
                if let Err(e) = stop.send(END_OF_STREAM).await {
                    // the receiver still exits on its next keepalive timeout
                    warn!("could not deliver end-of-stream sentinel: {}", e);
                }
            }
            if let Err(e) = worker.await {
                error!("error joining receiver task: {}", e);
            }
            if let Some(queue) = self.shared.queue.as_ref() {
                debug!("flushing inbound queue");
                queue.drain(Duration::from_millis(5)).await;
            }
        }

        self.shared.reset_send_path().await;
        self.stop_rcv = None;
        self.shared.run_state.store(RUN_STATE_IDLE, Ordering::Relaxed);
        self.shared.auth_received.store(false, Ordering::Relaxed);
    }

    /// Whether an authorization frame has been observed since the last
    /// (re)connect. Advisory: reads may race benignly with the receiver.
    pub fn is_auth_received(&self) -> bool {
        self.shared.auth_received.load(Ordering::Relaxed)
    }

    /// Number of broker keepalive frames observed.
    pub fn keep_alive_count(&self) -> u32 {
        self.shared.keep_alive_count.load(Ordering::Relaxed)
    }

    /// Number of completed inbound reconnect cycles.
    pub fn reconnect_count(&self) -> u32 {
        self.shared.reconnect_count.load(Ordering::Relaxed)
    }

    /// The configured service name.
    pub fn service_name(&self) -> &str {
        &self.shared.service_name
    }
}

impl Drop for ParodusClient {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unused_port_url() -> String {
        // bind-then-drop leaves a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("tcp://127.0.0.1:{}", port)
    }

    #[tokio::test]
    async fn init_rejects_empty_service_name() {
        let cfg = Config {
            receive: false,
            ..Config::default()
        };
        assert!(matches!(
            ParodusClient::init(cfg).await,
            Err(Error::InitCfg(None))
        ));
    }

    #[tokio::test]
    async fn init_without_broker_is_a_connect_error() {
        let cfg = Config {
            receive: false,
            parodus_url: unused_port_url(),
            client_url: unused_port_url(),
            ..Config::new("iot")
        };
        let err = ParodusClient::init(cfg).await.err().expect("init must fail");
        assert!(matches!(err, Error::InitConnect(_)));
        assert_ne!(err.os_err(), 0);
    }
}
