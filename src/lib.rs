//! # Parodus Client Library
//!
//! Client-side library for participating in a message bus mediated by the
//! parodus broker. A [`ParodusClient`] connects an outbound push socket to
//! the broker, binds an inbound pull socket for messages addressed to the
//! local service, registers the service, and keeps the inbound side alive
//! through keepalive-driven reconnection.
//!
//! ```no_run
//! use std::time::Duration;
//! use parodus_client::{Config, ParodusClient, ReceiveOutcome, WrpEvent, WrpMessage};
//!
//! # async fn example() -> Result<(), parodus_client::Error> {
//! let mut client = ParodusClient::init(Config::new("iot")).await?;
//!
//! client
//!     .send(&WrpMessage::Event(WrpEvent::new(
//!         "mac:112233445566/iot",
//!         "event:device-status/online",
//!         b"up".to_vec(),
//!     )))
//!     .await?;
//!
//! match client.receive(Duration::from_millis(500)).await? {
//!     ReceiveOutcome::Message(msg) => println!("got {}", msg.kind()),
//!     ReceiveOutcome::TimedOut => {}
//!     ReceiveOutcome::Closed => {}
//! }
//!
//! client.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod queue;
mod receiver;
pub mod sock;
pub mod wrp;

pub use client::{ParodusClient, ReceiveOutcome, END_OF_STREAM};
pub use config::Config;
pub use error::{Error, SendFault};
pub use queue::{MessageQueue, QueueError, QueueItem};
pub use sock::{PullSocket, PushSocket, SockError, SockRecv};
pub use wrp::{service_segment, CodecError, WrpCrud, WrpEvent, WrpMessage, WrpRequest};

/// The current version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values and protocol constants
pub mod defaults {
    /// Broker endpoint the outbound socket connects to
    pub const PARODUS_URL: &str = "tcp://127.0.0.1:6666";

    /// Local endpoint the inbound socket binds to
    pub const CLIENT_URL: &str = "tcp://127.0.0.1:6667";

    /// Inbound receive timeout in seconds
    pub const KEEPALIVE_TIMEOUT_SECS: u32 = 65;

    /// Fixed outbound socket send timeout
    pub const SOCK_SEND_TIMEOUT_MS: u64 = 2000;

    /// Capacity of the inbound message queue
    pub const WRP_QUEUE_CAPACITY: usize = 50;

    /// Timed-send budget for enqueueing inbound messages
    pub const WRP_QUEUE_SEND_TIMEOUT_MS: u64 = 2000;

    /// Prefix of derived inbound queue names
    pub const WRP_QUEUE_NAME_HDR: &str = "/LIBPD_WRP_QUEUE";

    /// Ceiling for the reconnect backoff delay
    pub const MAX_RECONNECT_RETRY_DELAY_SECS: u64 = 63;
}
