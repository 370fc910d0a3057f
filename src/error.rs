//! # Public Error Taxonomy
//!
//! This module defines the stable, small error surface of the library. Each
//! public API call can only fail with the variants listed here; the lower
//! layers (socket façade, queue, codec) attach their own richer errors as
//! sources so that callers can log the failing sub-operation and the OS
//! error number without having to branch on them.
//!
//! ## Two-Level Design
//!
//! - **Public level**: the [`Error`] enum. Stable, matchable, documented.
//! - **Diagnostic level**: the `#[source]` chain ([`SendFault`],
//!   [`SockError`](crate::sock::SockError), [`QueueError`](crate::queue::QueueError),
//!   [`CodecError`](crate::wrp::CodecError)) plus [`Error::os_err`], which
//!   preserves the raw OS error number of the failing layer.

use thiserror::Error;

use crate::queue::QueueError;
use crate::sock::SockError;
use crate::wrp::CodecError;

/// Detailed fault from the outbound send path.
///
/// These mirror the distinct sub-errors of the socket send pipeline: message
/// encoding, the (optional) per-send connect, and the framed socket write.
/// All three collapse into [`Error::SendSocket`] / [`Error::SendEncode`] at
/// the public level but stay distinguishable here for diagnostics.
#[derive(Debug, Error)]
pub enum SendFault {
    /// The WRP message could not be encoded to bytes.
    #[error("could not encode WRP message")]
    Encode(#[source] CodecError),

    /// Dialing the outbound endpoint failed (connect-per-send mode, or a
    /// lazy re-dial after the send path was reset by a reconnect).
    #[error("could not connect outbound socket")]
    Connect(#[source] SockError),

    /// The framed write on the outbound socket failed or timed out.
    #[error("outbound socket send failed")]
    Socket(#[source] SockError),
}

impl SendFault {
    /// Raw OS error number of the underlying failure, `0` if none applies.
    pub fn os_err(&self) -> i32 {
        match self {
            SendFault::Encode(_) => 0,
            SendFault::Connect(e) | SendFault::Socket(e) => e.os_err(),
        }
    }
}

/// Errors returned by the public client API.
///
/// The display strings follow the long-standing libparodus error table, so
/// logs stay greppable across the C and Rust clients.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Error on init. Invalid config parameter.
    #[error("error on init: invalid config parameter")]
    InitCfg(#[source] Option<SockError>),

    /// Error on init. Could not connect.
    #[error("error on init: could not connect")]
    InitConnect(#[source] SockError),

    /// Error on init. Could not create receive queue.
    #[error("error on init: could not create receive queue")]
    InitQueue(#[source] QueueError),

    /// Error on init. Could not start the receiver task.
    #[error("error on init: could not start receiver task")]
    InitReceiverTask,

    /// Error on init. Registration failed.
    #[error("error on init: registration failed")]
    InitRegister(#[source] SendFault),

    /// Error on receive. Not configured for receive.
    #[error("error on receive: not configured for receive")]
    ReceiveCfg,

    /// Error on receive. Run state error.
    #[error("error on receive: run state error")]
    ReceiveState,

    /// Error on receive. Error receiving from the inbound queue.
    #[error("error on receive: error receiving from inbound queue")]
    ReceiveQueue(#[source] QueueError),

    /// Error on send. Run state error.
    #[error("error on send: run state error")]
    SendState,

    /// Error on send. Invalid WRP message.
    #[error("error on send: invalid WRP message")]
    SendEncode(#[source] CodecError),

    /// Error on send. Socket send error.
    #[error("error on send: socket send error")]
    SendSocket(#[source] SendFault),

    /// Error on close receiver. Not configured for receive.
    #[error("error on close receiver: not configured for receive")]
    CloseReceiverCfg,

    /// Error on close receiver. Run state error.
    #[error("error on close receiver: run state error")]
    CloseReceiverState,

    /// Error on close receiver. Timed out waiting to enqueue the close message.
    #[error("error on close receiver: timed out enqueueing close message")]
    CloseReceiverTimedOut,

    /// Error on close receiver. Unable to enqueue the close message.
    #[error("error on close receiver: unable to enqueue close message")]
    CloseReceiverSend(#[source] QueueError),
}

impl Error {
    /// Raw OS error number preserved from the failing layer, `0` if none.
    ///
    /// Callers log this next to the error itself; nothing in the library
    /// branches on it.
    pub fn os_err(&self) -> i32 {
        match self {
            Error::InitCfg(Some(e)) | Error::InitConnect(e) => e.os_err(),
            Error::InitRegister(f) | Error::SendSocket(f) => f.os_err(),
            _ => 0,
        }
    }
}

/// Map a façade error from the init connect sequence onto the public
/// taxonomy: an underlying `EINVAL` means the configuration itself is bad,
/// anything else is a connect failure.
pub(crate) fn init_connect_error(e: SockError) -> Error {
    if e.os_err() == libc::EINVAL {
        Error::InitCfg(Some(e))
    } else {
        Error::InitConnect(e)
    }
}
