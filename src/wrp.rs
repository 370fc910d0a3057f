//! # WRP Message Model and Codec
//!
//! In-memory representation of WRP (Web Routing Protocol) messages and the
//! byte codec used on the wire between this client and the broker.
//!
//! ## Message Model
//!
//! [`WrpMessage`] is a tagged union covering the message classes the broker
//! exchanges with services:
//!
//! - **Routable application messages**: [`Request`](WrpMessage::Request),
//!   [`Event`](WrpMessage::Event) and the four CRUD variants. All of them
//!   carry a `dest` locator of the form `"<prefix>/<service>/<tail>"`.
//! - **Control messages**: [`Auth`](WrpMessage::Auth) (authorization
//!   acknowledgement from the broker), [`ServiceAlive`](WrpMessage::ServiceAlive)
//!   (broker keepalive) and [`ServiceRegistration`](WrpMessage::ServiceRegistration)
//!   (sent by the client to announce its service name and inbound URL).
//!
//! ## Codec
//!
//! Messages are serialized with bincode via Serde derive. The codec is
//! deliberately self-contained: the connection machinery treats message
//! bodies as opaque bytes and only calls [`WrpMessage::encode`] /
//! [`WrpMessage::decode`] at the edges.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Codec failure when translating between messages and bytes.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Serialization to bytes failed.
    #[error("could not encode WRP message to bytes")]
    Encode(#[source] bincode::Error),

    /// Deserialization from bytes failed.
    #[error("could not decode WRP message from bytes")]
    Decode(#[source] bincode::Error),

    /// The byte buffer was empty.
    #[error("empty WRP message buffer")]
    Empty,
}

/// A request expecting a response, correlated by `transaction_uuid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrpRequest {
    pub transaction_uuid: String,
    pub source: String,
    pub dest: String,
    pub content_type: Option<String>,
    pub headers: Option<Vec<String>>,
    pub payload: Vec<u8>,
}

impl WrpRequest {
    /// Build a request with a freshly generated transaction UUID.
    pub fn new(source: &str, dest: &str, payload: Vec<u8>) -> Self {
        Self {
            transaction_uuid: Uuid::new_v4().to_string(),
            source: source.to_string(),
            dest: dest.to_string(),
            content_type: None,
            headers: None,
            payload,
        }
    }
}

/// A fire-and-forget event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrpEvent {
    pub source: String,
    pub dest: String,
    pub content_type: Option<String>,
    pub headers: Option<Vec<String>>,
    pub payload: Vec<u8>,
}

impl WrpEvent {
    pub fn new(source: &str, dest: &str, payload: Vec<u8>) -> Self {
        Self {
            source: source.to_string(),
            dest: dest.to_string(),
            content_type: None,
            headers: None,
            payload,
        }
    }
}

/// Body shared by the four CRUD message variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrpCrud {
    pub transaction_uuid: String,
    pub source: String,
    pub dest: String,
    /// Object path addressed by the operation.
    pub path: Option<String>,
    /// Status code on responses.
    pub status: Option<i64>,
    pub payload: Option<Vec<u8>>,
}

impl WrpCrud {
    pub fn new(source: &str, dest: &str, path: Option<&str>) -> Self {
        Self {
            transaction_uuid: Uuid::new_v4().to_string(),
            source: source.to_string(),
            dest: dest.to_string(),
            path: path.map(str::to_string),
            status: None,
            payload: None,
        }
    }
}

/// A WRP message as exchanged with the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WrpMessage {
    /// Authorization acknowledgement from the broker.
    Auth { status: i32 },
    Request(WrpRequest),
    Event(WrpEvent),
    Create(WrpCrud),
    Retrieve(WrpCrud),
    Update(WrpCrud),
    Delete(WrpCrud),
    /// Announces a service and its inbound URL to the broker.
    ServiceRegistration { service_name: String, url: String },
    /// Broker keepalive.
    ServiceAlive,
}

impl WrpMessage {
    /// Destination locator for the routable variants, `None` for control
    /// messages that carry no destination.
    pub fn dest(&self) -> Option<&str> {
        match self {
            WrpMessage::Request(req) => Some(&req.dest),
            WrpMessage::Event(ev) => Some(&ev.dest),
            WrpMessage::Create(crud)
            | WrpMessage::Retrieve(crud)
            | WrpMessage::Update(crud)
            | WrpMessage::Delete(crud) => Some(&crud.dest),
            _ => None,
        }
    }

    /// Short lowercase tag for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            WrpMessage::Auth { .. } => "auth",
            WrpMessage::Request(_) => "request",
            WrpMessage::Event(_) => "event",
            WrpMessage::Create(_) => "create",
            WrpMessage::Retrieve(_) => "retrieve",
            WrpMessage::Update(_) => "update",
            WrpMessage::Delete(_) => "delete",
            WrpMessage::ServiceRegistration { .. } => "service_registration",
            WrpMessage::ServiceAlive => "service_alive",
        }
    }

    /// Serialize the message for transmission.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let bytes = bincode::serialize(self).map_err(CodecError::Encode)?;
        if bytes.is_empty() {
            return Err(CodecError::Empty);
        }
        Ok(bytes)
    }

    /// Reconstruct a message from its byte representation.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::Empty);
        }
        bincode::deserialize(bytes).map_err(CodecError::Decode)
    }
}

/// Extract the service segment of a destination locator.
///
/// Destinations have the shape `"<prefix>/<service>/<tail>"`; the segment
/// between the first and second `/` (or the end of the string) names the
/// service the message is addressed to. Returns `None` when the locator has
/// no `/` at all.
pub fn service_segment(dest: &str) -> Option<&str> {
    let rest = &dest[dest.find('/')? + 1..];
    Some(match rest.find('/') {
        Some(end) => &rest[..end],
        None => rest,
    })
}
