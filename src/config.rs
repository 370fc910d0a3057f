//! # Client Configuration
//!
//! Configuration for a broker client instance. The configuration is captured
//! at [`ParodusClient::init`](crate::ParodusClient::init) time and is
//! immutable for the lifetime of the instance.
//!
//! ## Endpoint URLs
//!
//! Both endpoints use the one-way pipe URL scheme understood by the socket
//! façade (`tcp://host:port` or `ipc:///path`):
//!
//! - `parodus_url`: the broker endpoint the client *connects* to for
//!   outbound messages (default `tcp://127.0.0.1:6666`).
//! - `client_url`: the local endpoint the client *binds* for inbound
//!   messages (default `tcp://127.0.0.1:6667`). This URL is advertised to
//!   the broker in the registration frame.
//!
//! A `parodus_url` prefixed with `"test:"` has the prefix stripped and
//! forces connect-per-send mode, which re-dials the outbound socket for
//! every message and closes it afterwards. The mode exists for testing and
//! diagnostics of broker-side connection handling.

use crate::defaults;

/// Immutable configuration for one client instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Short identifier of the local service. Must be non-empty; used for
    /// registration and for filtering inbound messages by destination.
    pub service_name: String,

    /// Whether the inbound path (pull socket, queue, receiver task) is
    /// created. Send-only clients set this to false.
    pub receive: bool,

    /// Inbound socket receive timeout in seconds. Expiration is interpreted
    /// as loss of the broker and triggers reconnection. `0` disables the
    /// timeout (and with it, reconnection).
    pub keepalive_timeout_secs: u32,

    /// Broker endpoint for outbound messages.
    pub parodus_url: String,

    /// Local endpoint bound for inbound messages.
    pub client_url: String,

    /// Re-dial the outbound socket for each send and close it afterwards.
    /// Also implied by a `"test:"` prefix on `parodus_url`.
    pub connect_on_every_send: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            receive: true,
            keepalive_timeout_secs: defaults::KEEPALIVE_TIMEOUT_SECS,
            parodus_url: defaults::PARODUS_URL.to_string(),
            client_url: defaults::CLIENT_URL.to_string(),
            connect_on_every_send: false,
        }
    }
}

/// URLs and flags after `"test:"` stripping. Derived once at init.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedUrls {
    pub(crate) parodus_url: String,
    pub(crate) client_url: String,
    pub(crate) connect_on_every_send: bool,
}

impl Config {
    /// Create a configuration for `service_name` with default endpoints.
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            ..Self::default()
        }
    }

    /// Name of the inbound queue, derived from the service name.
    pub(crate) fn queue_name(&self) -> String {
        format!("{}.{}", defaults::WRP_QUEUE_NAME_HDR, self.service_name)
    }

    pub(crate) fn resolve_urls(&self) -> ResolvedUrls {
        let mut connect_on_every_send = self.connect_on_every_send;
        let parodus_url = match self.parodus_url.strip_prefix("test:") {
            Some(stripped) => {
                connect_on_every_send = true;
                stripped.to_string()
            }
            None => self.parodus_url.clone(),
        };
        ResolvedUrls {
            parodus_url,
            client_url: self.client_url.clone(),
            connect_on_every_send,
        }
    }
}
