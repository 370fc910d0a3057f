//! # Bounded Inbound Message Queue
//!
//! Named, bounded FIFO between the receiver task and the application's
//! [`receive`](crate::ParodusClient::receive) calls. The queue holds decoded
//! messages that survived the destination filter, plus the close marker the
//! application requests through
//! [`close_receiver`](crate::ParodusClient::close_receiver).
//!
//! The close marker is an explicit [`QueueItem::Closed`] variant rather than
//! a specially-crafted message, so consumers match on it instead of
//! comparing sentinel strings.
//!
//! Both directions are timed: the producer side gives up after its timeout
//! (and the message is dropped, never retried), the consumer side reports a
//! timeout distinctly from queue failure.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::wrp::WrpMessage;

/// Queue failure.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The timed send gave up before capacity freed up.
    #[error("timed out enqueueing on message queue")]
    SendTimedOut,

    /// The queue no longer has a consumer or producer.
    #[error("message queue is closed")]
    Closed,
}

/// One element of the inbound queue.
#[derive(Debug)]
pub enum QueueItem {
    /// A decoded message addressed to this service.
    Message(WrpMessage),
    /// Consumer-side close marker; no ordering relation to inbound traffic.
    Closed,
}

/// Named bounded FIFO with timed send and timed receive.
pub struct MessageQueue {
    name: String,
    tx: mpsc::Sender<QueueItem>,
    rx: Mutex<mpsc::Receiver<QueueItem>>,
}

impl MessageQueue {
    pub fn new(name: String, capacity: usize) -> Self {
        debug!("created message queue {} (capacity {})", name, capacity);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            name,
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue `item`, waiting up to `budget` for capacity.
    pub async fn send(&self, item: QueueItem, budget: Duration) -> Result<(), QueueError> {
        self.tx
            .send_timeout(item, budget)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => QueueError::SendTimedOut,
                mpsc::error::SendTimeoutError::Closed(_) => QueueError::Closed,
            })
    }

    /// Dequeue the next item, waiting up to `budget`. `Ok(None)` is a
    /// timeout, distinct from [`QueueError`].
    pub async fn receive(&self, budget: Duration) -> Result<Option<QueueItem>, QueueError> {
        let mut rx = self.rx.lock().await;
        match timeout(budget, rx.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(item)) => Ok(Some(item)),
            Ok(None) => Err(QueueError::Closed),
        }
    }

    /// Drop everything still queued, polling with a short timeout until the
    /// queue runs dry. Returns the number of items flushed.
    pub async fn drain(&self, poll: Duration) -> usize {
        let mut count = 0;
        loop {
            match self.receive(poll).await {
                Ok(Some(_)) => count += 1,
                Ok(None) | Err(_) => break,
            }
        }
        info!("flushed {} messages out of {}", count, self.name);
        count
    }
}
