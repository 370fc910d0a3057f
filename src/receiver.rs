//! Receiver task: drains the inbound pull socket, handles control frames,
//! filters application frames by destination service, and enqueues the
//! survivors. A keepalive timeout while running triggers the reconnect
//! subroutine; the end-of-stream sentinel or a transport error ends the
//! task.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::client::{Shared, END_OF_STREAM};
use crate::defaults;
use crate::queue::QueueItem;
use crate::sock::{PullSocket, SockRecv};
use crate::wrp::{service_segment, WrpMessage};

pub(crate) async fn run(
    mut rcv: PullSocket,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("starting wrp receiver task");
    loop {
        match rcv.recv().await {
            Ok(SockRecv::TimedOut) => {
                if !shared.is_running() {
                    break;
                }
                debug!("keepalive timeout on inbound socket");
                match reconnect(rcv, &shared, &mut shutdown).await {
                    Some(sock) => {
                        rcv = sock;
                        continue;
                    }
                    None => break,
                }
            }
            Err(e) => {
                // not a timeout: the inbound endpoint is unusable
                error!("inbound receive failed, stopping receiver: {}", e);
                break;
            }
            Ok(SockRecv::Frame(frame)) => {
                if frame.starts_with(END_OF_STREAM) {
                    debug!("end-of-stream sentinel received");
                    break;
                }
                if !shared.is_running() {
                    continue;
                }
                let msg = match WrpMessage::decode(&frame) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!("error converting bytes to WRP: {}", e);
                        continue;
                    }
                };
                dispatch(msg, &shared).await;
            }
        }
    }
    info!("ended wrp receiver task");
}

/// Handle control frames internally; filter and enqueue the rest.
async fn dispatch(msg: WrpMessage, shared: &Shared) {
    match msg {
        WrpMessage::Auth { status } => {
            info!("auth msg received (status {})", status);
            shared.auth_received.store(true, Ordering::Relaxed);
        }
        WrpMessage::ServiceAlive => {
            debug!("received keep alive message");
            shared.keep_alive_count.fetch_add(1, Ordering::Relaxed);
        }
        msg => {
            let dest = match msg.dest() {
                Some(dest) => dest,
                None => {
                    warn!("unprocessed {} msg received", msg.kind());
                    return;
                }
            };
            match service_segment(dest) {
                Some(segment) if segment == shared.service_name => {}
                _ => {
                    debug!("dropping msg for destination {}", dest);
                    return;
                }
            }
            debug!("received msg directed to service {}", shared.service_name);
            let queue = match shared.queue.as_ref() {
                Some(queue) => queue,
                None => return,
            };
            let budget = Duration::from_millis(defaults::WRP_QUEUE_SEND_TIMEOUT_MS);
            if let Err(e) = queue.send(QueueItem::Message(msg), budget).await {
                // dropped, not retried
                warn!("could not enqueue inbound msg: {}", e);
            }
        }
    }
}

/// Rebind the inbound endpoint with exponential backoff and re-register
/// with the broker. Returns the fresh socket, or `None` when shutdown was
/// signalled during the backoff.
async fn reconnect(
    rcv: PullSocket,
    shared: &Shared,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<PullSocket> {
    // release the bound address before trying to take it again
    rcv.shutdown().await;
    // a fresh outbound connection, not a half-dead one, must carry the
    // re-registration
    shared.reset_send_path().await;

    let mut p: u64 = 2;
    let mut retry_delay: u64 = 0;
    let sock = loop {
        if retry_delay < defaults::MAX_RECONNECT_RETRY_DELAY_SECS {
            p += p;
            retry_delay = p - 1;
        }
        debug!("retrying receiver connection in {}s", retry_delay);
        tokio::select! {
            _ = sleep(Duration::from_secs(retry_delay)) => {}
            _ = shutdown.changed() => return None,
        }
        let sock = match PullSocket::bind(&shared.client_url, shared.keepalive_timeout_secs).await
        {
            Ok(sock) => sock,
            Err(e) => {
                warn!("receiver rebind failed: {}", e);
                continue;
            }
        };
        match shared.send_registration().await {
            Ok(()) => break sock,
            Err(e) => {
                warn!("re-registration failed: {}", e);
                sock.shutdown().await;
                continue;
            }
        }
    };
    shared.auth_received.store(false, Ordering::Relaxed);
    shared.reconnect_count.fetch_add(1, Ordering::Relaxed);
    info!(
        "receiver reconnected (cycle {})",
        shared.reconnect_count.load(Ordering::Relaxed)
    );
    Some(sock)
}
