use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::delay_for;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::auth::build_auth_message;
use crate::packet::{BtpPacket, Serializable};
use crate::transport::{drive_connection, BtpRequestHandler, BtpTransport};

/// Initial and maximum delay between reconnect attempts. Each retry doubles
/// the previous delay, capped at `MAX_BACKOFF`, then perturbs the result
/// with up to 50% jitter so that many peers reconnecting after the same
/// outage don't all retry in lockstep.
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

fn with_jitter(backoff: Duration) -> Duration {
    let jitter_ms = rand::random::<u64>() % (backoff.as_millis() as u64 / 2 + 1);
    backoff + Duration::from_millis(jitter_ms)
}

/// Handle to a client-side connection loop. Dropping it (or calling
/// `shutdown`) stops the reconnect loop after the current attempt.
pub struct ClientConnectionHandle {
    shutdown: Option<oneshot::Sender<()>>,
}

impl ClientConnectionHandle {
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Connects to `url` as `peer_id`, sending `auth_token` as the BTP auth
/// handshake, and keeps the connection alive with capped exponential
/// backoff whenever it drops. Runs until `shutdown` is called on the
/// returned handle.
pub fn spawn_client_connection(
    peer_id: String,
    url: Url,
    auth_token: String,
    transport: Arc<BtpTransport>,
    handler: Arc<dyn BtpRequestHandler>,
) -> ClientConnectionHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

    tokio::spawn(async move {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            trace!(peer_id = peer_id.as_str(), "connecting to {}", url);
            transport.mark_connecting(&peer_id);
            let connect = connect_async(url.clone());
            let connected = tokio::select! {
                result = connect => result,
                _ = &mut shutdown_rx => {
                    debug!(peer_id = peer_id.as_str(), "client connection loop shut down before connecting");
                    return;
                }
            };

            match connected {
                Ok((socket, _response)) => {
                    backoff = INITIAL_BACKOFF;
                    debug!(peer_id = peer_id.as_str(), "connected, sending auth handshake");
                    let (socket, auth_ok) = send_auth(socket, &auth_token).await;
                    if auth_ok {
                        let drive = drive_connection(peer_id.clone(), socket, transport.clone(), handler.clone());
                        tokio::select! {
                            _ = drive => {}
                            _ = &mut shutdown_rx => {
                                debug!(peer_id = peer_id.as_str(), "client connection loop shut down");
                                return;
                            }
                        }
                        transport.mark_failed(&peer_id);
                    } else {
                        warn!(peer_id = peer_id.as_str(), "failed to write auth handshake, reconnecting");
                        transport.mark_failed(&peer_id);
                    }
                }
                Err(err) => {
                    error!(peer_id = peer_id.as_str(), "failed to connect: {:?}", err);
                    transport.mark_failed(&peer_id);
                }
            }

            tokio::select! {
                _ = delay_for(with_jitter(backoff)) => {}
                _ = &mut shutdown_rx => {
                    debug!(peer_id = peer_id.as_str(), "client connection loop shut down during backoff");
                    return;
                }
            }
            backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
        }
    });

    ClientConnectionHandle {
        shutdown: Some(shutdown_tx),
    }
}

/// Sends the BTP auth handshake over a freshly-established socket. The BTP
/// wire protocol does not require the server to reply; success here only
/// means the handshake frame was written.
async fn send_auth<T>(mut socket: T, token: &str) -> (T, bool)
where
    T: futures::Sink<tungstenite::Message> + Unpin,
{
    use futures::SinkExt;
    let message = BtpPacket::Message(build_auth_message(token));
    let ok = socket
        .send(tungstenite::Message::Binary(message.to_bytes()))
        .await
        .is_ok();
    (socket, ok)
}
