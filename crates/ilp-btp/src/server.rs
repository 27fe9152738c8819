use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Sink, Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tracing::{debug, warn};
use tungstenite::Message;

use crate::auth::extract_token;
use crate::packet::{BtpPacket, Serializable};
use crate::transport::{drive_connection, BtpRequestHandler, BtpTransport};

/// Close an inbound connection if the auth handshake has not arrived
/// within this long.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves an inbound BTP auth token to the peer id it authenticates as.
/// Returning `None` rejects the connection.
///
/// A permissionless deployment accepts every token (mapping it to itself,
/// or to some fixed guest peer id); an authenticated deployment looks the
/// token up against its configured peers.
#[async_trait]
pub trait BtpServerAuth: Send + Sync {
    async fn authenticate(&self, token: &str) -> Option<String>;
}

/// Accepts inbound BTP/WebSocket connections and feeds them into a shared
/// [`BtpTransport`], answering requests with a [`BtpRequestHandler`].
pub struct BtpServer {
    transport: Arc<BtpTransport>,
    handler: Arc<dyn BtpRequestHandler>,
    auth: Arc<dyn BtpServerAuth>,
}

impl BtpServer {
    pub fn new(transport: Arc<BtpTransport>, handler: Arc<dyn BtpRequestHandler>, auth: Arc<dyn BtpServerAuth>) -> Self {
        BtpServer { transport, handler, auth }
    }

    /// Binds `addr` and accepts connections until the process is torn down.
    /// Each accepted socket is handled on its own task so a slow or
    /// misbehaving peer cannot block other connections.
    pub async fn listen(self: Arc<Self>, addr: SocketAddr) -> std::io::Result<()> {
        let mut listener = TcpListener::bind(addr).await?;
        debug!("BTP server listening on {}", addr);
        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!("error accepting BTP connection: {}", err);
                    continue;
                }
            };
            let server = self.clone();
            tokio::spawn(async move {
                server.accept_connection(stream, peer_addr).await;
            });
        }
    }

    async fn accept_connection(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let socket = match accept_async(stream).await {
            Ok(socket) => socket,
            Err(err) => {
                warn!("WebSocket handshake with {} failed: {}", peer_addr, err);
                return;
            }
        };

        match self.authenticate(socket).await {
            Some((socket, peer_id)) => {
                debug!("accepted BTP connection from {} as peer {}", peer_addr, peer_id);
                drive_connection(peer_id, socket, self.transport.clone(), self.handler.clone()).await;
            }
            None => warn!("rejected BTP connection from {}", peer_addr),
        }
    }

    async fn authenticate<T>(&self, mut socket: T) -> Option<(T, String)>
    where
        T: Sink<Message> + Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        let first_frame = match timeout(HANDSHAKE_TIMEOUT, socket.next()).await {
            Ok(Some(Ok(Message::Binary(data)))) => data,
            _ => return None,
        };

        let message = match BtpPacket::from_bytes(&first_frame) {
            Ok(BtpPacket::Message(message)) => message,
            _ => return None,
        };

        let token = extract_token(&message).unwrap_or_default();
        let peer_id = self.auth.authenticate(&token).await?;
        Some((socket, peer_id))
    }
}
