use std::collections::{HashMap, HashSet};
use std::convert::TryFrom;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use ilp_errors::BtpError;
use ilp_packet::Packet;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, timeout};
use tracing::{trace, warn};
use tungstenite::Message;

use crate::packet::{
    find_ilp_payload, BtpError as WireError, BtpMessage, BtpPacket, BtpResponse, ProtocolData, Serializable,
};

/// How often a live connection sends an empty-`Message` keepalive frame
/// while otherwise idle.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// How long a connection may go without a received frame before it is torn
/// down as unresponsive.
const IDLE_TIMEOUT: Duration = Duration::from_secs(45);

/// A peer connection's lifecycle state, tracked independently of whether a
/// writer handle happens to be registered at this instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection attempt is in flight and none is established.
    Disconnected,
    /// A connection attempt (client dial or server handshake) is underway.
    Connecting,
    /// The WebSocket connection is up and frames have been exchanged.
    Connected,
    /// The most recent connection attempt or established connection ended
    /// in an error rather than a clean shutdown.
    Failed,
}

/// A point-in-time read of a peer connection's lifecycle state.
#[derive(Debug, Clone, Copy)]
pub struct PeerConnectionInfo {
    pub state: ConnectionState,
    pub last_seen: Option<Instant>,
}

/// Answers BTP `Message` frames that arrive over an established connection
/// after the request-correlation layer has already disposed of
/// `Response`/`Error` frames. Implemented by whatever sits above the
/// transport (the forwarding pipeline, in the connector as a whole).
#[async_trait]
pub trait BtpRequestHandler: Send + Sync {
    async fn handle_request(&self, peer_id: &str, ilp_payload: &[u8]) -> Packet;
}

/// Drives one WebSocket connection to completion: registers it with
/// `transport`, forwards whatever is written to the paired sender into the
/// socket, sends a periodic empty-`Message` keepalive frame and enforces an
/// idle read timeout, and feeds every inbound frame through
/// `transport.dispatch_incoming`, answering `Message` frames with `handler`
/// and replying over the same connection. Returns once the socket closes,
/// errors, or goes idle past `IDLE_TIMEOUT`; always deregisters the
/// connection before returning.
pub async fn drive_connection<T>(
    peer_id: String,
    socket: T,
    transport: Arc<BtpTransport>,
    handler: Arc<dyn BtpRequestHandler>,
) where
    T: futures::Sink<Message> + futures::Stream<Item = Result<Message, tungstenite::Error>> + Unpin + Send + 'static,
    T::Error: std::fmt::Debug + Send,
{
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
    transport.register_connection(peer_id.clone(), outbound_tx);

    let writer_peer_id = peer_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if let Err(err) = sink.send(message).await {
                warn!(peer_id = writer_peer_id.as_str(), "error writing to BTP connection: {:?}", err);
                break;
            }
        }
    });

    let mut keepalive = interval(KEEPALIVE_INTERVAL);
    loop {
        tokio::select! {
            next = stream.next() => {
                let message = match next {
                    Some(Ok(message)) => message,
                    Some(Err(err)) => {
                        warn!(peer_id = peer_id.as_str(), "BTP connection error: {:?}", err);
                        break;
                    }
                    None => break,
                };
                if let Message::Close(_) = message {
                    break;
                }
                transport.touch(&peer_id);
                if let Some((request_id, ilp_payload)) = transport.dispatch_incoming(&peer_id, message) {
                    let response = handler.handle_request(&peer_id, &ilp_payload).await;
                    if let Err(err) = transport.reply(&peer_id, request_id, response) {
                        warn!(peer_id = peer_id.as_str(), "failed to send BTP reply: {}", err);
                        break;
                    }
                }
            }
            _ = keepalive.tick() => {
                let idle = transport
                    .last_seen(&peer_id)
                    .map(|last_seen| last_seen.elapsed() >= IDLE_TIMEOUT)
                    .unwrap_or(false);
                if idle {
                    warn!(peer_id = peer_id.as_str(), "BTP connection idle past timeout, closing");
                    break;
                }
                if !transport.send_keepalive(&peer_id) {
                    break;
                }
            }
        }
    }

    // Dropping the registered sender (inside `remove_connection`) closes
    // `outbound_rx`, which ends the writer task on its own.
    transport.remove_connection(&peer_id);
    let _ = writer.await;
}

type PendingResponder = oneshot::Sender<Result<Packet, BtpError>>;

/// The request-correlation and connection registry shared by the BTP
/// client and server halves.
///
/// Connections are keyed by peer id; a single connection carries requests
/// in both directions, so both `send_request` (outbound) and
/// `dispatch_incoming` (inbound frames arriving on any connection) operate
/// against the same registry. `pending` tracks outstanding outbound
/// requests by the BTP `requestId` that was chosen for them; request ids
/// are drawn from a process-unique monotonic counter and are not reused
/// while outstanding. `in_flight_inbound` tracks, per peer, the request ids
/// currently being answered so a retransmitted duplicate can be rejected
/// instead of run through the handler a second time.
pub struct BtpTransport {
    connections: RwLock<HashMap<String, mpsc::UnboundedSender<Message>>>,
    peers: RwLock<HashMap<String, PeerConnectionInfo>>,
    pending: Mutex<HashMap<u32, PendingResponder>>,
    in_flight_inbound: Mutex<HashMap<String, HashSet<u32>>>,
    next_request_id: AtomicU32,
}

impl BtpTransport {
    pub fn new() -> Self {
        BtpTransport {
            connections: RwLock::new(HashMap::new()),
            peers: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            in_flight_inbound: Mutex::new(HashMap::new()),
            next_request_id: AtomicU32::new(0),
        }
    }

    /// Registers the outbound half of a peer's connection. Overwrites any
    /// previous connection for the same peer (e.g. after a reconnect), and
    /// marks the peer `Connected` with a fresh last-seen timestamp.
    pub fn register_connection(&self, peer_id: impl Into<String>, sender: mpsc::UnboundedSender<Message>) {
        let peer_id = peer_id.into();
        self.connections.write().insert(peer_id.clone(), sender);
        self.peers.write().insert(
            peer_id,
            PeerConnectionInfo { state: ConnectionState::Connected, last_seen: Some(Instant::now()) },
        );
    }

    /// Removes a peer's connection, marks it `Disconnected`, and drops any
    /// in-flight inbound request ids it still held. Pending outbound
    /// requests are keyed by request id across all connections, not
    /// per-peer, so a targeted fail-fast here would need a peer-id tag on
    /// each responder; callers instead rely on `send_request`'s own timeout
    /// to surface the loss.
    pub fn remove_connection(&self, peer_id: &str) {
        self.connections.write().remove(peer_id);
        if let Some(info) = self.peers.write().get_mut(peer_id) {
            info.state = ConnectionState::Disconnected;
        }
        self.in_flight_inbound.lock().remove(peer_id);
    }

    pub fn is_connected(&self, peer_id: &str) -> bool {
        self.connections.read().contains_key(peer_id)
    }

    /// Marks a peer's connection attempt as underway. Used by the client
    /// side before a dial completes; the server side only ever observes
    /// already-established connections, so it has no equivalent call.
    pub fn mark_connecting(&self, peer_id: &str) {
        self.peers.write().insert(
            peer_id.to_string(),
            PeerConnectionInfo { state: ConnectionState::Connecting, last_seen: None },
        );
    }

    /// Marks a peer's connection attempt or established connection as
    /// failed, preserving its last-seen timestamp if it had one.
    pub fn mark_failed(&self, peer_id: &str) {
        let mut peers = self.peers.write();
        let last_seen = peers.get(peer_id).and_then(|info| info.last_seen);
        peers.insert(peer_id.to_string(), PeerConnectionInfo { state: ConnectionState::Failed, last_seen });
    }

    /// The current lifecycle state of a peer's connection. A peer that has
    /// never been seen reports `Disconnected`.
    pub fn connection_state(&self, peer_id: &str) -> ConnectionState {
        self.peers.read().get(peer_id).map(|info| info.state).unwrap_or(ConnectionState::Disconnected)
    }

    /// When a frame was last received from this peer, if ever.
    pub fn last_seen(&self, peer_id: &str) -> Option<Instant> {
        self.peers.read().get(peer_id).and_then(|info| info.last_seen)
    }

    /// Records that a frame was just received from `peer_id`, refreshing its
    /// last-seen timestamp and marking it `Connected`.
    pub fn touch(&self, peer_id: &str) {
        let mut peers = self.peers.write();
        let entry = peers
            .entry(peer_id.to_string())
            .or_insert(PeerConnectionInfo { state: ConnectionState::Connected, last_seen: None });
        entry.state = ConnectionState::Connected;
        entry.last_seen = Some(Instant::now());
    }

    /// Sends `packet` to `peer_id` as the `ilp` sub-protocol of a BTP
    /// `Message` frame and awaits the correlated `Response`/`Error` frame,
    /// failing with `Timeout` if `deadline` elapses first.
    pub async fn send_request(&self, peer_id: &str, packet: Packet, deadline: Duration) -> Result<Packet, BtpError> {
        let sender = self
            .connections
            .read()
            .get(peer_id)
            .cloned()
            .ok_or_else(|| BtpError::NotConnected(peer_id.to_string()))?;

        let request_id = self.next_request_id();
        let (responder, receiver) = oneshot::channel();
        self.pending.lock().insert(request_id, responder);

        let frame = BtpMessage {
            request_id,
            protocol_data: vec![ProtocolData::ilp(BytesMut::from(packet).to_vec())],
        };
        if sender.send(Message::Binary(frame.to_bytes())).is_err() {
            self.pending.lock().remove(&request_id);
            return Err(BtpError::ConnectionLost(peer_id.to_string()));
        }

        match timeout(deadline, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BtpError::ConnectionLost(peer_id.to_string())),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                Err(BtpError::Timeout(peer_id.to_string()))
            }
        }
    }

    /// Draws the next outbound request id from a process-unique monotonic
    /// counter. Wrapping on overflow is fine: `pending` is keyed by request
    /// id and checked independently, so a wrapped-around id that happens to
    /// collide with one still outstanding would simply fail to find a free
    /// slot — astronomically unlikely given `pending`'s size in practice,
    /// and not a correctness hazard either way since `send_request` always
    /// inserts its own responder under the id it drew.
    fn next_request_id(&self) -> u32 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends an empty `Message` frame (no sub-protocols) to `peer_id` as a
    /// keepalive. Fire-and-forget: the far side's read loop touches its own
    /// last-seen timestamp on receipt, but no reply is expected or tracked.
    /// Returns `false` if the peer has no registered connection.
    pub fn send_keepalive(&self, peer_id: &str) -> bool {
        let sender = match self.connections.read().get(peer_id).cloned() {
            Some(sender) => sender,
            None => return false,
        };
        let frame = BtpMessage { request_id: self.next_request_id(), protocol_data: vec![] };
        sender.send(Message::Binary(frame.to_bytes())).is_ok()
    }

    /// Handles one inbound WebSocket message from `peer_id`'s connection.
    ///
    /// `Response`/`Error` frames resolve (and remove) the matching pending
    /// request and return `None`. `Message` frames carrying an `ilp`
    /// sub-protocol payload are returned undecoded as `Some((request_id,
    /// payload))` — decoding the payload into a `Prepare` and reacting to a
    /// malformed one with a Reject is the packet handler's job, since only it
    /// knows the local address a synthesized Reject should carry. A `Message`
    /// frame whose request id is already being handled for this peer is a
    /// retransmitted duplicate; it is rejected up front with a BTP `Error`
    /// frame instead of being run through the handler a second time.
    /// Anything else is logged and dropped.
    pub fn dispatch_incoming(&self, peer_id: &str, message: Message) -> Option<(u32, Vec<u8>)> {
        let data = match message {
            Message::Binary(data) => data,
            other => {
                trace!(peer_id, "ignoring non-binary BTP frame: {:?}", other);
                return None;
            }
        };

        match BtpPacket::from_bytes(&data) {
            Ok(BtpPacket::Message(message)) => match find_ilp_payload(&message.protocol_data) {
                Some(ilp_data) => {
                    let request_id = message.request_id;
                    let is_new = self
                        .in_flight_inbound
                        .lock()
                        .entry(peer_id.to_string())
                        .or_insert_with(HashSet::new)
                        .insert(request_id);
                    if !is_new {
                        warn!(peer_id, request_id, "rejecting duplicate in-flight BTP request id");
                        self.reject_duplicate(peer_id, request_id);
                        return None;
                    }
                    Some((request_id, ilp_data.to_vec()))
                }
                None => {
                    trace!(peer_id, "BTP Message carried no ilp sub-protocol (likely an auth handshake)");
                    None
                }
            },
            Ok(BtpPacket::Response(response)) => {
                self.resolve(response.request_id, decode_response(&response));
                None
            }
            Ok(BtpPacket::Error(error)) => {
                warn!(peer_id, "peer returned a BTP-level error: {}", error.name);
                self.resolve(
                    error.request_id,
                    Err(BtpError::PeerError {
                        peer_id: peer_id.to_string(),
                        message: error.data,
                    }),
                );
                None
            }
            Err(err) => {
                warn!(peer_id, "failed to parse BTP frame: {}", err);
                None
            }
        }
    }

    fn resolve(&self, request_id: u32, result: Result<Packet, BtpError>) {
        if let Some(responder) = self.pending.lock().remove(&request_id) {
            let _ = responder.send(result);
        } else {
            warn!(request_id, "response did not match any outstanding request");
        }
    }

    /// Writes a BTP-level `Error` frame straight to `peer_id`'s connection
    /// rejecting `request_id` as a duplicate of one already in flight.
    fn reject_duplicate(&self, peer_id: &str, request_id: u32) {
        let sender = match self.connections.read().get(peer_id).cloned() {
            Some(sender) => sender,
            None => return,
        };
        let frame = WireError {
            request_id,
            code: "F00".to_string(),
            name: "DuplicateIdError".to_string(),
            triggered_at: Utc::now(),
            data: "a request with this id is already being handled".to_string(),
            protocol_data: vec![],
        };
        let _ = sender.send(Message::Binary(BtpPacket::Error(frame).to_bytes()));
    }

    /// Replies to an inbound request over the connection it arrived on, and
    /// frees the request id for reuse in `dispatch_incoming`'s duplicate
    /// check.
    pub fn reply(&self, peer_id: &str, request_id: u32, packet: Packet) -> Result<(), BtpError> {
        if let Some(in_flight) = self.in_flight_inbound.lock().get_mut(peer_id) {
            in_flight.remove(&request_id);
        }
        let sender = self
            .connections
            .read()
            .get(peer_id)
            .cloned()
            .ok_or_else(|| BtpError::NotConnected(peer_id.to_string()))?;
        let frame = BtpResponse {
            request_id,
            protocol_data: vec![ProtocolData::ilp(BytesMut::from(packet).to_vec())],
        };
        sender
            .send(Message::Binary(frame.to_bytes()))
            .map_err(|_| BtpError::ConnectionLost(peer_id.to_string()))
    }
}

impl Default for BtpTransport {
    fn default() -> Self {
        BtpTransport::new()
    }
}

fn decode_response(response: &BtpResponse) -> Result<Packet, BtpError> {
    match find_ilp_payload(&response.protocol_data) {
        Some(ilp_data) => Packet::try_from(BytesMut::from(ilp_data))
            .map_err(|_| BtpError::FrameMalformed("response carried an invalid ILP payload".to_string())),
        None => Err(BtpError::FrameMalformed("response carried no ilp sub-protocol".to_string())),
    }
}
