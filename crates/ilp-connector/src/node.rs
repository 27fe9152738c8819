use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ilp_accounts::{AccountManager, AccountSnapshot, SettlementObserver};
use ilp_btp::{spawn_client_connection, BtpRequestHandler, BtpServer, BtpTransport, ClientConnectionHandle, ConnectionState};
use ilp_errors::AccountError;
use ilp_packet::{Address, Prepare};
use ilp_router::{RouteEntry, RoutingTable};
use ilp_service::{
    build_pipeline_with_budget, ForwardingPipeline, IlpResult, IncomingRequest, IncomingService, LocalDeliveryHandler,
    PipelineRequestHandler,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tracing::{debug, error, info};
use url::Url;

use crate::auth::ConnectorAuth;
use crate::config::{NodeConfig, PeerConfig};
use crate::inflight::InFlightTrackingHandler;

/// Peer id the programmatic `send_packet` API uses as `from_peer` for
/// Prepares it originates — not a registered BTP peer, so it never appears
/// in `list_peers`.
const LOCAL_API_PEER_ID: &str = "@local";

/// How long `stop` waits for requests already in flight to finish answering
/// before tearing down connections regardless.
const SHUTDOWN_DRAIN_DEADLINE: Duration = Duration::from_secs(5);
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A point-in-time view of a registered peer.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PeerSnapshot {
    pub id: String,
    pub state: ConnectionState,
    pub last_seen: Option<std::time::Instant>,
}

/// Lifecycle facade for the connector core: owns the routing table, account
/// manager, BTP transport, and the forwarding pipeline built on top of them,
/// and exposes the programmatic operations an embedding application drives
/// the connector through.
///
/// `start`/`stop` are idempotent; calling `start` twice is a no-op, as is
/// calling `stop` before `start`. Neither installs a signal handler or
/// otherwise reaches outside the process — that is the embedder's job.
pub struct ConnectorNode {
    config: NodeConfig,
    local_address: Address,
    table: Arc<RoutingTable>,
    accounts: Arc<AccountManager>,
    transport: Arc<BtpTransport>,
    auth: Arc<ConnectorAuth>,
    pipeline: Arc<ForwardingPipeline>,
    wire_handler: Arc<dyn BtpRequestHandler>,
    local_delivery: Arc<ilp_service::LocalDeliveryLayer>,
    known_peers: RwLock<HashSet<String>>,
    client_handles: Mutex<HashMap<String, ClientConnectionHandle>>,
    listener_shutdown: Mutex<Option<oneshot::Sender<()>>>,
    in_flight: Arc<AtomicUsize>,
    started: AtomicBool,
}

impl ConnectorNode {
    pub fn new(config: NodeConfig) -> Self {
        let local_address = config.ilp_address.clone();
        let local_prefix = config.local_delivery_prefix.clone().unwrap_or_else(|| local_address.clone());

        let table = Arc::new(RoutingTable::new());
        let accounts = Arc::new(AccountManager::new());
        let transport = Arc::new(BtpTransport::new());
        let auth = Arc::new(ConnectorAuth::new(config.permissionless));

        let (pipeline, local_delivery) = build_pipeline_with_budget(
            local_address.clone(),
            local_prefix,
            config.per_hop_packet_budget_ms,
            table.clone(),
            accounts.clone(),
            transport.clone(),
        );
        let pipeline = Arc::new(pipeline);

        let in_flight = Arc::new(AtomicUsize::new(0));
        let wire_handler: Arc<dyn BtpRequestHandler> = Arc::new(InFlightTrackingHandler::new(
            PipelineRequestHandler::new(local_address.clone(), pipeline.clone()),
            in_flight.clone(),
        ));

        ConnectorNode {
            config,
            local_address,
            table,
            accounts,
            transport,
            auth,
            pipeline,
            wire_handler,
            local_delivery,
            known_peers: RwLock::new(HashSet::new()),
            client_handles: Mutex::new(HashMap::new()),
            listener_shutdown: Mutex::new(None),
            in_flight,
            started: AtomicBool::new(false),
        }
    }

    /// Opens the inbound BTP listener, dials every configured outbound peer,
    /// and arms the forwarding pipeline. A no-op if already started.
    pub async fn start(&self) -> std::io::Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        for peer in self.config.peers.clone() {
            self.register_peer(peer).await;
        }

        let server = Arc::new(BtpServer::new(self.transport.clone(), self.wire_handler.clone(), self.auth.clone()));
        let listen_address = self.config.btp_listen_address;
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        *self.listener_shutdown.lock() = Some(shutdown_tx);

        tokio::spawn(async move {
            tokio::select! {
                result = server.listen(listen_address) => {
                    if let Err(err) = result {
                        error!(error = %err, "BTP listener exited");
                    }
                }
                _ = &mut shutdown_rx => {
                    debug!("BTP listener shut down");
                }
            }
        });

        info!(address = %self.local_address, listen_address = %listen_address, "connector node started");
        Ok(())
    }

    /// Drains requests already in flight (up to a shutdown deadline), closes
    /// the inbound listener and every outbound client connection, and
    /// returns. A no-op if not currently started.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }

        let deadline = tokio::time::Instant::now() + SHUTDOWN_DRAIN_DEADLINE;
        while self.in_flight.load(Ordering::SeqCst) > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::delay_for(SHUTDOWN_POLL_INTERVAL).await;
        }

        if let Some(shutdown) = self.listener_shutdown.lock().take() {
            let _ = shutdown.send(());
        }

        let handles: Vec<ClientConnectionHandle> = self.client_handles.lock().drain().map(|(_, handle)| handle).collect();
        for mut handle in handles {
            handle.shutdown();
        }

        debug!("connector node stopped");
    }

    /// Routes a Prepare originated by an embedding application (rather than
    /// received over BTP) through the same forwarding pipeline an inbound
    /// peer's Prepare would take.
    pub async fn send_packet(&self, prepare: Prepare) -> IlpResult {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let request = IncomingRequest { from_peer: LOCAL_API_PEER_ID.to_string(), prepare };
        let result = self.pipeline.handle_request(request).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    /// Registers a peer's account and routes, registers its auth token (if
    /// any) with the inbound listener, and dials it (if it carries a BTP
    /// URL). Re-registering an already-known peer id replaces its prior
    /// outbound connection.
    pub async fn register_peer(&self, peer: PeerConfig) {
        let credit_limit = peer.credit_limit.unwrap_or(self.config.default_credit_limit);
        let settlement_threshold = peer.settlement_threshold.unwrap_or(self.config.default_settlement_threshold);
        self.accounts.register_peer(&peer.id, credit_limit, settlement_threshold);

        for route in &peer.routes {
            self.table.add_route(
                RouteEntry::new(route.prefix.clone(), peer.id.clone())
                    .with_priority(route.priority)
                    .with_weight(route.weight),
            );
        }

        if !peer.btp_auth_token.is_empty() {
            self.auth.register(peer.btp_auth_token.clone(), peer.id.clone());
        }

        self.known_peers.write().insert(peer.id.clone());

        if let Some(url) = peer.btp_url.clone() {
            self.dial_peer(peer.id, url, peer.btp_auth_token);
        }
    }

    fn dial_peer(&self, peer_id: String, url: Url, auth_token: String) {
        let mut handles = self.client_handles.lock();
        if let Some(mut existing) = handles.remove(&peer_id) {
            existing.shutdown();
        }
        let handle = spawn_client_connection(peer_id.clone(), url, auth_token, self.transport.clone(), self.wire_handler.clone());
        handles.insert(peer_id, handle);
    }

    /// Shuts down the peer's outbound connection (if any), revokes its auth
    /// token, drops its account, and removes every route that forwards
    /// through it.
    pub fn remove_peer(&self, peer_id: &str) {
        if let Some(mut handle) = self.client_handles.lock().remove(peer_id) {
            handle.shutdown();
        }
        self.transport.remove_connection(peer_id);
        self.accounts.remove_peer(peer_id);
        self.auth.revoke_peer(peer_id);
        self.known_peers.write().remove(peer_id);

        for route in self.table.list_routes() {
            if route.next_hop == peer_id {
                self.table.remove_route(&route.prefix, &route.next_hop);
            }
        }
    }

    pub fn list_peers(&self) -> Vec<PeerSnapshot> {
        self.known_peers
            .read()
            .iter()
            .map(|id| PeerSnapshot {
                id: id.clone(),
                state: self.transport.connection_state(id),
                last_seen: self.transport.last_seen(id),
            })
            .collect()
    }

    pub fn add_route(&self, route: RouteEntry) {
        self.table.add_route(route);
    }

    pub fn remove_route(&self, prefix: &str, next_hop: &str) -> bool {
        self.table.remove_route(prefix, next_hop)
    }

    pub fn list_routes(&self) -> Vec<RouteEntry> {
        self.table.list_routes()
    }

    pub fn get_balance(&self, peer_id: &str) -> Result<AccountSnapshot, AccountError> {
        self.accounts.balance(peer_id)
    }

    /// Installs (or replaces) the hook invoked when a Prepare's destination
    /// falls under the local-delivery prefix.
    pub fn set_local_delivery_handler(&self, handler: Arc<dyn LocalDeliveryHandler>) {
        self.local_delivery.set_handler(handler);
    }

    pub fn set_settlement_observer(&self, observer: Arc<dyn SettlementObserver>) {
        self.accounts.set_settlement_observer(observer);
    }
}

#[cfg(test)]
mod tests {
    use std::convert::TryInto;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::SystemTime;

    use async_trait::async_trait;
    use ilp_packet::{ErrorCode, PrepareBuilder};
    use ilp_service::LocalDeliveryOutcome;
    use ring::digest::{digest, SHA256};

    use super::*;

    fn test_config() -> NodeConfig {
        NodeConfig {
            ilp_address: Address::new(b"example.connector"),
            btp_listen_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            peers: Vec::new(),
            default_credit_limit: 1_000_000,
            default_settlement_threshold: 500_000,
            per_hop_packet_budget_ms: 30_000,
            permissionless: true,
            local_delivery_prefix: None,
        }
    }

    fn peer(id: &str) -> PeerConfig {
        PeerConfig {
            id: id.to_string(),
            btp_url: None,
            btp_auth_token: String::new(),
            routes: vec![crate::config::RouteConfig { prefix: format!("example.connector.{}", id), priority: 0, weight: 0 }],
            credit_limit: None,
            settlement_threshold: None,
        }
    }

    #[tokio::test]
    async fn register_peer_creates_its_account() {
        let node = ConnectorNode::new(test_config());
        node.register_peer(peer("bob")).await;
        let snapshot = node.get_balance("bob").unwrap();
        assert_eq!(snapshot.credit, 0);
        assert_eq!(snapshot.credit_limit, 1_000_000);
    }

    #[tokio::test]
    async fn get_balance_on_unknown_peer_fails() {
        let node = ConnectorNode::new(test_config());
        assert!(node.get_balance("nobody").is_err());
    }

    #[tokio::test]
    async fn remove_peer_drops_its_account_and_routes() {
        let node = ConnectorNode::new(test_config());
        node.register_peer(peer("bob")).await;
        node.add_route(RouteEntry::new("g.bob", "bob"));
        node.remove_peer("bob");
        assert!(node.get_balance("bob").is_err());
        assert!(node.list_routes().iter().all(|r| r.next_hop != "bob"));
    }

    #[tokio::test]
    async fn list_peers_reports_known_peers() {
        let node = ConnectorNode::new(test_config());
        node.register_peer(peer("bob")).await;
        let peers = node.list_peers();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].id, "bob");
        assert_eq!(peers[0].state, ConnectionState::Disconnected);
        assert!(peers[0].last_seen.is_none());
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let node = ConnectorNode::new(test_config());
        node.start().await.unwrap();
        node.start().await.unwrap();
        node.stop().await;
        node.stop().await;
    }

    struct AcceptingHandler;
    #[async_trait]
    impl LocalDeliveryHandler for AcceptingHandler {
        async fn handle(&self, _prepare: &Prepare, _source_peer: &str) -> LocalDeliveryOutcome {
            LocalDeliveryOutcome::Accept { fulfillment: None }
        }
    }

    #[tokio::test]
    async fn send_packet_reaches_the_local_delivery_handler() {
        let node = ConnectorNode::new(test_config());
        node.set_local_delivery_handler(Arc::new(AcceptingHandler));

        let data = b"hello";
        let condition: [u8; 32] = digest(&SHA256, data).as_ref().try_into().unwrap();
        let prepare = PrepareBuilder {
            amount: 100,
            expires_at: SystemTime::now() + Duration::from_secs(30),
            execution_condition: &condition,
            destination: Address::new(b"example.connector.alice"),
            data,
        }
        .build();

        let result = node.send_packet(prepare).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn send_packet_to_unrouted_destination_is_rejected() {
        let node = ConnectorNode::new(test_config());
        let prepare = PrepareBuilder {
            amount: 100,
            expires_at: SystemTime::now() + Duration::from_secs(30),
            execution_condition: &[0u8; 32],
            destination: Address::new(b"example.elsewhere"),
            data: b"",
        }
        .build();

        let result = node.send_packet(prepare).await;
        assert_eq!(result.unwrap_err().code(), ErrorCode::F02_UNREACHABLE);
    }
}
