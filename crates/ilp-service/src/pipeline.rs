use std::convert::TryFrom;
use std::sync::Arc;

use async_trait::async_trait;
use ilp_accounts::AccountManager;
use ilp_btp::{BtpRequestHandler, BtpTransport};
use ilp_packet::{Address, ErrorCode, Packet};
use ilp_router::RoutingTable;
use tracing::warn;

use crate::balance::BalanceService;
use crate::btp_send::BtpSendService;
use crate::expiry::{ExpiryShortenerService, DEFAULT_HOP_EXPIRY_BUDGET_MS};
use crate::local_delivery::LocalDeliveryService;
use crate::reject::reject;
use crate::router_service::RouterService;
use crate::types::{IlpResult, IncomingRequest, IncomingService};
use crate::validator::ValidatorService;

/// The local-delivery layer on its own, parameterized the way
/// `build_pipeline` assembles it. Kept as a type alias so a caller that
/// needs to hold onto this layer specifically (to push handler updates into
/// it after construction) can name it without repeating the chain.
pub type LocalDeliveryLayer =
    LocalDeliveryService<RouterService<BalanceService<ExpiryShortenerService<ValidatorService<BtpSendService>>>>>;

/// The fully assembled forwarding pipeline.
///
/// Layer order follows the dependency chain the ten-step algorithm actually
/// requires rather than a fixed label order: the destination must be
/// resolved to a next hop before credit can be reserved against it, and the
/// per-hop deadline and condition check must wrap the network call most
/// tightly since both are properties of that one round trip.
///
/// incoming validator -> local delivery -> router -> balance -> expiry ->
/// outgoing validator -> BTP send
///
/// The local-delivery layer sits behind an `Arc` rather than being owned
/// outright so a caller (the Connector Node) can keep its own clone of the
/// same instance and call `set_handler` on it after the pipeline has
/// already been wired and handed off.
pub type ForwardingPipeline = ValidatorService<Arc<LocalDeliveryLayer>>;

/// Builds the forwarding pipeline for a node whose own address doubles as
/// its local-delivery prefix, with the default per-hop expiry budget.
/// Equivalent to `build_pipeline_with_prefix` with `local_prefix` set to
/// `local_address`.
pub fn build_pipeline(
    local_address: Address,
    table: Arc<RoutingTable>,
    accounts: Arc<AccountManager>,
    transport: Arc<BtpTransport>,
) -> (ForwardingPipeline, Arc<LocalDeliveryLayer>) {
    let local_prefix = local_address.clone();
    build_pipeline_with_prefix(local_address, local_prefix, table, accounts, transport)
}

/// Builds the forwarding pipeline, with `local_prefix` (the destination
/// subtree routed to the Local Delivery hook) set independently of
/// `local_address` (the address this hop's own Rejects are `triggeredBy`),
/// using the default per-hop expiry budget.
pub fn build_pipeline_with_prefix(
    local_address: Address,
    local_prefix: Address,
    table: Arc<RoutingTable>,
    accounts: Arc<AccountManager>,
    transport: Arc<BtpTransport>,
) -> (ForwardingPipeline, Arc<LocalDeliveryLayer>) {
    build_pipeline_with_budget(
        local_address,
        local_prefix,
        DEFAULT_HOP_EXPIRY_BUDGET_MS,
        table,
        accounts,
        transport,
    )
}

/// Builds the forwarding pipeline with every knob spelled out: `local_prefix`
/// set independently of `local_address`, and `hop_budget_ms` overriding how
/// much of a Prepare's remaining time-to-expiry this hop claims before
/// forwarding onward.
pub fn build_pipeline_with_budget(
    local_address: Address,
    local_prefix: Address,
    hop_budget_ms: u32,
    table: Arc<RoutingTable>,
    accounts: Arc<AccountManager>,
    transport: Arc<BtpTransport>,
) -> (ForwardingPipeline, Arc<LocalDeliveryLayer>) {
    let btp_send = BtpSendService::new(local_address.clone(), transport);
    let outgoing_validator = ValidatorService::new(local_address.clone(), btp_send);
    let expiry = ExpiryShortenerService::with_hop_budget_ms(local_address.clone(), hop_budget_ms, outgoing_validator);
    let balance = BalanceService::new(local_address.clone(), accounts, expiry);
    let router = RouterService::new(local_address.clone(), table, balance);
    let local_delivery = Arc::new(LocalDeliveryService::new(local_address.clone(), local_prefix, router));
    let pipeline = ValidatorService::new(local_address, local_delivery.clone());
    (pipeline, local_delivery)
}

/// Bridges the BTP transport to the forwarding pipeline: decodes the raw
/// ILP payload of an inbound Message frame, rejects anything that isn't a
/// well-formed Prepare, runs it through the pipeline, and encodes the
/// Fulfill/Reject outcome back into a packet for the reply.
pub struct PipelineRequestHandler<P> {
    local_address: Address,
    pipeline: P,
}

impl<P> PipelineRequestHandler<P> {
    pub fn new(local_address: Address, pipeline: P) -> Self {
        PipelineRequestHandler { local_address, pipeline }
    }
}

#[async_trait]
impl<P: IncomingService> BtpRequestHandler for PipelineRequestHandler<P> {
    async fn handle_request(&self, peer_id: &str, ilp_payload: &[u8]) -> Packet {
        let packet = match Packet::try_from(bytes::BytesMut::from(ilp_payload)) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(peer_id, error = %err, "failed to decode inbound ILP payload");
                return Packet::Reject(reject(&self.local_address, ErrorCode::F01_INVALID_PACKET, b"failed to decode packet"));
            }
        };

        let prepare = match packet {
            Packet::Prepare(prepare) => prepare,
            _ => {
                warn!(peer_id, "peer sent a non-Prepare packet as a request");
                return Packet::Reject(reject(
                    &self.local_address,
                    ErrorCode::F01_INVALID_PACKET,
                    b"expected a Prepare",
                ));
            }
        };

        let request = IncomingRequest { from_peer: peer_id.to_string(), prepare };
        match self.route(request).await {
            Ok(fulfill) => Packet::Fulfill(fulfill),
            Err(reject_packet) => Packet::Reject(reject_packet),
        }
    }
}

impl<P: IncomingService> PipelineRequestHandler<P> {
    async fn route(&self, request: IncomingRequest) -> IlpResult {
        self.pipeline.handle_request(request).await
    }
}
