use std::net::SocketAddr;

use ilp_packet::Address;
use serde::Deserialize;
use url::Url;

/// Typed configuration for a Connector Node, loadable from TOML/JSON via
/// `serde`. Mirrors the field set `InterledgerNode` takes in the teacher's
/// `node.rs`, narrowed to what this core actually owns: no HTTP/admin,
/// on-chain settlement, or CLI fields, since those are out of scope per
/// the component budget this crate implements.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// This node's own ILP address. Also the default local-delivery prefix,
    /// unless `local_delivery_prefix` is set.
    pub ilp_address: Address,

    /// Address the inbound BTP listener binds to.
    pub btp_listen_address: SocketAddr,

    /// Peers dialed (if they carry `btp_url`) and/or authenticated against
    /// (if they carry `btp_auth_token`) once the node starts.
    #[serde(default)]
    pub peers: Vec<PeerConfig>,

    /// Credit limit applied to a peer's account when its own entry omits one.
    #[serde(default = "default_credit_limit")]
    pub default_credit_limit: u128,

    /// Settlement threshold applied to a peer's account when its own entry
    /// omits one.
    #[serde(default = "default_settlement_threshold")]
    pub default_settlement_threshold: u128,

    /// Upper bound, in milliseconds, on how much of a Prepare's remaining
    /// time-to-expiry a single hop may claim before forwarding onward.
    #[serde(default = "default_per_hop_packet_budget_ms")]
    pub per_hop_packet_budget_ms: u32,

    /// Accept any BTP auth token (including an empty one) from an inbound
    /// connection rather than requiring it to match a registered peer.
    #[serde(default)]
    pub permissionless: bool,

    /// Destination subtree routed to the Local Delivery hook rather than
    /// forwarded to a peer. Defaults to `ilp_address` when unset.
    #[serde(default)]
    pub local_delivery_prefix: Option<Address>,
}

fn default_credit_limit() -> u128 {
    1_000_000_000
}

fn default_settlement_threshold() -> u128 {
    100_000_000
}

fn default_per_hop_packet_budget_ms() -> u32 {
    ilp_service::DEFAULT_HOP_EXPIRY_BUDGET_MS
}

/// One configured peer: its account terms, the routes that forward through
/// it, and (optionally) how to reach it over BTP.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    pub id: String,

    /// Dialed as an outbound BTP client connection when set.
    #[serde(default)]
    pub btp_url: Option<Url>,

    /// Sent as the outbound auth handshake when dialing, and/or accepted as
    /// this peer's identity on an inbound connection.
    #[serde(default)]
    pub btp_auth_token: String,

    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    pub credit_limit: Option<u128>,
    pub settlement_threshold: Option<u128>,
}

/// A route that forwards through the peer it is declared under; `next_hop`
/// is implicit (the owning peer's id).
#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    pub prefix: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub weight: u32,
}
