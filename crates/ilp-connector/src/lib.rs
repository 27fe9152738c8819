//! # ilp-connector
//!
//! The Connector Node: a lifecycle facade that wires together a routing
//! table, a bilateral account manager, a BTP transport, and the forwarding
//! pipeline from `ilp-service` into the single object an embedding
//! application drives a connector through — configure peers, `start` the
//! listener, route Prepares, watch balances, `stop` cleanly.

mod auth;
mod config;
mod inflight;
mod node;

pub use self::auth::ConnectorAuth;
pub use self::config::{NodeConfig, PeerConfig, RouteConfig};
pub use self::node::{ConnectorNode, PeerSnapshot};

pub use ilp_accounts::{AccountSnapshot, SettlementObserver};
pub use ilp_btp::ConnectionState;
pub use ilp_errors::AccountError;
pub use ilp_packet::{Address, Fulfill, Prepare, Reject};
pub use ilp_router::RouteEntry;
pub use ilp_service::{IlpResult, LocalDeliveryHandler, LocalDeliveryOutcome};
