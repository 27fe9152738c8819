//! # ilp-router
//!
//! Longest-prefix-match routing table for the connector core: maps a
//! destination ILP address to the peer a Prepare should be forwarded to
//! next, with priority/weight tie-breaks among equally long prefixes.

mod route;
mod table;

pub use self::route::{AmountTransform, Identity, RouteEntry};
pub use self::table::RoutingTable;
