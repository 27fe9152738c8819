use std::sync::Arc;

use ilp_errors::RoutingTableError;
use ilp_packet::Address;
use parking_lot::RwLock;
use tracing::trace;

use crate::route::{better, RouteEntry};

/// The connector's routing table.
///
/// Reads (`next_hop`) clone the current snapshot `Arc` under a brief read
/// lock and then scan it lock-free; writes (`add_route`/`remove_route`)
/// build a new `Vec` and swap it in under a write lock, so a lookup never
/// observes a half-applied update. Mutations are rare; lookups are the fast
/// path.
pub struct RoutingTable {
    routes: RwLock<Arc<Vec<RouteEntry>>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        RoutingTable {
            routes: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Inserts `route`, replacing any existing entry with the same `prefix`
    /// and `next_hop`.
    pub fn add_route(&self, route: RouteEntry) {
        let mut guard = self.routes.write();
        let mut routes = (**guard).clone();
        routes.retain(|r| !(r.prefix == route.prefix && r.next_hop == route.next_hop));
        trace!(prefix = %route.prefix, next_hop = %route.next_hop, "adding route");
        routes.push(route);
        *guard = Arc::new(routes);
    }

    /// Removes the route matching both `prefix` and `next_hop`. Returns
    /// `true` if a route was removed.
    pub fn remove_route(&self, prefix: &str, next_hop: &str) -> bool {
        let mut guard = self.routes.write();
        let mut routes = (**guard).clone();
        let before = routes.len();
        routes.retain(|r| !(r.prefix == prefix && r.next_hop == next_hop));
        let removed = routes.len() != before;
        if removed {
            trace!(prefix, next_hop, "removed route");
            *guard = Arc::new(routes);
        }
        removed
    }

    /// A point-in-time snapshot of every route currently registered.
    pub fn list_routes(&self) -> Vec<RouteEntry> {
        (**self.routes.read()).clone()
    }

    /// Longest-prefix match for `destination`, tie-broken by priority,
    /// weight, then `next_hop` (see `route::better`).
    pub fn next_hop(&self, destination: &Address) -> Result<RouteEntry, RoutingTableError> {
        let snapshot = self.routes.read().clone();
        let dest: &[u8] = destination.as_ref();

        let mut winner: Option<&RouteEntry> = None;
        for candidate in snapshot.iter() {
            if !candidate.matches(dest) {
                continue;
            }
            winner = match winner {
                None => Some(candidate),
                Some(incumbent) if better(candidate, incumbent) => Some(candidate),
                Some(incumbent) => Some(incumbent),
            };
        }

        winner.cloned().ok_or_else(|| {
            RoutingTableError::NoRoute(destination.to_string())
        })
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        RoutingTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &'static str) -> Address {
        Address::new(s.as_bytes())
    }

    #[test]
    fn longest_prefix_wins() {
        let table = RoutingTable::new();
        table.add_route(RouteEntry::new("g", "peer-default"));
        table.add_route(RouteEntry::new("g.alice", "peer-alice"));

        let route = table.next_hop(&addr("g.alice.sub")).unwrap();
        assert_eq!(route.next_hop, "peer-alice");

        let route = table.next_hop(&addr("g.bob")).unwrap();
        assert_eq!(route.next_hop, "peer-default");
    }

    #[test]
    fn catch_all_matches_when_no_other_route_does() {
        let table = RoutingTable::new();
        table.add_route(RouteEntry::new("", "peer-default"));
        let route = table.next_hop(&addr("g.anyone")).unwrap();
        assert_eq!(route.next_hop, "peer-default");
    }

    #[test]
    fn no_matching_route_is_an_error() {
        let table = RoutingTable::new();
        table.add_route(RouteEntry::new("g.alice", "peer-alice"));
        let err = table.next_hop(&addr("g.bob")).unwrap_err();
        assert_eq!(err.to_reject_code(), ilp_packet::ErrorCode::F02_UNREACHABLE);
    }

    #[test]
    fn tie_break_by_priority_then_weight_then_next_hop() {
        let table = RoutingTable::new();
        table.add_route(RouteEntry::new("g.alice", "peer-b").with_priority(1));
        table.add_route(RouteEntry::new("g.alice", "peer-a").with_priority(0));
        let route = table.next_hop(&addr("g.alice")).unwrap();
        assert_eq!(route.next_hop, "peer-a");
    }

    #[test]
    fn add_route_replaces_existing_prefix_and_next_hop_pair() {
        let table = RoutingTable::new();
        table.add_route(RouteEntry::new("g.alice", "peer-a").with_weight(1));
        table.add_route(RouteEntry::new("g.alice", "peer-a").with_weight(9));
        let routes = table.list_routes();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].weight, 9);
    }

    #[test]
    fn remove_route_drops_only_the_matching_entry() {
        let table = RoutingTable::new();
        table.add_route(RouteEntry::new("g.alice", "peer-a"));
        table.add_route(RouteEntry::new("g.bob", "peer-b"));
        assert!(table.remove_route("g.alice", "peer-a"));
        assert!(!table.remove_route("g.alice", "peer-a"));
        assert_eq!(table.list_routes().len(), 1);
    }

    #[test]
    fn mutations_are_never_observed_half_applied() {
        let table = Arc::new(RoutingTable::new());
        table.add_route(RouteEntry::new("g", "peer-default"));

        let writer_table = table.clone();
        let writer = std::thread::spawn(move || {
            for i in 0..100 {
                writer_table.add_route(RouteEntry::new("g.alice", format!("peer-{}", i)));
            }
        });

        for _ in 0..100 {
            // Every lookup must resolve to some valid, complete route entry;
            // it must never observe a torn/partial write.
            let route = table.next_hop(&addr("g.alice")).unwrap();
            assert!(route.next_hop == "peer-default" || route.next_hop.starts_with("peer-"));
        }

        writer.join().unwrap();
    }
}
