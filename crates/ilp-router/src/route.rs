/// A single entry in the routing table: a destination-address prefix mapped
/// to the peer a matching Prepare should be forwarded to next.
///
/// `prefix` may be empty, in which case the route is a catch-all and matches
/// every destination; prefix matching is otherwise segment-wise, the same
/// rule `Address::is_prefix_of` applies to whole addresses.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RouteEntry {
    pub prefix: String,
    pub next_hop: String,
    pub priority: i32,
    pub weight: u32,
}

impl RouteEntry {
    pub fn new(prefix: impl Into<String>, next_hop: impl Into<String>) -> Self {
        RouteEntry {
            prefix: prefix.into(),
            next_hop: next_hop.into(),
            priority: 0,
            weight: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Segment-wise prefix test against a raw destination address, matching
    /// the rule `Address::is_prefix_of` applies, generalized to allow an
    /// empty prefix (which matches every destination).
    pub(crate) fn matches(&self, destination: &[u8]) -> bool {
        let prefix = self.prefix.as_bytes();
        if prefix.is_empty() {
            return true;
        }
        if prefix.len() > destination.len() {
            return false;
        }
        if !destination.starts_with(prefix) {
            return false;
        }
        destination.len() == prefix.len() || destination[prefix.len()] == b'.'
    }
}

/// Tie-break ordering among routes whose prefix is equally long: lower
/// `priority` wins, then higher `weight`, then lexicographically smaller
/// `next_hop`.
pub(crate) fn better(candidate: &RouteEntry, incumbent: &RouteEntry) -> bool {
    if candidate.prefix.len() != incumbent.prefix.len() {
        return candidate.prefix.len() > incumbent.prefix.len();
    }
    if candidate.priority != incumbent.priority {
        return candidate.priority < incumbent.priority;
    }
    if candidate.weight != incumbent.weight {
        return candidate.weight > incumbent.weight;
    }
    candidate.next_hop < incumbent.next_hop
}

/// A pure, deterministic transform applied to the amount of an outbound
/// Prepare once a route has been selected. The default `Identity`
/// implementation forwards the inbound amount unchanged.
pub trait AmountTransform: Send + Sync {
    fn transform(&self, route: &RouteEntry, amount_in: u64) -> u64;
}

/// The default `AmountTransform`: the outbound amount equals the inbound
/// amount.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl AmountTransform for Identity {
    fn transform(&self, _route: &RouteEntry, amount_in: u64) -> u64 {
        amount_in
    }
}
