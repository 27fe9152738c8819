use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ilp_packet::{Address, ErrorCode};
use tracing::warn;

use crate::reject::reject;
use crate::types::{IlpResult, OutgoingRequest, OutgoingService};

/// Per-hop expiry budget in milliseconds: how much of the remaining
/// time-to-expiry a single hop is allowed to claim for itself before
/// passing the packet onward.
pub const DEFAULT_HOP_EXPIRY_BUDGET_MS: u32 = 30_000;

/// The smallest outgoing expiry window, in milliseconds, this service will
/// forward; anything tighter is rejected rather than handed to a next hop
/// that is almost certain to time it out anyway.
pub const MIN_OUTGOING_EXPIRY_WINDOW_MS: u32 = 1_000;

/// Shortens an outgoing Prepare's `expires_at` to `min(inbound expiry, now +
/// hop budget)`, rejecting `R02` up front if that leaves too little time to
/// be worth forwarding.
pub struct ExpiryShortenerService<N> {
    local_address: Address,
    hop_budget_ms: u32,
    next: N,
}

impl<N> ExpiryShortenerService<N> {
    pub fn new(local_address: Address, next: N) -> Self {
        ExpiryShortenerService { local_address, hop_budget_ms: DEFAULT_HOP_EXPIRY_BUDGET_MS, next }
    }

    pub fn with_hop_budget_ms(local_address: Address, hop_budget_ms: u32, next: N) -> Self {
        ExpiryShortenerService { local_address, hop_budget_ms, next }
    }
}

#[async_trait]
impl<N: OutgoingService> OutgoingService for ExpiryShortenerService<N> {
    async fn send_request(&self, mut request: OutgoingRequest) -> IlpResult {
        let inbound_expiry = DateTime::<Utc>::from(request.prepare.expires_at());
        let capped_expiry = Utc::now() + ChronoDuration::milliseconds(i64::from(self.hop_budget_ms));
        let deadline = std::cmp::min(inbound_expiry, capped_expiry);

        if deadline - Utc::now() < ChronoDuration::milliseconds(i64::from(MIN_OUTGOING_EXPIRY_WINDOW_MS)) {
            warn!(to_peer = request.to_peer.as_str(), "outgoing expiry window too small to forward");
            return Err(reject(&self.local_address, ErrorCode::R02_INSUFFICIENT_TIMEOUT, b""));
        }

        request.prepare.set_expires_at(deadline.into());
        self.next.send_request(request).await
    }
}
