use std::sync::Arc;

use async_trait::async_trait;
use ilp_accounts::{AccountManager, Direction, ReservationToken};
use ilp_packet::Address;
use tracing::{trace, warn};

use crate::reject::reject;
use crate::types::{IlpResult, OutgoingRequest, OutgoingService};

/// Reserves credit on both sides of a forward — debiting the inbound peer
/// and crediting the outbound peer — before calling `next`, and commits or
/// rolls back both reservations together depending on the outcome.
///
/// Both reservations move as one unit: a Fulfill commits both, and a Reject
/// (or any locally-raised failure) rolls both back. There is no partial
/// state where only one side of a forward is reserved once this call
/// returns.
pub struct BalanceService<N> {
    local_address: Address,
    accounts: Arc<AccountManager>,
    next: N,
}

impl<N> BalanceService<N> {
    pub fn new(local_address: Address, accounts: Arc<AccountManager>, next: N) -> Self {
        BalanceService { local_address, accounts, next }
    }

    fn rollback(&self, tokens: &[ReservationToken]) {
        for token in tokens {
            if let Err(err) = self.accounts.rollback(token) {
                warn!(peer_id = token.peer_id(), error = %err, "failed to roll back a reservation");
            }
        }
    }

    fn commit(&self, tokens: &[ReservationToken]) {
        for token in tokens {
            if let Err(err) = self.accounts.commit(token) {
                warn!(peer_id = token.peer_id(), error = %err, "failed to commit a reservation");
            }
        }
    }
}

#[async_trait]
impl<N: OutgoingService> OutgoingService for BalanceService<N> {
    async fn send_request(&self, request: OutgoingRequest) -> IlpResult {
        let inbound_token = match self.accounts.reserve(
            &request.from_peer,
            request.original_amount as u128,
            Direction::Inbound,
        ) {
            Ok(token) => token,
            Err(err) => {
                warn!(peer_id = request.from_peer.as_str(), error = %err, "inbound reservation failed");
                return Err(reject(&self.local_address, err.to_reject_code(), b""));
            }
        };

        let outbound_amount = request.prepare.amount() as u128;
        let outbound_token = match self.accounts.reserve(&request.to_peer, outbound_amount, Direction::Outbound) {
            Ok(token) => token,
            Err(err) => {
                warn!(peer_id = request.to_peer.as_str(), error = %err, "outbound reservation failed");
                self.rollback(&[inbound_token]);
                return Err(reject(&self.local_address, err.to_reject_code(), b""));
            }
        };

        trace!(
            from_peer = request.from_peer.as_str(),
            to_peer = request.to_peer.as_str(),
            "both reservations in place, forwarding"
        );

        match self.next.send_request(request).await {
            Ok(fulfill) => {
                self.commit(&[inbound_token, outbound_token]);
                Ok(fulfill)
            }
            Err(reject_packet) => {
                self.rollback(&[inbound_token, outbound_token]);
                Err(reject_packet)
            }
        }
    }
}
