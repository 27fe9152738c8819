use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ilp_packet::{Address, ErrorCode};
use ring::digest::{digest, SHA256};
use tokio::time::timeout;
use tracing::error;

use crate::reject::reject;
use crate::types::{IlpResult, IncomingRequest, IncomingService, OutgoingRequest, OutgoingService};

/// Rejects inbound Prepares that have already expired, and — on the
/// outgoing side — bounds how long a forward waits for a response and
/// checks that a returned Fulfill's preimage actually hashes to the
/// Prepare's execution condition.
///
/// The same struct serves both positions (`IncomingService` and
/// `OutgoingService` are implemented independently of each other); which
/// one is in effect depends only on where it is wired into the pipeline.
pub struct ValidatorService<N> {
    local_address: Address,
    next: N,
}

impl<N> ValidatorService<N> {
    pub fn new(local_address: Address, next: N) -> Self {
        ValidatorService { local_address, next }
    }
}

#[async_trait]
impl<N: IncomingService> IncomingService for ValidatorService<N> {
    async fn handle_request(&self, request: IncomingRequest) -> IlpResult {
        let expires_at = DateTime::<Utc>::from(request.prepare.expires_at());
        if expires_at >= Utc::now() {
            self.next.handle_request(request).await
        } else {
            error!(from_peer = request.from_peer.as_str(), "incoming packet already expired");
            Err(reject(&self.local_address, ErrorCode::R00_TRANSFER_TIMED_OUT, b""))
        }
    }
}

#[async_trait]
impl<N: OutgoingService> OutgoingService for ValidatorService<N> {
    async fn send_request(&self, request: OutgoingRequest) -> IlpResult {
        let mut condition = [0u8; 32];
        condition.copy_from_slice(request.prepare.execution_condition());
        let expires_at = DateTime::<Utc>::from(request.prepare.expires_at());
        let time_left = expires_at - Utc::now();
        if time_left <= ChronoDuration::zero() {
            error!(to_peer = request.to_peer.as_str(), "outgoing packet already expired before forwarding");
            return Err(reject(&self.local_address, ErrorCode::R00_TRANSFER_TIMED_OUT, b""));
        }

        let to_peer = request.to_peer.clone();
        let budget = time_left.to_std().expect("checked positive above");
        let fulfill = match timeout(budget, self.next.send_request(request)).await {
            Ok(result) => result?,
            Err(_) => {
                error!(to_peer = to_peer.as_str(), "outgoing request timed out waiting for a response");
                return Err(reject(&self.local_address, ErrorCode::R00_TRANSFER_TIMED_OUT, b""));
            }
        };

        let generated = digest(&SHA256, fulfill.fulfillment());
        if generated.as_ref() == condition {
            Ok(fulfill)
        } else {
            error!(to_peer = to_peer.as_str(), "next hop returned a fulfillment that did not match the condition");
            Err(reject(&self.local_address, ErrorCode::F05_WRONG_CONDITION, b"fulfillment did not match condition"))
        }
    }
}
