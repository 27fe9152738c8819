use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ilp_btp::BtpTransport;
use ilp_errors::{normalize_downstream_code, BtpError};
use ilp_packet::{Address, ErrorCode, Packet};
use tracing::warn;

use crate::reject::reject;
use crate::types::{IlpResult, OutgoingRequest, OutgoingService};

/// Default ceiling on how long a single BTP round trip is allowed to take
/// once an outgoing deadline has already been computed by the expiry stage;
/// the actual deadline passed to the transport is the lesser of this and
/// the Prepare's remaining time-to-expiry.
const MAX_FORWARD_DEADLINE: Duration = Duration::from_secs(30);

/// Terminal stage of the outgoing pipeline: encodes the Prepare and sends
/// it over BTP to `request.to_peer`, decoding whatever comes back.
pub struct BtpSendService {
    local_address: Address,
    transport: Arc<BtpTransport>,
}

impl BtpSendService {
    pub fn new(local_address: Address, transport: Arc<BtpTransport>) -> Self {
        BtpSendService { local_address, transport }
    }
}

#[async_trait]
impl OutgoingService for BtpSendService {
    async fn send_request(&self, request: OutgoingRequest) -> IlpResult {
        let to_peer = request.to_peer.clone();
        let remaining = request
            .prepare
            .expires_at()
            .duration_since(std::time::SystemTime::now())
            .unwrap_or(Duration::from_secs(0));
        let deadline = std::cmp::min(MAX_FORWARD_DEADLINE, remaining);
        let packet = Packet::from(request.prepare);

        match self.transport.send_request(&to_peer, packet, deadline).await {
            Ok(Packet::Fulfill(fulfill)) => Ok(fulfill),
            Ok(Packet::Reject(downstream_reject)) => {
                let code = normalize_downstream_code(downstream_reject.code());
                Err(reject(&self.local_address, code, downstream_reject.message()))
            }
            Ok(Packet::Prepare(_)) => {
                warn!(to_peer = to_peer.as_str(), "next hop replied with a Prepare, which is a protocol violation");
                Err(reject(&self.local_address, ErrorCode::F99_APPLICATION_ERROR, b"next hop returned a Prepare"))
            }
            Err(BtpError::Timeout(_)) => {
                warn!(to_peer = to_peer.as_str(), "request to next hop timed out");
                Err(reject(&self.local_address, ErrorCode::R00_TRANSFER_TIMED_OUT, b""))
            }
            Err(BtpError::ConnectionLost(_)) | Err(BtpError::NotConnected(_)) => {
                warn!(to_peer = to_peer.as_str(), "connection to next hop is unavailable");
                Err(reject(&self.local_address, ErrorCode::T01_PEER_UNREACHABLE, b""))
            }
            Err(err) => {
                warn!(to_peer = to_peer.as_str(), error = %err, "BTP transport error forwarding to next hop");
                Err(reject(&self.local_address, err.to_reject_code(), b""))
            }
        }
    }
}
