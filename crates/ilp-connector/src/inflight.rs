use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ilp_btp::BtpRequestHandler;
use ilp_packet::Packet;

/// Wraps a `BtpRequestHandler`, counting requests currently being answered
/// so the Connector Node's `stop` can wait for them to drain before closing
/// connections out from under them.
pub struct InFlightTrackingHandler<H> {
    inner: H,
    in_flight: Arc<AtomicUsize>,
}

impl<H> InFlightTrackingHandler<H> {
    pub fn new(inner: H, in_flight: Arc<AtomicUsize>) -> Self {
        InFlightTrackingHandler { inner, in_flight }
    }
}

#[async_trait]
impl<H: BtpRequestHandler> BtpRequestHandler for InFlightTrackingHandler<H> {
    async fn handle_request(&self, peer_id: &str, ilp_payload: &[u8]) -> Packet {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = self.inner.handle_request(peer_id, ilp_payload).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
