use std::sync::Arc;

use async_trait::async_trait;
use ilp_packet::{Fulfill, Prepare, Reject};

/// Result of handling one Prepare: a Fulfill on success, a Reject otherwise.
pub type IlpResult = Result<Fulfill, Reject>;

/// A Prepare arriving from a peer (or from the local `send_packet` API,
/// which uses its own peer id as `from_peer`), not yet routed.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub from_peer: String,
    pub prepare: Prepare,
}

/// A Prepare with its next hop already chosen by the router.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub from_peer: String,
    pub to_peer: String,
    pub original_amount: u64,
    pub prepare: Prepare,
}

impl IncomingRequest {
    pub fn into_outgoing(self, to_peer: String) -> OutgoingRequest {
        OutgoingRequest {
            from_peer: self.from_peer,
            original_amount: self.prepare.amount(),
            prepare: self.prepare,
            to_peer,
        }
    }
}

/// One link in the inbound half of the forwarding pipeline.
#[async_trait]
pub trait IncomingService: Send + Sync {
    async fn handle_request(&self, request: IncomingRequest) -> IlpResult;
}

/// One link in the outbound half of the forwarding pipeline.
#[async_trait]
pub trait OutgoingService: Send + Sync {
    async fn send_request(&self, request: OutgoingRequest) -> IlpResult;
}

// Lets a shared, externally-held layer (e.g. the Connector Node keeping its
// own handle to the local-delivery layer to push handler updates into it)
// still slot into the pipeline by value.
#[async_trait]
impl<T: IncomingService + ?Sized> IncomingService for Arc<T> {
    async fn handle_request(&self, request: IncomingRequest) -> IlpResult {
        (**self).handle_request(request).await
    }
}

#[async_trait]
impl<T: OutgoingService + ?Sized> OutgoingService for Arc<T> {
    async fn send_request(&self, request: OutgoingRequest) -> IlpResult {
        (**self).send_request(request).await
    }
}
