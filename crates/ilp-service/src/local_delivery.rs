use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use ilp_packet::{Address, ErrorCode, FulfillBuilder, Prepare};
use parking_lot::{Mutex, RwLock};
use ring::digest::{digest, SHA256};
use tracing::{trace, warn};

use crate::reject::reject;
use crate::types::{IlpResult, IncomingRequest, IncomingService};

/// What a local-delivery hook decides about a Prepare addressed to this
/// connector itself.
pub enum LocalDeliveryOutcome {
    /// Accept the payment. `fulfillment`, if given, is used as-is; otherwise
    /// the default `SHA-256(Prepare.data)` preimage is computed.
    Accept { fulfillment: Option<[u8; 32]> },
    Reject { code: ErrorCode, message: Vec<u8> },
}

/// An external collaborator that decides what happens to Prepares addressed
/// to this connector's own local prefix (STREAM receivers, SPSP endpoints,
/// or any other locally-terminating application).
#[async_trait]
pub trait LocalDeliveryHandler: Send + Sync {
    async fn handle(&self, prepare: &Prepare, source_peer: &str) -> LocalDeliveryOutcome;
}

/// Routes Prepares whose destination falls under this connector's own
/// prefix to a configured `LocalDeliveryHandler`, and lets everything else
/// fall through to `next` (the router stage). Rejects with `F02` if the
/// destination is local but no handler has been configured, or if the hook
/// re-enters the same local prefix before its first call has returned.
pub struct LocalDeliveryService<N> {
    local_address: Address,
    local_prefix: Address,
    handler: RwLock<Option<Arc<dyn LocalDeliveryHandler>>>,
    in_flight: Mutex<HashSet<Address>>,
    next: N,
}

impl<N> LocalDeliveryService<N> {
    /// `local_prefix` is typically `local_address` itself, but may be a
    /// shorter ancestor prefix when several local addresses should all
    /// terminate at the same handler.
    pub fn new(local_address: Address, local_prefix: Address, next: N) -> Self {
        LocalDeliveryService {
            local_address,
            local_prefix,
            handler: RwLock::new(None),
            in_flight: Mutex::new(HashSet::new()),
            next,
        }
    }

    pub fn set_handler(&self, handler: Arc<dyn LocalDeliveryHandler>) {
        *self.handler.write() = Some(handler);
    }

    async fn deliver(&self, request: &IncomingRequest) -> IlpResult {
        let handler = match self.handler.read().clone() {
            Some(handler) => handler,
            None => {
                warn!(
                    destination = %request.prepare.destination(),
                    "Prepare addressed to a local prefix but no local delivery handler is configured"
                );
                return Err(reject(&self.local_address, ErrorCode::F02_UNREACHABLE, b"no local delivery handler configured"));
            }
        };

        match handler.handle(&request.prepare, &request.from_peer).await {
            LocalDeliveryOutcome::Accept { fulfillment } => {
                let mut condition = [0u8; 32];
                condition.copy_from_slice(request.prepare.execution_condition());
                let fulfillment = fulfillment.unwrap_or_else(|| {
                    let mut preimage = [0u8; 32];
                    preimage.copy_from_slice(digest(&SHA256, request.prepare.data()).as_ref());
                    preimage
                });
                let generated = digest(&SHA256, &fulfillment);
                if generated.as_ref() == condition {
                    Ok(FulfillBuilder { fulfillment: &fulfillment, data: b"" }.build())
                } else {
                    warn!("local delivery handler produced a fulfillment that does not match the execution condition");
                    Err(reject(&self.local_address, ErrorCode::F05_WRONG_CONDITION, b"fulfillment did not match condition"))
                }
            }
            LocalDeliveryOutcome::Reject { code, message } => {
                Err(reject(&self.local_address, code, &message))
            }
        }
    }
}

#[async_trait]
impl<N: IncomingService> IncomingService for LocalDeliveryService<N> {
    async fn handle_request(&self, request: IncomingRequest) -> IlpResult {
        if !self.local_prefix.is_prefix_of(&request.prepare.destination()) {
            return self.next.handle_request(request).await;
        }

        let prefix = self.local_prefix.clone();
        {
            let mut in_flight = self.in_flight.lock();
            if in_flight.contains(&prefix) {
                warn!(prefix = %prefix, "rejecting re-entrant local delivery to avoid a routing loop");
                return Err(reject(&self.local_address, ErrorCode::F02_UNREACHABLE, b"local delivery loop detected"));
            }
            in_flight.insert(prefix.clone());
        }
        trace!(prefix = %prefix, "delivering Prepare locally");
        let result = self.deliver(&request).await;
        self.in_flight.lock().remove(&prefix);
        result
    }
}
