use std::sync::Arc;

use async_trait::async_trait;
use ilp_packet::{Address, PrepareBuilder};
use ilp_router::{AmountTransform, Identity, RoutingTable};
use tracing::trace;

use crate::reject::reject;
use crate::types::{IlpResult, IncomingRequest, IncomingService, OutgoingService};

/// Looks up the next hop for an inbound Prepare's destination, applies the
/// configured amount transform, and hands the result to the outgoing half
/// of the pipeline. Terminal on the incoming side: whatever `next` (the
/// balance/BTP-send chain) returns is returned as-is.
pub struct RouterService<O> {
    local_address: Address,
    table: Arc<RoutingTable>,
    transform: Arc<dyn AmountTransform>,
    next: O,
}

impl<O> RouterService<O> {
    pub fn new(local_address: Address, table: Arc<RoutingTable>, next: O) -> Self {
        RouterService { local_address, table, transform: Arc::new(Identity), next }
    }

    pub fn with_transform(
        local_address: Address,
        table: Arc<RoutingTable>,
        transform: Arc<dyn AmountTransform>,
        next: O,
    ) -> Self {
        RouterService { local_address, table, transform, next }
    }
}

#[async_trait]
impl<O: OutgoingService> IncomingService for RouterService<O> {
    async fn handle_request(&self, request: IncomingRequest) -> IlpResult {
        let route = self
            .table
            .next_hop(&request.prepare.destination())
            .map_err(|err| reject(&self.local_address, err.to_reject_code(), b""))?;

        let amount_in = request.prepare.amount();
        let amount_out = self.transform.transform(&route, amount_in);
        trace!(
            destination = %request.prepare.destination(),
            next_hop = route.next_hop.as_str(),
            amount_in,
            amount_out,
            "route resolved"
        );

        let prepare = if amount_out == amount_in {
            request.prepare
        } else {
            let mut condition = [0u8; 32];
            condition.copy_from_slice(request.prepare.execution_condition());
            PrepareBuilder {
                amount: amount_out,
                expires_at: request.prepare.expires_at(),
                execution_condition: &condition,
                destination: request.prepare.destination(),
                data: request.prepare.data(),
            }
            .build()
        };

        let outgoing = request.from_peer;
        self.next
            .send_request(crate::types::OutgoingRequest {
                from_peer: outgoing,
                to_peer: route.next_hop,
                original_amount: amount_in,
                prepare,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use ilp_packet::{ErrorCode, FulfillBuilder, PrepareBuilder};
    use ilp_router::RouteEntry;

    use super::*;
    use crate::types::OutgoingRequest;

    fn local_address() -> Address {
        Address::new(b"example.connector")
    }

    fn prepare(destination: &'static [u8], amount: u64) -> ilp_packet::Prepare {
        PrepareBuilder {
            amount,
            expires_at: SystemTime::now() + std::time::Duration::from_secs(30),
            execution_condition: &[0u8; 32],
            destination: Address::new(destination),
            data: b"",
        }
        .build()
    }

    struct RecordingNext;
    #[async_trait]
    impl OutgoingService for RecordingNext {
        async fn send_request(&self, request: OutgoingRequest) -> IlpResult {
            assert_eq!(request.to_peer, "peer-alice");
            Ok(FulfillBuilder { fulfillment: &[0u8; 32], data: b"" }.build())
        }
    }

    #[tokio::test]
    async fn routes_to_the_matching_peer() {
        let table = Arc::new(RoutingTable::new());
        table.add_route(RouteEntry::new("example.alice", "peer-alice"));
        let service = RouterService::new(local_address(), table, RecordingNext);

        let request = IncomingRequest { from_peer: "upstream".to_string(), prepare: prepare(b"example.alice.sub", 100) };
        let result = service.handle_request(request).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn no_route_is_rejected_f02() {
        let table = Arc::new(RoutingTable::new());
        let service = RouterService::new(local_address(), table, RecordingNext);

        let request = IncomingRequest { from_peer: "upstream".to_string(), prepare: prepare(b"example.nowhere", 100) };
        let result = service.handle_request(request).await;
        assert_eq!(result.unwrap_err().code(), ErrorCode::F02_UNREACHABLE);
    }

    struct HalvingTransform;
    impl AmountTransform for HalvingTransform {
        fn transform(&self, _route: &RouteEntry, amount_in: u64) -> u64 {
            amount_in / 2
        }
    }

    struct AssertsHalvedAmount;
    #[async_trait]
    impl OutgoingService for AssertsHalvedAmount {
        async fn send_request(&self, request: OutgoingRequest) -> IlpResult {
            assert_eq!(request.original_amount, 100);
            assert_eq!(request.prepare.amount(), 50);
            Ok(FulfillBuilder { fulfillment: &[0u8; 32], data: b"" }.build())
        }
    }

    #[tokio::test]
    async fn applies_the_configured_amount_transform() {
        let table = Arc::new(RoutingTable::new());
        table.add_route(RouteEntry::new("example.alice", "peer-alice"));
        let service = RouterService::with_transform(
            local_address(),
            table,
            Arc::new(HalvingTransform),
            AssertsHalvedAmount,
        );

        let request = IncomingRequest { from_peer: "upstream".to_string(), prepare: prepare(b"example.alice", 100) };
        let result = service.handle_request(request).await;
        assert!(result.is_ok());
    }
}
