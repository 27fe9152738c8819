use ilp_packet::{Address, ErrorCode, Reject, RejectBuilder};

/// Builds a Reject triggered by `local_address`, the shape every layer in
/// this pipeline uses to synthesize a protocol-level error rather than
/// propagate one read off the wire.
pub fn reject(local_address: &Address, code: ErrorCode, message: &[u8]) -> Reject {
    RejectBuilder {
        code,
        message,
        triggered_by: Some(local_address),
        data: &[],
    }
    .build()
}
