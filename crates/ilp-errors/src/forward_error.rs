use std::error::Error as StdError;

use ilp_packet::{ErrorCode, ParseError};
use thiserror::Error;

use crate::{AccountError, BtpError, RoutingTableError};

/// Errors raised by the forwarding pipeline itself, layered on top of the
/// per-subsystem errors it drives (codec, routing, accounts, BTP).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ForwardError {
    #[error("{0}")]
    Other(#[from] Box<dyn StdError + Send + Sync + 'static>),

    #[error("invalid inbound packet: {0}")]
    InvalidPacket(#[from] ParseError),

    #[error(transparent)]
    Routing(#[from] RoutingTableError),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error(transparent)]
    Btp(#[from] BtpError),

    #[error("prepare already expired")]
    Expired,

    #[error("outbound window too small after applying the per-hop budget")]
    InsufficientTimeout,

    #[error("fulfillment from next hop does not match the execution condition")]
    ConditionMismatch,

    #[error("local delivery hook re-entered the same local prefix, rejecting to avoid a routing loop")]
    LocalDeliveryLoop,

    #[error("a forward is already in flight for this (peer, request id) pair")]
    DuplicateInFlight,
}

impl ForwardError {
    /// Maps this error to the Reject code the forwarding pipeline returns
    /// upstream. Any downstream code outside the standard `[FTR][0-9][0-9]`
    /// grammar is normalized to `F99` by the caller before this is consulted;
    /// this mapping only concerns errors raised locally at this hop.
    pub fn to_reject_code(&self) -> ErrorCode {
        match self {
            ForwardError::InvalidPacket(_) => ErrorCode::F01_INVALID_PACKET,
            ForwardError::Routing(err) => err.to_reject_code(),
            ForwardError::Account(err) => err.to_reject_code(),
            ForwardError::Btp(err) => err.to_reject_code(),
            ForwardError::Expired => ErrorCode::R00_TRANSFER_TIMED_OUT,
            ForwardError::InsufficientTimeout => ErrorCode::R02_INSUFFICIENT_TIMEOUT,
            ForwardError::ConditionMismatch => ErrorCode::F05_WRONG_CONDITION,
            ForwardError::LocalDeliveryLoop => ErrorCode::F02_UNREACHABLE,
            ForwardError::DuplicateInFlight => ErrorCode::F00_BAD_REQUEST,
            ForwardError::Other(_) => ErrorCode::T00_INTERNAL_ERROR,
        }
    }
}

/// Normalizes a Reject code received from a downstream peer: valid
/// `[FTR][0-9][0-9]` codes are preserved as-is, anything else becomes `F99`.
pub fn normalize_downstream_code(code: ErrorCode) -> ErrorCode {
    if code.is_well_formed() {
        code
    } else {
        ErrorCode::F99_APPLICATION_ERROR
    }
}
