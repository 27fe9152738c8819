use std::error::Error as StdError;

use ilp_packet::ErrorCode;
use thiserror::Error;

/// Errors raised by the routing table.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RoutingTableError {
    #[error("{0}")]
    Other(#[from] Box<dyn StdError + Send + Sync + 'static>),

    #[error("no route found for destination: {0}")]
    NoRoute(String),

    #[error("invalid route prefix: {0}")]
    InvalidPrefix(String),
}

impl RoutingTableError {
    pub fn to_reject_code(&self) -> ErrorCode {
        match self {
            RoutingTableError::NoRoute(_) => ErrorCode::F02_UNREACHABLE,
            RoutingTableError::InvalidPrefix(_) => ErrorCode::F01_INVALID_PACKET,
            RoutingTableError::Other(_) => ErrorCode::T00_INTERNAL_ERROR,
        }
    }
}
