use std::error::Error as StdError;

use ilp_packet::ErrorCode;
use thiserror::Error;

/// Errors raised by the bilateral account manager.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AccountError {
    #[error("{0}")]
    Other(#[from] Box<dyn StdError + Send + Sync + 'static>),

    #[error("no account registered for peer: {0}")]
    UnknownPeer(String),

    #[error("insufficient credit for peer {peer_id}: requested {requested}, available {available}")]
    InsufficientCredit {
        peer_id: String,
        requested: u128,
        available: u128,
    },

    #[error("unknown reservation token: {0}")]
    UnknownReservation(u64),

    #[error("reservation {0} already settled")]
    ReservationAlreadyResolved(u64),
}

impl AccountError {
    pub fn to_reject_code(&self) -> ErrorCode {
        match self {
            AccountError::InsufficientCredit { .. } => ErrorCode::T04_INSUFFICIENT_LIQUIDITY,
            AccountError::UnknownPeer(_) => ErrorCode::F02_UNREACHABLE,
            AccountError::UnknownReservation(_) | AccountError::ReservationAlreadyResolved(_) => {
                ErrorCode::T00_INTERNAL_ERROR
            }
            AccountError::Other(_) => ErrorCode::T00_INTERNAL_ERROR,
        }
    }
}
