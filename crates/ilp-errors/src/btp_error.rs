use std::error::Error as StdError;

use ilp_packet::ErrorCode;
use thiserror::Error;

/// Errors surfaced by the BTP transport, per the failure taxonomy it exposes
/// to the packet handler: `Timeout`, `ConnectionLost`, `AuthRejected`,
/// `FrameMalformed`, `PeerError(message)`.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BtpError {
    #[error("{0}")]
    Other(#[from] Box<dyn StdError + Send + Sync + 'static>),

    #[error("request to peer {0} timed out")]
    Timeout(String),

    #[error("connection to peer {0} was lost")]
    ConnectionLost(String),

    #[error("peer {0} rejected authentication")]
    AuthRejected(String),

    #[error("malformed BTP frame: {0}")]
    FrameMalformed(String),

    #[error("peer {peer_id} returned an error: {message}")]
    PeerError { peer_id: String, message: String },

    #[error("no connection registered for peer: {0}")]
    NotConnected(String),

    #[error("request id {0} is already outstanding on this connection")]
    DuplicateRequestId(u32),
}

impl BtpError {
    pub fn to_reject_code(&self) -> ErrorCode {
        match self {
            BtpError::Timeout(_) => ErrorCode::T01_PEER_UNREACHABLE,
            BtpError::ConnectionLost(_) | BtpError::NotConnected(_) => ErrorCode::F02_UNREACHABLE,
            BtpError::AuthRejected(_) => ErrorCode::F00_BAD_REQUEST,
            BtpError::FrameMalformed(_) => ErrorCode::F01_INVALID_PACKET,
            BtpError::PeerError { .. } => ErrorCode::F99_APPLICATION_ERROR,
            BtpError::DuplicateRequestId(_) => ErrorCode::T00_INTERNAL_ERROR,
            BtpError::Other(_) => ErrorCode::T00_INTERNAL_ERROR,
        }
    }
}
