use std::string::FromUtf8Error;

use thiserror::Error;

use super::AddressError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid utf8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("invalid utf8: {0}")]
    FromUtf8(#[from] FromUtf8Error),
    #[error("invalid timestamp: {0}")]
    Chrono(#[from] chrono::ParseError),
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] AddressError),
    #[error("invalid packet: {0}")]
    InvalidPacket(String),
}
