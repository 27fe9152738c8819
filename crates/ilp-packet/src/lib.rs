//! # ilp-packet
//!
//! Interledger (ILP) Prepare/Fulfill/Reject packet serialization and
//! deserialization (ASN.1 OER on the wire).

mod address;

mod error;
mod errors;
#[cfg(test)]
mod fixtures;
pub mod hex;
pub mod oer;
mod packet;

pub use self::address::{Addr, Address, AddressError};
pub use self::error::{ErrorClass, ErrorCode};
pub use self::errors::ParseError;

pub use self::packet::{Fulfill, Packet, PacketType, Prepare, Reject};
pub use self::packet::{FulfillBuilder, PrepareBuilder, RejectBuilder};
pub use self::packet::{MAX_DATA_LEN, MAX_MESSAGE_LEN};
