//! # ilp-errors
//!
//! Per-subsystem error types for the connector core, one `thiserror` enum
//! per owning subsystem, each able to map itself onto the Reject-code table
//! the forwarding pipeline uses to answer a peer.
//!
//! The codec's own error type, `ilp_packet::ParseError`, is the error kind
//! for the Codec row of that table and is re-exported here for convenience.

mod account_error;
mod btp_error;
mod forward_error;
mod routing_table_error;

pub use self::account_error::AccountError;
pub use self::btp_error::BtpError;
pub use self::forward_error::{normalize_downstream_code, ForwardError};
pub use self::routing_table_error::RoutingTableError;

pub use ilp_packet::ParseError;
