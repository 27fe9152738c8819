//! # ilp-btp
//!
//! Bilateral Transfer Protocol (BTP) transport: the WebSocket-framed wire
//! format connector nodes speak to their peers, a client with reconnect
//! and backoff, and a server accepting inbound peer connections.

mod auth;
mod client;
mod packet;
mod server;
mod transport;

pub use self::auth::{build_auth_message, verify_auth};
pub use self::client::{spawn_client_connection, ClientConnectionHandle};
pub use self::packet::{
    BtpError as BtpWireError, BtpMessage, BtpPacket, BtpResponse, ContentType, ProtocolData, Serializable,
    AUTH_SUBPROTOCOL, AUTH_TOKEN_SUBPROTOCOL, ILP_SUBPROTOCOL,
};
pub use self::server::{BtpServer, BtpServerAuth};
pub use self::transport::{drive_connection, BtpRequestHandler, BtpTransport, ConnectionState, PeerConnectionInfo};
