//! Downstream Client Adapter
//!
//! WebSocket server, connection hub and client protocol.

pub mod hub;
pub mod protocol;
pub mod server;

pub use hub::{ConnectionSession, DownstreamHub};
pub use protocol::{ClientRequest, ProtocolError, parse_client_message};
pub use server::router;
