//! Downstream Port (Driven Port)
//!
//! Interface for delivering messages to connected clients.

use crate::domain::streaming::ServerMessage;
use crate::domain::subscription::ConnectionId;

/// Port for best-effort delivery to downstream connections.
#[cfg_attr(test, mockall::automock)]
pub trait DownstreamPort: Send + Sync {
    /// Send `message` to every connection in `connections` that is still open.
    ///
    /// Connections found closed, or whose outbound queue is full, are
    /// skipped. Returns the number of connections the message was queued for.
    fn deliver(&self, connections: &[ConnectionId], message: &ServerMessage) -> usize;
}
