//! Downstream Connection Hub
//!
//! Tracks live client connections, routes their requests to the watch
//! service, and delivers fan-out messages to them.
//!
//! # Architecture
//!
//! Every connection owns a bounded outbound queue drained by its own writer
//! task. Delivery never blocks: a full queue drops the message for that
//! connection only, and a connection whose queue stays full for too many
//! consecutive deliveries is closed as a slow consumer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use super::protocol::{self, ClientRequest, ProtocolError};
use crate::application::ports::DownstreamPort;
use crate::application::services::WatchService;
use crate::domain::streaming::{ServerMessage, Symbol};
use crate::domain::subscription::ConnectionId;
use crate::infrastructure::config::DownstreamSettings;
use crate::infrastructure::metrics;

// =============================================================================
// Connection Session
// =============================================================================

/// Transport-side half of a registered connection.
#[derive(Debug)]
pub struct ConnectionSession {
    /// Connection id.
    pub id: ConnectionId,
    /// Messages to write to the socket, in order.
    pub outbound: mpsc::Receiver<ServerMessage>,
    /// Cancelled when the hub wants the connection closed.
    pub closed: CancellationToken,
}

#[derive(Debug)]
struct Outbound {
    tx: mpsc::Sender<ServerMessage>,
    closer: CancellationToken,
    strikes: AtomicU32,
}

// =============================================================================
// Downstream Hub
// =============================================================================

/// Registry of live downstream connections.
#[derive(Debug)]
pub struct DownstreamHub {
    connections: RwLock<HashMap<ConnectionId, Outbound>>,
    watch: WatchService,
    settings: DownstreamSettings,
    shutdown: CancellationToken,
}

impl DownstreamHub {
    /// Create a hub. Cancelling `shutdown` closes every connection.
    #[must_use]
    pub fn new(
        watch: WatchService,
        settings: DownstreamSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            watch,
            settings,
            shutdown,
        }
    }

    /// Register a new connection with no watch and queue its greeting.
    pub fn connect(&self) -> ConnectionSession {
        let id = ConnectionId::generate();
        let (tx, outbound) = mpsc::channel(self.settings.outbound_buffer.max(1));
        let closed = self.shutdown.child_token();

        if tx.try_send(ServerMessage::greeting()).is_err() {
            tracing::debug!(conn_id = %id, "Greeting not queued");
        }

        let count = {
            let mut connections = self.connections.write();
            connections.insert(
                id,
                Outbound {
                    tx,
                    closer: closed.clone(),
                    strikes: AtomicU32::new(0),
                },
            );
            connections.len()
        };
        metrics::set_downstream_connections(count);
        tracing::info!(conn_id = %id, connections = count, "Client connected");

        ConnectionSession {
            id,
            outbound,
            closed,
        }
    }

    /// Handle a text frame from `conn`.
    pub fn handle_text(&self, conn: ConnectionId, text: &str) {
        tracing::debug!(conn_id = %conn, len = text.len(), "Received client message");
        self.apply(conn, protocol::parse_client_message(text));
    }

    /// Handle a binary frame from `conn`.
    pub fn handle_binary(&self, conn: ConnectionId, data: &[u8]) {
        tracing::debug!(conn_id = %conn, len = data.len(), "Received binary client message");
        self.apply(conn, protocol::parse_client_binary(data));
    }

    fn apply(&self, conn: ConnectionId, request: Result<ClientRequest, ProtocolError>) {
        match request {
            Ok(ClientRequest::Subscribe(symbol)) => {
                tracing::info!(conn_id = %conn, symbol = %symbol, "Client subscribed");
                if !self.watch.watch(conn, symbol).is_empty() {
                    self.publish_interest();
                }
            }
            Err(e) => {
                tracing::info!(conn_id = %conn, error = %e, "Rejected client message");
                self.reply(conn, ServerMessage::error(e.reply()));
            }
        }
    }

    /// Queue a message for one connection.
    fn reply(&self, conn: ConnectionId, message: ServerMessage) {
        let connections = self.connections.read();
        let Some(outbound) = connections.get(&conn) else {
            return;
        };
        if let Err(e) = outbound.tx.try_send(message) {
            tracing::debug!(conn_id = %conn, error = %e, "Reply not queued");
        }
    }

    /// Unregister `conn` and release its watch. Safe to call more than once.
    pub fn disconnect(&self, conn: ConnectionId) -> Option<Symbol> {
        let removed = {
            let mut connections = self.connections.write();
            connections.remove(&conn).map(|_| connections.len())
        };

        let released = self.watch.release(conn);
        if released.is_some() {
            self.publish_interest();
        }

        if let Some(count) = removed {
            metrics::set_downstream_connections(count);
            tracing::info!(conn_id = %conn, connections = count, "Client disconnected");
        }

        released
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Close every connection, now and in future.
    pub fn close_all(&self) {
        self.shutdown.cancel();
    }

    /// The watch service requests are routed to.
    #[must_use]
    pub const fn watch(&self) -> &WatchService {
        &self.watch
    }

    fn publish_interest(&self) {
        metrics::set_upstream_symbols(self.watch.registry().stats().symbol_count);
    }

    /// Count a full-queue delivery; close the connection at the limit.
    fn strike(&self, conn: ConnectionId, outbound: &Outbound) {
        metrics::record_price_update_dropped();
        let strikes = outbound.strikes.fetch_add(1, Ordering::Relaxed) + 1;

        if strikes >= self.settings.slow_consumer_strikes && !outbound.closer.is_cancelled() {
            tracing::warn!(conn_id = %conn, strikes, "Closing slow consumer");
            metrics::record_slow_consumer_dropped();
            outbound.closer.cancel();
        }
    }
}

impl DownstreamPort for DownstreamHub {
    fn deliver(&self, connections: &[ConnectionId], message: &ServerMessage) -> usize {
        let live = self.connections.read();
        let mut sent = 0;

        for conn in connections {
            let Some(outbound) = live.get(conn) else {
                continue;
            };
            if outbound.closer.is_cancelled() {
                continue;
            }

            match outbound.tx.try_send(message.clone()) {
                Ok(()) => {
                    outbound.strikes.store(0, Ordering::Relaxed);
                    sent += 1;
                }
                Err(TrySendError::Full(_)) => self.strike(*conn, outbound),
                Err(TrySendError::Closed(_)) => {}
            }
        }

        sent
    }
}
