//! Watch Service
//!
//! Applies watch changes to the subscription registry and forwards the
//! resulting upstream obligations to the feed.

use std::sync::Arc;

use crate::application::ports::UpstreamPort;
use crate::domain::streaming::Symbol;
use crate::domain::subscription::{ConnectionId, SubscriptionRegistry, WatchChange};

/// Applies client watches and keeps upstream interest in step with them.
///
/// Upstream commands are issued from inside the registry critical section,
/// unsubscribe first, so the feed sees them in derivation order.
#[derive(Clone)]
pub struct WatchService {
    registry: Arc<SubscriptionRegistry>,
    upstream: Arc<dyn UpstreamPort>,
}

impl std::fmt::Debug for WatchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchService")
            .field("registry", &self.registry.stats())
            .finish_non_exhaustive()
    }
}

impl WatchService {
    /// Create a new watch service.
    #[must_use]
    pub fn new(registry: Arc<SubscriptionRegistry>, upstream: Arc<dyn UpstreamPort>) -> Self {
        Self { registry, upstream }
    }

    /// Point `conn` at `symbol`, replacing its previous watch.
    pub fn watch(&self, conn: ConnectionId, symbol: Symbol) -> WatchChange {
        let change = self
            .registry
            .set_watch_with(conn, symbol, |change| self.dispatch(change));

        tracing::debug!(
            conn_id = %conn,
            subscribed = ?change.subscribe,
            unsubscribed = ?change.unsubscribe,
            "Watch updated"
        );

        change
    }

    /// Drop whatever `conn` watches. Safe to call more than once.
    pub fn release(&self, conn: ConnectionId) -> Option<Symbol> {
        let released = self
            .registry
            .clear_watch_with(conn, |change| self.dispatch(change));

        if let Some(symbol) = &released {
            tracing::debug!(conn_id = %conn, symbol = %symbol, "Last watcher released symbol");
        }

        released
    }

    /// The registry this service mutates.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    fn dispatch(&self, change: &WatchChange) {
        if let Some(symbol) = &change.unsubscribe {
            self.upstream.unsubscribe(symbol);
        }
        if let Some(symbol) = &change.subscribe {
            self.upstream.subscribe(symbol);
        }
    }
}

#[cfg(test)]
mod tests {
    use mockall::Sequence;
    use mockall::predicate::eq;

    use super::*;
    use crate::application::ports::MockUpstreamPort;

    fn sym(raw: &str) -> Symbol {
        Symbol::normalize(raw).unwrap()
    }

    fn service(upstream: MockUpstreamPort) -> WatchService {
        WatchService::new(Arc::new(SubscriptionRegistry::new()), Arc::new(upstream))
    }

    #[test]
    fn first_watch_subscribes_once() {
        let mut upstream = MockUpstreamPort::new();
        upstream
            .expect_subscribe()
            .with(eq(sym("AAPL")))
            .times(1)
            .return_const(());
        upstream.expect_unsubscribe().never();

        let service = service(upstream);
        service.watch(ConnectionId::from_raw(1), sym("aapl"));
        service.watch(ConnectionId::from_raw(2), sym("AAPL"));
    }

    #[test]
    fn switching_symbol_unsubscribes_before_subscribing() {
        let mut seq = Sequence::new();
        let mut upstream = MockUpstreamPort::new();
        upstream
            .expect_subscribe()
            .with(eq(sym("AAPL")))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        upstream
            .expect_unsubscribe()
            .with(eq(sym("AAPL")))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        upstream
            .expect_subscribe()
            .with(eq(sym("MSFT")))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());

        let service = service(upstream);
        let conn = ConnectionId::from_raw(1);
        service.watch(conn, sym("AAPL"));
        service.watch(conn, sym("MSFT"));
    }

    #[test]
    fn release_of_last_watcher_unsubscribes() {
        let mut upstream = MockUpstreamPort::new();
        upstream.expect_subscribe().times(1).return_const(());
        upstream
            .expect_unsubscribe()
            .with(eq(sym("TSLA")))
            .times(1)
            .return_const(());

        let service = service(upstream);
        let (a, b) = (ConnectionId::from_raw(1), ConnectionId::from_raw(2));
        service.watch(a, sym("TSLA"));
        service.watch(b, sym("TSLA"));

        assert_eq!(service.release(a), None);
        assert_eq!(service.release(b), Some(sym("TSLA")));
        assert_eq!(service.release(b), None);
    }

    #[test]
    fn release_without_watch_is_silent() {
        let mut upstream = MockUpstreamPort::new();
        upstream.expect_subscribe().never();
        upstream.expect_unsubscribe().never();

        let service = service(upstream);
        assert_eq!(service.release(ConnectionId::from_raw(42)), None);
    }
}
