//! Relay Service
//!
//! Routes each tick to exactly the connections watching its symbol.

use std::sync::Arc;

use crate::application::ports::DownstreamPort;
use crate::domain::streaming::{ServerMessage, Tick};
use crate::domain::subscription::SubscriptionRegistry;

/// Fans ticks out to their watchers.
#[derive(Clone)]
pub struct RelayService {
    registry: Arc<SubscriptionRegistry>,
    downstream: Arc<dyn DownstreamPort>,
}

impl std::fmt::Debug for RelayService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayService").finish_non_exhaustive()
    }
}

impl RelayService {
    /// Create a new relay service.
    #[must_use]
    pub fn new(registry: Arc<SubscriptionRegistry>, downstream: Arc<dyn DownstreamPort>) -> Self {
        Self {
            registry,
            downstream,
        }
    }

    /// Deliver `tick` to every current watcher of its symbol.
    ///
    /// Returns the number of connections the update was queued for.
    pub fn on_tick(&self, tick: &Tick) -> usize {
        let watchers = self.registry.watchers_of(tick.symbol.as_str());
        if watchers.is_empty() {
            tracing::trace!(symbol = %tick.symbol, "Tick without watchers");
            return 0;
        }

        self.downstream
            .deliver(&watchers, &ServerMessage::price_update(tick))
    }
}
