//! Subscription Registry
//!
//! Domain state machine tracking which symbol each downstream connection
//! watches, and deriving from that the set of symbols that must be
//! subscribed on the upstream feed.
//!
//! # Design
//!
//! The registry tracks:
//! - The single symbol each connection watches (if any)
//! - The set of watchers for every symbol with at least one watcher
//!
//! Upstream interest is exactly the key set of the watcher map. A symbol
//! enters it when its first watcher arrives and leaves it when its last
//! watcher departs; every mutation reports those transitions as a
//! [`WatchChange`] so the caller can issue upstream commands.
//!
//! All operations run under one mutex, so they are linearizable with respect
//! to each other. The `*_with` variants run a dispatch callback inside the
//! same critical section, which keeps upstream commands for a symbol in the
//! order the registry derived them.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::domain::streaming::Symbol;

// =============================================================================
// Types
// =============================================================================

/// Opaque handle identifying one downstream connection.
///
/// Issued at connect time; two handles are equal only if they were issued
/// for the same connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Issue a new process-unique connection id.
    #[must_use]
    pub fn generate() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Build an id from a raw value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// =============================================================================
// Watch Change
// =============================================================================

/// Upstream obligations produced by a watch mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchChange {
    /// Symbol that gained its first watcher and must be subscribed upstream.
    pub subscribe: Option<Symbol>,
    /// Symbol that lost its last watcher and must be unsubscribed upstream.
    pub unsubscribe: Option<Symbol>,
}

impl WatchChange {
    /// Check if there are any upstream obligations.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.subscribe.is_none() && self.unsubscribe.is_none()
    }

    /// Change carrying only an unsubscribe obligation.
    #[must_use]
    pub const fn unsubscribe_only(symbol: Option<Symbol>) -> Self {
        Self {
            subscribe: None,
            unsubscribe: symbol,
        }
    }
}

// =============================================================================
// Watch State
// =============================================================================

#[derive(Debug, Default)]
struct WatchState {
    /// Connection to its watched symbol. Absent entry means no watch.
    watches: HashMap<ConnectionId, Symbol>,
    /// Symbol to its current watchers. Keys are the upstream interest.
    watchers: HashMap<Symbol, HashSet<ConnectionId>>,
}

impl WatchState {
    fn set(&mut self, conn: ConnectionId, symbol: Symbol) -> WatchChange {
        if self.watches.get(&conn) == Some(&symbol) {
            return WatchChange::default();
        }

        let unsubscribe = self
            .watches
            .insert(conn, symbol.clone())
            .and_then(|previous| self.detach(conn, previous));

        let watchers = self.watchers.entry(symbol.clone()).or_default();
        let first_watcher = watchers.is_empty();
        watchers.insert(conn);

        WatchChange {
            subscribe: first_watcher.then_some(symbol),
            unsubscribe,
        }
    }

    fn clear(&mut self, conn: ConnectionId) -> Option<Symbol> {
        let previous = self.watches.remove(&conn)?;
        self.detach(conn, previous)
    }

    /// Remove `conn` from the watchers of `symbol`.
    ///
    /// Returns the symbol if `conn` was its last watcher.
    fn detach(&mut self, conn: ConnectionId, symbol: Symbol) -> Option<Symbol> {
        let Entry::Occupied(mut entry) = self.watchers.entry(symbol) else {
            return None;
        };

        entry.get_mut().remove(&conn);
        if entry.get().is_empty() {
            Some(entry.remove_entry().0)
        } else {
            None
        }
    }

    fn interest(&self) -> Vec<Symbol> {
        let mut symbols: Vec<_> = self.watchers.keys().cloned().collect();
        symbols.sort_unstable();
        symbols
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe registry of downstream watches.
///
/// # Example
///
/// ```rust
/// use price_relay::domain::streaming::Symbol;
/// use price_relay::domain::subscription::{ConnectionId, SubscriptionRegistry};
///
/// let registry = SubscriptionRegistry::new();
/// let aapl = Symbol::normalize("aapl").unwrap();
/// let (a, b) = (ConnectionId::from_raw(1), ConnectionId::from_raw(2));
///
/// // First watcher - subscribe upstream
/// let change = registry.set_watch(a, aapl.clone());
/// assert_eq!(change.subscribe, Some(aapl.clone()));
///
/// // Second watcher - nothing to do upstream
/// assert!(registry.set_watch(b, aapl.clone()).is_empty());
///
/// // First watcher leaves - still watched by b
/// assert_eq!(registry.clear_watch(a), None);
///
/// // Last watcher leaves - unsubscribe upstream
/// assert_eq!(registry.clear_watch(b), Some(aapl));
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: Mutex<WatchState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `conn` at `symbol`, replacing any previous watch.
    ///
    /// `symbol` must already be normalized. Watching the symbol the
    /// connection already watches is a no-op.
    pub fn set_watch(&self, conn: ConnectionId, symbol: Symbol) -> WatchChange {
        self.set_watch_with(conn, symbol, |_| {})
    }

    /// Like [`set_watch`](Self::set_watch), running `dispatch` with the
    /// resulting change before the registry lock is released.
    pub fn set_watch_with<F>(&self, conn: ConnectionId, symbol: Symbol, dispatch: F) -> WatchChange
    where
        F: FnOnce(&WatchChange),
    {
        let mut state = self.state.lock();
        let change = state.set(conn, symbol);
        dispatch(&change);
        change
    }

    /// Remove the watch held by `conn`, if any.
    ///
    /// Returns the symbol to unsubscribe upstream when `conn` was its last
    /// watcher.
    pub fn clear_watch(&self, conn: ConnectionId) -> Option<Symbol> {
        self.clear_watch_with(conn, |_| {})
    }

    /// Like [`clear_watch`](Self::clear_watch), running `dispatch` with the
    /// resulting change before the registry lock is released.
    pub fn clear_watch_with<F>(&self, conn: ConnectionId, dispatch: F) -> Option<Symbol>
    where
        F: FnOnce(&WatchChange),
    {
        let mut state = self.state.lock();
        let change = WatchChange::unsubscribe_only(state.clear(conn));
        dispatch(&change);
        change.unsubscribe
    }

    /// Connections currently watching exactly `symbol`.
    #[must_use]
    pub fn watchers_of(&self, symbol: &str) -> Vec<ConnectionId> {
        self.state
            .lock()
            .watchers
            .get(symbol)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// The symbol `conn` watches, if any.
    #[must_use]
    pub fn watch_of(&self, conn: ConnectionId) -> Option<Symbol> {
        self.state.lock().watches.get(&conn).cloned()
    }

    /// Snapshot of the symbols that must be subscribed upstream, sorted.
    #[must_use]
    pub fn upstream_interest(&self) -> Vec<Symbol> {
        self.state.lock().interest()
    }

    /// Run `f` with the current upstream interest while holding the lock.
    ///
    /// No watch mutation can interleave with `f`, so anything `f` does is
    /// ordered before every command dispatched by later mutations.
    pub fn resync_with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&[Symbol]) -> R,
    {
        let state = self.state.lock();
        f(&state.interest())
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let state = self.state.lock();
        SubscriptionStats {
            symbol_count: state.watchers.len(),
            watcher_count: state.watches.len(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Number of symbols subscribed upstream.
    pub symbol_count: usize,
    /// Number of connections with an active watch.
    pub watcher_count: usize,
}

// =============================================================================
// Tests
// =============================================================================
