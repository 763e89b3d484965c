//! Feed Connection State
//!
//! Shared, lock-light view of the upstream link's health, updated by the
//! relay event pump and read by the health endpoint.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Upstream link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// Not connected and not trying.
    #[default]
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Connected and streaming.
    Connected,
    /// Waiting to retry after a loss.
    Reconnecting,
    /// Gave up, or the feed reported an error.
    Error,
}

impl LinkState {
    /// Whether trades can currently flow.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Tracked state of the upstream feed.
#[derive(Debug, Default)]
pub struct FeedState {
    state: RwLock<LinkState>,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    symbol_count: AtomicUsize,
    reconnect_attempts: AtomicU32,
    messages_received: AtomicU64,
}

impl FeedState {
    /// Create state for a link that has not connected yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the link state.
    ///
    /// Entering `Connected` stamps the connect time and clears the attempt
    /// counter and last error.
    pub fn set_state(&self, state: LinkState) {
        *self.state.write() = state;
        if state == LinkState::Connected {
            *self.last_connected_at.write() = Some(Utc::now());
            self.reconnect_attempts.store(0, Ordering::Relaxed);
            *self.last_error.write() = None;
        }
    }

    /// Record a link failure that ended the link.
    pub fn set_error(&self, message: String) {
        *self.state.write() = LinkState::Error;
        *self.last_error.write() = Some(message);
    }

    /// Record a feed-side error without changing the link state.
    pub fn record_error(&self, message: String) {
        *self.last_error.write() = Some(message);
    }

    /// Record a reconnect attempt.
    pub fn set_reconnect_attempts(&self, attempt: u32) {
        self.reconnect_attempts.store(attempt, Ordering::Relaxed);
    }

    /// Increment messages received counter.
    pub fn increment_messages(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Update the number of symbols subscribed upstream.
    pub fn set_symbol_count(&self, count: usize) {
        self.symbol_count.store(count, Ordering::Relaxed);
    }

    /// Current link state.
    #[must_use]
    pub fn state(&self) -> LinkState {
        *self.state.read()
    }

    /// Consistent-enough snapshot for reporting.
    #[must_use]
    pub fn snapshot(&self) -> FeedStatus {
        FeedStatus {
            state: self.state(),
            last_connected_at: *self.last_connected_at.read(),
            last_error: self.last_error.read().clone(),
            symbol_count: self.symbol_count.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`FeedState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedStatus {
    /// Link state.
    pub state: LinkState,
    /// Last time the link connected.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last error reported by the link or the feed.
    pub last_error: Option<String>,
    /// Symbols subscribed upstream.
    pub symbol_count: usize,
    /// Attempts since the last successful connect.
    pub reconnect_attempts: u32,
    /// Feed frames received since start.
    pub messages_received: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected() {
        let state = FeedState::new();
        assert_eq!(state.state(), LinkState::Disconnected);
        assert!(state.snapshot().last_connected_at.is_none());
    }

    #[test]
    fn connect_clears_error_and_attempts() {
        let state = FeedState::new();
        state.set_reconnect_attempts(3);
        state.set_error("boom".to_string());

        state.set_state(LinkState::Connected);

        let snapshot = state.snapshot();
        assert_eq!(snapshot.state, LinkState::Connected);
        assert_eq!(snapshot.reconnect_attempts, 0);
        assert!(snapshot.last_error.is_none());
        assert!(snapshot.last_connected_at.is_some());
    }

    #[test]
    fn feed_error_keeps_state() {
        let state = FeedState::new();
        state.set_state(LinkState::Connected);

        state.record_error("Invalid symbol".to_string());

        assert_eq!(state.state(), LinkState::Connected);
        assert_eq!(state.snapshot().last_error.as_deref(), Some("Invalid symbol"));
    }

    #[test]
    fn state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&LinkState::Reconnecting).unwrap(),
            "\"reconnecting\""
        );
    }
}
