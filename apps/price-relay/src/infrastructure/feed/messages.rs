//! Finnhub WebSocket Message Types
//!
//! Wire format types for the Finnhub real-time trade stream.
//!
//! # Message Types
//!
//! ## Inbound
//! - `trade`: One or more trades for subscribed symbols
//! - `ping`: Keep-alive sent by the feed
//! - `error`: Feed-side error (bad symbol, rate limit, ...)
//!
//! ## Outbound
//! - `subscribe` / `unsubscribe`: Per-symbol trade subscription commands
//!
//! # References
//!
//! - [Trades - Last Price Updates](https://finnhub.io/docs/api/websocket-trades)

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::domain::streaming::{Price, Symbol};

// =============================================================================
// Inbound Messages
// =============================================================================

/// Any message received from the feed.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "trade", "data": [{"s": "AAPL", "p": 150.25, "t": 1700000000000, "v": 10}]}
/// {"type": "ping"}
/// {"type": "error", "msg": "Invalid symbol"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RawFeedMessage {
    /// Trades for one or more symbols.
    Trade {
        /// Trades in feed order, decoded one by one into [`TradeData`].
        #[serde(default)]
        data: Vec<Value>,
    },
    /// Keep-alive.
    Ping,
    /// Feed-side error.
    Error {
        /// Error text.
        #[serde(default)]
        msg: String,
    },
    /// Any message type the relay does not act on.
    #[serde(other)]
    Other,
}

/// A single trade inside a `trade` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeData {
    /// Symbol (e.g., "AAPL", "BINANCE:BTCUSDT")
    #[serde(rename = "s")]
    pub symbol: String,

    /// Last trade price
    #[serde(rename = "p")]
    pub price: Price,

    /// Trade time, Unix milliseconds
    #[serde(rename = "t", default)]
    pub timestamp_ms: Option<i64>,

    /// Trade volume
    #[serde(rename = "v", default)]
    pub volume: Option<Number>,

    /// Trade conditions
    #[serde(rename = "c", default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<String>>,
}

// =============================================================================
// Outbound Commands
// =============================================================================

/// Subscription command action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedAction {
    /// Start streaming trades for the symbol.
    Subscribe,
    /// Stop streaming trades for the symbol.
    Unsubscribe,
}

impl FeedAction {
    /// Action name, as sent on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

impl std::fmt::Display for FeedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command sent to the feed.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "subscribe", "symbol": "AAPL"}
/// {"type": "unsubscribe", "symbol": "AAPL"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedCommand {
    /// Command action.
    #[serde(rename = "type")]
    pub action: FeedAction,

    /// Target symbol.
    pub symbol: Symbol,
}

impl FeedCommand {
    /// Create a subscribe command.
    #[must_use]
    pub const fn subscribe(symbol: Symbol) -> Self {
        Self {
            action: FeedAction::Subscribe,
            symbol,
        }
    }

    /// Create an unsubscribe command.
    #[must_use]
    pub const fn unsubscribe(symbol: Symbol) -> Self {
        Self {
            action: FeedAction::Unsubscribe,
            symbol,
        }
    }
}
