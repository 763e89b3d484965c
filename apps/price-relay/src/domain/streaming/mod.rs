//! Price Streaming Types
//!
//! Core domain types for the relay: normalized symbols, price ticks and the
//! messages pushed to downstream clients. These types are transport-agnostic
//! and represent the canonical internal representation of price data.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Number;

// =============================================================================
// Symbol
// =============================================================================

/// A normalized (upper-cased) ticker identifier, e.g. `AAPL`.
///
/// Symbol identity is case-insensitive on input: `aapl`, `Aapl` and `AAPL`
/// all normalize to the same symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Normalize raw input into a symbol.
    ///
    /// Returns `None` when the input is empty or only whitespace.
    #[must_use]
    pub fn normalize(raw: &str) -> Option<Self> {
        if raw.trim().is_empty() {
            return None;
        }
        Some(Self(raw.to_uppercase()))
    }

    /// Borrow the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Price
// =============================================================================

/// A trade price exactly as the feed reported it.
///
/// The JSON number is carried through unchanged, so what a client receives
/// is the same number the feed sent, with no decimal rescaling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(Number);

impl Price {
    /// Price from a float. Returns `None` for NaN or infinite values.
    #[must_use]
    pub fn from_f64(value: f64) -> Option<Self> {
        Number::from_f64(value).map(Self)
    }

    /// The price as a float.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        self.0.as_f64()
    }
}

impl From<Number> for Price {
    fn from(number: Number) -> Self {
        Self(number)
    }
}

impl FromStr for Price {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str::<Number>(s).map(Self)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// =============================================================================
// Tick
// =============================================================================

/// One normalized price update from the upstream feed.
///
/// Ticks are ephemeral: they are fanned out as soon as they arrive and never
/// stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    /// Symbol the trade printed on.
    pub symbol: Symbol,
    /// Last trade price.
    pub price: Price,
    /// Trade time reported by the feed (receive time if absent).
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    /// Create a new tick.
    #[must_use]
    pub const fn new(symbol: Symbol, price: Price, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol,
            price,
            timestamp,
        }
    }
}

// =============================================================================
// Server Messages
// =============================================================================

/// Greeting sent to every client right after it connects.
pub const CONNECTED_GREETING: &str = "Connected for real-time updates.";

/// Reply for a well-formed JSON message that is not a valid request.
pub const INVALID_FORMAT_REPLY: &str = "Invalid message format.";

/// Reply for a message that could not be processed at all.
pub const PROCESSING_FAILED_REPLY: &str = "Failed to process message.";

/// Messages sent from the relay to downstream clients.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "system", "message": "Connected for real-time updates."}
/// {"type": "price_update", "symbol": "AAPL", "price": 150.25}
/// {"type": "error", "message": "Invalid message format."}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Informational message from the relay.
    System {
        /// Human readable text.
        message: String,
    },
    /// Latest trade price for the watched symbol.
    PriceUpdate {
        /// Symbol the price belongs to.
        symbol: Symbol,
        /// Trade price, serialized as the feed's JSON number.
        price: Price,
    },
    /// Protocol error caused by the client's last message.
    Error {
        /// Human readable text.
        message: String,
    },
}

impl ServerMessage {
    /// The greeting sent on connect.
    #[must_use]
    pub fn greeting() -> Self {
        Self::System {
            message: CONNECTED_GREETING.to_string(),
        }
    }

    /// A price update built from a tick.
    #[must_use]
    pub fn price_update(tick: &Tick) -> Self {
        Self::PriceUpdate {
            symbol: tick.symbol.clone(),
            price: tick.price.clone(),
        }
    }

    /// An error reply.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use serde_json::json;

    use super::*;

    #[test]
    fn symbol_is_upper_cased() {
        let symbol = Symbol::normalize("aapl").unwrap();
        assert_eq!(symbol.as_str(), "AAPL");
        assert_eq!(symbol, Symbol::normalize("AaPl").unwrap());
    }

    #[test]
    fn blank_symbol_is_rejected() {
        assert!(Symbol::normalize("").is_none());
        assert!(Symbol::normalize("   ").is_none());
    }

    #[test]
    fn symbol_keeps_exchange_prefix() {
        let symbol = Symbol::normalize("binance:btcusdt").unwrap();
        assert_eq!(symbol.to_string(), "BINANCE:BTCUSDT");
    }

    #[test]
    fn greeting_wire_format() {
        let value = serde_json::to_value(ServerMessage::greeting()).unwrap();
        assert_eq!(
            value,
            json!({"type": "system", "message": "Connected for real-time updates."})
        );
    }

    #[test]
    fn price_update_wire_format() {
        let tick = Tick::new(
            Symbol::normalize("AAPL").unwrap(),
            Price::from_str("150.25").unwrap(),
            Utc::now(),
        );

        let value = serde_json::to_value(ServerMessage::price_update(&tick)).unwrap();

        assert_eq!(value["type"], "price_update");
        assert_eq!(value["symbol"], "AAPL");
        assert_eq!(value["price"].as_f64(), Some(150.25));
        assert_eq!(value.as_object().unwrap().len(), 3);
    }

    #[test]
    fn price_text_survives_relay() {
        for raw in ["1234.5678901234567", "1e-30", "150", "0.1", "98765.4321"] {
            let tick = Tick::new(
                Symbol::normalize("X").unwrap(),
                Price::from_str(raw).unwrap(),
                Utc::now(),
            );

            let text = serde_json::to_string(&ServerMessage::price_update(&tick)).unwrap();
            let sent: serde_json::Value = serde_json::from_str(&text).unwrap();
            let original: serde_json::Value = serde_json::from_str(raw).unwrap();

            assert_eq!(sent["price"], original, "price {raw} changed");
        }
    }

    #[test]
    fn price_rejects_non_finite() {
        assert!(Price::from_f64(f64::NAN).is_none());
        assert!(Price::from_f64(f64::INFINITY).is_none());
        assert_eq!(Price::from_f64(2.5).unwrap().as_f64(), Some(2.5));
    }

    #[test]
    fn error_wire_format() {
        let value = serde_json::to_value(ServerMessage::error(INVALID_FORMAT_REPLY)).unwrap();
        assert_eq!(
            value,
            json!({"type": "error", "message": "Invalid message format."})
        );
    }
}
