//! Feed Codec Module
//!
//! Decodes Finnhub text frames into normalized feed messages and encodes
//! subscription commands.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::streaming::{Symbol, Tick};
use crate::infrastructure::feed::messages::{FeedCommand, RawFeedMessage, TradeData};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A decoded feed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    /// Normalized trades, in feed order.
    Trades(Vec<Tick>),
    /// Keep-alive.
    Ping,
    /// Feed-side error text.
    Error(String),
    /// A message type the relay does not act on.
    Ignored,
}

/// JSON codec for the Finnhub trade stream.
#[derive(Debug, Default, Clone)]
pub struct FeedCodec;

impl FeedCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame.
    ///
    /// Trades are decoded one by one: a malformed trade or one with a blank
    /// symbol is skipped without affecting the rest of the frame. A trade
    /// without a timestamp, or with one out of range, is stamped with the
    /// receive time.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON feed message.
    pub fn decode(&self, text: &str) -> Result<FeedMessage, CodecError> {
        let message = match serde_json::from_str(text)? {
            RawFeedMessage::Trade { data } => {
                let received_at = Utc::now();
                FeedMessage::Trades(
                    data.into_iter()
                        .filter_map(|item| to_tick(item, received_at))
                        .collect(),
                )
            }
            RawFeedMessage::Ping => FeedMessage::Ping,
            RawFeedMessage::Error { msg } => FeedMessage::Error(msg),
            RawFeedMessage::Other => FeedMessage::Ignored,
        };
        Ok(message)
    }

    /// Encode a subscription command.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, command: &FeedCommand) -> Result<String, CodecError> {
        Ok(serde_json::to_string(command)?)
    }
}

fn to_tick(item: Value, received_at: DateTime<Utc>) -> Option<Tick> {
    let trade: TradeData = match serde_json::from_value(item) {
        Ok(trade) => trade,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping malformed trade");
            return None;
        }
    };

    let Some(symbol) = Symbol::normalize(&trade.symbol) else {
        tracing::debug!("Skipping trade with blank symbol");
        return None;
    };

    let timestamp = trade
        .timestamp_ms
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or(received_at);

    Some(Tick::new(symbol, trade.price, timestamp))
}
