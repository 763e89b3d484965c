//! Finnhub Feed Adapter
//!
//! Implements the upstream side of the relay:
//!
//! - **Link**: WebSocket connection with reconnect and resubscription
//! - **Codec**: JSON trade frames to normalized ticks
//! - **State**: Connection health shared with the health endpoint

pub mod codec;
pub mod link;
pub mod messages;
pub mod reconnect;
pub mod state;

pub use codec::{CodecError, FeedCodec, FeedMessage};
pub use link::{FeedEvent, FeedLinkError, LinkConfig, UpstreamHandle, UpstreamLink};
pub use messages::{FeedAction, FeedCommand, RawFeedMessage, TradeData};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use state::{FeedState, FeedStatus, LinkState};
