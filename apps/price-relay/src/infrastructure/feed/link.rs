//! Upstream Feed Link
//!
//! Maintains the single WebSocket connection to the Finnhub trade stream,
//! turns trade frames into [`Tick`] events and forwards subscription
//! commands issued through [`UpstreamHandle`].
//!
//! # Stream URL
//!
//! `wss://ws.finnhub.io?token=<api key>`
//!
//! # Resubscription
//!
//! The link keeps no subscription state of its own. After every successful
//! (re)connect it discards queued commands and subscribes to a snapshot of
//! the registry's upstream interest, taken under the registry lock so no
//! watch change can slip between snapshot and replay.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, FeedCodec, FeedMessage};
use super::messages::FeedCommand;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::UpstreamPort;
use crate::domain::streaming::{Symbol, Tick};
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::config::RelayConfig;
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end one connection of the feed link.
#[derive(Debug, thiserror::Error)]
pub enum FeedLinkError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Codec error while encoding a command.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The feed closed the connection or the stream ended.
    #[error("connection closed")]
    ConnectionClosed,

    /// Nothing arrived from the feed within the idle timeout.
    #[error("no data from feed for {0:?}")]
    IdleTimeout(Duration),

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),
}

// =============================================================================
// Feed Events
// =============================================================================

/// Events emitted by the feed link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Connected and resubscribed.
    Connected {
        /// Symbols resubscribed on connect.
        symbols: usize,
    },
    /// The current connection was lost.
    Disconnected,
    /// Waiting before the next connection attempt.
    Reconnecting {
        /// Reconnection attempt number.
        attempt: u32,
    },
    /// A normalized trade.
    Tick(Tick),
    /// The feed reported an error.
    Error(String),
}

// =============================================================================
// Configuration
// =============================================================================

/// Feed link configuration.
#[derive(Clone)]
pub struct LinkConfig {
    /// Feed URL including the token.
    pub url: String,
    /// Feed URL with the token masked, for logs.
    pub redacted_url: String,
    /// Silence before the connection is declared lost.
    pub idle_timeout: Duration,
    /// Reconnection backoff.
    pub reconnect: ReconnectConfig,
}

impl std::fmt::Debug for LinkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkConfig")
            .field("url", &self.redacted_url)
            .field("idle_timeout", &self.idle_timeout)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

impl LinkConfig {
    /// Build link configuration from relay configuration.
    #[must_use]
    pub fn from_relay_config(config: &RelayConfig) -> Self {
        Self {
            url: config.feed_url(),
            redacted_url: config.redacted_feed_url(),
            idle_timeout: config.feed.idle_timeout,
            reconnect: ReconnectConfig::from_feed_settings(&config.feed),
        }
    }
}

// =============================================================================
// Upstream Handle
// =============================================================================

/// Cloneable command side of the feed link.
///
/// Commands are queued without blocking. Once the relay is cancelled they
/// are dropped.
#[derive(Debug, Clone)]
pub struct UpstreamHandle {
    tx: mpsc::UnboundedSender<FeedCommand>,
    cancel: CancellationToken,
}

impl UpstreamHandle {
    fn send(&self, command: FeedCommand) {
        if self.cancel.is_cancelled() {
            tracing::trace!(symbol = %command.symbol, "Relay stopping, dropping feed command");
            return;
        }
        if self.tx.send(command).is_err() {
            tracing::debug!("Feed link stopped, dropping feed command");
        }
    }
}

impl UpstreamPort for UpstreamHandle {
    fn subscribe(&self, symbol: &Symbol) {
        self.send(FeedCommand::subscribe(symbol.clone()));
    }

    fn unsubscribe(&self, symbol: &Symbol) {
        self.send(FeedCommand::unsubscribe(symbol.clone()));
    }
}

// =============================================================================
// Upstream Link
// =============================================================================

/// Feed connection driver.
///
/// Manages the connection lifecycle including:
/// - Automatic reconnection with exponential backoff
/// - Resubscription of the registry's interest on every connect
/// - Idle detection
pub struct UpstreamLink {
    config: LinkConfig,
    codec: FeedCodec,
    registry: Arc<SubscriptionRegistry>,
    commands: mpsc::UnboundedReceiver<FeedCommand>,
    event_tx: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
    policy: ReconnectPolicy,
}

impl std::fmt::Debug for UpstreamLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamLink")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl UpstreamLink {
    /// Create a link and the handle used to send it commands.
    #[must_use]
    pub fn new(
        config: LinkConfig,
        registry: Arc<SubscriptionRegistry>,
        event_tx: mpsc::Sender<FeedEvent>,
        cancel: CancellationToken,
    ) -> (Self, UpstreamHandle) {
        let (tx, commands) = mpsc::unbounded_channel();
        let handle = UpstreamHandle {
            tx,
            cancel: cancel.clone(),
        };
        let policy = ReconnectPolicy::new(config.reconnect.clone());

        let link = Self {
            config,
            codec: FeedCodec::new(),
            registry,
            commands,
            event_tx,
            cancel,
            policy,
        };
        (link, handle)
    }

    /// Run the connection loop until cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error only when the configured reconnection attempts are
    /// exhausted.
    pub async fn run(mut self) -> Result<(), FeedLinkError> {
        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Feed link cancelled");
                return Ok(());
            }

            match self.connect_and_run().await {
                Ok(()) => {
                    tracing::info!("Feed link closed");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Feed connection lost");
                    self.emit(FeedEvent::Disconnected).await;

                    let Some(delay) = self.policy.next_delay() else {
                        let attempts = self.policy.max_attempts();
                        tracing::error!(attempts, "Giving up on feed connection");
                        return Err(FeedLinkError::MaxReconnectAttemptsExceeded(attempts));
                    };

                    let attempt = self.policy.attempt_count();
                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Reconnecting to feed"
                    );
                    self.emit(FeedEvent::Reconnecting { attempt }).await;

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!("Feed link cancelled during reconnect delay");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Connect and stream until the connection fails or the link is cancelled.
    async fn connect_and_run(&mut self) -> Result<(), FeedLinkError> {
        tracing::info!(url = %self.config.redacted_url, "Connecting to feed");

        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            connected = tokio_tungstenite::connect_async(self.config.url.as_str()) => connected?,
        };
        let (mut write, mut read) = ws_stream.split();

        self.policy.reset();

        let interest = self.registry.resync_with(|interest| {
            while self.commands.try_recv().is_ok() {}
            interest.to_vec()
        });
        for symbol in &interest {
            self.send_command(&mut write, &FeedCommand::subscribe(symbol.clone()))
                .await?;
        }

        tracing::info!(symbols = interest.len(), "Feed connected");
        self.emit(FeedEvent::Connected {
            symbols: interest.len(),
        })
        .await;

        let idle_timeout = self.config.idle_timeout;
        let idle = tokio::time::sleep(idle_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        tracing::trace!(error = %e, "Close frame not sent to feed");
                    }
                    return Ok(());
                }
                Some(command) = self.commands.recv() => {
                    self.send_command(&mut write, &command).await?;
                }
                () = &mut idle => {
                    return Err(FeedLinkError::IdleTimeout(idle_timeout));
                }
                frame = read.next() => {
                    idle.as_mut().reset(Instant::now() + idle_timeout);

                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text(text.as_str()).await;
                        }
                        Some(Ok(Message::Binary(data))) => {
                            tracing::warn!(len = data.len(), "Dropping binary feed frame");
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(frame = ?frame, "Feed sent close frame");
                            return Err(FeedLinkError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("Feed stream ended");
                            return Err(FeedLinkError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    /// Decode one text frame and emit its events.
    async fn handle_text(&self, text: &str) {
        metrics::record_feed_message();
        tracing::trace!(len = text.len(), "Received feed message");

        match self.codec.decode(text) {
            Ok(FeedMessage::Trades(ticks)) => {
                for tick in ticks {
                    self.emit(FeedEvent::Tick(tick)).await;
                }
            }
            Ok(FeedMessage::Error(message)) => {
                tracing::warn!(message = %message, "Feed reported error");
                metrics::record_feed_error("feed");
                self.emit(FeedEvent::Error(message)).await;
            }
            Ok(FeedMessage::Ping | FeedMessage::Ignored) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed feed message");
                metrics::record_feed_error("decode");
            }
        }
    }

    /// Encode and write a command to the feed.
    async fn send_command<W>(&self, write: &mut W, command: &FeedCommand) -> Result<(), FeedLinkError>
    where
        W: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let json = self.codec.encode(command)?;
        tracing::debug!(
            action = command.action.as_str(),
            symbol = %command.symbol,
            "Sending feed command"
        );
        write.send(Message::Text(json.into())).await?;
        metrics::record_upstream_command(command.action);
        Ok(())
    }

    async fn emit(&self, event: FeedEvent) {
        if self.event_tx.send(event).await.is_err() {
            tracing::trace!("Feed event receiver dropped");
        }
    }
}
