//! Relay Server
//!
//! Composition root that wires the feed link, the subscription registry,
//! the downstream hub and the health endpoint into one running relay.
//!
//! # Data Flow
//!
//! ```text
//!               subscribe / unsubscribe
//!   Feed WS  <──────────────────────────── WatchService <── client requests
//!     │                                         │
//!     │ FeedEvent                               ▼
//!     ▼                                 SubscriptionRegistry
//!   event pump ── RelayService::on_tick ───────┘
//!                        │
//!                        ▼
//!                 DownstreamHub ──► Client 1 .. Client N
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::application::ports::DownstreamPort;
use crate::application::services::{RelayService, WatchService};
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::config::{ConfigError, RelayConfig};
use crate::infrastructure::downstream::{self, DownstreamHub};
use crate::infrastructure::feed::{FeedEvent, FeedState, LinkConfig, LinkState, UpstreamLink};
use crate::infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
use crate::infrastructure::metrics;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while starting or stopping the relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration rejected.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Downstream listener could not be bound.
    #[error("failed to bind downstream listener on {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Health endpoint could not be started.
    #[error(transparent)]
    Health(#[from] HealthServerError),

    /// Tasks did not finish within the shutdown timeout.
    #[error("relay did not stop within {0:?}")]
    ShutdownTimeout(Duration),
}

// =============================================================================
// Relay Server
// =============================================================================

/// Starts relay instances.
#[derive(Debug, Clone, Copy)]
pub struct RelayServer;

impl RelayServer {
    /// Bind both listeners, connect the feed and start serving clients.
    ///
    /// Ports of `0` bind ephemeral ports; read the actual addresses from the
    /// returned handle. Cancelling `cancel` stops every task and closes all
    /// client connections.
    ///
    /// # Errors
    ///
    /// Returns `RelayError` if the configuration is invalid or a listener
    /// cannot be bound.
    pub async fn start(
        config: RelayConfig,
        cancel: CancellationToken,
    ) -> Result<RelayHandle, RelayError> {
        config.validate()?;

        let ws_addr = SocketAddr::new(config.server.bind_addr, config.server.ws_port);
        let ws_listener = TcpListener::bind(ws_addr)
            .await
            .map_err(|source| RelayError::Bind {
                addr: ws_addr,
                source,
            })?;
        let ws_addr = ws_listener
            .local_addr()
            .map_err(|source| RelayError::Bind {
                addr: ws_addr,
                source,
            })?;

        let registry = Arc::new(SubscriptionRegistry::new());
        let feed_state = Arc::new(FeedState::new());

        let (event_tx, event_rx) = mpsc::channel(config.feed.event_buffer);
        let (link, upstream) = UpstreamLink::new(
            LinkConfig::from_relay_config(&config),
            Arc::clone(&registry),
            event_tx,
            cancel.clone(),
        );

        let watch = WatchService::new(Arc::clone(&registry), Arc::new(upstream));
        let hub = Arc::new(DownstreamHub::new(
            watch,
            config.downstream.clone(),
            cancel.child_token(),
        ));
        let downstream = Arc::clone(&hub) as Arc<dyn DownstreamPort>;
        let relay = RelayService::new(Arc::clone(&registry), downstream);

        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            Arc::clone(&feed_state),
            Arc::clone(&hub),
            Arc::clone(&registry),
        ));
        let health = HealthServer::bind(
            SocketAddr::new(config.server.bind_addr, config.server.health_port),
            health_state,
            cancel.clone(),
        )
        .await?;
        let health_addr = health.local_addr()?;

        feed_state.set_state(LinkState::Connecting);

        let mut tasks = JoinSet::new();

        let link_state = Arc::clone(&feed_state);
        tasks.spawn(async move {
            if let Err(e) = link.run().await {
                tracing::error!(error = %e, "Feed link stopped");
                metrics::record_feed_error("link");
                link_state.set_error(e.to_string());
            }
        });

        tasks.spawn(pump_events(
            event_rx,
            relay,
            Arc::clone(&feed_state),
            cancel.clone(),
        ));

        let ws_router = downstream::router(Arc::clone(&hub));
        let ws_cancel = cancel.clone();
        tasks.spawn(async move {
            tracing::info!(addr = %ws_addr, "Relay WebSocket server listening");
            if let Err(e) = axum::serve(ws_listener, ws_router)
                .with_graceful_shutdown(ws_cancel.cancelled_owned())
                .await
            {
                tracing::error!(error = %e, "Relay WebSocket server error");
            }
            tracing::info!("Relay WebSocket server stopped");
        });

        tasks.spawn(async move {
            if let Err(e) = health.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });

        tracing::info!(ws_addr = %ws_addr, health_addr = %health_addr, "Relay started");

        Ok(RelayHandle {
            ws_addr,
            health_addr,
            registry,
            hub,
            feed_state,
            cancel,
            tasks,
        })
    }
}

// =============================================================================
// Event Pump
// =============================================================================

async fn pump_events(
    mut events: mpsc::Receiver<FeedEvent>,
    relay: RelayService,
    feed_state: Arc<FeedState>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            event = events.recv() => {
                let Some(event) = event else { break };
                handle_event(event, &relay, &feed_state);
            }
        }
    }
    tracing::debug!("Feed event pump stopped");
}

fn handle_event(event: FeedEvent, relay: &RelayService, feed_state: &FeedState) {
    match event {
        FeedEvent::Connected { symbols } => {
            feed_state.set_state(LinkState::Connected);
            feed_state.set_symbol_count(symbols);
            metrics::set_upstream_symbols(symbols);
            tracing::info!(symbols, "Feed connected");
        }
        FeedEvent::Disconnected => {
            feed_state.set_state(LinkState::Disconnected);
            tracing::warn!("Feed disconnected");
        }
        FeedEvent::Reconnecting { attempt } => {
            feed_state.set_state(LinkState::Reconnecting);
            feed_state.set_reconnect_attempts(attempt);
            metrics::record_reconnect();
            tracing::info!(attempt, "Feed reconnecting");
        }
        FeedEvent::Tick(tick) => {
            feed_state.increment_messages();
            metrics::record_tick();

            let start = Instant::now();
            let sent = relay.on_tick(&tick);
            metrics::record_fanout(sent, start.elapsed());
        }
        FeedEvent::Error(msg) => {
            tracing::error!(error = %msg, "Feed error");
            feed_state.record_error(msg);
        }
    }
}

// =============================================================================
// Relay Handle
// =============================================================================

/// A running relay.
#[derive(Debug)]
pub struct RelayHandle {
    ws_addr: SocketAddr,
    health_addr: SocketAddr,
    registry: Arc<SubscriptionRegistry>,
    hub: Arc<DownstreamHub>,
    feed_state: Arc<FeedState>,
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl RelayHandle {
    /// Bound address of the downstream WebSocket listener.
    #[must_use]
    pub const fn ws_addr(&self) -> SocketAddr {
        self.ws_addr
    }

    /// Bound address of the health endpoint.
    #[must_use]
    pub const fn health_addr(&self) -> SocketAddr {
        self.health_addr
    }

    /// The relay's subscription registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// The relay's downstream hub.
    #[must_use]
    pub const fn hub(&self) -> &Arc<DownstreamHub> {
        &self.hub
    }

    /// Feed connection status.
    #[must_use]
    pub const fn feed_state(&self) -> &Arc<FeedState> {
        &self.feed_state
    }

    /// Wait until every relay task has finished.
    pub async fn wait(mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Relay task panicked");
            }
        }
    }

    /// Cancel the relay and wait for its tasks.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::ShutdownTimeout` if the tasks outlive `timeout`.
    pub async fn shutdown(self, timeout: Duration) -> Result<(), RelayError> {
        self.cancel.cancel();
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| RelayError::ShutdownTimeout(timeout))
    }
}

// =============================================================================
// Tests
// =============================================================================
