#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Price Relay - Real-Time Price Fan-Out
//!
//! A WebSocket relay that holds one connection to the Finnhub trade feed
//! and fans price updates out to many downstream clients. Each client
//! watches at most one symbol; the relay subscribes upstream to a symbol
//! only while at least one client watches it.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types and the reference-counted watch registry
//!   - `streaming`: Symbols, ticks and client-facing messages
//!   - `subscription`: Connection watches and upstream interest
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Upstream command sink, downstream delivery
//!   - `services`: Watch changes, tick fan-out
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: Finnhub WebSocket link with reconnect and resync
//!   - `downstream`: Client WebSocket server and connection hub
//!   - `relay`: Wiring and lifecycle
//!   - `config`: Configuration from the environment
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                    ┌──────────────┐     ┌───────────────┐──► Client 1
//! Finnhub WS ◄──────►│ UpstreamLink │────►│ DownstreamHub │──► Client 2
//!                    └──────▲───────┘     └───────┬───────┘──► Client N
//!                           │                     │
//!                           └── Registry ◄────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core relay types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{Price, ServerMessage, Symbol, Tick};
pub use domain::subscription::{
    ConnectionId, SubscriptionRegistry, SubscriptionStats, WatchChange,
};

// Ports and services
pub use application::ports::{DownstreamPort, UpstreamPort};
pub use application::services::{RelayService, WatchService};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, Credentials, DownstreamSettings, FeedSettings, RelayConfig, ServerSettings,
};

// Relay lifecycle
pub use infrastructure::relay::{RelayError, RelayHandle, RelayServer};

// Downstream hub (for integration tests)
pub use infrastructure::downstream::{ConnectionSession, DownstreamHub};

// Feed status
pub use infrastructure::feed::{FeedState, FeedStatus, LinkState};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
