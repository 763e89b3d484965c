//! Application Ports (Driven)
//!
//! Ports define the interfaces the relay's services use to reach the
//! outside world. Infrastructure adapters implement them.
//!
//! - `UpstreamPort`: subscribe/unsubscribe symbols on the market-data feed
//! - `DownstreamPort`: deliver messages to connected clients

mod downstream_port;
mod upstream_port;

pub use downstream_port::DownstreamPort;
pub use upstream_port::UpstreamPort;

#[cfg(test)]
pub use downstream_port::MockDownstreamPort;
#[cfg(test)]
pub use upstream_port::MockUpstreamPort;
