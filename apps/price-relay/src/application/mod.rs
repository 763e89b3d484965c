//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that connect the subscription registry to the feed and the clients.

/// Port interfaces for the upstream feed and downstream clients.
pub mod ports;

/// Application services for watch management and tick fan-out.
pub mod services;
