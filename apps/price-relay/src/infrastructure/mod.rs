//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Configuration loaded from the environment.
pub mod config;

/// Downstream WebSocket hub and client protocol.
pub mod downstream;

/// Finnhub trade feed link.
pub mod feed;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Relay composition root.
pub mod relay;

/// OpenTelemetry tracing integration.
pub mod telemetry;
