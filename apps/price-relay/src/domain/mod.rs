//! Domain Layer - Core relay types and business logic.
//!
//! This layer contains the symbol, tick and client message types plus the
//! subscription state machine. Nothing here performs I/O.

/// Price streaming types (symbols, ticks, server messages).
pub mod streaming;

/// Watch tracking and upstream interest derivation.
pub mod subscription;
