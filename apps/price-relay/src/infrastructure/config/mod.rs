//! Configuration Module
//!
//! Configuration loading for the relay, read from environment variables.

mod settings;

pub use settings::{
    ConfigError, Credentials, DownstreamSettings, FeedSettings, RelayConfig, ServerSettings,
};
