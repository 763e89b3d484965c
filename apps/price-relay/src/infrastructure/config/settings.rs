//! Relay Configuration Settings
//!
//! Configuration types for the price relay, loaded from environment variables.

use std::borrow::Cow;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use tokio_tungstenite::tungstenite::http::Uri;

/// Default Finnhub real-time trade endpoint.
pub const DEFAULT_FEED_URL: &str = "wss://ws.finnhub.io";

/// Finnhub API credentials.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(api_key: String) -> Self {
        Self { api_key }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Upstream feed connection settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Feed WebSocket endpoint, without the token.
    pub url: String,
    /// Silence on the feed before the link is declared lost.
    pub idle_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Capacity of the feed event channel.
    pub event_buffer: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_FEED_URL.to_string(),
            idle_timeout: Duration::from_secs(60),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0,
            event_buffer: 1024,
        }
    }
}

/// Downstream connection settings.
#[derive(Debug, Clone)]
pub struct DownstreamSettings {
    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,
    /// Consecutive full-queue deliveries before a connection is dropped.
    pub slow_consumer_strikes: u32,
}

impl Default for DownstreamSettings {
    fn default() -> Self {
        Self {
            outbound_buffer: 64,
            slow_consumer_strikes: 8,
        }
    }
}

/// Server listener settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Address both listeners bind to.
    pub bind_addr: IpAddr,
    /// Downstream WebSocket port.
    pub ws_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            ws_port: 8080,
            health_port: 8082,
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// API credentials.
    pub credentials: Credentials,
    /// Upstream feed settings.
    pub feed: FeedSettings,
    /// Downstream connection settings.
    pub downstream: DownstreamSettings,
    /// Server listener settings.
    pub server: ServerSettings,
}

impl RelayConfig {
    /// Create configuration with default settings for the given credentials.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            feed: FeedSettings::default(),
            downstream: DownstreamSettings::default(),
            server: ServerSettings::default(),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or a
    /// setting is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or a setting is
    /// out of range.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("FINNHUB_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("FINNHUB_API_KEY".to_string()))?;

        if api_key.trim().is_empty() {
            return Err(ConfigError::EmptyValue("FINNHUB_API_KEY".to_string()));
        }

        let feed_defaults = FeedSettings::default();
        let feed = FeedSettings {
            url: lookup("FINNHUB_WS_URL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(feed_defaults.url),
            idle_timeout: parse_duration_secs(
                &lookup,
                "RELAY_FEED_IDLE_TIMEOUT_SECS",
                feed_defaults.idle_timeout,
            ),
            reconnect_delay_initial: parse_duration_millis(
                &lookup,
                "RELAY_RECONNECT_DELAY_INITIAL_MS",
                feed_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_duration_secs(
                &lookup,
                "RELAY_RECONNECT_DELAY_MAX_SECS",
                feed_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_or(
                &lookup,
                "RELAY_RECONNECT_DELAY_MULTIPLIER",
                feed_defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: parse_or(
                &lookup,
                "RELAY_MAX_RECONNECT_ATTEMPTS",
                feed_defaults.max_reconnect_attempts,
            ),
            event_buffer: parse_or(&lookup, "RELAY_FEED_EVENT_BUFFER", feed_defaults.event_buffer),
        };

        let downstream_defaults = DownstreamSettings::default();
        let downstream = DownstreamSettings {
            outbound_buffer: parse_or(
                &lookup,
                "RELAY_OUTBOUND_BUFFER",
                downstream_defaults.outbound_buffer,
            ),
            slow_consumer_strikes: parse_or(
                &lookup,
                "RELAY_SLOW_CONSUMER_STRIKES",
                downstream_defaults.slow_consumer_strikes,
            ),
        };

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            bind_addr: parse_or(&lookup, "RELAY_BIND_ADDR", server_defaults.bind_addr),
            ws_port: parse_or(&lookup, "RELAY_WS_PORT", server_defaults.ws_port),
            health_port: parse_or(&lookup, "RELAY_HEALTH_PORT", server_defaults.health_port),
        };

        let config = Self {
            credentials: Credentials::new(api_key),
            feed,
            downstream,
            server,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check settings that would make the relay unusable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first bad setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.feed.url.starts_with("ws://") || self.feed.url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue {
                key: "FINNHUB_WS_URL",
                reason: "must be a ws:// or wss:// URL",
            });
        }
        if self.feed_url().parse::<Uri>().is_err() {
            return Err(ConfigError::InvalidValue {
                key: "FINNHUB_WS_URL",
                reason: "not a valid URL",
            });
        }
        if self.feed.event_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RELAY_FEED_EVENT_BUFFER",
                reason: "must be greater than zero",
            });
        }
        if self.feed.idle_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "RELAY_FEED_IDLE_TIMEOUT_SECS",
                reason: "must be greater than zero",
            });
        }
        if self.downstream.outbound_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RELAY_OUTBOUND_BUFFER",
                reason: "must be greater than zero",
            });
        }
        if self.downstream.slow_consumer_strikes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RELAY_SLOW_CONSUMER_STRIKES",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }

    /// Feed URL with the API token attached as the `token` query parameter.
    ///
    /// Never log this value; use [`redacted_feed_url`](Self::redacted_feed_url).
    #[must_use]
    pub fn feed_url(&self) -> String {
        self.feed_url_with_token(self.credentials.api_key())
    }

    /// Feed URL with the token masked, for logs.
    #[must_use]
    pub fn redacted_feed_url(&self) -> String {
        self.feed_url_with_token("[REDACTED]")
    }

    fn feed_url_with_token(&self, token: &str) -> String {
        let base = with_root_path(&self.feed.url);
        let separator = if base.contains('?') { '&' } else { '?' };
        format!("{base}{separator}token={token}")
    }
}

/// Give a URL without a path the root path `/`.
///
/// The handshake request target is the URL's path and query, and `?token=..`
/// alone is not a valid target.
fn with_root_path(url: &str) -> Cow<'_, str> {
    let Some((scheme, rest)) = url.split_once("://") else {
        return Cow::Borrowed(url);
    };
    match rest.find(['/', '?', '#']) {
        Some(i) if rest[i..].starts_with('/') => Cow::Borrowed(url),
        Some(i) => Cow::Owned(format!("{scheme}://{}/{}", &rest[..i], &rest[i..])),
        None => Cow::Owned(format!("{url}/")),
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Setting is present but unusable.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    raw.trim().parse().unwrap_or_else(|_| {
        tracing::warn!(key, value = %raw, "Unparseable setting, using default");
        default
    })
}

fn parse_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    Duration::from_secs(parse_or(lookup, key, default.as_secs()))
}

fn parse_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    let default_millis = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(parse_or(lookup, key, default_millis))
}
