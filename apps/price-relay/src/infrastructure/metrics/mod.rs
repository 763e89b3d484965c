//! Prometheus Metrics Module
//!
//! Exposes relay metrics in Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Feed**: Frames, ticks, errors and reconnects on the upstream link
//! - **Upstream**: Subscription commands and subscribed symbol count
//! - **Fan-out**: Price updates sent and dropped, slow consumers, latency
//! - **Connections**: Live downstream connections
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::infrastructure::feed::FeedAction;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder, or return the one already installed.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Feed
    describe_counter!(
        "relay_feed_messages_total",
        "Total text frames received from the feed"
    );
    describe_counter!(
        "relay_ticks_received_total",
        "Total trades decoded from the feed"
    );
    describe_counter!(
        "relay_feed_errors_total",
        "Total feed errors by type"
    );
    describe_counter!(
        "relay_feed_reconnects_total",
        "Total feed reconnection attempts"
    );

    // Upstream
    describe_counter!(
        "relay_upstream_commands_total",
        "Total subscription commands written to the feed"
    );
    describe_gauge!(
        "relay_upstream_symbols",
        "Number of symbols subscribed upstream"
    );

    // Fan-out
    describe_counter!(
        "relay_price_updates_sent_total",
        "Total price updates queued to downstream connections"
    );
    describe_counter!(
        "relay_price_updates_dropped_total",
        "Total price updates dropped on full outbound queues"
    );
    describe_counter!(
        "relay_slow_consumers_dropped_total",
        "Total connections closed for staying behind"
    );
    describe_histogram!(
        "relay_fanout_seconds",
        "Time to fan one tick out to its watchers"
    );

    // Connections
    describe_gauge!(
        "relay_downstream_connections",
        "Number of live downstream connections"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a text frame received from the feed.
pub fn record_feed_message() {
    counter!("relay_feed_messages_total").increment(1);
}

/// Record a trade decoded from the feed.
pub fn record_tick() {
    counter!("relay_ticks_received_total").increment(1);
}

/// Record a feed error (`decode`, `feed`, `link`).
pub fn record_feed_error(error_type: &'static str) {
    counter!("relay_feed_errors_total", "error_type" => error_type).increment(1);
}

/// Record a feed reconnection attempt.
pub fn record_reconnect() {
    counter!("relay_feed_reconnects_total").increment(1);
}

/// Record a subscription command written to the feed.
pub fn record_upstream_command(action: FeedAction) {
    counter!("relay_upstream_commands_total", "command" => action.as_str()).increment(1);
}

/// Update the number of symbols subscribed upstream.
#[allow(clippy::cast_precision_loss)]
pub fn set_upstream_symbols(count: usize) {
    gauge!("relay_upstream_symbols").set(count as f64);
}

/// Record one fan-out: updates queued and time taken.
pub fn record_fanout(sent: usize, duration: Duration) {
    counter!("relay_price_updates_sent_total").increment(sent as u64);
    histogram!("relay_fanout_seconds").record(duration.as_secs_f64());
}

/// Record a price update dropped on a full outbound queue.
pub fn record_price_update_dropped() {
    counter!("relay_price_updates_dropped_total").increment(1);
}

/// Record a connection closed as a slow consumer.
pub fn record_slow_consumer_dropped() {
    counter!("relay_slow_consumers_dropped_total").increment(1);
}

/// Update the live downstream connection count.
#[allow(clippy::cast_precision_loss)]
pub fn set_downstream_connections(count: usize) {
    gauge!("relay_downstream_connections").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_feed_message();
        record_tick();
        record_feed_error("decode");
        record_upstream_command(FeedAction::Subscribe);
        record_fanout(3, Duration::from_micros(40));
        record_price_update_dropped();
        set_downstream_connections(2);
    }
}
