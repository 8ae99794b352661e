//! Prometheus Metrics Module
//!
//! Exposes feed metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Ticks**: accepted ticks by channel and origin, rejected and malformed input
//! - **State**: feed state transitions, active channels, subscribers
//! - **Recovery**: reconnect attempts and synthetic fallback episodes
//! - **Ensembles**: percentile band refreshes and failures
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::feed::FeedState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Repeated calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns `BuildError` if the global recorder cannot be installed.
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
    // Tick counters
    describe_counter!(
        "realtime_feed_ticks_total",
        "Ticks accepted per channel, by origin (live or synthetic)"
    );
    describe_counter!(
        "realtime_feed_ticks_rejected_total",
        "Ticks rejected for arriving older than the last accepted tick"
    );
    describe_counter!(
        "realtime_feed_malformed_messages_total",
        "Inbound stream messages dropped as malformed"
    );

    // State
    describe_counter!(
        "realtime_feed_state_transitions_total",
        "Feed state transitions by from/to state"
    );
    describe_gauge!("realtime_feed_active_channels", "Channels with at least one subscriber");
    describe_gauge!("realtime_feed_subscribers", "Active feed subscriptions");

    // Recovery
    describe_counter!(
        "realtime_feed_reconnects_total",
        "Scheduled reconnection attempts"
    );
    describe_counter!(
        "realtime_feed_synthetic_episodes_total",
        "Synthetic fallback episodes started"
    );

    // Ensembles
    describe_counter!(
        "realtime_feed_ensemble_refreshes_total",
        "Percentile band refreshes by outcome"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Origin of an accepted tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOrigin {
    /// Live upstream connection.
    Live,
    /// Synthetic fallback generator.
    Synthetic,
}

impl TickOrigin {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Synthetic => "synthetic",
        }
    }
}

/// Record an accepted tick.
pub fn record_tick(channel: &str, origin: TickOrigin) {
    counter!(
        "realtime_feed_ticks_total",
        "channel" => channel.to_string(),
        "origin" => origin.as_str()
    )
    .increment(1);
}

/// Record a tick rejected for ordering.
pub fn record_tick_rejected(channel: &str) {
    counter!(
        "realtime_feed_ticks_rejected_total",
        "channel" => channel.to_string()
    )
    .increment(1);
}

/// Record a malformed inbound message.
pub fn record_malformed(channel: &str) {
    counter!(
        "realtime_feed_malformed_messages_total",
        "channel" => channel.to_string()
    )
    .increment(1);
}

/// Record a feed state transition.
pub fn record_transition(from: FeedState, to: FeedState) {
    counter!(
        "realtime_feed_state_transitions_total",
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
}

/// Update the active channel count.
pub fn set_active_channels(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("realtime_feed_active_channels").set(count as f64);
}

/// Update the subscriber count.
pub fn set_subscribers(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("realtime_feed_subscribers").set(count as f64);
}

/// Record a scheduled reconnection attempt.
pub fn record_reconnect(channel: &str) {
    counter!(
        "realtime_feed_reconnects_total",
        "channel" => channel.to_string()
    )
    .increment(1);
}

/// Record the start of a synthetic fallback episode.
pub fn record_synthetic_episode(channel: &str) {
    counter!(
        "realtime_feed_synthetic_episodes_total",
        "channel" => channel.to_string()
    )
    .increment(1);
}

/// Record an ensemble refresh outcome.
pub fn record_ensemble_refresh(success: bool) {
    counter!(
        "realtime_feed_ensemble_refreshes_total",
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================
