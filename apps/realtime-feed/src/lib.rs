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

//! Realtime Feed - Resilient Market Data Feed Layer
//!
//! Keeps one live streaming connection per subscribed channel, substitutes
//! a seeded random-walk feed while a connection is down, and reduces ticks
//! and simulated path ensembles into chart-ready series.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure feed types and reductions
//!   - `feed`: Channels, ticks, feed state, trend
//!   - `subscription`: Reference-counted channel subscriptions
//!   - `series`: Smoothing windows and percentile bands
//!   - `animation`: Ease-out-expo display interpolation
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Stream connector and ensemble source interfaces
//!   - `services`: Feed supervision, channel series, animated values, ensemble refresh
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `stream`: Connections, codec, reconnect policy, WebSocket transport
//!   - `synthetic`: Random-walk fallback generator
//!   - `ensemble`: Analytics backend HTTP client
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! WebSocket ──► FeedConnection ──┐
//!                                ├──► FeedManager ──► FeedSubscription ──► ChannelSeries
//! RandomWalk ──► Synthetic ──────┘        │                                 (window, AnimatedValue)
//!                                         └── reconnect timer                     │
//!                                                                                 ▼
//! EnsembleSource ──► EnsembleService (bands) ─────────────────────────────► health router
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Feed types and reductions with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::animation::{AnimationTask, ValueAnimator, ease_out_expo};
pub use domain::feed::{
    Channel, ChannelConfig, ChannelId, ChannelSnapshot, FeedState, StateChange, Tick, Trend,
    TrendTracker, VolatilityClass,
};
pub use domain::series::{
    BandSeries, EnsembleError, EnsembleInput, PathEnsemble, PercentileBand, SeriesError,
    SeriesReducer, SmoothedPoint, SmoothingConfig, StepLabel, percentile_bands,
};
pub use domain::subscription::{ConsumerId, SubscriptionRegistry, SubscriptionStats};

// Ports
pub use application::ports::{
    ConnectionError, EnsembleSource, EnsembleSourceError, StreamConnector,
};

// Services
pub use application::services::{
    AnimatedValue, AnimationConfig, ChannelSeries, ChannelSeriesView, ChannelStatus,
    EnsembleService, FeedManager, FeedManagerConfig, FeedManagerError, FeedSubscription,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, FeedServiceConfig};

// Stream adapters
pub use infrastructure::stream::{
    ReconnectConfig, ScriptedConnector, ScriptedSession, TickCodec, WebSocketConfig,
    WebSocketConnector,
};
pub use infrastructure::synthetic::SyntheticSettings;

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
