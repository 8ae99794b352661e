//! Application Services
//!
//! - `feed_manager`: channel supervision, live/synthetic switching
//! - `animation`: frame-driven display values
//! - `ensemble`: periodic percentile band refresh
//! - `series`: smoothed windows and display values per channel

mod animation;
mod ensemble;
mod feed_manager;
mod series;

pub use animation::{AnimatedValue, AnimationConfig, DEFAULT_FRAME_INTERVAL};
pub use ensemble::{EnsembleRefreshError, EnsembleService, MIN_REFRESH_INTERVAL};
pub use feed_manager::{
    ChannelStats, ChannelStatus, DEFAULT_TICK_BUFFER, FeedManager, FeedManagerConfig,
    FeedManagerError, FeedSubscription,
};
pub use series::{ChannelSeries, ChannelSeriesView};
