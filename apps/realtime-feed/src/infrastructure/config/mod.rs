//! Configuration Module
//!
//! Environment-driven settings for the feed service.

mod settings;

pub use settings::{
    AnalyticsSettings, ChannelSettings, ConfigError, FeedServiceConfig, ServerSettings,
    StreamSettings,
};
