//! Feed Service Configuration Settings
//!
//! Configuration types for the feed service, loaded from environment
//! variables. Unset variables fall back to defaults; set but unparseable
//! ones are rejected.

use std::str::FromStr;
use std::time::Duration;

use crate::domain::feed::{Channel, ChannelConfig, VolatilityClass};
use crate::domain::series::{SeriesError, SmoothingConfig};
use crate::infrastructure::stream::websocket::CHANNEL_PLACEHOLDER;
use crate::infrastructure::synthetic::SyntheticSettings;

/// Live stream connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    /// WebSocket URL template containing `{channel}`.
    pub url_template: String,
    /// Message fields searched for the tick value, in order.
    pub price_fields: Vec<String>,
    /// Idle time before a heartbeat ping.
    pub heartbeat_interval: Duration,
    /// Time to wait for traffic after a ping.
    pub heartbeat_timeout: Duration,
    /// Delay before the first reconnect attempt.
    pub reconnect_delay_initial: Duration,
    /// Upper bound on the reconnect delay.
    pub reconnect_delay_max: Duration,
    /// Reconnect delay growth per attempt (1.0 = fixed).
    pub reconnect_delay_multiplier: f64,
    /// Reconnect jitter fraction.
    pub reconnect_jitter: f64,
    /// Maximum reconnect attempts (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            url_template: "wss://stream.binance.com:9443/ws/{channel}@trade".to_string(),
            price_fields: vec!["p".to_string(), "price".to_string(), "value".to_string()],
            heartbeat_interval: Duration::from_secs(20),
            heartbeat_timeout: Duration::from_secs(20),
            reconnect_delay_initial: Duration::from_secs(5),
            reconnect_delay_max: Duration::from_secs(5),
            reconnect_delay_multiplier: 1.0,
            reconnect_jitter: 0.0,
            max_reconnect_attempts: 0, // Unlimited
        }
    }
}

/// Channels opened at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSettings {
    /// Channel ids.
    pub channels: Vec<String>,
    /// Channels using the high-volatility synthetic step.
    pub high_volatility: Vec<String>,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            channels: vec![
                "btcusdt".to_string(),
                "ethusdt".to_string(),
                "solusdt".to_string(),
            ],
            high_volatility: Vec::new(),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Analytics backend settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticsSettings {
    /// Backend base URL; ensemble refresh is disabled when unset.
    pub api_url: Option<String>,
    /// Paths requested per refresh.
    pub simulations: u32,
    /// Time between refreshes.
    pub refresh_interval: Duration,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            api_url: None,
            simulations: 1000,
            refresh_interval: Duration::from_secs(60),
        }
    }
}

/// Complete feed service configuration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeedServiceConfig {
    /// Live stream settings.
    pub stream: StreamSettings,
    /// Startup channels.
    pub channels: ChannelSettings,
    /// Synthetic fallback settings.
    pub synthetic: SyntheticSettings,
    /// Series smoothing settings.
    pub smoothing: SmoothingConfig,
    /// Server port settings.
    pub server: ServerSettings,
    /// Analytics backend settings.
    pub analytics: AnalyticsSettings,
}

impl FeedServiceConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an invalid value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let defaults = Self::default();

        let url_template = env.string("FEED_STREAM_URL", defaults.stream.url_template)?;
        if !url_template.contains(CHANNEL_PLACEHOLDER) {
            return Err(ConfigError::MissingPlaceholder(url_template));
        }

        let price_fields = env.list("FEED_PRICE_FIELDS").unwrap_or(defaults.stream.price_fields);
        if price_fields.is_empty() {
            return Err(ConfigError::EmptyValue("FEED_PRICE_FIELDS".to_string()));
        }

        let stream = StreamSettings {
            url_template,
            price_fields,
            heartbeat_interval: env.secs(
                "FEED_HEARTBEAT_INTERVAL_SECS",
                defaults.stream.heartbeat_interval,
            )?,
            heartbeat_timeout: env.secs(
                "FEED_HEARTBEAT_TIMEOUT_SECS",
                defaults.stream.heartbeat_timeout,
            )?,
            reconnect_delay_initial: env.millis(
                "FEED_RECONNECT_DELAY_MS",
                defaults.stream.reconnect_delay_initial,
            )?,
            reconnect_delay_max: env.millis(
                "FEED_RECONNECT_DELAY_MAX_MS",
                defaults.stream.reconnect_delay_max,
            )?,
            reconnect_delay_multiplier: env.parse(
                "FEED_RECONNECT_MULTIPLIER",
                defaults.stream.reconnect_delay_multiplier,
            )?,
            reconnect_jitter: env.parse("FEED_RECONNECT_JITTER", defaults.stream.reconnect_jitter)?,
            max_reconnect_attempts: env.parse(
                "FEED_MAX_RECONNECT_ATTEMPTS",
                defaults.stream.max_reconnect_attempts,
            )?,
        };
        check_range(
            "FEED_RECONNECT_MULTIPLIER",
            stream.reconnect_delay_multiplier,
            stream.reconnect_delay_multiplier >= 1.0,
            "must be at least 1.0",
        )?;
        check_range(
            "FEED_RECONNECT_JITTER",
            stream.reconnect_jitter,
            (0.0..=1.0).contains(&stream.reconnect_jitter),
            "must be within [0, 1]",
        )?;

        let channels = ChannelSettings {
            channels: env.list("FEED_CHANNELS").unwrap_or(defaults.channels.channels),
            high_volatility: env.list("FEED_HIGH_VOLATILITY_CHANNELS").unwrap_or_default(),
        };
        if channels.channels.is_empty() {
            return Err(ConfigError::EmptyValue("FEED_CHANNELS".to_string()));
        }

        let synthetic = SyntheticSettings {
            interval: env.millis("FEED_SYNTHETIC_INTERVAL_MS", defaults.synthetic.interval)?,
            default_seed: env.parse("FEED_SYNTHETIC_DEFAULT_SEED", defaults.synthetic.default_seed)?,
            standard_step: env.parse(
                "FEED_SYNTHETIC_STANDARD_STEP",
                defaults.synthetic.standard_step,
            )?,
            high_step: env.parse("FEED_SYNTHETIC_HIGH_STEP", defaults.synthetic.high_step)?,
        };
        check_positive("FEED_SYNTHETIC_INTERVAL_MS", synthetic.interval)?;
        check_range(
            "FEED_SYNTHETIC_DEFAULT_SEED",
            synthetic.default_seed,
            true,
            "must be finite",
        )?;
        check_range(
            "FEED_SYNTHETIC_STANDARD_STEP",
            synthetic.standard_step,
            synthetic.standard_step >= 0.0,
            "must be finite and non-negative",
        )?;
        check_range(
            "FEED_SYNTHETIC_HIGH_STEP",
            synthetic.high_step,
            synthetic.high_step >= 0.0,
            "must be finite and non-negative",
        )?;

        let smoothing = SmoothingConfig::new(
            env.parse("FEED_SMOOTHING_ALPHA", defaults.smoothing.alpha())?,
            env.parse("FEED_WINDOW_CAPACITY", defaults.smoothing.capacity())?,
        )?;

        let server = ServerSettings {
            health_port: env.parse("FEED_HEALTH_PORT", defaults.server.health_port)?,
        };

        let analytics = AnalyticsSettings {
            api_url: env.optional("ANALYTICS_API_URL"),
            simulations: env.parse("ANALYTICS_SIMULATIONS", defaults.analytics.simulations)?,
            refresh_interval: env.secs(
                "ANALYTICS_REFRESH_SECS",
                defaults.analytics.refresh_interval,
            )?,
        };
        check_positive("ANALYTICS_REFRESH_SECS", analytics.refresh_interval)?;

        Ok(Self {
            stream,
            channels,
            synthetic,
            smoothing,
            server,
            analytics,
        })
    }

    /// Startup channels with their subscription parameters.
    #[must_use]
    pub fn channel_list(&self) -> Vec<Channel> {
        self.channels
            .channels
            .iter()
            .map(|id| {
                let volatility = if self
                    .channels
                    .high_volatility
                    .iter()
                    .any(|high| high.eq_ignore_ascii_case(id))
                {
                    VolatilityClass::High
                } else {
                    VolatilityClass::Standard
                };
                Channel::new(id.clone(), ChannelConfig::new().with_volatility(volatility))
            })
            .collect()
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Variable could not be parsed or is out of range.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
        /// What was wrong.
        reason: String,
    },
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Stream URL template lacks the channel placeholder.
    #[error("stream URL {0:?} must contain {{channel}}")]
    MissingPlaceholder(String),
    /// Invalid smoothing parameters.
    #[error(transparent)]
    Series(#[from] SeriesError),
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: String) -> Result<String, ConfigError> {
        match (self.lookup)(key) {
            None => Ok(default),
            Some(v) if v.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
            Some(v) => Ok(v.trim().to_string()),
        }
    }

    fn list(&self, key: &str) -> Option<Vec<String>> {
        (self.lookup)(key).map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(raw) = self.optional(key) else {
            return Ok(default);
        };
        raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        })
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(key, default.as_secs()).map(Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let default = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.parse(key, default).map(Duration::from_millis)
    }
}

fn check_range(key: &str, value: f64, ok: bool, reason: &str) -> Result<(), ConfigError> {
    if ok && value.is_finite() {
        return Ok(());
    }
    Err(ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

fn check_positive(key: &str, value: Duration) -> Result<(), ConfigError> {
    if !value.is_zero() {
        return Ok(());
    }
    Err(ConfigError::InvalidValue {
        key: key.to_string(),
        value: "0".to_string(),
        reason: "must be positive".to_string(),
    })
}
