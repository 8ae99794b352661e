//! Reconnection Policy
//!
//! Decides when a dropped channel retries its live connection. The default
//! is a constant 5 second delay with unlimited attempts; exponential backoff
//! and jitter are opt-in through configuration.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::StreamSettings;

/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first attempt after a drop.
    pub initial_delay: Duration,
    /// Upper bound on the delay.
    pub max_delay: Duration,
    /// Delay growth per attempt (1.0 = fixed delay).
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectConfig {
    /// Constant delay, no jitter, unlimited attempts.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        }
    }

    /// Exponential backoff from `initial` to `max`.
    #[must_use]
    pub const fn exponential(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max,
            multiplier,
            jitter_factor: 0.0,
            max_attempts: 0,
        }
    }

    /// Set the jitter fraction.
    #[must_use]
    pub const fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// Set the attempt limit (0 = unlimited).
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Build from stream settings.
    #[must_use]
    pub const fn from_stream_settings(settings: &StreamSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            jitter_factor: settings.reconnect_jitter,
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}

/// Per-channel reconnection state.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a policy in its initial state.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let current_delay = config.initial_delay;
        Self {
            config,
            current_delay,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempt_count += 1;

        let delay = self.apply_jitter(self.current_delay);
        self.current_delay = self.grow(self.current_delay);
        Some(delay)
    }

    /// Back to the initial state after a successful reconnect.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Attempts scheduled since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Whether another attempt may be scheduled.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    /// Policy configuration.
    #[must_use]
    pub const fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    fn grow(&self, delay: Duration) -> Duration {
        let multiplier = self.config.multiplier;
        if !multiplier.is_finite() || multiplier <= 1.0 {
            return delay.min(self.config.max_delay);
        }
        #[allow(clippy::cast_precision_loss)]
        let scaled = (delay.as_millis() as f64 * multiplier).round();
        let max_millis = self.config.max_delay.as_millis();
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let millis = if scaled.is_finite() && scaled < max_millis as f64 {
            scaled as u128
        } else {
            max_millis
        };
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        let factor = self.config.jitter_factor;
        if !factor.is_finite() || factor <= 0.0 {
            return delay;
        }

        let spread = factor.min(1.0);
        let scale = rand::rng().random_range(1.0 - spread..=1.0 + spread);
        delay.mul_f64(scale).max(Duration::from_millis(1))
    }
}
