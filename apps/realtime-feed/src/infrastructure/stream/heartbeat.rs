//! Heartbeat Monitor
//!
//! Tracks connection liveness through ping/pong. The connection's read loop
//! polls the monitor on a timer and records any inbound frame as activity;
//! a ping left unanswered past the pong timeout fails the connection.

use std::time::{Duration, Instant};

use crate::infrastructure::config::StreamSettings;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Idle time before a ping is sent.
    pub ping_interval: Duration,
    /// Time to wait for any inbound frame after a ping.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(20),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }

    /// Build from stream settings.
    #[must_use]
    pub const fn from_stream_settings(settings: &StreamSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
            pong_timeout: settings.heartbeat_timeout,
        }
    }
}

/// What the connection should do after a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Nothing to do.
    Idle,
    /// Send a ping frame.
    SendPing,
    /// The peer stopped answering.
    TimedOut(Duration),
}

/// Liveness state for one connection.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    last_activity: Instant,
    ping_sent_at: Option<Instant>,
}

impl Heartbeat {
    /// Start monitoring at `now`.
    #[must_use]
    pub const fn new(config: HeartbeatConfig, now: Instant) -> Self {
        Self {
            config,
            last_activity: now,
            ping_sent_at: None,
        }
    }

    /// Any inbound frame proves the peer alive.
    pub const fn record_activity(&mut self, now: Instant) {
        self.last_activity = now;
        self.ping_sent_at = None;
    }

    /// Decide the next action at `now`.
    pub fn poll(&mut self, now: Instant) -> HeartbeatAction {
        if let Some(sent) = self.ping_sent_at {
            let waited = now.saturating_duration_since(sent);
            if waited >= self.config.pong_timeout {
                return HeartbeatAction::TimedOut(waited);
            }
            return HeartbeatAction::Idle;
        }

        if now.saturating_duration_since(self.last_activity) >= self.config.ping_interval {
            self.ping_sent_at = Some(now);
            return HeartbeatAction::SendPing;
        }
        HeartbeatAction::Idle
    }

    /// Whether a ping is outstanding.
    #[must_use]
    pub const fn awaiting_pong(&self) -> bool {
        self.ping_sent_at.is_some()
    }

    /// Monitor configuration.
    #[must_use]
    pub const fn config(&self) -> HeartbeatConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HeartbeatConfig {
        HeartbeatConfig::new(Duration::from_secs(10), Duration::from_secs(5))
    }

    #[test]
    fn default_config_values() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(20));
        assert_eq!(config.pong_timeout, Duration::from_secs(20));
    }

    #[test]
    fn idle_until_interval_elapses() {
        let start = Instant::now();
        let mut heartbeat = Heartbeat::new(config(), start);

        assert_eq!(heartbeat.poll(start + Duration::from_secs(9)), HeartbeatAction::Idle);
        assert_eq!(
            heartbeat.poll(start + Duration::from_secs(10)),
            HeartbeatAction::SendPing
        );
        assert!(heartbeat.awaiting_pong());
    }

    #[test]
    fn activity_clears_outstanding_ping() {
        let start = Instant::now();
        let mut heartbeat = Heartbeat::new(config(), start);
        heartbeat.poll(start + Duration::from_secs(10));

        heartbeat.record_activity(start + Duration::from_secs(11));

        assert!(!heartbeat.awaiting_pong());
        assert_eq!(heartbeat.poll(start + Duration::from_secs(20)), HeartbeatAction::Idle);
    }

    #[test]
    fn unanswered_ping_times_out() {
        let start = Instant::now();
        let mut heartbeat = Heartbeat::new(config(), start);
        heartbeat.poll(start + Duration::from_secs(10));

        assert_eq!(heartbeat.poll(start + Duration::from_secs(12)), HeartbeatAction::Idle);
        assert_eq!(
            heartbeat.poll(start + Duration::from_secs(15)),
            HeartbeatAction::TimedOut(Duration::from_secs(5))
        );
    }

    #[test]
    fn from_stream_settings_copies_heartbeat_fields() {
        let settings = StreamSettings {
            heartbeat_interval: Duration::from_secs(3),
            heartbeat_timeout: Duration::from_secs(4),
            ..StreamSettings::default()
        };
        let config = HeartbeatConfig::from_stream_settings(&settings);
        assert_eq!(config, HeartbeatConfig::new(Duration::from_secs(3), Duration::from_secs(4)));
    }
}
