//! Feed Domain Types
//!
//! Channels, ticks, the per-channel feed state machine and trend tracking.
//! Everything here is synchronous and runtime-agnostic; the supervisor in
//! the application layer drives it from network and timer events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Channel
// =============================================================================

/// Channel identifier (symbol or metric name, e.g. `btcusdt`).
pub type ChannelId = String;

/// Volatility profile used by the synthetic fallback feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityClass {
    /// Regular instruments.
    #[default]
    Standard,
    /// Designated high-volatility instruments (wider random-walk steps).
    High,
}

impl VolatilityClass {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::High => "high",
        }
    }
}

/// Subscription parameters for a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    /// Volatility class for the synthetic fallback.
    pub volatility: VolatilityClass,
    /// Absolute random-walk magnitude; overrides the class step when set.
    pub magnitude: Option<f64>,
    /// Synthetic starting value when no real tick has been seen yet.
    pub seed_value: Option<f64>,
    /// Lowest value the synthetic feed may emit. `None` disables clamping.
    pub floor: Option<f64>,
    /// Seed for the synthetic RNG stream. `None` draws one from the OS.
    pub rng_seed: Option<u64>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            volatility: VolatilityClass::Standard,
            magnitude: None,
            seed_value: None,
            floor: Some(0.0),
            rng_seed: None,
        }
    }
}

impl ChannelConfig {
    /// Price-like channel with default parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the volatility class.
    #[must_use]
    pub const fn with_volatility(mut self, volatility: VolatilityClass) -> Self {
        self.volatility = volatility;
        self
    }

    /// Set an absolute random-walk magnitude.
    #[must_use]
    pub const fn with_magnitude(mut self, magnitude: f64) -> Self {
        self.magnitude = Some(magnitude);
        self
    }

    /// Set the synthetic starting value.
    #[must_use]
    pub const fn with_seed_value(mut self, value: f64) -> Self {
        self.seed_value = Some(value);
        self
    }

    /// Set (or clear) the synthetic floor.
    #[must_use]
    pub const fn with_floor(mut self, floor: Option<f64>) -> Self {
        self.floor = floor;
        self
    }

    /// Make the synthetic feed reproducible.
    #[must_use]
    pub const fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }
}

/// A subscribed channel: identifier plus parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    id: ChannelId,
    config: ChannelConfig,
}

impl Channel {
    /// Create a channel.
    #[must_use]
    pub fn new(id: impl Into<ChannelId>, config: ChannelConfig) -> Self {
        Self {
            id: id.into(),
            config,
        }
    }

    /// Channel identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Channel parameters.
    #[must_use]
    pub const fn config(&self) -> &ChannelConfig {
        &self.config
    }
}

// =============================================================================
// Tick
// =============================================================================

/// One observation on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Observation time.
    pub timestamp: DateTime<Utc>,
    /// Observed value.
    pub value: f64,
}

impl Tick {
    /// Create a tick.
    #[must_use]
    pub const fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// Tick stamped with the current wall-clock time.
    #[must_use]
    pub fn now(value: f64) -> Self {
        Self::new(Utc::now(), value)
    }
}

// =============================================================================
// Feed State
// =============================================================================

/// Connection state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedState {
    /// No source and no data.
    #[default]
    Disconnected,
    /// Connection attempt in flight, waiting for the first real tick.
    Connecting,
    /// Live source delivering ticks.
    Connected,
    /// Synthetic fallback delivering ticks while the live source is down.
    Simulating,
}

impl FeedState {
    /// All states, in declaration order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Disconnected,
            Self::Connecting,
            Self::Connected,
            Self::Simulating,
        ]
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Simulating => "simulating",
        }
    }

    /// Whether consumers are receiving data (live or synthetic).
    #[must_use]
    pub const fn has_data(self) -> bool {
        matches!(self, Self::Connected | Self::Simulating)
    }

    /// Whether `next` is a legal successor during normal operation.
    ///
    /// Teardown is the only path into `Disconnected` and is checked with
    /// [`FeedState::can_tear_down`].
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected | Self::Simulating, Self::Connecting)
                | (Self::Connecting, Self::Connected | Self::Simulating)
                | (Self::Connected, Self::Simulating)
        )
    }

    /// Whether an explicit teardown may leave this state.
    #[must_use]
    pub const fn can_tear_down(self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

impl std::fmt::Display for FeedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One state change of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateChange {
    /// State left.
    pub from: FeedState,
    /// State entered.
    pub to: FeedState,
    /// When the change happened.
    pub at: DateTime<Utc>,
}

impl StateChange {
    /// Change from `from` to `to`, stamped now.
    #[must_use]
    pub fn now(from: FeedState, to: FeedState) -> Self {
        Self {
            from,
            to,
            at: Utc::now(),
        }
    }

    /// Whether this is a normal-operation edge or a teardown.
    #[must_use]
    pub const fn is_legal(&self) -> bool {
        self.from.can_transition_to(self.to)
            || (matches!(self.to, FeedState::Disconnected) && self.from.can_tear_down())
    }
}

// =============================================================================
// Trend
// =============================================================================

/// Direction of the latest accepted value relative to the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    /// Strictly greater than the previous value.
    Up,
    /// Strictly less than the previous value.
    Down,
    /// Equal to the previous value, or no previous value.
    #[default]
    Neutral,
}

impl Trend {
    /// Classify `next` against `previous`.
    #[must_use]
    pub fn between(previous: Option<f64>, next: f64) -> Self {
        match previous {
            Some(prev) if next > prev => Self::Up,
            Some(prev) if next < prev => Self::Down,
            _ => Self::Neutral,
        }
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Neutral => "neutral",
        }
    }
}

/// Tracks the last accepted tick and derives the trend.
///
/// Ticks older than the last accepted one are rejected so a late or
/// replayed message never rewrites the trend. Ordering is enforced within
/// one source; [`TrendTracker::rebase`] drops the baseline on a source swap.
#[derive(Debug, Clone, Default)]
pub struct TrendTracker {
    last: Option<Tick>,
    trend: Trend,
    rebased: bool,
}

impl TrendTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a tick, returning the new trend, or `None` if rejected.
    pub fn accept(&mut self, tick: Tick) -> Option<Trend> {
        if !self.rebased
            && let Some(last) = self.last
            && tick.timestamp < last.timestamp
        {
            return None;
        }

        self.rebased = false;
        self.trend = Trend::between(self.last.map(|t| t.value), tick.value);
        self.last = Some(tick);
        Some(self.trend)
    }

    /// Accept the next tick regardless of its timestamp.
    ///
    /// The trend still compares against the last accepted value.
    pub const fn rebase(&mut self) {
        self.rebased = true;
    }

    /// Last accepted tick.
    #[must_use]
    pub const fn latest(&self) -> Option<Tick> {
        self.last
    }

    /// Last accepted value.
    #[must_use]
    pub fn last_value(&self) -> Option<f64> {
        self.last.map(|t| t.value)
    }

    /// Current trend.
    #[must_use]
    pub const fn trend(&self) -> Trend {
        self.trend
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// What a subscriber sees for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelSnapshot {
    /// Current feed state.
    pub status: FeedState,
    /// Latest accepted tick.
    pub latest: Option<Tick>,
    /// Trend of the latest tick.
    pub trend: Trend,
}

impl Default for ChannelSnapshot {
    fn default() -> Self {
        Self {
            status: FeedState::Disconnected,
            latest: None,
            trend: Trend::Neutral,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use test_case::test_case;

    use super::*;

    #[test_case(FeedState::Disconnected, FeedState::Connecting, true ; "open")]
    #[test_case(FeedState::Connecting, FeedState::Simulating, true ; "refused")]
    #[test_case(FeedState::Connected, FeedState::Disconnected, true ; "teardown")]
    #[test_case(FeedState::Disconnected, FeedState::Disconnected, false ; "teardown when closed")]
    #[test_case(FeedState::Connected, FeedState::Connecting, false ; "skips fallback")]
    #[test_case(FeedState::Simulating, FeedState::Connected, false ; "skips connecting")]
    fn state_change_legality(from: FeedState, to: FeedState, legal: bool) {
        assert_eq!(StateChange::now(from, to).is_legal(), legal);
    }

    fn tick_at(secs: i64, value: f64) -> Tick {
        Tick::new(
            DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap(),
            value,
        )
    }

    #[test_case(FeedState::Disconnected, FeedState::Connecting ; "initial connect")]
    #[test_case(FeedState::Connecting, FeedState::Connected ; "first tick")]
    #[test_case(FeedState::Connected, FeedState::Simulating ; "drop to fallback")]
    #[test_case(FeedState::Simulating, FeedState::Connecting ; "reconnect attempt")]
    #[test_case(FeedState::Connecting, FeedState::Simulating ; "attempt failed")]
    fn legal_transitions(from: FeedState, to: FeedState) {
        assert!(from.can_transition_to(to));
    }

    #[test_case(FeedState::Disconnected, FeedState::Connected)]
    #[test_case(FeedState::Disconnected, FeedState::Simulating)]
    #[test_case(FeedState::Connected, FeedState::Connecting)]
    #[test_case(FeedState::Simulating, FeedState::Connected)]
    #[test_case(FeedState::Connected, FeedState::Disconnected)]
    #[test_case(FeedState::Simulating, FeedState::Disconnected)]
    fn illegal_transitions(from: FeedState, to: FeedState) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn no_state_transitions_to_itself() {
        for state in FeedState::all() {
            assert!(!state.can_transition_to(*state));
        }
    }

    #[test]
    fn teardown_allowed_from_any_active_state() {
        assert!(FeedState::Simulating.can_tear_down());
        assert!(FeedState::Connected.can_tear_down());
        assert!(FeedState::Connecting.can_tear_down());
        assert!(!FeedState::Disconnected.can_tear_down());
    }

    #[test]
    fn trend_sequence_for_flat_then_up_then_down() {
        let mut tracker = TrendTracker::new();
        let trends: Vec<_> = [10.0, 10.0, 12.0, 11.0]
            .iter()
            .enumerate()
            .map(|(i, v)| tracker.accept(tick_at(i as i64, *v)).unwrap())
            .collect();

        assert_eq!(
            trends,
            vec![Trend::Neutral, Trend::Neutral, Trend::Up, Trend::Down]
        );
    }

    #[test]
    fn out_of_order_tick_is_rejected() {
        let mut tracker = TrendTracker::new();
        tracker.accept(tick_at(10, 100.0));
        tracker.accept(tick_at(11, 101.0));

        assert_eq!(tracker.accept(tick_at(5, 50.0)), None);
        assert_eq!(tracker.last_value(), Some(101.0));
        assert_eq!(tracker.trend(), Trend::Up);
    }

    #[test]
    fn rebase_accepts_one_older_tick_and_keeps_trend_baseline() {
        let mut tracker = TrendTracker::new();
        tracker.accept(tick_at(100, 50.0));
        tracker.rebase();

        assert_eq!(tracker.accept(tick_at(90, 55.0)), Some(Trend::Up));
        assert_eq!(tracker.accept(tick_at(80, 60.0)), None);
    }

    #[test]
    fn duplicate_timestamp_compares_against_last_accepted() {
        let mut tracker = TrendTracker::new();
        tracker.accept(tick_at(1, 100.0));

        assert_eq!(tracker.accept(tick_at(1, 99.0)), Some(Trend::Down));
        assert_eq!(tracker.accept(tick_at(1, 99.0)), Some(Trend::Neutral));
    }

    #[test]
    fn first_tick_is_neutral() {
        assert_eq!(Trend::between(None, 42.0), Trend::Neutral);
    }

    #[test]
    fn feed_state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&FeedState::Simulating).unwrap(),
            "\"simulating\""
        );
        assert_eq!(serde_json::to_string(&Trend::Up).unwrap(), "\"up\"");
    }

    #[test]
    fn snapshot_serializes_with_null_latest() {
        let json = serde_json::to_value(ChannelSnapshot::default()).unwrap();
        assert_eq!(json["status"], "disconnected");
        assert!(json["latest"].is_null());
        assert_eq!(json["trend"], "neutral");
    }

    #[test]
    fn channel_config_builder() {
        let config = ChannelConfig::new()
            .with_volatility(VolatilityClass::High)
            .with_seed_value(1_000_000.0)
            .with_floor(None)
            .with_rng_seed(7);

        assert_eq!(config.volatility, VolatilityClass::High);
        assert_eq!(config.seed_value, Some(1_000_000.0));
        assert_eq!(config.floor, None);
        assert_eq!(config.rng_seed, Some(7));
    }

    #[test]
    fn tick_now_is_recent() {
        let tick = Tick::now(1.0);
        assert!(Utc::now() - tick.timestamp < TimeDelta::seconds(5));
    }
}
