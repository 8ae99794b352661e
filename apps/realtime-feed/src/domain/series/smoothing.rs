//! Exponential Smoothing Window
//!
//! `smoothed = raw * alpha + previous * (1 - alpha)`, seeded by the first raw
//! value, appended to a capacity-bounded FIFO window.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::feed::{ChannelId, Tick};

/// Default smoothing factor.
pub const DEFAULT_ALPHA: f64 = 0.2;

/// Default window capacity.
pub const DEFAULT_WINDOW_CAPACITY: usize = 40;

/// Invalid smoothing parameters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SeriesError {
    /// Alpha outside `(0, 1]`.
    #[error("smoothing factor must be in (0, 1], got {0}")]
    InvalidAlpha(f64),
    /// Zero-capacity window.
    #[error("window capacity must be at least 1")]
    ZeroCapacity,
}

/// Smoothing parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothingConfig {
    alpha: f64,
    capacity: usize,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            capacity: DEFAULT_WINDOW_CAPACITY,
        }
    }
}

impl SmoothingConfig {
    /// Create validated parameters.
    ///
    /// # Errors
    ///
    /// Returns `SeriesError` if `alpha` is not in `(0, 1]` or `capacity` is 0.
    pub fn new(alpha: f64, capacity: usize) -> Result<Self, SeriesError> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(SeriesError::InvalidAlpha(alpha));
        }
        if capacity == 0 {
            return Err(SeriesError::ZeroCapacity);
        }
        Ok(Self { alpha, capacity })
    }

    /// Smoothing factor.
    #[must_use]
    pub const fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Window capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

/// One point of a smoothed series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SmoothedPoint {
    /// Timestamp of the raw tick.
    pub timestamp: DateTime<Utc>,
    /// Smoothed value.
    pub smoothed: f64,
}

/// Smoothed FIFO window for one channel.
#[derive(Debug, Clone)]
pub struct SmoothedWindow {
    config: SmoothingConfig,
    smoothed: Option<f64>,
    points: VecDeque<SmoothedPoint>,
}

impl SmoothedWindow {
    /// Create an empty window.
    #[must_use]
    pub fn new(config: SmoothingConfig) -> Self {
        Self {
            config,
            smoothed: None,
            points: VecDeque::with_capacity(config.capacity),
        }
    }

    /// Fold a raw tick into the series, evicting the oldest point when full.
    pub fn push(&mut self, tick: &Tick) -> SmoothedPoint {
        let alpha = self.config.alpha;
        let smoothed = self
            .smoothed
            .map_or(tick.value, |prev| tick.value.mul_add(alpha, prev * (1.0 - alpha)));
        self.smoothed = Some(smoothed);

        let point = SmoothedPoint {
            timestamp: tick.timestamp,
            smoothed,
        };

        if self.points.len() == self.config.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
        point
    }

    /// Snapshot of the window, oldest first.
    #[must_use]
    pub fn points(&self) -> Vec<SmoothedPoint> {
        self.points.iter().copied().collect()
    }

    /// Latest smoothed value.
    #[must_use]
    pub const fn current(&self) -> Option<f64> {
        self.smoothed
    }

    /// Number of points held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether no tick has arrived yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Per-channel smoothed windows.
#[derive(Debug, Default)]
pub struct SeriesReducer {
    config: SmoothingConfig,
    windows: HashMap<ChannelId, SmoothedWindow>,
}

impl SeriesReducer {
    /// Create a reducer applying `config` to every channel.
    #[must_use]
    pub fn new(config: SmoothingConfig) -> Self {
        Self {
            config,
            windows: HashMap::new(),
        }
    }

    /// Fold a tick into the channel's window.
    pub fn on_tick(&mut self, channel: &str, tick: &Tick) -> SmoothedPoint {
        self.windows
            .entry(channel.to_string())
            .or_insert_with(|| SmoothedWindow::new(self.config))
            .push(tick)
    }

    /// Snapshot of a channel's window; empty before its first tick.
    #[must_use]
    pub fn window(&self, channel: &str) -> Vec<SmoothedPoint> {
        self.windows
            .get(channel)
            .map(SmoothedWindow::points)
            .unwrap_or_default()
    }

    /// Latest smoothed value for a channel.
    #[must_use]
    pub fn current(&self, channel: &str) -> Option<f64> {
        self.windows.get(channel).and_then(SmoothedWindow::current)
    }

    /// Forget a channel.
    pub fn remove(&mut self, channel: &str) {
        self.windows.remove(channel);
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn ticks(values: &[f64]) -> Vec<Tick> {
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Tick::new(start + TimeDelta::seconds(i as i64), *v))
            .collect()
    }

    #[test]
    fn config_rejects_bad_alpha() {
        assert_eq!(
            SmoothingConfig::new(0.0, 40),
            Err(SeriesError::InvalidAlpha(0.0))
        );
        assert!(SmoothingConfig::new(1.5, 40).is_err());
        assert!(SmoothingConfig::new(f64::NAN, 40).is_err());
        assert!(SmoothingConfig::new(1.0, 40).is_ok());
    }

    #[test]
    fn config_rejects_zero_capacity() {
        assert_eq!(SmoothingConfig::new(0.2, 0), Err(SeriesError::ZeroCapacity));
    }

    #[test]
    fn first_tick_seeds_smoothing() {
        let mut window = SmoothedWindow::new(SmoothingConfig::default());
        let point = window.push(&ticks(&[100.0])[0]);
        assert_eq!(point.smoothed, 100.0);
    }

    #[test]
    fn smoothing_applies_alpha() {
        let mut window = SmoothedWindow::new(SmoothingConfig::default());
        for tick in ticks(&[100.0, 110.0]) {
            window.push(&tick);
        }
        // 110 * 0.2 + 100 * 0.8
        assert!((window.current().unwrap() - 102.0).abs() < 1e-9);
    }

    #[test]
    fn window_keeps_last_capacity_points_in_order() {
        let mut window = SmoothedWindow::new(SmoothingConfig::new(1.0, 40).unwrap());
        let input = ticks(&(0..45).map(f64::from).collect::<Vec<_>>());
        for tick in &input {
            window.push(tick);
        }

        let points = window.points();
        assert_eq!(points.len(), 40);
        let expected: Vec<_> = input[5..].iter().map(|t| t.timestamp).collect();
        let actual: Vec<_> = points.iter().map(|p| p.timestamp).collect();
        assert_eq!(actual, expected);
        assert_eq!(points[0].smoothed, 5.0);
        assert_eq!(points[39].smoothed, 44.0);
    }

    #[test]
    fn reducer_window_empty_before_first_tick() {
        let reducer = SeriesReducer::new(SmoothingConfig::default());
        assert!(reducer.window("btcusdt").is_empty());
        assert_eq!(reducer.current("btcusdt"), None);
    }

    #[test]
    fn reducer_channels_are_independent() {
        let mut reducer = SeriesReducer::new(SmoothingConfig::default());
        let t = ticks(&[1.0, 2.0]);
        reducer.on_tick("a", &t[0]);
        reducer.on_tick("b", &t[1]);

        assert_eq!(reducer.window("a").len(), 1);
        assert_eq!(reducer.current("b"), Some(2.0));

        reducer.remove("a");
        assert!(reducer.window("a").is_empty());
    }

    #[test]
    fn snapshot_is_detached_from_window() {
        let mut window = SmoothedWindow::new(SmoothingConfig::default());
        let t = ticks(&[1.0, 2.0]);
        window.push(&t[0]);
        let snapshot = window.points();
        window.push(&t[1]);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(window.len(), 2);
    }
}
