//! Channel Series Service
//!
//! Shared read model of the chart-facing output. Each channel's ticks are
//! folded into a smoothed window, and an [`AnimatedValue`] follows the
//! latest smoothed point for display.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::application::services::animation::{AnimatedValue, AnimationConfig};
use crate::application::services::feed_manager::FeedSubscription;
use crate::domain::feed::{ChannelId, Tick};
use crate::domain::series::{SeriesReducer, SmoothedPoint, SmoothingConfig};

/// Read-only view of one channel's derived series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSeriesView {
    /// Channel id.
    pub channel: ChannelId,
    /// Value currently displayed.
    pub displayed: f64,
    /// Latest smoothed value.
    pub smoothed: f64,
    /// Smoothed window, oldest first.
    pub window: Vec<SmoothedPoint>,
}

#[derive(Debug, Default)]
struct SeriesState {
    reducer: SeriesReducer,
    displays: HashMap<ChannelId, AnimatedValue>,
}

/// Smoothed windows and display values for every driven channel.
#[derive(Debug)]
pub struct ChannelSeries {
    animation: AnimationConfig,
    state: Mutex<SeriesState>,
}

impl ChannelSeries {
    /// Create an empty read model.
    #[must_use]
    pub fn new(smoothing: SmoothingConfig, animation: AnimationConfig) -> Self {
        Self {
            animation,
            state: Mutex::new(SeriesState {
                reducer: SeriesReducer::new(smoothing),
                displays: HashMap::new(),
            }),
        }
    }

    /// Fold a tick into the channel's window and re-target its display.
    ///
    /// The first tick of a channel spawns its display at the smoothed value,
    /// so this must be called within a Tokio runtime.
    pub fn record(&self, channel: &str, tick: &Tick) -> SmoothedPoint {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let point = state.reducer.on_tick(channel, tick);

        match state.displays.get(channel) {
            Some(display) => {
                display.set_target(point.smoothed);
            }
            None => {
                state.displays.insert(
                    channel.to_string(),
                    AnimatedValue::spawn(point.smoothed, self.animation),
                );
            }
        }
        point
    }

    /// View of a channel; `None` before its first tick.
    #[must_use]
    pub fn view(&self, channel: &str) -> Option<ChannelSeriesView> {
        let state = self.state.lock();
        let smoothed = state.reducer.current(channel)?;
        let displayed = state
            .displays
            .get(channel)
            .map_or(smoothed, AnimatedValue::value);

        Some(ChannelSeriesView {
            channel: channel.to_string(),
            displayed,
            smoothed,
            window: state.reducer.window(channel),
        })
    }

    /// Channels with at least one point, sorted.
    #[must_use]
    pub fn channels(&self) -> Vec<ChannelId> {
        let mut channels: Vec<_> = self.state.lock().displays.keys().cloned().collect();
        channels.sort();
        channels
    }

    /// Forget a channel and stop its display.
    pub fn remove(&self, channel: &str) {
        let mut state = self.state.lock();
        state.reducer.remove(channel);
        state.displays.remove(channel);
    }

    /// Record every tick of `subscription` until the channel closes.
    pub async fn drive(self: Arc<Self>, mut subscription: FeedSubscription) {
        let channel = subscription.channel().to_string();

        while let Some(tick) = subscription.next_tick().await {
            let point = self.record(&channel, &tick);
            let snapshot = subscription.snapshot();
            tracing::debug!(
                channel = %channel,
                status = %snapshot.status,
                trend = snapshot.trend.as_str(),
                raw = tick.value,
                smoothed = point.smoothed,
                "Tick reduced"
            );
        }

        tracing::debug!(channel = %channel, "Channel closed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeDelta, Utc};

    use super::*;

    fn series() -> ChannelSeries {
        let smoothing = SmoothingConfig::new(0.5, 3).unwrap();
        ChannelSeries::new(smoothing, AnimationConfig::default())
    }

    fn tick(offset_ms: i64, value: f64) -> Tick {
        Tick::new(Utc::now() + TimeDelta::milliseconds(offset_ms), value)
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_channel_has_no_view() {
        let series = series();
        assert!(series.view("btcusdt").is_none());
        assert!(series.channels().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn view_tracks_window_and_display() {
        let series = series();
        series.record("btcusdt", &tick(0, 10.0));

        let first = series.view("btcusdt").unwrap();
        assert_eq!(first.displayed, 10.0);
        assert_eq!(first.smoothed, 10.0);
        assert_eq!(first.window.len(), 1);

        series.record("btcusdt", &tick(1, 20.0));
        tokio::time::sleep(Duration::from_secs(1)).await;

        let settled = series.view("btcusdt").unwrap();
        assert_eq!(settled.smoothed, 15.0);
        assert_eq!(settled.displayed, 15.0);
        assert_eq!(series.channels(), vec!["btcusdt".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn window_is_capped_per_channel() {
        let series = series();
        for i in 0..5 {
            series.record("ethusdt", &tick(i, 1.0));
        }
        series.record("solusdt", &tick(0, 2.0));

        assert_eq!(series.view("ethusdt").unwrap().window.len(), 3);
        assert_eq!(series.view("solusdt").unwrap().window.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn remove_forgets_channel() {
        let series = series();
        series.record("btcusdt", &tick(0, 1.0));

        series.remove("btcusdt");

        assert!(series.view("btcusdt").is_none());
        assert!(series.channels().is_empty());
    }
}
