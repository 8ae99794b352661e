//! Synthetic Feed Generator
//!
//! Bounded random walk standing in for a channel's live feed while it is
//! down. Each step draws `U(-δ, δ)` and clamps at the channel floor. The
//! first emission is the seed value itself, the walk then advances on a
//! fixed interval.
//!
//! A walk is fully determined by its RNG seed. Every fallback episode of a
//! channel takes a fresh seed from that channel's [`SeedStream`], so
//! episodes differ from one another yet a seeded channel replays exactly.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::application::ports::{
    EventSender, SourceEvent, SourceEventKind, SourceHandle, SourceId,
};
use crate::domain::feed::{ChannelConfig, Tick, VolatilityClass};

// =============================================================================
// Settings
// =============================================================================

/// Generator settings shared by all channels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticSettings {
    /// Emission cadence.
    pub interval: Duration,
    /// Starting value when a channel has neither data nor a configured seed.
    pub default_seed: f64,
    /// Relative step for standard channels.
    pub standard_step: f64,
    /// Relative step for high-volatility channels.
    pub high_step: f64,
}

impl Default for SyntheticSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            default_seed: 100.0,
            standard_step: 0.0005,
            high_step: 0.0025,
        }
    }
}

impl SyntheticSettings {
    /// Relative step for a volatility class.
    #[must_use]
    pub const fn step_for(&self, class: VolatilityClass) -> f64 {
        match class {
            VolatilityClass::Standard => self.standard_step,
            VolatilityClass::High => self.high_step,
        }
    }

    /// Walk magnitude δ for a channel starting at `seed_value`.
    ///
    /// The channel's absolute magnitude wins; otherwise the class step
    /// scaled by `|seed_value|`. Non-finite results collapse to 0.
    #[must_use]
    pub fn magnitude_for(&self, config: &ChannelConfig, seed_value: f64) -> f64 {
        let delta = config
            .magnitude
            .map_or_else(|| self.step_for(config.volatility) * seed_value.abs(), f64::abs);
        if delta.is_finite() { delta } else { 0.0 }
    }
}

// =============================================================================
// Random Walk
// =============================================================================

/// Deterministic bounded random walk.
#[derive(Debug, Clone)]
pub struct RandomWalk {
    rng: StdRng,
    value: f64,
    delta: f64,
    floor: Option<f64>,
    started: bool,
}

impl RandomWalk {
    /// Create a walk starting at `seed_value`.
    #[must_use]
    pub fn new(seed_value: f64, delta: f64, floor: Option<f64>, rng_seed: u64) -> Self {
        let mut walk = Self {
            rng: StdRng::seed_from_u64(rng_seed),
            value: seed_value,
            delta: delta.abs(),
            floor,
            started: false,
        };
        walk.value = walk.clamp(seed_value);
        walk
    }

    /// Next value: the seed first, then `max(prev + U(-δ, δ), floor)`.
    pub fn next_value(&mut self) -> f64 {
        if !self.started {
            self.started = true;
            return self.value;
        }

        let step = if self.delta > 0.0 {
            self.rng.random_range(-self.delta..=self.delta)
        } else {
            0.0
        };
        self.value = self.clamp(self.value + step);
        self.value
    }

    /// Current value.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    fn clamp(&self, value: f64) -> f64 {
        self.floor.map_or(value, |floor| value.max(floor))
    }
}

impl Iterator for RandomWalk {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        Some(self.next_value())
    }
}

/// Per-channel source of episode seeds.
#[derive(Debug, Clone)]
pub struct SeedStream {
    rng: StdRng,
}

impl SeedStream {
    /// Reproducible stream for `Some(seed)`, OS-seeded otherwise.
    #[must_use]
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        Self { rng }
    }

    /// Seed for the next episode.
    pub fn next_seed(&mut self) -> u64 {
        self.rng.random()
    }
}

// =============================================================================
// Generator Task
// =============================================================================

/// Parameters for one fallback episode.
#[derive(Debug, Clone)]
pub struct Episode {
    /// Channel served.
    pub channel: String,
    /// Starting value.
    pub seed_value: f64,
    /// Walk magnitude δ.
    pub delta: f64,
    /// Clamp floor.
    pub floor: Option<f64>,
    /// RNG seed for this episode.
    pub rng_seed: u64,
}

/// Spawns synthetic tick sources.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticFeedGenerator {
    settings: SyntheticSettings,
}

impl SyntheticFeedGenerator {
    /// Create a generator.
    #[must_use]
    pub const fn new(settings: SyntheticSettings) -> Self {
        Self { settings }
    }

    /// Generator settings.
    #[must_use]
    pub const fn settings(&self) -> &SyntheticSettings {
        &self.settings
    }

    /// Start emitting `episode` as source `id`; the first tick is immediate.
    ///
    /// Must be called within a Tokio runtime.
    pub fn start(&self, episode: Episode, id: SourceId, events: EventSender) -> SourceHandle {
        let cancel = CancellationToken::new();
        let span = tracing::debug_span!("synthetic_feed", channel = %episode.channel, source = id);
        tokio::spawn(
            run(episode, self.settings.interval, id, events, cancel.clone()).instrument(span),
        );
        SourceHandle::new(id, cancel)
    }
}

async fn run(
    episode: Episode,
    interval: Duration,
    id: SourceId,
    events: EventSender,
    cancel: CancellationToken,
) {
    let mut walk = RandomWalk::new(episode.seed_value, episode.delta, episode.floor, episode.rng_seed);
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let tick = Tick::now(walk.next_value());
                let event = SourceEvent::new(episode.channel.as_str(), id, SourceEventKind::Tick(tick));
                if events.send(event).is_err() {
                    return;
                }
            }
        }
    }
}
