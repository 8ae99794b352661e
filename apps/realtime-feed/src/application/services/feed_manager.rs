//! Feed Manager
//!
//! Supervises N independent channels. Each channel owns at most one live
//! connection, at most one synthetic generator and at most one pending
//! reconnect timer. All of them report into a single event queue consumed
//! by one supervisor task; channel state sits behind one mutex, so every
//! transition and source swap is atomic with respect to every other event.
//!
//! # State machine
//!
//! ```text
//!                 subscribe                first live tick
//! Disconnected ─────────────► Connecting ─────────────────► Connected
//!                               ▲    │ close / error            │
//!                reconnect due  │    ▼                          │ close / error
//!                             Simulating ◄──────────────────────┘
//!
//! any state ── last unsubscribe / teardown ──► Disconnected
//! ```
//!
//! Events carry the id of the source that produced them; an event whose
//! source is no longer the channel's connection, generator or timer is
//! discarded.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    EventSender, SourceEvent, SourceEventKind, SourceHandle, SourceId, StreamConnector,
};
use crate::domain::feed::{
    Channel, ChannelConfig, ChannelId, ChannelSnapshot, FeedState, StateChange, Tick, Trend,
    TrendTracker,
};
use crate::domain::subscription::{ConsumerId, SubscriptionRegistry, SubscriptionStats};
use crate::infrastructure::metrics::{self, TickOrigin};
use crate::infrastructure::stream::{FeedConnection, ReconnectConfig, ReconnectPolicy, TickCodec};
use crate::infrastructure::synthetic::{
    Episode, SeedStream, SyntheticFeedGenerator, SyntheticSettings,
};

/// Ticks buffered per channel for slow subscribers.
pub const DEFAULT_TICK_BUFFER: usize = 256;

/// State changes buffered per channel for slow subscribers.
const TRANSITION_BUFFER: usize = 64;

// =============================================================================
// Configuration & Errors
// =============================================================================

/// Feed manager configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedManagerConfig {
    /// Reconnect policy applied to every channel.
    pub reconnect: ReconnectConfig,
    /// Synthetic fallback settings.
    pub synthetic: SyntheticSettings,
    /// Per-channel tick broadcast capacity.
    pub tick_buffer: usize,
}

impl Default for FeedManagerConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            synthetic: SyntheticSettings::default(),
            tick_buffer: DEFAULT_TICK_BUFFER,
        }
    }
}

/// Feed manager errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedManagerError {
    /// `teardown` has been called.
    #[error("feed manager has been torn down")]
    TornDown,
    /// Blank channel identifier.
    #[error("channel id must not be empty")]
    EmptyChannel,
}

// =============================================================================
// Status Reporting
// =============================================================================

/// Per-channel counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    /// Ticks accepted from the live connection.
    pub live_ticks: u64,
    /// Ticks accepted from the synthetic generator.
    pub synthetic_ticks: u64,
    /// Inbound messages dropped as malformed.
    pub malformed: u64,
    /// Ticks rejected for arriving out of order.
    pub rejected: u64,
    /// Synthetic fallback episodes started.
    pub synthetic_episodes: u64,
}

/// Point-in-time status of one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelStatus {
    /// Channel identifier.
    pub channel: ChannelId,
    /// Feed state.
    pub status: FeedState,
    /// Active subscriptions.
    pub subscribers: usize,
    /// Latest accepted tick.
    pub latest: Option<Tick>,
    /// Trend of the latest tick.
    pub trend: Trend,
    /// Reconnect attempts since the last successful connection.
    pub reconnect_attempts: u32,
    /// Counters.
    pub stats: ChannelStats,
}

// =============================================================================
// Feed Manager
// =============================================================================

/// Cloneable handle to a feed supervisor.
///
/// The supervisor stops when [`FeedManager::teardown`] is called or the
/// last handle is dropped.
#[derive(Clone)]
pub struct FeedManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for FeedManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedManager")
            .field("config", &self.inner.config)
            .field("torn_down", &self.is_torn_down())
            .finish_non_exhaustive()
    }
}

impl FeedManager {
    /// Start a supervisor using the default tick codec.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn new(connector: Arc<dyn StreamConnector>, config: FeedManagerConfig) -> Self {
        Self::with_codec(connector, TickCodec::default(), config)
    }

    /// Start a supervisor with an explicit codec.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn with_codec(
        connector: Arc<dyn StreamConnector>,
        codec: TickCodec,
        config: FeedManagerConfig,
    ) -> Self {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            sources: Sources {
                connection: FeedConnection::new(connector, Arc::new(codec)),
                synthetic: SyntheticFeedGenerator::new(config.synthetic),
                events,
                next_id: AtomicU64::new(0),
            },
            config,
            state: Mutex::new(ManagerState::default()),
            cancel: CancellationToken::new(),
        });

        tokio::spawn(supervise(Arc::downgrade(&inner), rx, inner.cancel.clone()));
        Self { inner }
    }

    /// Subscribe to a channel, opening it on first use.
    ///
    /// The first subscriber's `config` applies for the channel's lifetime.
    ///
    /// # Errors
    ///
    /// Returns `FeedManagerError` if the manager is torn down or the channel
    /// id is blank.
    pub fn subscribe(
        &self,
        channel: impl Into<ChannelId>,
        config: ChannelConfig,
    ) -> Result<FeedSubscription, FeedManagerError> {
        let channel_id = channel.into();
        if channel_id.trim().is_empty() {
            return Err(FeedManagerError::EmptyChannel);
        }

        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        if state.torn_down {
            return Err(FeedManagerError::TornDown);
        }

        let consumer = self.inner.sources.next_id();
        state.registry.add(consumer, &channel_id);

        let (entry, opened) = match state.channels.entry(channel_id.clone()) {
            Entry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                if entry.channel.config() != &config {
                    tracing::debug!(
                        channel = %channel_id,
                        "Channel already open, keeping its original configuration"
                    );
                }
                (entry, false)
            }
            Entry::Vacant(vacant) => {
                tracing::info!(channel = %channel_id, "Opening channel");
                let entry = vacant.insert(ChannelEntry::new(
                    Channel::new(channel_id.clone(), config),
                    &self.inner.config,
                ));
                (entry, true)
            }
        };

        // Receivers exist before the first connect so the opening edge is seen.
        let subscription = FeedSubscription {
            manager: Arc::downgrade(&self.inner),
            consumer,
            channel: channel_id,
            snapshots: Some(entry.snapshot_tx.subscribe()),
            ticks: Some(entry.tick_tx.subscribe()),
            transitions: Some(entry.transition_tx.subscribe()),
        };
        if opened {
            entry.connect(&self.inner.sources);
        }
        state.update_gauges();
        Ok(subscription)
    }

    /// Current snapshot of an open channel.
    #[must_use]
    pub fn snapshot(&self, channel: &str) -> Option<ChannelSnapshot> {
        self.inner
            .state
            .lock()
            .channels
            .get(channel)
            .map(ChannelEntry::snapshot)
    }

    /// Current state of an open channel.
    #[must_use]
    pub fn status(&self, channel: &str) -> Option<FeedState> {
        self.snapshot(channel).map(|s| s.status)
    }

    /// Status of every open channel, ordered by channel id.
    #[must_use]
    pub fn channel_statuses(&self) -> Vec<ChannelStatus> {
        let state = self.inner.state.lock();
        let mut statuses: Vec<_> = state
            .channels
            .values()
            .map(|entry| ChannelStatus {
                channel: entry.channel.id().to_string(),
                status: entry.state,
                subscribers: state.registry.refcount(entry.channel.id()),
                latest: entry.tracker.latest(),
                trend: entry.tracker.trend(),
                reconnect_attempts: entry.policy.attempt_count(),
                stats: entry.stats,
            })
            .collect();
        statuses.sort_by(|a, b| a.channel.cmp(&b.channel));
        statuses
    }

    /// Subscription statistics.
    #[must_use]
    pub fn subscription_stats(&self) -> SubscriptionStats {
        self.inner.state.lock().registry.stats()
    }

    /// Whether [`FeedManager::teardown`] has run.
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.inner.state.lock().torn_down
    }

    /// Close every channel, cancel every source and timer, stop the
    /// supervisor. Subscribers observe `Disconnected`. Idempotent.
    pub fn teardown(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.torn_down {
                return;
            }
            state.torn_down = true;
            state.registry.clear();
            for (_, mut entry) in state.channels.drain() {
                entry.tear_down();
            }
            state.update_gauges();
        }
        self.inner.cancel.cancel();
        tracing::info!("Feed manager torn down");
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// One consumer's hold on a channel.
///
/// Dropping the subscription unsubscribes.
#[derive(Debug)]
pub struct FeedSubscription {
    manager: Weak<Inner>,
    consumer: ConsumerId,
    channel: ChannelId,
    snapshots: Option<watch::Receiver<ChannelSnapshot>>,
    ticks: Option<broadcast::Receiver<Tick>>,
    transitions: Option<broadcast::Receiver<StateChange>>,
}

impl FeedSubscription {
    /// Subscribed channel.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Whether `unsubscribe` has not run yet.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.snapshots.is_some()
    }

    /// Latest snapshot; `Disconnected` after unsubscribe.
    #[must_use]
    pub fn snapshot(&self) -> ChannelSnapshot {
        self.snapshots
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or_default()
    }

    /// Wait for the snapshot to change.
    ///
    /// Returns `None` once the channel is closed or after unsubscribe.
    pub async fn changed(&mut self) -> Option<ChannelSnapshot> {
        let rx = self.snapshots.as_mut()?;
        rx.changed().await.ok()?;
        let snapshot = *rx.borrow_and_update();
        Some(snapshot)
    }

    /// Wait for the next accepted tick, skipping any the subscriber lagged
    /// behind on.
    ///
    /// Returns `None` once the channel is closed or after unsubscribe.
    pub async fn next_tick(&mut self) -> Option<Tick> {
        let rx = self.ticks.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(tick) => return Some(tick),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(channel = %self.channel, skipped, "Subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Wait for the channel's next state change.
    ///
    /// Unlike [`FeedSubscription::changed`], every change is delivered in
    /// order, including the final one into `Disconnected` on teardown.
    /// Returns `None` once the channel is closed and drained, or after
    /// unsubscribe.
    pub async fn next_transition(&mut self) -> Option<StateChange> {
        let rx = self.transitions.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(change) => return Some(change),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(channel = %self.channel, skipped, "Transition subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Release the subscription. Idempotent.
    ///
    /// Receivers are dropped first, then the reference is released; the
    /// last release closes the channel's sources.
    pub fn unsubscribe(&mut self) {
        if self.snapshots.is_none() {
            return;
        }
        self.snapshots = None;
        self.ticks = None;
        self.transitions = None;

        if let Some(inner) = self.manager.upgrade() {
            inner.release(self.consumer, &self.channel);
        }
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

// =============================================================================
// Supervisor Internals
// =============================================================================

struct Inner {
    sources: Sources,
    config: FeedManagerConfig,
    state: Mutex<ManagerState>,
    cancel: CancellationToken,
}

impl Inner {
    fn handle_event(&self, event: SourceEvent) {
        let mut state = self.state.lock();
        if state.torn_down {
            return;
        }
        match state.channels.get_mut(&event.channel) {
            Some(entry) => entry.handle(event.source, event.kind, &self.sources),
            None => tracing::trace!(channel = %event.channel, "Dropping event for closed channel"),
        }
    }

    fn release(&self, consumer: ConsumerId, channel: &str) {
        let mut state = self.state.lock();
        if state.registry.remove(consumer, channel)
            && let Some(mut entry) = state.channels.remove(channel)
        {
            entry.tear_down();
            tracing::info!(channel, "Last subscriber left, channel closed");
        }
        state.update_gauges();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Sources {
    connection: FeedConnection,
    synthetic: SyntheticFeedGenerator,
    events: EventSender,
    next_id: AtomicU64,
}

impl Sources {
    fn next_id(&self) -> SourceId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[derive(Default)]
struct ManagerState {
    registry: SubscriptionRegistry,
    channels: HashMap<ChannelId, ChannelEntry>,
    torn_down: bool,
}

impl ManagerState {
    fn update_gauges(&self) {
        metrics::set_active_channels(self.channels.len());
        metrics::set_subscribers(self.registry.stats().consumer_count);
    }
}

async fn supervise(
    inner: Weak<Inner>,
    mut events: mpsc::UnboundedReceiver<SourceEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(event) = event else { break };
        let Some(inner) = inner.upgrade() else { break };
        inner.handle_event(event);
    }
    tracing::debug!("Feed supervisor stopped");
}

// =============================================================================
// Channel Entry
// =============================================================================

struct ChannelEntry {
    channel: Channel,
    state: FeedState,
    tracker: TrendTracker,
    connection: Option<SourceHandle>,
    synthetic: Option<SourceHandle>,
    reconnect_timer: Option<SourceHandle>,
    policy: ReconnectPolicy,
    seeds: SeedStream,
    snapshot_tx: watch::Sender<ChannelSnapshot>,
    tick_tx: broadcast::Sender<Tick>,
    transition_tx: broadcast::Sender<StateChange>,
    stats: ChannelStats,
}

impl ChannelEntry {
    fn new(channel: Channel, config: &FeedManagerConfig) -> Self {
        let seeds = SeedStream::new(channel.config().rng_seed);
        let (snapshot_tx, _) = watch::channel(ChannelSnapshot::default());
        let (tick_tx, _) = broadcast::channel(config.tick_buffer.max(1));
        let (transition_tx, _) = broadcast::channel(TRANSITION_BUFFER);
        Self {
            channel,
            state: FeedState::Disconnected,
            tracker: TrendTracker::new(),
            connection: None,
            synthetic: None,
            reconnect_timer: None,
            policy: ReconnectPolicy::new(config.reconnect.clone()),
            seeds,
            snapshot_tx,
            tick_tx,
            transition_tx,
            stats: ChannelStats::default(),
        }
    }

    fn id(&self) -> &str {
        self.channel.id()
    }

    fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            status: self.state,
            latest: self.tracker.latest(),
            trend: self.tracker.trend(),
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    fn handle(&mut self, source: SourceId, kind: SourceEventKind, sources: &Sources) {
        let is = |handle: Option<&SourceHandle>| handle.is_some_and(|h| h.id() == source);
        let from_connection = is(self.connection.as_ref());
        let from_synthetic = is(self.synthetic.as_ref());
        let from_timer = is(self.reconnect_timer.as_ref());

        match kind {
            SourceEventKind::Opened if from_connection => {
                tracing::debug!(channel = %self.id(), "Stream opened, waiting for first tick");
            }
            SourceEventKind::Tick(tick) if from_connection => {
                if self.state == FeedState::Connecting {
                    self.promote();
                }
                self.accept(tick, TickOrigin::Live);
            }
            SourceEventKind::Tick(tick) if from_synthetic => {
                self.accept(tick, TickOrigin::Synthetic);
            }
            SourceEventKind::Malformed(reason) if from_connection => {
                self.stats.malformed += 1;
                metrics::record_malformed(self.id());
                tracing::debug!(channel = %self.id(), reason, "Dropped malformed message");
            }
            SourceEventKind::Closed(reason) if from_connection => {
                tracing::warn!(channel = %self.id(), reason, "Stream closed");
                self.fall_back(sources);
            }
            SourceEventKind::Failed(error) if from_connection => {
                tracing::warn!(channel = %self.id(), error = %error, "Stream failed");
                self.fall_back(sources);
            }
            SourceEventKind::ReconnectDue if from_timer => {
                self.reconnect_timer = None;
                self.connect(sources);
            }
            _ => tracing::trace!(channel = %self.id(), source, "Dropping event from retired source"),
        }
    }

    fn transition(&mut self, next: FeedState) -> bool {
        let previous = self.state;
        if previous == next {
            return false;
        }
        if !previous.can_transition_to(next) {
            tracing::warn!(channel = %self.id(), from = %previous, to = %next, "Ignoring illegal transition");
            return false;
        }

        self.state = next;
        metrics::record_transition(previous, next);
        tracing::info!(channel = %self.id(), from = %previous, to = %next, "Feed state changed");
        self.publish();
        let _ = self.transition_tx.send(StateChange::now(previous, next));
        true
    }

    fn connect(&mut self, sources: &Sources) {
        if !self.transition(FeedState::Connecting) {
            return;
        }
        let id = sources.next_id();
        self.connection = Some(sources.connection.open(
            self.channel.clone(),
            id,
            sources.events.clone(),
        ));
    }

    /// First live tick after (re)connecting: the live source takes over.
    fn promote(&mut self) {
        if self.synthetic.take().is_some() {
            tracing::info!(channel = %self.id(), "Live feed restored, stopping synthetic feed");
        }
        self.reconnect_timer = None;
        self.policy.reset();
        self.tracker.rebase();
        self.transition(FeedState::Connected);
    }

    fn accept(&mut self, tick: Tick, origin: TickOrigin) {
        if self.tracker.accept(tick).is_none() {
            self.stats.rejected += 1;
            metrics::record_tick_rejected(self.id());
            tracing::debug!(channel = %self.id(), timestamp = %tick.timestamp, "Rejected out-of-order tick");
            return;
        }

        match origin {
            TickOrigin::Live => self.stats.live_ticks += 1,
            TickOrigin::Synthetic => self.stats.synthetic_ticks += 1,
        }
        metrics::record_tick(self.id(), origin);
        self.publish();
        let _ = self.tick_tx.send(tick);
    }

    fn fall_back(&mut self, sources: &Sources) {
        self.connection = None;
        self.transition(FeedState::Simulating);
        self.start_synthetic(sources);
        self.schedule_reconnect(sources);
    }

    fn start_synthetic(&mut self, sources: &Sources) {
        if self.synthetic.is_some() {
            return;
        }

        let config = self.channel.config();
        let settings = sources.synthetic.settings();
        let seed_value = self
            .tracker
            .last_value()
            .or(config.seed_value)
            .unwrap_or(settings.default_seed);
        let episode = Episode {
            channel: self.channel.id().to_string(),
            seed_value,
            delta: settings.magnitude_for(config, seed_value),
            floor: config.floor,
            rng_seed: self.seeds.next_seed(),
        };

        tracing::info!(
            channel = %self.id(),
            seed_value,
            delta = episode.delta,
            volatility = config.volatility.as_str(),
            "Starting synthetic feed"
        );

        let id = sources.next_id();
        self.synthetic = Some(sources.synthetic.start(episode, id, sources.events.clone()));
        self.tracker.rebase();
        self.stats.synthetic_episodes += 1;
        metrics::record_synthetic_episode(self.id());
    }

    fn schedule_reconnect(&mut self, sources: &Sources) {
        let Some(delay) = self.policy.next_delay() else {
            self.reconnect_timer = None;
            tracing::warn!(
                channel = %self.id(),
                attempts = self.policy.attempt_count(),
                "Reconnect attempts exhausted, staying on synthetic feed"
            );
            return;
        };

        let id = sources.next_id();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let events = sources.events.clone();
        let channel = self.channel.id().to_string();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = events.send(SourceEvent::new(channel, id, SourceEventKind::ReconnectDue));
                }
            }
        });
        self.reconnect_timer = Some(SourceHandle::new(id, cancel));

        metrics::record_reconnect(self.id());
        tracing::info!(
            channel = %self.id(),
            attempt = self.policy.attempt_count(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Reconnect scheduled"
        );
    }

    fn tear_down(&mut self) {
        self.connection = None;
        self.synthetic = None;
        self.reconnect_timer = None;

        if self.state.can_tear_down() {
            let previous = self.state;
            metrics::record_transition(previous, FeedState::Disconnected);
            tracing::info!(channel = %self.id(), from = %previous, "Feed disconnected");
            self.state = FeedState::Disconnected;
            let _ = self
                .transition_tx
                .send(StateChange::now(previous, FeedState::Disconnected));
        }
        self.publish();
    }
}
