//! Subscription Registry
//!
//! Reference counting for channel subscriptions. Many consumers may hold
//! the same channel while only one upstream source exists for it; the
//! registry reports when a channel gains its first consumer (open the
//! source) and when it loses its last one (tear the source down).

use std::collections::{HashMap, HashSet};

use crate::domain::feed::ChannelId;

/// Unique identifier for a subscriber.
pub type ConsumerId = u64;

/// Tracks which consumers hold which channels.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    /// Channels held by each consumer.
    consumer_channels: HashMap<ConsumerId, HashSet<ChannelId>>,
    /// Number of consumers per channel.
    channel_refcount: HashMap<ChannelId, usize>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `consumer` on `channel`.
    ///
    /// Returns `true` when this is the channel's first consumer.
    /// Registering the same pair twice is a no-op returning `false`.
    pub fn add(&mut self, consumer: ConsumerId, channel: &str) -> bool {
        let held = self.consumer_channels.entry(consumer).or_default();
        if !held.insert(channel.to_string()) {
            return false;
        }

        let refcount = self.channel_refcount.entry(channel.to_string()).or_insert(0);
        *refcount += 1;
        *refcount == 1
    }

    /// Release `consumer` from `channel`.
    ///
    /// Returns `true` when the channel just lost its last consumer.
    /// Unknown consumers or channels are a no-op returning `false`.
    pub fn remove(&mut self, consumer: ConsumerId, channel: &str) -> bool {
        let Some(held) = self.consumer_channels.get_mut(&consumer) else {
            return false;
        };
        if !held.remove(channel) {
            return false;
        }
        if held.is_empty() {
            self.consumer_channels.remove(&consumer);
        }

        self.release(channel)
    }

    /// Release every channel held by `consumer`.
    ///
    /// Returns the channels that lost their last consumer.
    pub fn remove_consumer(&mut self, consumer: ConsumerId) -> Vec<ChannelId> {
        let Some(held) = self.consumer_channels.remove(&consumer) else {
            return vec![];
        };

        held.into_iter()
            .filter(|channel| self.release(channel))
            .collect()
    }

    /// Drop every registration, returning the channels that were active.
    pub fn clear(&mut self) -> Vec<ChannelId> {
        self.consumer_channels.clear();
        self.channel_refcount.drain().map(|(channel, _)| channel).collect()
    }

    /// Number of consumers holding `channel`.
    #[must_use]
    pub fn refcount(&self, channel: &str) -> usize {
        self.channel_refcount.get(channel).copied().unwrap_or(0)
    }

    /// Channels with at least one consumer.
    #[must_use]
    pub fn active_channels(&self) -> Vec<ChannelId> {
        self.channel_refcount.keys().cloned().collect()
    }

    /// Channels held by `consumer`.
    #[must_use]
    pub fn consumer_channels(&self, consumer: ConsumerId) -> Vec<ChannelId> {
        self.consumer_channels
            .get(&consumer)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            channel_count: self.channel_refcount.len(),
            consumer_count: self.consumer_channels.len(),
        }
    }

    fn release(&mut self, channel: &str) -> bool {
        let Some(refcount) = self.channel_refcount.get_mut(channel) else {
            return false;
        };

        *refcount = refcount.saturating_sub(1);
        if *refcount == 0 {
            self.channel_refcount.remove(channel);
            return true;
        }
        false
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Channels with at least one consumer.
    pub channel_count: usize,
    /// Consumers holding at least one channel.
    pub consumer_count: usize,
}

// =============================================================================
// Tests
// =============================================================================
