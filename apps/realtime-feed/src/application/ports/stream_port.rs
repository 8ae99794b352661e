//! Stream Source Port (Driven Port)
//!
//! The transport contract for live feeds and the event contract between
//! every tick source (live connection, synthetic generator, reconnect
//! timer) and the feed supervisor.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::feed::{Channel, ChannelId, Tick};

// =============================================================================
// Transport
// =============================================================================

/// Raw text frames from one upstream connection.
///
/// The stream ends when the upstream closes; an `Err` item is a transport
/// failure after which no further items are read.
pub type FrameStream = BoxStream<'static, Result<String, ConnectionError>>;

/// Transport failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The channel's stream URL could not be built.
    #[error("invalid stream url {url}: {message}")]
    InvalidUrl {
        /// Offending URL.
        url: String,
        /// Parser message.
        message: String,
    },
    /// The connection could not be established.
    #[error("failed to connect to {url}: {message}")]
    Connect {
        /// Target URL.
        url: String,
        /// Transport message.
        message: String,
    },
    /// The connection failed after it was established.
    #[error("transport error: {0}")]
    Transport(String),
    /// No pong arrived within the heartbeat timeout.
    #[error("heartbeat timeout after {0:?}")]
    HeartbeatTimeout(Duration),
}

/// Opens upstream connections for channels.
///
/// One call is one connection attempt; implementations never retry.
#[async_trait]
pub trait StreamConnector: Send + Sync + 'static {
    /// Connect to the channel's upstream feed.
    async fn connect(&self, channel: &Channel) -> Result<FrameStream, ConnectionError>;
}

// =============================================================================
// Source Events
// =============================================================================

/// Unique identifier of a tick source or timer, never reused by a manager.
pub type SourceId = u64;

/// What happened on a source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEventKind {
    /// Connection established; no data yet.
    Opened,
    /// A decoded tick.
    Tick(Tick),
    /// An inbound message was dropped as malformed.
    Malformed(String),
    /// The upstream closed the stream.
    Closed(String),
    /// The connection attempt or transport failed.
    Failed(ConnectionError),
    /// A reconnect timer fired.
    ReconnectDue,
}

/// An event tagged with the channel and source that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceEvent {
    /// Channel the source serves.
    pub channel: ChannelId,
    /// Producing source.
    pub source: SourceId,
    /// Event payload.
    pub kind: SourceEventKind,
}

impl SourceEvent {
    /// Create an event.
    #[must_use]
    pub fn new(channel: impl Into<ChannelId>, source: SourceId, kind: SourceEventKind) -> Self {
        Self {
            channel: channel.into(),
            source,
            kind,
        }
    }
}

/// Sending half of the supervisor's event queue.
pub type EventSender = mpsc::UnboundedSender<SourceEvent>;

/// Owning handle to a running source or timer.
///
/// Closing is idempotent; dropping the handle closes the source.
#[derive(Debug)]
pub struct SourceHandle {
    id: SourceId,
    cancel: CancellationToken,
}

impl SourceHandle {
    /// Wrap a source's cancellation token.
    #[must_use]
    pub const fn new(id: SourceId, cancel: CancellationToken) -> Self {
        Self { id, cancel }
    }

    /// Source identifier.
    #[must_use]
    pub const fn id(&self) -> SourceId {
        self.id
    }

    /// Stop the source. Safe to call repeatedly.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether the source has been stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for SourceHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
