//! Feed Connection
//!
//! One upstream connection for one channel: open once, decode frames into
//! ticks, report the outcome to the supervisor, never retry. Retrying is
//! the supervisor's job.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::application::ports::{
    EventSender, SourceEvent, SourceEventKind, SourceHandle, SourceId, StreamConnector,
};
use crate::domain::feed::Channel;
use crate::infrastructure::stream::codec::TickCodec;

/// Reason reported when the upstream ends the stream.
pub const STREAM_ENDED: &str = "stream ended";

/// Spawns connection tasks.
#[derive(Clone)]
pub struct FeedConnection {
    connector: Arc<dyn StreamConnector>,
    codec: Arc<TickCodec>,
}

impl std::fmt::Debug for FeedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedConnection")
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

impl FeedConnection {
    /// Create a connection factory.
    #[must_use]
    pub fn new(connector: Arc<dyn StreamConnector>, codec: Arc<TickCodec>) -> Self {
        Self { connector, codec }
    }

    /// Open a connection for `channel`, reporting to `events` as source `id`.
    ///
    /// Emits `Opened`, then `Tick`/`Malformed` per frame, then exactly one of
    /// `Closed` or `Failed`. Closing the handle stops the task silently.
    /// Must be called within a Tokio runtime.
    pub fn open(&self, channel: Channel, id: SourceId, events: EventSender) -> SourceHandle {
        let cancel = CancellationToken::new();
        let span = tracing::debug_span!("feed_connection", channel = %channel.id(), source = id);
        let task = ConnectionTask {
            connector: Arc::clone(&self.connector),
            codec: Arc::clone(&self.codec),
            channel,
            id,
            events,
        };
        tokio::spawn(task.run(cancel.clone()).instrument(span));
        SourceHandle::new(id, cancel)
    }
}

struct ConnectionTask {
    connector: Arc<dyn StreamConnector>,
    codec: Arc<TickCodec>,
    channel: Channel,
    id: SourceId,
    events: EventSender,
}

impl ConnectionTask {
    async fn run(self, cancel: CancellationToken) {
        let connected = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            result = self.connector.connect(&self.channel) => result,
        };

        let mut frames = match connected {
            Ok(frames) => frames,
            Err(e) => {
                tracing::debug!(error = %e, "Connection attempt failed");
                self.emit(SourceEventKind::Failed(e));
                return;
            }
        };
        self.emit(SourceEventKind::Opened);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                frame = frames.next() => match frame {
                    Some(Ok(text)) => match self.codec.decode(&text) {
                        Ok(tick) => self.emit(SourceEventKind::Tick(tick)),
                        Err(e) => self.emit(SourceEventKind::Malformed(e.to_string())),
                    },
                    Some(Err(e)) => {
                        self.emit(SourceEventKind::Failed(e));
                        return;
                    }
                    None => {
                        self.emit(SourceEventKind::Closed(STREAM_ENDED.to_string()));
                        return;
                    }
                },
            }
        }
    }

    fn emit(&self, kind: SourceEventKind) {
        let event = SourceEvent::new(self.channel.id(), self.id, kind);
        if self.events.send(event).is_err() {
            tracing::trace!("Supervisor gone, dropping connection event");
        }
    }
}
