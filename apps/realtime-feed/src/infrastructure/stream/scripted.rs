//! Scripted Connector
//!
//! In-memory `StreamConnector` whose connection attempts follow a per-channel
//! script: refuse, replay fixed frames, or hand control to a live session.
//! An attempt with no script left is refused.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::application::ports::{ConnectionError, FrameStream, StreamConnector};
use crate::domain::feed::{Channel, ChannelId};

type FrameSender = mpsc::UnboundedSender<Result<String, ConnectionError>>;
type FrameReceiver = mpsc::UnboundedReceiver<Result<String, ConnectionError>>;

#[derive(Debug)]
enum Script {
    Refuse(String),
    Frames(Vec<String>),
    Session(FrameReceiver),
}

/// Connector driven by scripts.
#[derive(Debug, Default)]
pub struct ScriptedConnector {
    scripts: Mutex<HashMap<ChannelId, VecDeque<Script>>>,
    attempts: Mutex<HashMap<ChannelId, usize>>,
}

impl ScriptedConnector {
    /// Create a connector with no scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next attempt on `channel`.
    pub fn push_refusal(&self, channel: &str, reason: &str) {
        self.push(channel, Script::Refuse(reason.to_string()));
    }

    /// Accept the next attempt, replay `frames`, then end the stream.
    pub fn push_frames<I, S>(&self, channel: &str, frames: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let frames = frames.into_iter().map(Into::into).collect();
        self.push(channel, Script::Frames(frames));
    }

    /// Accept the next attempt and return a handle feeding it.
    pub fn push_session(&self, channel: &str) -> ScriptedSession {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(channel, Script::Session(rx));
        ScriptedSession { tx }
    }

    /// Connection attempts made on `channel`.
    #[must_use]
    pub fn attempts(&self, channel: &str) -> usize {
        self.attempts.lock().get(channel).copied().unwrap_or(0)
    }

    fn push(&self, channel: &str, script: Script) {
        self.scripts
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push_back(script);
    }
}

#[async_trait]
impl StreamConnector for ScriptedConnector {
    async fn connect(&self, channel: &Channel) -> Result<FrameStream, ConnectionError> {
        *self.attempts.lock().entry(channel.id().to_string()).or_insert(0) += 1;

        let script = self
            .scripts
            .lock()
            .get_mut(channel.id())
            .and_then(VecDeque::pop_front);
        let url = format!("scripted://{}", channel.id());

        match script {
            None => Err(ConnectionError::Connect {
                url,
                message: "no scripted session".to_string(),
            }),
            Some(Script::Refuse(message)) => Err(ConnectionError::Connect { url, message }),
            Some(Script::Frames(frames)) => Ok(futures::stream::iter(frames.into_iter().map(Ok)).boxed()),
            Some(Script::Session(rx)) => Ok(UnboundedReceiverStream::new(rx).boxed()),
        }
    }
}

/// Feeds one scripted connection. Dropping it ends the stream.
#[derive(Debug)]
pub struct ScriptedSession {
    tx: FrameSender,
}

impl ScriptedSession {
    /// Deliver a text frame. Returns `false` once the connection is gone.
    pub fn send(&self, frame: &str) -> bool {
        self.tx.send(Ok(frame.to_string())).is_ok()
    }

    /// Fail the connection with a transport error.
    pub fn fail(&self, message: &str) -> bool {
        self.tx
            .send(Err(ConnectionError::Transport(message.to_string())))
            .is_ok()
    }

    /// End the stream as an upstream close would.
    pub fn close(self) {
        drop(self.tx);
    }

    /// Whether the consuming connection has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::feed::ChannelConfig;

    fn channel() -> Channel {
        Channel::new("ethusdt", ChannelConfig::new())
    }

    #[tokio::test]
    async fn unscripted_attempt_is_refused_and_counted() {
        let connector = ScriptedConnector::new();
        assert!(connector.connect(&channel()).await.is_err());
        assert!(connector.connect(&channel()).await.is_err());
        assert_eq!(connector.attempts("ethusdt"), 2);
    }

    #[tokio::test]
    async fn scripts_are_consumed_in_order() {
        let connector = ScriptedConnector::new();
        connector.push_refusal("ethusdt", "maintenance");
        connector.push_frames("ethusdt", ["a", "b"]);

        let err = connector.connect(&channel()).await.err().unwrap();
        assert!(err.to_string().contains("maintenance"));

        let frames: Vec<_> = connector.connect(&channel()).await.unwrap().collect().await;
        assert_eq!(frames, vec![Ok("a".to_string()), Ok("b".to_string())]);
    }

    #[tokio::test]
    async fn session_feeds_stream_until_closed() {
        let connector = ScriptedConnector::new();
        let session = connector.push_session("ethusdt");
        let mut stream = connector.connect(&channel()).await.unwrap();

        assert!(session.send("x"));
        assert_eq!(stream.next().await, Some(Ok("x".to_string())));

        session.close();
        assert_eq!(stream.next().await, None);
    }
}
