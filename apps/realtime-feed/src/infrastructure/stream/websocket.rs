//! WebSocket Connector
//!
//! `StreamConnector` over `tokio-tungstenite` (rustls). Each connection gets
//! a pump task that answers pings, sends heartbeat pings and forwards text
//! frames (and UTF-8 binary frames) into the returned stream.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::application::ports::{ConnectionError, FrameStream, StreamConnector};
use crate::domain::feed::Channel;
use crate::infrastructure::config::StreamSettings;
use crate::infrastructure::stream::heartbeat::{Heartbeat, HeartbeatAction, HeartbeatConfig};

/// Placeholder replaced by the lower-cased channel id.
pub const CHANNEL_PLACEHOLDER: &str = "{channel}";

/// Frames buffered between the pump task and the consumer.
const FRAME_BUFFER: usize = 1024;

/// Shortest heartbeat poll period.
const MIN_POLL_PERIOD: Duration = Duration::from_millis(100);

/// WebSocket connector configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketConfig {
    /// URL template containing `{channel}`.
    pub url_template: String,
    /// Heartbeat settings.
    pub heartbeat: HeartbeatConfig,
}

impl WebSocketConfig {
    /// Build from stream settings.
    #[must_use]
    pub fn from_stream_settings(settings: &StreamSettings) -> Self {
        Self {
            url_template: settings.url_template.clone(),
            heartbeat: HeartbeatConfig::from_stream_settings(settings),
        }
    }
}

/// Connects channels to a WebSocket feed.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    config: WebSocketConfig,
}

impl WebSocketConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }

    /// Stream URL for a channel.
    #[must_use]
    pub fn url_for(&self, channel: &Channel) -> String {
        self.config
            .url_template
            .replace(CHANNEL_PLACEHOLDER, &channel.id().to_lowercase())
    }
}

#[async_trait]
impl StreamConnector for WebSocketConnector {
    async fn connect(&self, channel: &Channel) -> Result<FrameStream, ConnectionError> {
        let url = self.url_for(channel);
        tracing::info!(channel = %channel.id(), url = %url, "Connecting to stream");

        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| match e {
                tungstenite::Error::Url(e) => ConnectionError::InvalidUrl {
                    url: url.clone(),
                    message: e.to_string(),
                },
                other => ConnectionError::Connect {
                    url: url.clone(),
                    message: other.to_string(),
                },
            })?;

        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        tokio::spawn(pump(socket, tx, self.config.heartbeat));
        Ok(ReceiverStream::new(rx).boxed())
    }
}

type Socket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type FrameSender = mpsc::Sender<Result<String, ConnectionError>>;

/// Drive one socket until it closes, fails, or the consumer goes away.
async fn pump(socket: Socket, tx: FrameSender, heartbeat: HeartbeatConfig) {
    let (mut write, mut read) = socket.split();
    let mut monitor = Heartbeat::new(heartbeat, Instant::now().into_std());

    let period = (heartbeat.ping_interval.min(heartbeat.pong_timeout) / 2).max(MIN_POLL_PERIOD);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = tx.closed() => {
                let _ = write.send(Message::Close(None)).await;
                return;
            }
            _ = ticker.tick() => match monitor.poll(Instant::now().into_std()) {
                HeartbeatAction::Idle => {}
                HeartbeatAction::SendPing => {
                    if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                        let _ = tx.send(Err(ConnectionError::Transport(e.to_string()))).await;
                        return;
                    }
                }
                HeartbeatAction::TimedOut(waited) => {
                    tracing::warn!(waited_ms = waited.as_millis(), "Heartbeat timeout");
                    let _ = tx.send(Err(ConnectionError::HeartbeatTimeout(waited))).await;
                    return;
                }
            },
            message = read.next() => {
                monitor.record_activity(Instant::now().into_std());
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if tx.send(Ok(text.to_string())).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => {
                            if tx.send(Ok(text)).await.is_err() {
                                return;
                            }
                        }
                        Err(_) => tracing::debug!(len = data.len(), "Dropping non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            let _ = tx.send(Err(ConnectionError::Transport(e.to_string()))).await;
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "Server sent close frame");
                        return;
                    }
                    Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        let _ = tx.send(Err(ConnectionError::Transport(e.to_string()))).await;
                        return;
                    }
                    None => return,
                }
            }
        }
    }
}
