//! Stream Adapters
//!
//! Live feed plumbing:
//!
//! - **connection**: one upstream connection per attempt, reporting to the supervisor
//! - **codec**: JSON message to tick decoding
//! - **reconnect**: retry delay policy
//! - **heartbeat**: ping/pong liveness
//! - **websocket**: `tokio-tungstenite` connector
//! - **scripted**: in-memory connector for tests and demos

pub mod codec;
pub mod connection;
pub mod heartbeat;
pub mod reconnect;
pub mod scripted;
pub mod websocket;

pub use codec::{CodecError, TickCodec};
pub use connection::FeedConnection;
pub use heartbeat::{Heartbeat, HeartbeatAction, HeartbeatConfig};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use scripted::{ScriptedConnector, ScriptedSession};
pub use websocket::{WebSocketConfig, WebSocketConnector};
