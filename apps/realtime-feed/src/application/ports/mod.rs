//! Port Interfaces
//!
//! Contracts the infrastructure adapters implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `StreamConnector`: opens one upstream connection per channel attempt
//! - `EnsembleSource`: fetches simulated path ensembles
//!
//! ## Source Events
//!
//! `SourceEvent` is what every tick source sends to the feed supervisor.

mod ensemble_port;
mod stream_port;

pub use ensemble_port::{EnsembleSource, EnsembleSourceError, StaticEnsembleSource};
pub use stream_port::{
    ConnectionError, EventSender, FrameStream, SourceEvent, SourceEventKind, SourceHandle,
    SourceId, StreamConnector,
};
