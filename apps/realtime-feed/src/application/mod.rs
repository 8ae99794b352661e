//! Application Layer - Use cases and port definitions.
//!
//! Ports describe the transports the feed layer depends on; services
//! supervise channels, drive display animation and refresh ensembles.

/// Port interfaces for stream transports and ensemble sources.
pub mod ports;

/// Feed supervision, display animation and ensemble refresh.
pub mod services;
