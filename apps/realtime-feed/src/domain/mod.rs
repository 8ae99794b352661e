//! Domain Layer - Feed types and pure reduction logic.
//!
//! Everything here is synchronous and free of I/O. Time enters only as
//! explicit arguments, so every type can be driven deterministically.

/// Display value interpolation.
pub mod animation;

/// Channels, ticks, feed state and trend.
pub mod feed;

/// Smoothing windows and percentile bands.
pub mod series;

/// Reference-counted channel subscriptions.
pub mod subscription;
