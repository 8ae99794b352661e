//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the port interfaces defined in the
//! application layer, plus configuration and observability.

/// Environment-driven configuration.
pub mod config;

/// Analytics backend HTTP client.
pub mod ensemble;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics.
pub mod metrics;

/// Live stream connections and transports.
pub mod stream;

/// Synthetic fallback feed.
pub mod synthetic;

/// Tracing and OpenTelemetry setup.
pub mod telemetry;
