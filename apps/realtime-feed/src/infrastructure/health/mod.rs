//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, per-channel feed status, derived series,
//! and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (every channel delivering data)
//! - `GET /channels/{id}/series` - Smoothed window and displayed value
//! - `GET /bands` - Latest ensemble percentile bands
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, http::StatusCode, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{ChannelSeries, ChannelStatus, EnsembleService, FeedManager};
use crate::domain::feed::FeedState;
use crate::domain::series::PercentileBand;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Per-channel feed status.
    pub channels: Vec<ChannelStatus>,
    /// Subscription statistics.
    pub subscriptions: SubscriptionStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every channel on its live feed.
    Healthy,
    /// Some channel connecting or on synthetic data.
    Degraded,
    /// Some channel without data, or no channels at all.
    Unhealthy,
}

/// Subscription statistics.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SubscriptionStatus {
    /// Open channels.
    pub channels: usize,
    /// Active consumers.
    pub consumers: usize,
}

/// Ensemble band response.
#[derive(Debug, Clone, Serialize)]
pub struct BandsResponse {
    /// Successful refreshes so far.
    pub refreshes: u64,
    /// Failed refreshes so far.
    pub failures: u64,
    /// Latest bands; empty before the first successful refresh.
    pub bands: Vec<PercentileBand>,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    manager: FeedManager,
    series: Option<Arc<ChannelSeries>>,
    ensemble: Option<Arc<EnsembleService>>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, manager: FeedManager) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            manager,
            series: None,
            ensemble: None,
        }
    }

    /// Serve per-channel series from `series`.
    #[must_use]
    pub fn with_series(mut self, series: Arc<ChannelSeries>) -> Self {
        self.series = Some(series);
        self
    }

    /// Serve ensemble bands from `ensemble`.
    #[must_use]
    pub fn with_ensemble(mut self, ensemble: Arc<EnsembleService>) -> Self {
        self.ensemble = Some(ensemble);
        self
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/channels/{id}/series", get(series_handler))
        .route("/bands", get(bands_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if is_ready(&state.manager.channel_statuses()) {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn series_handler(
    State(state): State<Arc<HealthServerState>>,
    Path(channel): Path<String>,
) -> Response {
    let view = state.series.as_ref().and_then(|series| series.view(&channel));
    match view {
        Some(view) => Json(view).into_response(),
        None => (StatusCode::NOT_FOUND, "NO SERIES").into_response(),
    }
}

async fn bands_handler(State(state): State<Arc<HealthServerState>>) -> Response {
    match &state.ensemble {
        Some(ensemble) => Json(BandsResponse {
            refreshes: ensemble.refreshes(),
            failures: ensemble.failures(),
            bands: ensemble.bands(),
        })
        .into_response(),
        None => (StatusCode::NOT_FOUND, "ENSEMBLE DISABLED").into_response(),
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let channels = state.manager.channel_statuses();
    let stats = state.manager.subscription_stats();

    HealthResponse {
        status: determine_health_status(&channels),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        channels,
        subscriptions: SubscriptionStatus {
            channels: stats.channel_count,
            consumers: stats.consumer_count,
        },
    }
}

fn determine_health_status(channels: &[ChannelStatus]) -> HealthStatus {
    if channels.is_empty() || channels.iter().any(|c| c.status == FeedState::Disconnected) {
        return HealthStatus::Unhealthy;
    }
    if channels.iter().all(|c| c.status == FeedState::Connected) {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    }
}

fn is_ready(channels: &[ChannelStatus]) -> bool {
    !channels.is_empty() && channels.iter().all(|c| c.status.has_data())
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
