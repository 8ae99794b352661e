//! Realtime Feed Binary
//!
//! Starts the feed supervisor for the configured channels.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin realtime-feed
//! ```
//!
//! # Environment Variables
//!
//! - `FEED_STREAM_URL`: WebSocket URL template with `{channel}`
//! - `FEED_CHANNELS`: Comma-separated channel ids (default: btcusdt,ethusdt,solusdt)
//! - `FEED_HIGH_VOLATILITY_CHANNELS`: Channels using the high synthetic step
//! - `FEED_RECONNECT_DELAY_MS`: Reconnect delay (default: 5000)
//! - `FEED_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `ANALYTICS_API_URL`: Monte Carlo backend; ensemble refresh is off when unset
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use anyhow::Context;
use realtime_feed::application::services::{
    AnimationConfig, ChannelSeries, EnsembleService, FeedManager, FeedManagerConfig,
};
use realtime_feed::infrastructure::config::FeedServiceConfig;
use realtime_feed::infrastructure::ensemble::{DEFAULT_TIMEOUT, MonteCarloClient};
use realtime_feed::infrastructure::health::{HealthServer, HealthServerState};
use realtime_feed::infrastructure::stream::{
    ReconnectConfig, TickCodec, WebSocketConfig, WebSocketConnector,
};
use realtime_feed::infrastructure::telemetry;
use realtime_feed::init_metrics;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting realtime feed");

    let _metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    let config = FeedServiceConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let connector = WebSocketConnector::new(WebSocketConfig::from_stream_settings(&config.stream));
    let manager = FeedManager::with_codec(
        Arc::new(connector),
        TickCodec::new(config.stream.price_fields.clone()),
        FeedManagerConfig {
            reconnect: ReconnectConfig::from_stream_settings(&config.stream),
            synthetic: config.synthetic,
            ..FeedManagerConfig::default()
        },
    );

    let series = Arc::new(ChannelSeries::new(config.smoothing, AnimationConfig::default()));
    for channel in config.channel_list() {
        let subscription = manager.subscribe(channel.id(), channel.config().clone())?;
        tokio::spawn(Arc::clone(&series).drive(subscription));
    }

    let mut health_state =
        HealthServerState::new(env!("CARGO_PKG_VERSION").to_string(), manager.clone())
            .with_series(series);

    if let Some(api_url) = &config.analytics.api_url {
        let client = MonteCarloClient::new(api_url, DEFAULT_TIMEOUT)?;
        let service = Arc::new(EnsembleService::new(
            Arc::new(client),
            config.analytics.simulations,
        ));
        health_state = health_state.with_ensemble(Arc::clone(&service));
        tokio::spawn(service.run(config.analytics.refresh_interval, shutdown_token.clone()));
        tracing::info!(url = %api_url, "Ensemble refresh enabled");
    }

    let health_server = HealthServer::new(
        config.server.health_port,
        Arc::new(health_state),
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("Realtime feed ready");

    await_shutdown(shutdown_token).await;
    manager.teardown();

    tracing::info!("Realtime feed stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &FeedServiceConfig) {
    tracing::info!(
        channels = ?config.channels.channels,
        health_port = config.server.health_port,
        reconnect_delay_ms = u64::try_from(config.stream.reconnect_delay_initial.as_millis())
            .unwrap_or(u64::MAX),
        analytics = config.analytics.api_url.is_some(),
        "Configuration loaded"
    );
    tracing::debug!(url_template = %config.stream.url_template, "Stream endpoint");
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler installation failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
