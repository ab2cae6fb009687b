//! Market Ingest Binary
//!
//! Starts the streaming consumer, the REST scheduler and the health server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-ingest
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `UW_API_TOKEN`: Unusual Whales API token
//!
//! ## Optional
//! - `UW_WEBSOCKET_URL`: Streaming endpoint (default: wss://api.unusualwhales.com/socket)
//! - `UW_REST_BASE_URL`: REST base URL (default: <https://api.unusualwhales.com>)
//! - `INGEST_TICKERS`: Comma-separated tickers (default: SPY,QQQ,IWM)
//! - `INGEST_JOB_CADENCES`: `job=seconds` overrides, `job=0` disables
//! - `INGEST_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `RATE_LIMIT_PER_MINUTE`: REST request budget (default: 120)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log filter (default: market_ingest=info)
//!
//! See `IngestConfig` for the full list.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_ingest::application::ports::{SharedPublisher, SharedRepository};
use market_ingest::infrastructure::health::{HealthServer, HealthServerState};
use market_ingest::infrastructure::telemetry;
use market_ingest::{
    BoxedLoop, FanoutPublisher, HandlerRegistry, InMemoryRepository, IngestConfig,
    IngestionService, RestClient, RestScheduler, StreamConsumer, TokenBucket, build_catalog,
    default_handlers, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A provider installed elsewhere is fine.
    let _ = rustls::crypto::ring::default_provider().install_default();

    // .env first so OTEL_* and RUST_LOG entries reach telemetry.
    let dotenv_path = IngestConfig::load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting market ingest");
    if let Some(path) = &dotenv_path {
        tracing::debug!(path = %path.display(), "Loaded .env file");
    }

    let config = IngestConfig::from_env().context("invalid configuration")?;

    // Initialize Prometheus metrics
    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    log_config(&config);

    let repository: SharedRepository = Arc::new(InMemoryRepository::new());
    let publisher: SharedPublisher = Arc::new(FanoutPublisher::new(config.fanout.clone()));

    // Streaming path
    let handlers = default_handlers(
        &config.tickers,
        config.flush_policy(),
        &repository,
        &publisher,
    );
    let consumer = StreamConsumer::new(
        config.stream_config(),
        HandlerRegistry::new(handlers.clone()),
    );
    let stream_status = consumer.status();

    // REST path
    let limiter = Arc::new(
        TokenBucket::new(config.rate_limit.capacity, config.rate_limit.refill_per_sec)
            .context("invalid rate limit")?,
    );
    let client = RestClient::new(
        &config.endpoints.rest_base_url,
        config.token.expose(),
        config.rest.timeout,
        limiter,
        config.rest.retry.clone(),
    )
    .context("failed to build REST client")?;
    let scheduler = RestScheduler::new(
        build_catalog(&config.cadences),
        config.tickers.clone(),
        client,
        Arc::clone(&repository),
        config.rest.poll_interval,
    );
    let scheduler_stats = scheduler.stats();

    // Health server outlives the service so probes answer during drain.
    let health_cancel = CancellationToken::new();
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        stream_status,
        scheduler_stats,
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        health_cancel.clone(),
    );
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let loops: [BoxedLoop; 2] = [Box::new(scheduler), Box::new(consumer)];
    let mut service = IngestionService::new(loops.into(), handlers, repository, publisher);
    service.start()?;

    tracing::info!("Market ingest ready");

    await_shutdown().await;

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, service.stop()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Shutdown completed with errors"),
        Err(_) => tracing::error!("Shutdown timed out"),
    }

    health_cancel.cancel();
    let _ = health_task.await;

    tracing::info!("Market ingest stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &IngestConfig) {
    tracing::info!(
        tickers = ?config.tickers,
        jobs = config.cadences.len(),
        health_port = config.server.health_port,
        rate_limit_per_minute = config.rate_limit.per_minute,
        option_trade_buffer = config.buffer.max_items,
        "Configuration loaded"
    );
    tracing::debug!(
        websocket_url = %config.endpoints.websocket_url,
        rest_base_url = %config.endpoints.rest_base_url,
        "Upstream endpoints"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
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
                tracing::error!(error = %e, "SIGTERM handler unavailable");
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
}
