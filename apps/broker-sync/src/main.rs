//! Broker Sync Binary
//!
//! Connects every configured broker account of one user and keeps the
//! merged snapshot served over HTTP.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin broker-sync
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `BROKER_SYNC_USER_ID`: User whose accounts are synchronized
//! - `BROKER_SYNC_ACCOUNT_IDS`: Comma-separated broker account ids
//! - `BROKER_SYNC_TOKEN_SERVICE_URL`: Base URL of the websocket token service
//!
//! ## Optional
//! - `BROKER_SYNC_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `BROKER_SYNC_HEARTBEAT_INTERVAL_MS`: Client heartbeat (default: 25000)
//! - `BROKER_SYNC_RECONNECT_DELAY_MS`: Reconnect delay (default: 1500)
//! - `BROKER_SYNC_SUBSCRIBE_SETTLE_MS`: Authorize-to-sync delay (default: 500)
//! - `BROKER_SYNC_AGGREGATION_TICK_MS`: Safety-net merge tick (default: 100)
//! - `BROKER_SYNC_MAX_RECONNECT_ATTEMPTS`: 0 = unlimited (default: 0)
//! - `BROKER_SYNC_MAX_AUTH_FAILURES`: 0 = unlimited (default: 5)
//! - `TRADOVATE_DEMO_WS_URL`, `TRADOVATE_LIVE_WS_URL`: Endpoint overrides
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: broker-sync)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use broker_sync::application::ports::{ConnectionFactory, Scheduler, TransportConnector};
use broker_sync::infrastructure::health::{HealthServer, HealthServerState};
use broker_sync::infrastructure::telemetry;
use broker_sync::{
    AggregatorConfig, HttpTokenSource, SyncAggregator, SyncConfig, TokioScheduler,
    TradovateConnectionFactory, TungsteniteConnector, init_metrics,
};
use tokio::runtime::Handle;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Token service request timeout.
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay between credential retries for accounts that failed to start.
const CREDENTIAL_RETRY_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let telemetry_guard = telemetry::init();

    tracing::info!(
        span_export = telemetry_guard.is_exporting(),
        "Starting Broker Sync"
    );

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = SyncConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler::new(Handle::current()));
    let connector: Arc<dyn TransportConnector> =
        Arc::new(TungsteniteConnector::new(Handle::current()));
    let factory: Arc<dyn ConnectionFactory> = Arc::new(TradovateConnectionFactory::new(
        config.connection.clone(),
        connector,
        Arc::clone(&scheduler),
    ));
    let aggregator = SyncAggregator::new(
        factory,
        scheduler,
        AggregatorConfig {
            tick_interval: config.aggregation_tick,
        },
    );
    let token_source = HttpTokenSource::new(&config.token_service_url, TOKEN_REQUEST_TIMEOUT)
        .context("failed to build token service client")?;

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        aggregator.clone(),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Connect accounts, retrying the ones whose credentials were unavailable
    let sync_aggregator = aggregator.clone();
    let sync_shutdown = shutdown_token.clone();
    tokio::spawn(async move {
        connect_accounts(&sync_aggregator, &config, &token_source, &sync_shutdown).await;
    });

    tracing::info!("Broker sync ready");

    await_shutdown(shutdown_token).await;

    aggregator.disconnect_all();

    tracing::info!("Broker sync stopped");
    Ok(())
}

/// Connect every configured account until all have credentials or shutdown.
async fn connect_accounts(
    aggregator: &SyncAggregator,
    config: &SyncConfig,
    token_source: &HttpTokenSource,
    shutdown: &CancellationToken,
) {
    loop {
        let failed = aggregator
            .connect_user(&config.user_id, &config.broker_account_ids, token_source)
            .await;
        if failed.is_empty() {
            tracing::info!(
                accounts = config.broker_account_ids.len(),
                "All broker accounts started"
            );
            return;
        }

        tracing::warn!(
            failed = ?failed,
            retry_secs = CREDENTIAL_RETRY_INTERVAL.as_secs(),
            "Some broker accounts could not start"
        );

        tokio::select! {
            () = shutdown.cancelled() => return,
            () = tokio::time::sleep(CREDENTIAL_RETRY_INTERVAL) => {}
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &SyncConfig) {
    tracing::info!(
        user_id = %config.user_id,
        accounts = config.broker_account_ids.len(),
        health_port = config.server.health_port,
        aggregation_tick_ms = config.aggregation_tick.as_millis(),
        "Configuration loaded"
    );
    tracing::debug!(
        token_service_url = %config.token_service_url,
        demo_ws_url = %config.connection.demo_ws_url,
        live_ws_url = %config.connection.live_ws_url,
        heartbeat_ms = config.connection.heartbeat_interval.as_millis(),
        reconnect_delay_ms = config.connection.reconnect_delay.as_millis(),
        "Connection settings"
    );
}

/// Load .env file from current directory or any ancestor directory.
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

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
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

    shutdown_token.cancel();
}
