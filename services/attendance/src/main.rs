use anyhow::{Context, Result};
use attendance_service::{start_api_server, AppState, Config, InferenceClient, PgRecordStore};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    config.validate().context("Invalid configuration")?;

    info!(
        service = %config.service.name,
        "Starting attendance service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let store = PgRecordStore::new(&config.database)
        .await
        .context("Failed to initialize record store")?;

    // Run migrations if enabled
    if config.database.run_migrations {
        store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let inference =
        InferenceClient::new(&config.inference).context("Failed to initialize inference client")?;

    let state = AppState {
        store: Arc::new(store),
        inference: Arc::new(inference),
    };

    start_api_server(state, &config.api, shutdown_signal()).await?;

    info!("Attendance service stopped");

    Ok(())
}

/// Initialize JSON logging; `RUST_LOG` overrides the configured level
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json().with_current_span(true))
        .init();
}

/// Install the Prometheus exporter and describe the service counters
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    metrics::describe_counter!("attendance.owners.created", "Owner rows inserted");
    metrics::describe_counter!("attendance.frames.persisted", "Frame rows inserted");
    metrics::describe_counter!("attendance.relay.requests", "Frame sets relayed for prediction");
    metrics::describe_counter!("attendance.relay.failed", "Frame relays that got no response");
    metrics::describe_counter!("attendance.poll.resolved", "Polls answered with an identity");
    metrics::describe_counter!("attendance.poll.pending", "Polls answered as pending");

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
///
/// A handler that cannot be installed is logged and never fires, so the
/// other signal still stops the server.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, draining in-flight requests"),
        _ = terminate => info!("Received SIGTERM, draining in-flight requests"),
    }
}
