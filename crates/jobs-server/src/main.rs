// CVForge job server
//
// Runs every background queue of the platform in one process:
// connects the job store, starts the worker pools, schedules retention
// sweeps and serves the monitoring API until SIGINT/SIGTERM.

mod processors;
mod telemetry;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use cvforge_jobs::admin::{self, AdminState};
use cvforge_jobs::{
    ConnectionManager, OrchestratorConfig, QueueManager, RetentionSweeper, ShutdownCoordinator,
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::processors::HttpProcessor;
use crate::telemetry::{init_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Keep the guard alive for the lifetime of the application
    let _telemetry_guard = init_telemetry(TelemetryConfig::from_env());

    tracing::info!("cvforge-jobs-server starting...");

    let config = OrchestratorConfig::from_env();

    let connection = Arc::new(
        ConnectionManager::connect(&config.store)
            .await
            .context("Failed to connect to job store")?,
    );
    let manager = Arc::new(
        QueueManager::register(connection.store(), config.queues.clone())
            .context("Failed to register queues")?,
    );

    let client = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;
    for definition in &config.queues {
        match config.processor_urls.get(&definition.name) {
            Some(url) => {
                tracing::info!(queue = %definition.name, url = %url, "Delegating jobs over HTTP");
                manager.attach_processor(
                    &definition.name,
                    Arc::new(HttpProcessor::new(
                        client.clone(),
                        url.clone(),
                        definition.job_timeout,
                    )),
                )?;
            }
            None => tracing::warn!(
                queue = %definition.name,
                "No processor URL configured, jobs will wait until one is"
            ),
        }
    }
    manager.start_workers().context("Failed to start workers")?;

    let background = CancellationToken::new();

    let schedule = RetentionSweeper::new(Arc::clone(&manager))
        .spawn_schedule(&config.cleanup_schedule, background.clone())
        .with_context(|| format!("Invalid CLEANUP_SCHEDULE {:?}", config.cleanup_schedule))?;

    let app = admin::router(
        AdminState::new(Arc::clone(&manager)),
        config.monitor.credentials.clone(),
    )
    .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.monitor.addr)
        .await
        .with_context(|| format!("Failed to bind monitoring address {}", config.monitor.addr))?;
    tracing::info!("Monitoring server listening on {}", config.monitor.addr);

    let server_shutdown = background.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
    });

    shutdown_signal().await;
    tracing::info!("Received shutdown signal");

    background.cancel();
    if let Err(e) = schedule.await {
        tracing::error!(error = %e, "Retention schedule task failed");
    }
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Monitoring server error"),
        Err(e) => tracing::error!(error = %e, "Monitoring server task failed"),
    }

    let report = ShutdownCoordinator::new(manager, connection)
        .with_grace(config.shutdown_grace)
        .shutdown()
        .await;

    if !report.is_clean() {
        bail!("shutdown completed with errors: {}", report.errors.join("; "));
    }

    tracing::info!("Job server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
