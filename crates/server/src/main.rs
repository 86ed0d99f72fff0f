mod bootstrap;
mod health;

use std::time::Duration;

use anyhow::Result;
use repuestos_core::config::{AppConfig, LoadOptions};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::health::HealthState;

fn init_logging(config: &AppConfig) {
    use repuestos_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.trim().to_ascii_lowercase()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging needs the loaded config, so it starts before bootstrap.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let cancel = CancellationToken::new();

    let health = health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        HealthState::new(app.db_pool.clone(), app.scheduler.subscribe()),
        cancel.clone(),
    )
    .await?;

    let scheduler = {
        let scheduler = app.scheduler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    };

    tracing::info!(
        event_name = "system.server.started",
        tick_interval_secs = app.config.scheduler.tick_interval_secs,
        "repuestos-server started"
    );
    tokio::signal::ctrl_c().await?;
    tracing::info!(event_name = "system.server.stopping", "repuestos-server stopping");

    cancel.cancel();
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let drained = tokio::time::timeout(grace, async {
        let _ = scheduler.await;
        let _ = health.await;
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            graceful_shutdown_secs = app.config.server.graceful_shutdown_secs,
            "tasks did not stop within the grace period"
        );
    }

    app.db_pool.close().await;
    tracing::info!(event_name = "system.server.stopped", "repuestos-server stopped");
    Ok(())
}
