use std::sync::Arc;
use std::time::Duration;

use repuestos_core::clock::SystemClock;
use repuestos_core::config::{AppConfig, ConfigError};
use repuestos_db::repositories::SqlConfigStore;
use repuestos_db::{connect_with_config, migrations, DbPool};
use repuestos_engine::{
    apply_config_store, EngineContext, EngineError, EngineStores, EscalationScheduler,
    LogNotificationSink,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub context: Arc<EngineContext>,
    pub scheduler: Arc<EscalationScheduler>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("configuration store overlay failed: {0}")]
    ConfigStore(#[source] EngineError),
}

pub async fn bootstrap_with_config(mut config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        max_connections = config.database.max_connections,
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    if config.scheduler.use_config_store {
        let store = SqlConfigStore::new(db_pool.clone());
        apply_config_store(&mut config.engine, &store).await.map_err(BootstrapError::ConfigStore)?;
        // Store values can shorten tier waits below the tick interval.
        config.validate()?;
    }

    let context = Arc::new(EngineContext::new(
        config.engine.clone(),
        EngineStores::sql(db_pool.clone()),
        Arc::new(LogNotificationSink),
        Arc::new(SystemClock),
    ));
    let scheduler = Arc::new(EscalationScheduler::new(
        context.clone(),
        Duration::from_secs(config.scheduler.tick_interval_secs),
    ));

    Ok(Application { config, db_pool, context, scheduler })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use chrono::Utc;
    use repuestos_core::config::{AppConfig, ConfigOverrides, LoadOptions};
    use repuestos_db::repositories::{ConfigEntry, ConfigStore, SqlConfigStore};
    use serde_json::json;
    use tempfile::TempDir;

    use crate::bootstrap::{bootstrap_with_config, Application, BootstrapError};

    async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
        bootstrap_with_config(AppConfig::load(options)?).await
    }

    fn options_for(path: &Path) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(format!("sqlite://{}", path.display())),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    async fn put(path: &Path, key: &str, value: serde_json::Value) {
        let app = bootstrap(options_for(path)).await.expect("bootstrap should succeed");
        SqlConfigStore::new(app.db_pool.clone())
            .put(ConfigEntry { key: key.to_string(), value, updated_at: Utc::now() })
            .await
            .expect("put config entry");
        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_ticks_an_empty_database() {
        let dir = TempDir::new().expect("temp dir");
        let app = bootstrap(options_for(&dir.path().join("repuestos.db")))
            .await
            .expect("bootstrap should succeed");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('solicitud', 'offer', 'adjudication', 'notification_outbox')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("count tables");
        assert_eq!(table_count, 4, "bootstrap should expose the escalation tables");

        let report = app.scheduler.tick_all().await.expect("tick on empty database");
        assert!(report.entries.is_empty());
        assert_eq!(report.dispatch.dispatched, 0);

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_overlays_config_store_entries() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("repuestos.db");
        put(&path, "evaluation.min_coverage", json!(0.75)).await;

        let app = bootstrap(options_for(&path)).await.expect("bootstrap should succeed");
        assert_eq!(app.config.engine.evaluation.min_coverage, 0.75);
        assert_eq!(app.context.config().evaluation.min_coverage, 0.75);
        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_invalid_store_entry() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("repuestos.db");
        put(&path, "scoring.weights.trust", json!(0.9)).await;

        let result = bootstrap(options_for(&path)).await;
        assert!(matches!(result, Err(BootstrapError::ConfigStore(_))));
        let message = result.err().expect("error").to_string();
        assert!(message.contains("scoring.weights must sum to 1.0"), "{message}");
    }
}
