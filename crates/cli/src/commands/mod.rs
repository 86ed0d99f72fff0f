pub mod config;
pub mod doctor;
pub mod evaluate;
pub mod migrate;
pub mod tick;

use std::sync::Arc;

use repuestos_core::clock::SystemClock;
use repuestos_core::config::{AppConfig, LoadOptions};
use repuestos_db::repositories::SqlConfigStore;
use repuestos_db::{connect_with_config, migrations, DbPool};
use repuestos_engine::{apply_config_store, EngineContext, EngineStores, LogNotificationSink};
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Runtime;

pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_RUNTIME: u8 = 3;
pub const EXIT_DATABASE: u8 = 4;
pub const EXIT_MIGRATION: u8 = 5;
pub const EXIT_CONFIG_STORE: u8 = 6;
pub const EXIT_NOT_FOUND: u8 = 7;
pub const EXIT_INVALID_STATE: u8 = 8;
pub const EXIT_ENGINE: u8 = 9;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    /// Success carrying a structured report under `data`.
    pub fn success_with(command: &str, message: impl Into<String>, data: impl Serialize) -> Self {
        let data = match serde_json::to_value(data) {
            Ok(Value::Null) => None,
            Ok(value) => Some(value),
            Err(error) => {
                return Self::failure(command, "serialization", error.to_string(), EXIT_ENGINE)
            }
        };
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Config, runtime, migrated pool and engine context shared by the commands
/// that act on solicitudes.
pub(crate) struct Session {
    pub runtime: Runtime,
    pub pool: DbPool,
    pub context: EngineContext,
}

impl Session {
    pub fn open(command: &str) -> Result<Self, CommandResult> {
        let mut config = load_config(command)?;
        let runtime = build_runtime(command)?;

        let opened = runtime.block_on(async {
            let pool = connect_with_config(&config.database)
                .await
                .map_err(|error| ("db_connectivity", error.to_string(), EXIT_DATABASE))?;
            migrations::run_pending(&pool)
                .await
                .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION))?;
            if config.scheduler.use_config_store {
                apply_config_store(&mut config.engine, &SqlConfigStore::new(pool.clone()))
                    .await
                    .map_err(|error| ("config_store", error.to_string(), EXIT_CONFIG_STORE))?;
            }
            Ok::<DbPool, (&'static str, String, u8)>(pool)
        });
        let pool = opened.map_err(|(error_class, message, exit_code)| {
            CommandResult::failure(command, error_class, message, exit_code)
        })?;

        let context = EngineContext::new(
            config.engine,
            EngineStores::sql(pool.clone()),
            Arc::new(LogNotificationSink),
            Arc::new(SystemClock),
        );
        Ok(Self { runtime, pool, context })
    }

    pub fn close(self) {
        let Self { runtime, pool, .. } = self;
        runtime.block_on(pool.close());
    }
}

pub(crate) fn load_config(command: &str) -> Result<AppConfig, CommandResult> {
    AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            EXIT_CONFIG,
        )
    })
}

pub(crate) fn build_runtime(command: &str) -> Result<Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            EXIT_RUNTIME,
        )
    })
}
