use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use repuestos_core::config::AppConfig;
use repuestos_db::connect_with_config;
use repuestos_db::repositories::SqlConfigStore;
use repuestos_engine::{apply_config_store, attribute, ValueSource};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use toml::Value;

use crate::commands::{build_runtime, load_config, CommandResult};

#[derive(Debug, Serialize)]
struct ConfigLine {
    key: String,
    value: JsonValue,
    source: String,
}

#[derive(Debug, Serialize)]
struct ConfigReport {
    precedence: &'static str,
    config_store: String,
    entries: Vec<ConfigLine>,
}

/// Effective configuration with the source of every value.
pub fn run() -> CommandResult {
    let mut config = match load_config("config") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let file = FileSource { doc: config_file_doc.as_ref(), path: config_file_path.as_deref() };

    let mut entries = vec![
        line(
            "database.url",
            json!(config.database.url),
            file.source("database.url", Some("REPUESTOS_DATABASE_URL")),
        ),
        line(
            "database.max_connections",
            json!(config.database.max_connections),
            file.source("database.max_connections", Some("REPUESTOS_DATABASE_MAX_CONNECTIONS")),
        ),
        line(
            "database.timeout_secs",
            json!(config.database.timeout_secs),
            file.source("database.timeout_secs", Some("REPUESTOS_DATABASE_TIMEOUT_SECS")),
        ),
        line(
            "scheduler.tick_interval_secs",
            json!(config.scheduler.tick_interval_secs),
            file.source(
                "scheduler.tick_interval_secs",
                Some("REPUESTOS_SCHEDULER_TICK_INTERVAL_SECS"),
            ),
        ),
        line(
            "scheduler.use_config_store",
            json!(config.scheduler.use_config_store),
            file.source(
                "scheduler.use_config_store",
                Some("REPUESTOS_SCHEDULER_USE_CONFIG_STORE"),
            ),
        ),
        line(
            "server.bind_address",
            json!(config.server.bind_address),
            file.source("server.bind_address", Some("REPUESTOS_SERVER_BIND_ADDRESS")),
        ),
        line(
            "server.health_check_port",
            json!(config.server.health_check_port),
            file.source("server.health_check_port", Some("REPUESTOS_SERVER_HEALTH_CHECK_PORT")),
        ),
        line(
            "server.graceful_shutdown_secs",
            json!(config.server.graceful_shutdown_secs),
            file.source(
                "server.graceful_shutdown_secs",
                Some("REPUESTOS_SERVER_GRACEFUL_SHUTDOWN_SECS"),
            ),
        ),
        line(
            "logging.level",
            json!(config.logging.level),
            file.source(
                "logging.level",
                Some(env_alias("REPUESTOS_LOGGING_LEVEL", "REPUESTOS_LOG_LEVEL")),
            ),
        ),
        line(
            "logging.format",
            json!(config.logging.format),
            file.source(
                "logging.format",
                Some(env_alias("REPUESTOS_LOGGING_FORMAT", "REPUESTOS_LOG_FORMAT")),
            ),
        ),
    ];

    let (config_store, store_keys) = overlay_store(&mut config);
    for entry in attribute(&config.engine, &store_keys) {
        let source = match entry.source {
            ValueSource::Store => "store (engine_config_entry)".to_string(),
            ValueSource::File => {
                let env_key = (entry.key == "evaluation.min_coverage")
                    .then_some("REPUESTOS_ENGINE_MIN_COVERAGE");
                file.source(&format!("engine.{}", entry.key), env_key)
            }
        };
        entries.push(line(&format!("engine.{}", entry.key), entry.value, source));
    }

    CommandResult::success_with(
        "config",
        "effective configuration",
        ConfigReport {
            precedence: "store > env > file > default",
            config_store,
            entries,
        },
    )
}

/// Reads the store the way the server does at startup. A store that cannot
/// be read is reported, not fatal; the file values are shown instead.
fn overlay_store(config: &mut AppConfig) -> (String, Vec<String>) {
    if !config.scheduler.use_config_store {
        return ("disabled".to_string(), Vec::new());
    }
    let runtime = match build_runtime("config") {
        Ok(runtime) => runtime,
        Err(_) => return ("unavailable: async runtime did not start".to_string(), Vec::new()),
    };

    let mut engine = config.engine.clone();
    let result = runtime.block_on(async {
        let pool =
            connect_with_config(&config.database).await.map_err(|error| error.to_string())?;
        let applied = apply_config_store(&mut engine, &SqlConfigStore::new(pool.clone()))
            .await
            .map_err(|error| error.to_string());
        pool.close().await;
        applied
    });

    match result {
        Ok(keys) => {
            config.engine = engine;
            (format!("applied {} entr(ies)", keys.len()), keys)
        }
        Err(error) => (format!("unavailable: {error}"), Vec::new()),
    }
}

fn env_alias(primary: &'static str, alias: &'static str) -> &'static str {
    if env::var_os(primary).is_none() && env::var_os(alias).is_some() {
        alias
    } else {
        primary
    }
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("repuestos.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/repuestos.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

struct FileSource<'a> {
    doc: Option<&'a Value>,
    path: Option<&'a Path>,
}

impl FileSource<'_> {
    fn source(&self, key_path: &str, env_key: Option<&str>) -> String {
        if let Some(env_key) = env_key {
            if env::var_os(env_key).is_some() {
                return format!("env ({env_key})");
            }
        }

        if let Some(doc) = self.doc {
            if contains_path(doc, key_path) {
                let file_path = self
                    .path
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "config file".to_string());
                return format!("file ({file_path})");
            }
        }

        "default".to_string()
    }
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn line(key: &str, value: JsonValue, source: String) -> ConfigLine {
    ConfigLine { key: key.to_string(), value, source }
}
