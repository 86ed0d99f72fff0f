//! Configuration-store overlay applied on top of the file/env engine config.

use serde::Serialize;
use tracing::info;

use repuestos_core::config::EngineConfig;
use repuestos_db::repositories::ConfigStore;

use crate::error::EngineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    /// Defaults, the TOML file or `REPUESTOS_*` variables.
    File,
    Store,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OverlaidEntry {
    pub key: &'static str,
    pub value: serde_json::Value,
    pub source: ValueSource,
}

/// Applies every stored entry, then validates the result as a whole.
///
/// Unknown keys and mistyped values are errors, so a bad row stops startup
/// instead of silently keeping the file value. Returns the keys the store
/// supplied.
pub async fn apply_config_store(
    config: &mut EngineConfig,
    store: &dyn ConfigStore,
) -> Result<Vec<String>, EngineError> {
    let entries = store.list_entries().await?;
    let mut applied = Vec::with_capacity(entries.len());
    for entry in entries {
        config.apply_entry(&entry.key, &entry.value)?;
        applied.push(entry.key);
    }
    config.validate()?;

    info!(
        event_name = "engine.config.store_applied",
        entries = applied.len(),
        "configuration store entries applied"
    );
    Ok(applied)
}

/// Effective value of every known key, tagged with where it came from.
pub fn attribute(config: &EngineConfig, store_keys: &[String]) -> Vec<OverlaidEntry> {
    EngineConfig::KEYS
        .iter()
        .filter_map(|key| {
            let value = config.entry(key)?;
            let source = if store_keys.iter().any(|stored| stored == key) {
                ValueSource::Store
            } else {
                ValueSource::File
            };
            Some(OverlaidEntry { key, value, source })
        })
        .collect()
}
