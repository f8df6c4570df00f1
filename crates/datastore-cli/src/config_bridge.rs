//! Bridge from `datastore_config::Config` to storage and telemetry types.

use std::path::PathBuf;

use datastore_config::{Config, ConfigResult, default_data_dir};
use datastore_storage::{StoreSettings, SweepOptions};
use datastore_telemetry::{LogConfig, LogFormat};

/// Logging settings from the `[logging]` section.
///
/// Formats were validated on load; an unknown one falls back to compact.
pub fn to_log_config(config: &Config) -> LogConfig {
    let format = config
        .logging
        .format
        .parse::<LogFormat>()
        .unwrap_or_default();
    LogConfig::new(config.logging.level.clone())
        .with_format(format)
        .with_directives(config.logging.directives.iter().cloned())
}

/// Service defaults from the `[store]` and `[export]` sections.
pub fn to_store_settings(config: &Config) -> StoreSettings {
    StoreSettings {
        default_namespace: config.store.default_namespace.clone(),
        default_ttl: config.store.default_ttl,
        pretty_export: config.export.pretty,
    }
}

/// Sweep defaults from the `[cleanup]` section.
pub fn to_sweep_options(config: &Config) -> SweepOptions {
    SweepOptions {
        sample_size: config.cleanup.sample_size,
        ..SweepOptions::default()
    }
}

/// Directory of the persistent entry table.
///
/// # Errors
///
/// Fails if `store.data_dir` is unset and the home directory is unknown.
pub fn data_dir(config: &Config) -> ConfigResult<PathBuf> {
    match &config.store.data_dir {
        Some(dir) => Ok(dir.clone()),
        None => default_data_dir(),
    }
}
