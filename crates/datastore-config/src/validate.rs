//! Post-merge configuration validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Log formats the telemetry crate can install.
pub const LOG_FORMATS: &[&str] = &["pretty", "compact", "json", "full"];

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_store(config)?;
    validate_cleanup(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_store(config: &Config) -> ConfigResult<()> {
    let s = &config.store;

    if s.table_name.trim().is_empty() {
        return Err(invalid("store.table_name", "table_name must not be empty"));
    }
    if s.table_name.contains('\0') {
        return Err(invalid(
            "store.table_name",
            "table_name must not contain a NUL byte",
        ));
    }
    if s.default_ttl == Some(0) {
        return Err(invalid(
            "store.default_ttl",
            "default_ttl must be positive; omit it for entries that never expire",
        ));
    }
    if s
        .default_namespace
        .as_deref()
        .is_some_and(|ns| ns.split('.').all(str::is_empty))
    {
        return Err(invalid(
            "store.default_namespace",
            "default_namespace has no non-empty segment",
        ));
    }
    Ok(())
}

fn validate_cleanup(config: &Config) -> ConfigResult<()> {
    if config.cleanup.interval_secs == 0 {
        return Err(invalid(
            "cleanup.interval_secs",
            "interval_secs must be at least 1",
        ));
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let l = &config.logging;

    if !matches!(
        l.level.as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        return Err(invalid(
            "logging.level",
            format!(
                "unknown level '{}'; expected one of: trace, debug, info, warn, error",
                l.level
            ),
        ));
    }
    if !LOG_FORMATS.contains(&l.format.as_str()) {
        return Err(invalid(
            "logging.format",
            format!(
                "unknown format '{}'; expected one of: {}",
                l.format,
                LOG_FORMATS.join(", ")
            ),
        ));
    }
    Ok(())
}
