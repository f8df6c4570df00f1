//! Configuration types for the data store.
//!
//! Every struct implements [`Default`] matching `defaults.toml`, so a bare
//! `[section]` header produces a working configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Entry table and service defaults.
    pub store: StoreSection,
    /// Expired-entry sweep.
    pub cleanup: CleanupSection,
    /// JSON export and import.
    pub export: ExportSection,
    /// Logging level, format, and per-crate directives.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// StoreSection
// ---------------------------------------------------------------------------

/// Entry table location and the defaults applied by the storage service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Namespace used when a service is not narrowed explicitly.
    pub default_namespace: Option<String>,
    /// Name of the entry table.
    pub table_name: String,
    /// TTL in seconds applied by `set` when the caller passes none.
    pub default_ttl: Option<u64>,
    /// Directory holding the persistent table. Defaults to
    /// `~/.datastore/data` when unset.
    pub data_dir: Option<PathBuf>,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            default_namespace: None,
            table_name: "data_stores".to_owned(),
            default_ttl: None,
            data_dir: None,
        }
    }
}

// ---------------------------------------------------------------------------
// CleanupSection
// ---------------------------------------------------------------------------

/// Expired-entry sweep settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupSection {
    /// Run the sweep periodically in long-lived processes.
    pub auto_cleanup: bool,
    /// Seconds between automatic sweeps.
    pub interval_secs: u64,
    /// Rows listed by a dry run.
    pub sample_size: usize,
}

impl Default for CleanupSection {
    fn default() -> Self {
        Self {
            auto_cleanup: false,
            interval_secs: 3600,
            sample_size: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// ExportSection
// ---------------------------------------------------------------------------

/// Export destination and formatting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSection {
    /// Directory export and import paths are resolved against.
    pub path: PathBuf,
    /// Pretty-print exported JSON.
    pub pretty: bool,
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("exports"),
            pretty: true,
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"` or `"full"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["datastore_storage=debug"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_sections_use_defaults() {
        let config: Config = toml::from_str("[store]\n[cleanup]\n").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_section() {
        let config: Config = toml::from_str(
            r#"
            [store]
            default_namespace = "app"
            default_ttl = 60

            [cleanup]
            auto_cleanup = true
        "#,
        )
        .unwrap();

        assert_eq!(config.store.default_namespace.as_deref(), Some("app"));
        assert_eq!(config.store.default_ttl, Some(60));
        assert_eq!(config.store.table_name, "data_stores");
        assert!(config.cleanup.auto_cleanup);
        assert_eq!(config.cleanup.interval_secs, 3600);
    }

    #[test]
    fn test_serialize_defaults() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(json["store"]["table_name"], "data_stores");
        assert!(json["store"]["default_ttl"].is_null());
        assert_eq!(json["export"]["pretty"], true);
    }
}
