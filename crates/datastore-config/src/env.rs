//! Environment variable fallbacks.
//!
//! Env vars are **fallback**, not override: they only fill fields that no
//! config file set.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::merge::{ConfigLayer, FieldSources};

/// Mapping from environment variable name to config field path.
struct EnvMapping {
    var_name: &'static str,
    field_path: &'static str,
}

/// All supported `DATASTORE_*` env var mappings.
const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "DATASTORE_DEFAULT_NAMESPACE",
        field_path: "store.default_namespace",
    },
    EnvMapping {
        var_name: "DATASTORE_TABLE",
        field_path: "store.table_name",
    },
    EnvMapping {
        var_name: "DATASTORE_DEFAULT_TTL",
        field_path: "store.default_ttl",
    },
    EnvMapping {
        var_name: "DATASTORE_DATA_DIR",
        field_path: "store.data_dir",
    },
    EnvMapping {
        var_name: "DATASTORE_EXPORT_PATH",
        field_path: "export.path",
    },
    EnvMapping {
        var_name: "DATASTORE_LOG_LEVEL",
        field_path: "logging.level",
    },
];

/// Apply environment variable fallbacks to fields that were **not** set by
/// any config file layer.
///
/// Returns the number of env vars applied.
pub fn apply_env_fallbacks<S: ::std::hash::BuildHasher>(
    merged: &mut toml::Value,
    sources: &mut FieldSources,
    env_vars: &HashMap<String, String, S>,
) -> usize {
    let mut count: usize = 0;

    for mapping in ENV_MAPPINGS {
        let file_set = sources
            .get(mapping.field_path)
            .is_some_and(|layer| *layer != ConfigLayer::Defaults);
        if file_set {
            continue;
        }

        let Some(val) = env_vars.get(mapping.var_name) else {
            continue;
        };
        let Some(value) = coerce_to_toml_value(mapping.field_path, val) else {
            warn!(
                var = mapping.var_name,
                value = %val,
                "ignoring environment variable with unparseable value"
            );
            continue;
        };

        debug!(
            var = mapping.var_name,
            field = mapping.field_path,
            "applying env var fallback"
        );
        set_field(merged, mapping.field_path, value);
        sources.insert(mapping.field_path.to_owned(), ConfigLayer::Environment);
        count = count.saturating_add(1);
    }

    count
}

/// Set a dotted field in the TOML tree, creating intermediate tables.
fn set_field(root: &mut toml::Value, path: &str, value: toml::Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(leaf) = segments.pop() else {
        return;
    };

    let mut current = root;
    for segment in segments {
        let Some(table) = current.as_table_mut() else {
            return;
        };
        current = table
            .entry(segment.to_owned())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }

    if let Some(table) = current.as_table_mut() {
        table.insert(leaf.to_owned(), value);
    }
}

/// Coerce a string env var value to the TOML type of its field.
///
/// Returns `None` when a numeric field does not parse.
fn coerce_to_toml_value(path: &str, val: &str) -> Option<toml::Value> {
    if path == "store.default_ttl" {
        return val.parse::<i64>().ok().map(toml::Value::Integer);
    }
    Some(toml::Value::String(val.to_owned()))
}

/// Collect all current environment variables into a map.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_fallback_fills_unset_fields() {
        let mut merged: toml::Value = toml::from_str("[store]\ntable_name = \"t\"\n").unwrap();
        let mut sources = FieldSources::new();
        let env = make_env(&[
            ("DATASTORE_DEFAULT_NAMESPACE", "app"),
            ("DATASTORE_DEFAULT_TTL", "120"),
            ("DATASTORE_LOG_LEVEL", "debug"),
        ]);

        let count = apply_env_fallbacks(&mut merged, &mut sources, &env);

        assert_eq!(count, 3);
        assert_eq!(merged["store"]["default_namespace"].as_str(), Some("app"));
        assert_eq!(merged["store"]["default_ttl"].as_integer(), Some(120));
        assert_eq!(merged["logging"]["level"].as_str(), Some("debug"));
        assert_eq!(
            sources.get("store.default_ttl"),
            Some(&ConfigLayer::Environment)
        );
    }

    #[test]
    fn test_file_values_win() {
        let mut merged: toml::Value = toml::from_str("[store]\ntable_name = \"file\"\n").unwrap();
        let mut sources = FieldSources::new();
        sources.insert("store.table_name".to_owned(), ConfigLayer::User);
        let env = make_env(&[("DATASTORE_TABLE", "env")]);

        assert_eq!(apply_env_fallbacks(&mut merged, &mut sources, &env), 0);
        assert_eq!(merged["store"]["table_name"].as_str(), Some("file"));
    }

    #[test]
    fn test_env_overrides_defaults() {
        let mut merged: toml::Value =
            toml::from_str("[store]\ntable_name = \"data_stores\"\n").unwrap();
        let mut sources = FieldSources::new();
        sources.insert("store.table_name".to_owned(), ConfigLayer::Defaults);
        let env = make_env(&[("DATASTORE_TABLE", "env")]);

        assert_eq!(apply_env_fallbacks(&mut merged, &mut sources, &env), 1);
        assert_eq!(merged["store"]["table_name"].as_str(), Some("env"));
    }

    #[test]
    fn test_bad_number_ignored() {
        let mut merged = toml::Value::Table(toml::map::Map::new());
        let mut sources = FieldSources::new();
        let env = make_env(&[("DATASTORE_DEFAULT_TTL", "soon")]);

        assert_eq!(apply_env_fallbacks(&mut merged, &mut sources, &env), 0);
        assert!(merged.get("store").is_none());
    }
}
