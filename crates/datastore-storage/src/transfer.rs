//! JSON export and import of a scope's entries.
//!
//! The storage service serializes entries into an [`ExportDocument`] and
//! hands the bytes to an [`ExportSink`]. Import reads bytes back through
//! the same sink and validates the whole document before anything is
//! written.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StorageError, StorageResult};
use crate::model::{Entry, Scope};
use crate::normalize::normalize_key;

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Byte storage for export files.
#[async_trait]
pub trait ExportSink: Send + Sync {
    /// Write `bytes` to `destination`, replacing any previous content.
    async fn write(&self, destination: &str, bytes: &[u8]) -> StorageResult<()>;

    /// Read the content of `source`.
    async fn read(&self, source: &str) -> StorageResult<Vec<u8>>;

    /// Whether `source` exists.
    async fn exists(&self, source: &str) -> StorageResult<bool>;
}

/// Sink storing files below a root directory.
///
/// Destinations are relative paths; parent directories are created on
/// write. Absolute paths and `..` components are rejected.
#[derive(Debug, Clone)]
pub struct FilesystemSink {
    root: PathBuf,
}

impl FilesystemSink {
    /// Create a sink rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if name.is_empty() || escapes {
            return Err(StorageError::InvalidKey(format!(
                "export path '{name}' must be relative to the export root"
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ExportSink for FilesystemSink {
    async fn write(&self, destination: &str, bytes: &[u8]) -> StorageResult<()> {
        let path = self.resolve(destination)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Internal(e.to_string()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StorageError::Internal(e.to_string()))
    }

    async fn read(&self, source: &str) -> StorageResult<Vec<u8>> {
        let path = self.resolve(source)?;
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(source.to_owned())
            } else {
                StorageError::Internal(e.to_string())
            }
        })
    }

    async fn exists(&self, source: &str) -> StorageResult<bool> {
        let path = self.resolve(source)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StorageError::Internal(e.to_string()))
    }
}

/// In-memory sink for tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `bytes` under `name` directly.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`] if the lock is poisoned.
    pub fn insert(&self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> StorageResult<()> {
        self.files
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .insert(name.into(), bytes.into());
        Ok(())
    }

    /// Content stored under `name`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`] if the lock is poisoned.
    pub fn get(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self
            .files
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .get(name)
            .cloned())
    }
}

#[async_trait]
impl ExportSink for MemorySink {
    async fn write(&self, destination: &str, bytes: &[u8]) -> StorageResult<()> {
        self.insert(destination, bytes)
    }

    async fn read(&self, source: &str) -> StorageResult<Vec<u8>> {
        self.get(source)?
            .ok_or_else(|| StorageError::NotFound(source.to_owned()))
    }

    async fn exists(&self, source: &str) -> StorageResult<bool> {
        Ok(self.get(source)?.is_some())
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

fn iso8601(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Scope descriptor of an export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportScope {
    /// Owner kind, `null` for global exports.
    pub owner_type: Option<String>,
    /// Owner identifier, `null` for global exports.
    pub owner_id: Option<i64>,
    /// Namespace, `null` for the default namespace.
    pub namespace: Option<String>,
}

/// One exported entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    /// Entry key.
    pub key: String,
    /// Stored value.
    pub value: Value,
    /// Entry namespace.
    pub namespace: Option<String>,
    /// Owner kind.
    pub owner_type: Option<String>,
    /// Owner identifier.
    pub owner_id: Option<i64>,
    /// Expiry as ISO-8601, `null` for never.
    pub expires_at: Option<String>,
    /// Creation time as ISO-8601.
    pub created_at: String,
}

impl From<Entry> for ExportRecord {
    fn from(entry: Entry) -> Self {
        Self {
            key: entry.key,
            value: entry.value,
            namespace: entry.namespace,
            owner_type: entry.owner_type,
            owner_id: entry.owner_id,
            expires_at: entry.expires_at.map(iso8601),
            created_at: iso8601(entry.created_at),
        }
    }
}

/// The exported JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    /// When the export was taken, ISO-8601.
    pub exported_at: String,
    /// Scope the entries were read from.
    pub scope: ExportScope,
    /// Number of records in `data`.
    pub count: usize,
    /// The entries.
    pub data: Vec<ExportRecord>,
}

impl ExportDocument {
    /// Build a document from the live entries of `scope`.
    #[must_use]
    pub fn new(scope: &Scope, entries: Vec<Entry>, now: DateTime<Utc>) -> Self {
        let data: Vec<ExportRecord> = entries.into_iter().map(ExportRecord::from).collect();
        Self {
            exported_at: iso8601(now),
            scope: ExportScope {
                owner_type: scope.owner_type().map(str::to_owned),
                owner_id: scope.owner_id(),
                namespace: scope.namespace.clone(),
            },
            count: data.len(),
            data,
        }
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if a value cannot be encoded.
    pub fn to_json(&self, pretty: bool) -> StorageResult<Vec<u8>> {
        let encoded = if pretty {
            serde_json::to_vec_pretty(self)
        } else {
            serde_json::to_vec(self)
        };
        encoded.map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ImportDocument {
    data: Vec<ImportRecord>,
}

#[derive(Debug, Deserialize)]
struct ImportRecord {
    key: String,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    expires_at: Option<String>,
}

/// A validated import row.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRow {
    /// Normalized key.
    pub key: String,
    /// Value to store.
    pub value: Value,
    /// Expiry carried by the snapshot, if any.
    pub expires_at: Option<DateTime<Utc>>,
}

impl ImportRow {
    /// Seconds of life left at `now`, `None` when the row never expires.
    ///
    /// A row whose expiry is not in the future yields `Some(0)`.
    #[must_use]
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<u64> {
        self.expires_at.map(|at| {
            u64::try_from(at.signed_duration_since(now).num_seconds()).unwrap_or(0)
        })
    }
}

/// Parse and validate an import document.
///
/// # Errors
///
/// Returns [`StorageError::InvalidImport`] if the bytes are not JSON, if
/// `data` is missing or not an array, or if any row lacks a valid key or has
/// an unparseable `expires_at`.
pub fn parse_import(bytes: &[u8]) -> StorageResult<Vec<ImportRow>> {
    let document: ImportDocument = serde_json::from_slice(bytes)
        .map_err(|e| StorageError::InvalidImport(e.to_string()))?;

    document
        .data
        .into_iter()
        .enumerate()
        .map(|(index, record)| {
            let key = normalize_key(record.key)
                .map_err(|e| StorageError::InvalidImport(format!("row {index}: {e}")))?;
            let expires_at = record
                .expires_at
                .filter(|s| !s.is_empty())
                .map(|s| {
                    DateTime::parse_from_rfc3339(&s)
                        .map(|at| at.with_timezone(&Utc))
                        .map_err(|e| {
                            StorageError::InvalidImport(format!(
                                "row {index}: bad expires_at '{s}': {e}"
                            ))
                        })
                })
                .transpose()?;
            Ok(ImportRow {
                key,
                value: record.value,
                expires_at,
            })
        })
        .collect()
}
