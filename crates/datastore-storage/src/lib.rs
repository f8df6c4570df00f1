//! Datastore Storage - scoped, namespaced key-value storage.
//!
//! Entries live in one table and are addressed by (owner, namespace, key):
//!
//! - **Owner**: an application entity (user, team, ...) or nothing (global)
//! - **Namespace**: a dot-joined bucket, or none (the default namespace)
//! - **Key**: a dot-joined path such as `settings.ui.theme`
//!
//! # Layers
//!
//! - [`StorageService`]: the facade. Bound to one scope, it offers
//!   get/set/delete, batches, prefix and nested views, counters, TTLs and
//!   JSON export/import, and reports every change to a
//!   [`ChangeNotifier`](datastore_events::ChangeNotifier).
//! - [`EntryQueryBuilder`]: ad-hoc queries across namespaces.
//! - [`EntryStore`]: the table itself. [`MemoryEntryStore`] is always
//!   available; `SurrealKvEntryStore` persists to disk.
//! - [`CleanupSweep`]: deletes expired rows, which reads otherwise only
//!   filter out.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use datastore_storage::{MemoryEntryStore, OwnerRef, StorageService};
//! use serde_json::json;
//!
//! # async fn example() -> datastore_storage::StorageResult<()> {
//! let service = StorageService::new(Arc::new(MemoryEntryStore::new()));
//! let prefs = service.for_user(&OwnerRef::user(7)).in_namespace("prefs");
//!
//! prefs.set(["ui", "theme"], "dark", None).await?;
//! assert_eq!(prefs.get("ui.theme").await?, Some(json!("dark")));
//! assert_eq!(service.get("ui.theme").await?, None);
//! # Ok(())
//! # }
//! ```
//!
//! # Feature Flags
//!
//! - **`kv`** - `SurrealKV` persistent entry table

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod decode;
pub mod error;
pub mod identity;
pub mod model;
pub mod nested;
pub mod normalize;
pub mod query;
pub mod service;
pub mod store;
pub mod sweep;
pub mod transfer;

pub use decode::Decoded;
pub use error::{StorageError, StorageResult};
pub use identity::IdentityProvider;
pub use model::{Entry, EntryWrite, OwnerRef, Scope, Storable};
pub use nested::{Tree, build_tree};
pub use normalize::{KeySegments, normalize, normalize_key};
pub use query::EntryQueryBuilder;
pub use service::{StorageService, StoreSettings};
pub use store::{
    CounterUpdate, Direction, EntryFilter, EntryQuery, EntryStore, ExpiryFilter, MemoryEntryStore,
    NamespaceFilter, OrderColumn, OwnerFilter,
};
pub use sweep::{CleanupSweep, DEFAULT_SAMPLE_SIZE, SweepOptions, SweepOutcome, spawn_auto_cleanup};
pub use transfer::{ExportDocument, ExportSink, FilesystemSink, ImportRow, MemorySink};

#[cfg(feature = "kv")]
pub use store::SurrealKvEntryStore;
