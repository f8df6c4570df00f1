//! Test fixtures for common setups.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use serde_json::Value;

use datastore_storage::{
    Entry, EntryWrite, MemoryEntryStore, MemorySink, Scope, StorageResult, StorageService,
};

use crate::mocks::RecordingNotifier;

/// A fresh in-memory entry table.
#[must_use]
pub fn test_store() -> Arc<MemoryEntryStore> {
    Arc::new(MemoryEntryStore::new())
}

/// A global service over a fresh table, with its event recorder and the
/// table itself.
#[must_use]
pub fn test_service() -> (StorageService, RecordingNotifier, Arc<MemoryEntryStore>) {
    let store = test_store();
    let events = RecordingNotifier::new();
    let service = StorageService::new(Arc::clone(&store) as _)
        .with_notifier(Arc::new(events.clone()));
    (service, events, store)
}

/// Like [`test_service`], with an in-memory export sink installed.
#[must_use]
pub fn test_service_with_sink() -> (StorageService, Arc<MemorySink>, Arc<MemoryEntryStore>) {
    let (service, _, store) = test_service();
    let sink = Arc::new(MemorySink::new());
    (service.with_sink(Arc::clone(&sink) as _), sink, store)
}

/// Seed a row in `scope` that expired `seconds_ago` seconds ago.
///
/// # Errors
///
/// Propagates store errors.
pub fn seed_expired(
    store: &MemoryEntryStore,
    scope: &Scope,
    key: &str,
    value: Value,
    seconds_ago: i64,
) -> StorageResult<Entry> {
    let now = Utc::now();
    let expires_at = TimeDelta::try_seconds(seconds_ago)
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(now);
    let entry = EntryWrite {
        scope: scope.clone(),
        key: key.to_owned(),
        value,
        expires_at: Some(expires_at),
    }
    .into_entry(None, 0, now);
    store.insert_raw(entry)
}
