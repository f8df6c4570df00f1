//! Test doubles for the storage collaborators.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use datastore_events::{ChangeNotifier, StoreEvent};
use datastore_storage::{
    CounterUpdate, Entry, EntryFilter, EntryQuery, EntryStore, EntryWrite, IdentityProvider,
    MemoryEntryStore, OwnerRef, Scope, StorageError, StorageResult,
};

/// Notifier that records every event it receives.
///
/// Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<StoreEvent>>>,
}

impl RecordingNotifier {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<StoreEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Event type names (`set`, `updated`, ...), oldest first.
    #[must_use]
    pub fn event_types(&self) -> Vec<&'static str> {
        self.events()
            .iter()
            .map(StoreEvent::event_type)
            .collect()
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or_default()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget recorded events.
    pub fn clear(&self) {
        if let Ok(mut guard) = self.events.lock() {
            guard.clear();
        }
    }
}

impl ChangeNotifier for RecordingNotifier {
    fn notify(&self, event: StoreEvent) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event);
        }
    }
}

/// Identity provider returning a fixed user.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    user: Option<OwnerRef>,
}

impl StaticIdentity {
    /// Authenticated as user `id`.
    #[must_use]
    pub fn user(id: i64) -> Self {
        Self {
            user: Some(OwnerRef::user(id)),
        }
    }

    /// Nobody authenticated.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Option<OwnerRef> {
        self.user.clone()
    }
}

/// Entry table that can be told to fail writes.
///
/// Delegates to a [`MemoryEntryStore`]. While failing, every mutating
/// operation returns [`StorageError::Internal`] without touching the table.
#[derive(Debug, Default)]
pub struct FailingStore {
    inner: MemoryEntryStore,
    fail_writes: AtomicBool,
}

impl FailingStore {
    /// Create a store that succeeds until told otherwise.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// The wrapped table.
    #[must_use]
    pub fn inner(&self) -> &MemoryEntryStore {
        &self.inner
    }

    fn check(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StorageError::Internal("injected write failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EntryStore for FailingStore {
    async fn select(&self, query: &EntryQuery) -> StorageResult<Vec<Entry>> {
        self.inner.select(query).await
    }

    async fn count(&self, filter: &EntryFilter) -> StorageResult<u64> {
        self.inner.count(filter).await
    }

    async fn delete(&self, filter: &EntryFilter) -> StorageResult<u64> {
        self.check()?;
        self.inner.delete(filter).await
    }

    async fn upsert(&self, write: EntryWrite) -> StorageResult<Entry> {
        self.check()?;
        self.inner.upsert(write).await
    }

    async fn upsert_many(&self, writes: Vec<EntryWrite>) -> StorageResult<Vec<Entry>> {
        self.check()?;
        self.inner.upsert_many(writes).await
    }

    async fn update_expiry(
        &self,
        filter: &EntryFilter,
        expires_at: Option<DateTime<Utc>>,
    ) -> StorageResult<u64> {
        self.check()?;
        self.inner.update_expiry(filter, expires_at).await
    }

    async fn add_integer(
        &self,
        scope: &Scope,
        key: &str,
        amount: i64,
    ) -> StorageResult<CounterUpdate> {
        self.check()?;
        self.inner.add_integer(scope, key, amount).await
    }
}
