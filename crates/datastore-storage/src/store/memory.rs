//! In-memory entry table.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{CounterUpdate, EntryFilter, EntryQuery, EntryStore, counter_write};
use crate::error::{StorageError, StorageResult};
use crate::model::{Entry, EntryWrite, Scope};

/// Unique row identity: (`owner_type`, `owner_id`, `namespace`, `key`).
type Identity = (Option<String>, Option<i64>, Option<String>, String);

fn identity(scope: &Scope, key: &str) -> Identity {
    (
        scope.owner_type().map(str::to_owned),
        scope.owner_id(),
        scope.namespace.clone(),
        key.to_owned(),
    )
}

fn entry_identity(entry: &Entry) -> Identity {
    (
        entry.owner_type.clone(),
        entry.owner_id,
        entry.namespace.clone(),
        entry.key.clone(),
    )
}

#[derive(Debug, Default)]
struct State {
    rows: BTreeMap<u64, Entry>,
    index: HashMap<Identity, u64>,
    next_id: u64,
}

impl State {
    fn existing(&self, scope: &Scope, key: &str) -> Option<&Entry> {
        self.index
            .get(&identity(scope, key))
            .and_then(|id| self.rows.get(id))
    }

    fn allocate_id(&mut self) -> StorageResult<u64> {
        self.next_id = self
            .next_id
            .checked_add(1)
            .ok_or_else(|| StorageError::Internal("row id space exhausted".into()))?;
        Ok(self.next_id)
    }

    fn apply(&mut self, write: EntryWrite, now: DateTime<Utc>) -> StorageResult<Entry> {
        let existing = self.existing(&write.scope, &write.key).cloned();
        let next_id = match existing {
            Some(_) => self.next_id,
            None => self.allocate_id()?,
        };
        let entry = write.into_entry(existing.as_ref(), next_id, now);
        self.index.insert(entry_identity(&entry), entry.id);
        self.rows.insert(entry.id, entry.clone());
        Ok(entry)
    }

    fn matching_ids(&self, filter: &EntryFilter) -> Vec<u64> {
        self.rows
            .values()
            .filter(|e| filter.matches(e))
            .map(|e| e.id)
            .collect()
    }
}

/// In-memory entry table for tests and ephemeral data.
///
/// Rows live in a `BTreeMap` keyed by id with a `HashMap` index on the
/// unique identity. Every operation holds the lock for its whole duration,
/// so batches and counter updates are atomic.
#[derive(Debug, Default)]
pub struct MemoryEntryStore {
    state: RwLock<State>,
}

impl MemoryEntryStore {
    /// Create a new empty in-memory entry table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully materialized row, replacing any row with the same
    /// identity. Used to seed fixtures with explicit timestamps.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`] if the lock is poisoned.
    pub fn insert_raw(&self, mut entry: Entry) -> StorageResult<Entry> {
        let mut state = self
            .state
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        let key = entry_identity(&entry);
        if let Some(old_id) = state.index.get(&key).copied() {
            entry.id = old_id;
        } else {
            entry.id = state.allocate_id()?;
        }
        state.index.insert(key, entry.id);
        state.rows.insert(entry.id, entry.clone());
        Ok(entry)
    }

    /// Number of rows, expired ones included.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`] if the lock is poisoned.
    pub fn len(&self) -> StorageResult<usize> {
        let state = self
            .state
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        Ok(state.rows.len())
    }

    /// Whether the table has no rows.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`] if the lock is poisoned.
    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl EntryStore for MemoryEntryStore {
    async fn select(&self, query: &EntryQuery) -> StorageResult<Vec<Entry>> {
        let state = self
            .state
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        let rows = state
            .rows
            .values()
            .filter(|e| query.filter.matches(e))
            .cloned()
            .collect();
        Ok(query.finish(rows))
    }

    async fn count(&self, filter: &EntryFilter) -> StorageResult<u64> {
        let state = self
            .state
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        let count = state.rows.values().filter(|e| filter.matches(e)).count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn delete(&self, filter: &EntryFilter) -> StorageResult<u64> {
        let mut state = self
            .state
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        let ids = state.matching_ids(filter);
        for id in &ids {
            if let Some(entry) = state.rows.remove(id) {
                state.index.remove(&entry_identity(&entry));
            }
        }
        Ok(u64::try_from(ids.len()).unwrap_or(u64::MAX))
    }

    async fn upsert(&self, write: EntryWrite) -> StorageResult<Entry> {
        let mut state = self
            .state
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        state.apply(write, Utc::now())
    }

    async fn upsert_many(&self, writes: Vec<EntryWrite>) -> StorageResult<Vec<Entry>> {
        let mut state = self
            .state
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        // Apply to a scratch copy and swap it in only if every write succeeds.
        let mut scratch = State {
            rows: state.rows.clone(),
            index: state.index.clone(),
            next_id: state.next_id,
        };
        let now = Utc::now();
        let mut written = Vec::with_capacity(writes.len());
        for write in writes {
            written.push(scratch.apply(write, now)?);
        }
        *state = scratch;
        Ok(written)
    }

    async fn update_expiry(
        &self,
        filter: &EntryFilter,
        expires_at: Option<DateTime<Utc>>,
    ) -> StorageResult<u64> {
        let mut state = self
            .state
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        let ids = state.matching_ids(filter);
        let now = Utc::now();
        for id in &ids {
            if let Some(entry) = state.rows.get_mut(id) {
                entry.expires_at = expires_at;
                entry.updated_at = now;
            }
        }
        Ok(u64::try_from(ids.len()).unwrap_or(u64::MAX))
    }

    async fn add_integer(
        &self,
        scope: &Scope,
        key: &str,
        amount: i64,
    ) -> StorageResult<CounterUpdate> {
        let mut state = self
            .state
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        let now = Utc::now();
        let (previous, write, value) =
            counter_write(state.existing(scope, key), scope, key, amount, now)?;
        let current = state.apply(write, now)?;
        Ok(CounterUpdate {
            previous,
            current,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OwnerRef;
    use serde_json::json;

    fn write(scope: &Scope, key: &str, value: serde_json::Value) -> EntryWrite {
        EntryWrite {
            scope: scope.clone(),
            key: key.into(),
            value,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_replaces() {
        let store = MemoryEntryStore::new();
        let scope = Scope::new(Some(OwnerRef::user(1)), None);

        let first = store.upsert(write(&scope, "k", json!(1))).await.unwrap();
        let second = store.upsert(write(&scope, "k", json!(2))).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.value, json!(2));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_identity_includes_owner_and_namespace() {
        let store = MemoryEntryStore::new();
        let global = Scope::default();
        let user = Scope::new(Some(OwnerRef::user(1)), None);
        let user_ns = Scope::new(Some(OwnerRef::user(1)), Some("ns".into()));

        for scope in [&global, &user, &user_ns] {
            store.upsert(write(scope, "k", json!(0))).await.unwrap();
        }
        assert_eq!(store.len().unwrap(), 3);

        let count = store.count(&EntryFilter::scope(&user)).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_select_in_id_order() {
        let store = MemoryEntryStore::new();
        let scope = Scope::default();
        for key in ["c", "a", "b"] {
            store.upsert(write(&scope, key, json!(key))).await.unwrap();
        }
        let rows = store
            .select(&EntryQuery::new(EntryFilter::scope(&scope)))
            .await
            .unwrap();
        let keys: Vec<_> = rows.into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_delete_and_exists() {
        let store = MemoryEntryStore::new();
        let scope = Scope::default();
        store.upsert(write(&scope, "a", json!(1))).await.unwrap();
        store.upsert(write(&scope, "b", json!(2))).await.unwrap();

        let filter = EntryFilter::scope(&scope).key("a");
        assert!(store.exists(&filter).await.unwrap());
        assert_eq!(store.delete(&filter).await.unwrap(), 1);
        assert!(!store.exists(&filter).await.unwrap());
        assert_eq!(store.delete(&filter).await.unwrap(), 0);

        // Re-inserting after delete allocates a fresh id.
        let again = store.upsert(write(&scope, "a", json!(3))).await.unwrap();
        assert_eq!(again.id, 3);
    }

    #[tokio::test]
    async fn test_upsert_many_later_write_wins() {
        let store = MemoryEntryStore::new();
        let scope = Scope::default();
        let rows = store
            .upsert_many(vec![
                write(&scope, "k", json!(1)),
                write(&scope, "k", json!(2)),
            ])
            .await
            .unwrap();
        assert_eq!(rows[0].id, rows[1].id);
        assert_eq!(store.len().unwrap(), 1);

        let stored = store
            .select(&EntryQuery::new(EntryFilter::scope(&scope)))
            .await
            .unwrap();
        assert_eq!(stored[0].value, json!(2));
    }

    #[tokio::test]
    async fn test_upsert_many_rolls_back_on_mid_batch_failure() {
        let store = MemoryEntryStore::new();
        let scope = Scope::default();
        store.upsert(write(&scope, "keep", json!(0))).await.unwrap();

        // Room for exactly one more row id: the second new key fails.
        let last_id = u64::MAX.saturating_sub(1);
        store.state.write().unwrap().next_id = last_id;

        let err = store
            .upsert_many(vec![
                write(&scope, "keep", json!(9)),
                write(&scope, "a", json!(1)),
                write(&scope, "b", json!(2)),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Internal(_)));

        let rows = store
            .select(&EntryQuery::new(EntryFilter::scope(&scope)))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, "keep");
        assert_eq!(rows[0].value, json!(0));
        assert_eq!(store.state.read().unwrap().next_id, last_id);
    }

    #[tokio::test]
    async fn test_update_expiry() {
        let store = MemoryEntryStore::new();
        let scope = Scope::default();
        store.upsert(write(&scope, "k", json!(1))).await.unwrap();

        let past = Utc::now() - chrono::TimeDelta::seconds(1);
        let updated = store
            .update_expiry(&EntryFilter::scope(&scope).key("k"), Some(past))
            .await
            .unwrap();
        assert_eq!(updated, 1);

        let live = EntryFilter::scope(&scope).not_expired();
        assert_eq!(store.count(&live).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_add_integer_keeps_live_expiry() {
        let store = MemoryEntryStore::new();
        let scope = Scope::default();
        let later = Utc::now() + chrono::TimeDelta::hours(1);
        store
            .upsert(EntryWrite {
                expires_at: Some(later),
                ..write(&scope, "hits", json!(4))
            })
            .await
            .unwrap();

        let update = store.add_integer(&scope, "hits", 3).await.unwrap();
        assert_eq!(update.value, 7);
        assert_eq!(update.previous.unwrap().value, json!(4));
        assert_eq!(update.current.expires_at, Some(later));
    }

    #[tokio::test]
    async fn test_add_integer_treats_expired_as_missing() {
        let store = MemoryEntryStore::new();
        let scope = Scope::default();
        let past = Utc::now() - chrono::TimeDelta::seconds(1);
        store
            .upsert(EntryWrite {
                expires_at: Some(past),
                ..write(&scope, "hits", json!(40))
            })
            .await
            .unwrap();

        let update = store.add_integer(&scope, "hits", 1).await.unwrap();
        assert_eq!(update.value, 1);
        assert!(update.previous.is_none());
        assert_eq!(update.current.expires_at, None);
    }

    #[tokio::test]
    async fn test_insert_raw_keeps_timestamps() {
        let store = MemoryEntryStore::new();
        let created = Utc::now() - chrono::TimeDelta::days(3);
        let mut entry = write(&Scope::default(), "old", json!(1)).into_entry(None, 0, created);
        entry.created_at = created;
        let stored = store.insert_raw(entry).unwrap();
        assert_eq!(stored.id, 1);
        assert_eq!(stored.created_at, created);
    }
}
