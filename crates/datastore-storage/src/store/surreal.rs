//! Persistent entry table backed by `SurrealKV`.
//!
//! Layout inside the tree, for table `t`:
//!
//! - `t\0{identity}` -> JSON-encoded [`Entry`], where `identity` is the JSON
//!   array `[owner_type, owner_id, namespace, key]`
//! - `t\x02` -> last allocated row id (big-endian `u64`)
//!
//! The range `[t\0, t\x01)` therefore holds exactly the rows of one table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{CounterUpdate, EntryFilter, EntryQuery, EntryStore, counter_write};
use crate::error::{StorageError, StorageResult};
use crate::model::{Entry, EntryWrite, Scope};

fn map_kv_err(e: &surrealkv::Error) -> StorageError {
    StorageError::Internal(e.to_string())
}

fn map_json_err(e: &serde_json::Error) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Persistent entry table backed by `SurrealKV`.
///
/// Every mutation runs in its own transaction; [`EntryStore::upsert_many`]
/// commits all of its writes at once or not at all. Filters are evaluated
/// on decoded rows after a range scan of the table.
///
/// # Example
///
/// ```rust,ignore
/// use datastore_storage::SurrealKvEntryStore;
///
/// let store = SurrealKvEntryStore::open("./data/datastore", "data_stores")?;
/// ```
pub struct SurrealKvEntryStore {
    tree: surrealkv::Tree,
    table: String,
}

impl std::fmt::Debug for SurrealKvEntryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurrealKvEntryStore")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl SurrealKvEntryStore {
    /// Open the table `table` in the store at the given directory.
    ///
    /// Creates the directory if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] if the table name is empty or
    /// contains a null byte, and [`StorageError::Connection`] if the store
    /// cannot be opened.
    pub fn open(path: impl AsRef<std::path::Path>, table: impl Into<String>) -> StorageResult<Self> {
        let table = table.into();
        if table.is_empty() || table.contains('\0') {
            return Err(StorageError::InvalidKey(format!(
                "invalid table name '{table}'"
            )));
        }
        let tree = surrealkv::TreeBuilder::new()
            .with_path(path.as_ref().to_path_buf())
            .build()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(Self { tree, table })
    }

    /// Name of the table this store reads and writes.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Close the store, flushing any pending writes.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`] if the flush fails.
    pub async fn close(&self) -> StorageResult<()> {
        self.tree
            .close()
            .await
            .map_err(|e| StorageError::Internal(e.to_string()))
    }

    fn prefixed(&self, marker: u8) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.table.len().saturating_add(1));
        buf.extend_from_slice(self.table.as_bytes());
        buf.push(marker);
        buf
    }

    fn row_key(&self, scope: &Scope, key: &str) -> StorageResult<Vec<u8>> {
        let identity = (scope.owner_type(), scope.owner_id(), &scope.namespace, key);
        let mut buf = self.prefixed(0);
        buf.extend(serde_json::to_vec(&identity).map_err(|ref e| map_json_err(e))?);
        Ok(buf)
    }

    fn sequence_key(&self) -> Vec<u8> {
        self.prefixed(2)
    }

    /// Decode every row of the table visible to `tx`.
    fn scan(&self, tx: &surrealkv::Transaction) -> StorageResult<Vec<(Vec<u8>, Entry)>> {
        let start = self.prefixed(0);
        let end = self.prefixed(1);

        // Collect keys first; the iterator borrows the transaction.
        let keys = {
            let mut iter = tx.range(&start, &end).map_err(|ref e| map_kv_err(e))?;
            iter.seek_first().map_err(|ref e| map_kv_err(e))?;
            let mut keys = Vec::new();
            while iter.valid() {
                keys.push(iter.key().to_vec());
                iter.next().map_err(|ref e| map_kv_err(e))?;
            }
            keys
        };

        let mut rows = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(bytes) = tx.get(&key).map_err(|ref e| map_kv_err(e))? {
                let entry: Entry =
                    serde_json::from_slice(&bytes).map_err(|ref e| map_json_err(e))?;
                rows.push((key, entry));
            }
        }
        Ok(rows)
    }

    fn read_entry(&self, tx: &surrealkv::Transaction, key: &[u8]) -> StorageResult<Option<Entry>> {
        tx.get(key)
            .map_err(|ref e| map_kv_err(e))?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(|ref e| map_json_err(e)))
            .transpose()
    }

    fn last_id(&self, tx: &surrealkv::Transaction) -> StorageResult<u64> {
        let Some(bytes) = tx
            .get(&self.sequence_key())
            .map_err(|ref e| map_kv_err(e))?
        else {
            return Ok(0);
        };
        let raw: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| StorageError::Internal("corrupt row id sequence".into()))?;
        Ok(u64::from_be_bytes(raw))
    }

    /// Stage one write in `tx`, allocating from `*next_id` for new rows.
    fn stage(
        &self,
        tx: &mut surrealkv::Transaction,
        write: EntryWrite,
        next_id: &mut u64,
        now: DateTime<Utc>,
    ) -> StorageResult<Entry> {
        let key = self.row_key(&write.scope, &write.key)?;
        let existing = self.read_entry(tx, &key)?;
        if existing.is_none() {
            *next_id = next_id
                .checked_add(1)
                .ok_or_else(|| StorageError::Internal("row id space exhausted".into()))?;
        }
        let entry = write.into_entry(existing.as_ref(), *next_id, now);
        let bytes = serde_json::to_vec(&entry).map_err(|ref e| map_json_err(e))?;
        tx.set(&key, &bytes).map_err(|ref e| map_kv_err(e))?;
        Ok(entry)
    }

    async fn write_all(&self, writes: Vec<EntryWrite>) -> StorageResult<Vec<Entry>> {
        let mut tx = self.tree.begin().map_err(|ref e| map_kv_err(e))?;
        let start_id = self.last_id(&tx)?;
        let mut next_id = start_id;
        let now = Utc::now();

        let mut written = Vec::with_capacity(writes.len());
        for write in writes {
            written.push(self.stage(&mut tx, write, &mut next_id, now)?);
        }
        if next_id != start_id {
            tx.set(&self.sequence_key(), &next_id.to_be_bytes().to_vec())
                .map_err(|ref e| map_kv_err(e))?;
        }
        tx.commit().await.map_err(|ref e| map_kv_err(e))?;
        Ok(written)
    }
}

#[async_trait]
impl EntryStore for SurrealKvEntryStore {
    async fn select(&self, query: &EntryQuery) -> StorageResult<Vec<Entry>> {
        let tx = self
            .tree
            .begin_with_mode(surrealkv::Mode::ReadOnly)
            .map_err(|ref e| map_kv_err(e))?;
        let rows = self
            .scan(&tx)?
            .into_iter()
            .map(|(_, entry)| entry)
            .filter(|e| query.filter.matches(e))
            .collect();
        Ok(query.finish(rows))
    }

    async fn count(&self, filter: &EntryFilter) -> StorageResult<u64> {
        let tx = self
            .tree
            .begin_with_mode(surrealkv::Mode::ReadOnly)
            .map_err(|ref e| map_kv_err(e))?;
        let count = self
            .scan(&tx)?
            .iter()
            .filter(|(_, e)| filter.matches(e))
            .count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn delete(&self, filter: &EntryFilter) -> StorageResult<u64> {
        let mut tx = self.tree.begin().map_err(|ref e| map_kv_err(e))?;
        let doomed: Vec<Vec<u8>> = self
            .scan(&tx)?
            .into_iter()
            .filter(|(_, e)| filter.matches(e))
            .map(|(key, _)| key)
            .collect();

        for key in &doomed {
            tx.delete(key).map_err(|ref e| map_kv_err(e))?;
        }
        if !doomed.is_empty() {
            tx.commit().await.map_err(|ref e| map_kv_err(e))?;
        }
        Ok(u64::try_from(doomed.len()).unwrap_or(u64::MAX))
    }

    async fn upsert(&self, write: EntryWrite) -> StorageResult<Entry> {
        self.write_all(vec![write])
            .await?
            .pop()
            .ok_or_else(|| StorageError::Internal("upsert produced no row".into()))
    }

    async fn upsert_many(&self, writes: Vec<EntryWrite>) -> StorageResult<Vec<Entry>> {
        if writes.is_empty() {
            return Ok(Vec::new());
        }
        self.write_all(writes).await
    }

    async fn update_expiry(
        &self,
        filter: &EntryFilter,
        expires_at: Option<DateTime<Utc>>,
    ) -> StorageResult<u64> {
        let mut tx = self.tree.begin().map_err(|ref e| map_kv_err(e))?;
        let now = Utc::now();
        let mut updated = 0u64;
        for (key, mut entry) in self.scan(&tx)? {
            if !filter.matches(&entry) {
                continue;
            }
            entry.expires_at = expires_at;
            entry.updated_at = now;
            let bytes = serde_json::to_vec(&entry).map_err(|ref e| map_json_err(e))?;
            tx.set(&key, &bytes).map_err(|ref e| map_kv_err(e))?;
            updated = updated.saturating_add(1);
        }
        if updated > 0 {
            tx.commit().await.map_err(|ref e| map_kv_err(e))?;
        }
        Ok(updated)
    }

    async fn add_integer(
        &self,
        scope: &Scope,
        key: &str,
        amount: i64,
    ) -> StorageResult<CounterUpdate> {
        let mut tx = self.tree.begin().map_err(|ref e| map_kv_err(e))?;
        let now = Utc::now();
        let row_key = self.row_key(scope, key)?;
        let existing = self.read_entry(&tx, &row_key)?;
        let (previous, write, value) = counter_write(existing.as_ref(), scope, key, amount, now)?;

        let start_id = self.last_id(&tx)?;
        let mut next_id = start_id;
        let current = self.stage(&mut tx, write, &mut next_id, now)?;
        if next_id != start_id {
            tx.set(&self.sequence_key(), &next_id.to_be_bytes().to_vec())
                .map_err(|ref e| map_kv_err(e))?;
        }
        tx.commit().await.map_err(|ref e| map_kv_err(e))?;

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

    fn make_store() -> (SurrealKvEntryStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SurrealKvEntryStore::open(dir.path(), "data_stores").unwrap();
        (store, dir)
    }

    fn write(scope: &Scope, key: &str, value: serde_json::Value) -> EntryWrite {
        EntryWrite {
            scope: scope.clone(),
            key: key.into(),
            value,
            expires_at: None,
        }
    }

    #[test]
    fn test_rejects_bad_table_name() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SurrealKvEntryStore::open(dir.path(), "").is_err());
    }

    #[tokio::test]
    async fn test_surreal_upsert_and_select() {
        let (store, _dir) = make_store();
        let scope = Scope::new(Some(OwnerRef::user(1)), Some("prefs".into()));

        let first = store.upsert(write(&scope, "theme", json!("dark"))).await.unwrap();
        let second = store.upsert(write(&scope, "theme", json!("light"))).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);

        let rows = store
            .select(&EntryQuery::new(EntryFilter::scope(&scope)))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, json!("light"));
    }

    #[tokio::test]
    async fn test_surreal_ids_increase() {
        let (store, _dir) = make_store();
        let scope = Scope::default();
        let rows = store
            .upsert_many(vec![write(&scope, "a", json!(1)), write(&scope, "b", json!(2))])
            .await
            .unwrap();
        let c = store.upsert(write(&scope, "c", json!(3))).await.unwrap();
        assert_eq!(rows[0].id, 1);
        assert_eq!(rows[1].id, 2);
        assert_eq!(c.id, 3);
    }

    #[tokio::test]
    async fn test_surreal_scope_isolation() {
        let (store, _dir) = make_store();
        let global = Scope::default();
        let user = Scope::new(Some(OwnerRef::user(1)), None);
        store.upsert(write(&global, "k", json!("g"))).await.unwrap();
        store.upsert(write(&user, "k", json!("u"))).await.unwrap();

        assert_eq!(store.count(&EntryFilter::scope(&global)).await.unwrap(), 1);
        assert_eq!(store.count(&EntryFilter::all()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_surreal_delete_and_expiry() {
        let (store, _dir) = make_store();
        let scope = Scope::default();
        store.upsert(write(&scope, "a", json!(1))).await.unwrap();
        store.upsert(write(&scope, "b", json!(2))).await.unwrap();

        let past = Utc::now() - chrono::TimeDelta::seconds(1);
        let touched = store
            .update_expiry(&EntryFilter::scope(&scope).key("a"), Some(past))
            .await
            .unwrap();
        assert_eq!(touched, 1);

        let expired = EntryFilter::all().expired();
        assert_eq!(store.delete(&expired).await.unwrap(), 1);
        assert_eq!(store.count(&EntryFilter::all()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_surreal_add_integer() {
        let (store, _dir) = make_store();
        let scope = Scope::default();
        assert_eq!(store.add_integer(&scope, "hits", 2).await.unwrap().value, 2);
        let update = store.add_integer(&scope, "hits", 5).await.unwrap();
        assert_eq!(update.value, 7);
        assert_eq!(update.previous.unwrap().value, json!(2));
    }

    #[tokio::test]
    async fn test_surreal_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SurrealKvEntryStore::open(dir.path(), "data_stores").unwrap();
            store
                .upsert(write(&Scope::default(), "k", json!({"a": 1})))
                .await
                .unwrap();
            store.close().await.unwrap();
        }
        let store = SurrealKvEntryStore::open(dir.path(), "data_stores").unwrap();
        let rows = store.select(&EntryQuery::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, json!({"a": 1}));
    }
}
