//! Ad-hoc scoped queries over the entry table.
//!
//! [`EntryQueryBuilder`] is the free-standing query path. Unlike the storage
//! service, it does not isolate namespaces by default: a builder with no
//! namespace set queries every namespace of its owner. An unset owner means
//! global entries only.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::StorageResult;
use crate::model::{Entry, OwnerRef, Storable};
use crate::normalize::{KeySegments, normalize};
use crate::store::{
    Direction, EntryFilter, EntryQuery, EntryStore, ExpiryFilter, NamespaceFilter, OrderColumn,
    OwnerFilter,
};

/// Chainable query over entries of one owner.
///
/// Filters are applied when a terminal operation runs, against a fresh
/// [`EntryQuery`] each time, so one builder can serve several terminals.
///
/// # Example
///
/// ```rust,ignore
/// let recent = EntryQueryBuilder::new(store)
///     .for_owner(&OwnerRef::user(7))
///     .key_prefix("session.")
///     .not_expired()
///     .order_by(OrderColumn::CreatedAt, Direction::Desc)
///     .limit(10)
///     .get()
///     .await?;
/// ```
#[derive(Clone)]
pub struct EntryQueryBuilder {
    store: Arc<dyn EntryStore>,
    owner: Option<OwnerRef>,
    namespace: Option<String>,
    key_prefix: Option<String>,
    key_patterns: Vec<String>,
    expiry: ExpiryFilter,
    created_after: Option<DateTime<Utc>>,
    created_before: Option<DateTime<Utc>>,
    order: Vec<(OrderColumn, Direction)>,
    limit: Option<usize>,
    offset: usize,
}

impl std::fmt::Debug for EntryQueryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryQueryBuilder")
            .field("owner", &self.owner)
            .field("namespace", &self.namespace)
            .field("key_prefix", &self.key_prefix)
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

impl EntryQueryBuilder {
    /// Start a query over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn EntryStore>) -> Self {
        Self {
            store,
            owner: None,
            namespace: None,
            key_prefix: None,
            key_patterns: Vec::new(),
            expiry: ExpiryFilter::Any,
            created_after: None,
            created_before: None,
            order: Vec::new(),
            limit: None,
            offset: 0,
        }
    }

    /// Restrict to entries owned by `owner`.
    #[must_use]
    pub fn for_owner(mut self, owner: &(impl Storable + ?Sized)) -> Self {
        self.owner = Some(owner.owner_ref());
        self
    }

    /// Restrict to global entries.
    #[must_use]
    pub fn global(mut self) -> Self {
        self.owner = None;
        self
    }

    /// Restrict to one namespace. An empty input removes the restriction.
    #[must_use]
    pub fn in_namespace(mut self, namespace: impl KeySegments) -> Self {
        self.namespace = normalize(namespace);
        self
    }

    /// Keys starting with `prefix` (literal, no wildcards).
    #[must_use]
    pub fn key_prefix(mut self, prefix: impl KeySegments) -> Self {
        self.key_prefix = normalize(prefix);
        self
    }

    /// Keys matching a LIKE pattern (`%` any run, `_` one character).
    /// Repeated calls add patterns that must all match.
    #[must_use]
    pub fn key_like(mut self, pattern: impl Into<String>) -> Self {
        self.key_patterns.push(pattern.into());
        self
    }

    /// Only entries that have not expired.
    #[must_use]
    pub fn not_expired(mut self) -> Self {
        self.expiry = ExpiryFilter::NotExpired;
        self
    }

    /// Only entries that have expired.
    #[must_use]
    pub fn expired(mut self) -> Self {
        self.expiry = ExpiryFilter::Expired;
        self
    }

    /// Entries created strictly after `at`.
    #[must_use]
    pub fn created_after(mut self, at: DateTime<Utc>) -> Self {
        self.created_after = Some(at);
        self
    }

    /// Entries created strictly before `at`.
    #[must_use]
    pub fn created_before(mut self, at: DateTime<Utc>) -> Self {
        self.created_before = Some(at);
        self
    }

    /// Add a sort key. Earlier calls are more significant.
    #[must_use]
    pub fn order_by(mut self, column: OrderColumn, direction: Direction) -> Self {
        self.order.push((column, direction));
        self
    }

    /// Return at most `n` rows.
    #[must_use]
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Skip the first `n` rows.
    #[must_use]
    pub fn offset(mut self, n: usize) -> Self {
        self.offset = n;
        self
    }

    fn filter(&self) -> EntryFilter {
        EntryFilter {
            owner: self
                .owner
                .clone()
                .map_or(OwnerFilter::Global, OwnerFilter::Owner),
            namespace: self
                .namespace
                .clone()
                .map_or(NamespaceFilter::Any, NamespaceFilter::Equals),
            key_prefix: self.key_prefix.clone(),
            key_patterns: self.key_patterns.clone(),
            expiry: self.expiry,
            created_after: self.created_after,
            created_before: self.created_before,
            ..EntryFilter::default()
        }
    }

    fn query(&self) -> EntryQuery {
        EntryQuery {
            filter: self.filter(),
            order: self.order.clone(),
            limit: self.limit,
            offset: self.offset,
        }
    }

    /// Matching entries, ordered and paginated.
    ///
    /// # Errors
    ///
    /// Propagates backing store errors.
    pub async fn get(&self) -> StorageResult<Vec<Entry>> {
        self.store.select(&self.query()).await
    }

    /// Matching entries as a key to value map.
    ///
    /// When entries from several namespaces share a key, the one ordered
    /// last wins.
    ///
    /// # Errors
    ///
    /// Propagates backing store errors.
    pub async fn pluck(&self) -> StorageResult<BTreeMap<String, Value>> {
        Ok(self
            .get()
            .await?
            .into_iter()
            .map(|e| (e.key, e.value))
            .collect())
    }

    /// The first matching entry.
    ///
    /// # Errors
    ///
    /// Propagates backing store errors.
    pub async fn first(&self) -> StorageResult<Option<Entry>> {
        let mut query = self.query();
        query.limit = Some(1);
        Ok(self.store.select(&query).await?.into_iter().next())
    }

    /// Number of matching entries. Ordering and pagination are ignored.
    ///
    /// # Errors
    ///
    /// Propagates backing store errors.
    pub async fn count(&self) -> StorageResult<u64> {
        self.store.count(&self.filter()).await
    }

    /// Whether any entry matches.
    ///
    /// # Errors
    ///
    /// Propagates backing store errors.
    pub async fn exists(&self) -> StorageResult<bool> {
        self.store.exists(&self.filter()).await
    }

    /// Delete every matching entry. Ordering and pagination are ignored.
    ///
    /// # Errors
    ///
    /// Propagates backing store errors.
    pub async fn delete(&self) -> StorageResult<u64> {
        self.store.delete(&self.filter()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntryWrite, Scope};
    use crate::store::MemoryEntryStore;
    use serde_json::json;

    async fn seeded() -> Arc<dyn EntryStore> {
        let store = Arc::new(MemoryEntryStore::new());
        let user = Some(OwnerRef::user(1));
        let rows = [
            (None, None, "site.name"),
            (user.clone(), None, "user.1.a"),
            (user.clone(), Some("prefs"), "user.1.b"),
            (user.clone(), Some("cache"), "user.2.a"),
            (Some(OwnerRef::team(1)), None, "user.1.a"),
        ];
        for (owner, ns, key) in rows {
            store
                .upsert(EntryWrite {
                    scope: Scope::new(owner, ns.map(str::to_owned)),
                    key: key.into(),
                    value: json!(key),
                    expires_at: None,
                })
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_unset_owner_defaults_to_global() {
        let builder = EntryQueryBuilder::new(seeded().await);
        let keys: Vec<_> = builder.get().await.unwrap().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["site.name"]);
    }

    #[tokio::test]
    async fn test_unset_namespace_spans_all_namespaces() {
        let builder = EntryQueryBuilder::new(seeded().await).for_owner(&OwnerRef::user(1));
        assert_eq!(builder.count().await.unwrap(), 3);

        let prefs = builder.clone().in_namespace("prefs");
        assert_eq!(prefs.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_prefix_and_like() {
        let builder = EntryQueryBuilder::new(seeded().await).for_owner(&OwnerRef::user(1));
        let prefixed = builder.clone().key_prefix("user.1").pluck().await.unwrap();
        assert_eq!(prefixed.len(), 2);
        assert!(prefixed.contains_key("user.1.a"));
        assert!(prefixed.contains_key("user.1.b"));

        let liked = builder.key_like("user._.a").count().await.unwrap();
        assert_eq!(liked, 2);
    }

    #[tokio::test]
    async fn test_like_patterns_combine() {
        let builder = EntryQueryBuilder::new(seeded().await).for_owner(&OwnerRef::user(1));
        let both = builder
            .clone()
            .key_like("user.%")
            .key_like("%.a")
            .pluck()
            .await
            .unwrap();
        assert_eq!(both.len(), 2);
        assert!(both.contains_key("user.1.a"));
        assert!(both.contains_key("user.2.a"));

        let none = builder.key_like("user.1.%").key_like("user.2.%");
        assert_eq!(none.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_terminals_do_not_accumulate_state() {
        let builder = EntryQueryBuilder::new(seeded().await)
            .for_owner(&OwnerRef::user(1))
            .order_by(OrderColumn::Key, Direction::Desc)
            .limit(1);

        let first = builder.first().await.unwrap().unwrap();
        assert_eq!(first.key, "user.2.a");
        assert_eq!(builder.get().await.unwrap().len(), 1);
        // count ignores the limit.
        assert_eq!(builder.count().await.unwrap(), 3);
        assert_eq!(builder.get().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_offset_pagination() {
        let builder = EntryQueryBuilder::new(seeded().await)
            .for_owner(&OwnerRef::user(1))
            .order_by(OrderColumn::Key, Direction::Asc)
            .offset(1)
            .limit(5);
        let keys: Vec<_> = builder.get().await.unwrap().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["user.1.b", "user.2.a"]);
    }

    #[tokio::test]
    async fn test_delete_is_scoped_to_owner() {
        let store = seeded().await;
        let deleted = EntryQueryBuilder::new(Arc::clone(&store))
            .for_owner(&OwnerRef::team(1))
            .delete()
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(
            EntryQueryBuilder::new(store)
                .for_owner(&OwnerRef::user(1))
                .key_prefix("user.1.a")
                .exists()
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_created_bounds() {
        let store = seeded().await;
        let builder = EntryQueryBuilder::new(store).for_owner(&OwnerRef::user(1));
        let future = Utc::now() + chrono::TimeDelta::hours(1);
        assert_eq!(builder.clone().created_after(future).count().await.unwrap(), 0);
        assert_eq!(builder.created_before(future).count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_global_clears_owner() {
        let builder = EntryQueryBuilder::new(seeded().await)
            .for_owner(&OwnerRef::user(1))
            .global();
        assert_eq!(builder.count().await.unwrap(), 1);
    }
}
