//! The backing entry table.
//!
//! [`EntryStore`] is the query interface the storage service runs against:
//! filtered select/count/exists/delete, insert-or-replace by the unique
//! (owner, namespace, key) tuple, an all-or-nothing batch upsert, and an
//! atomic counter update. Implementations:
//!
//! - [`MemoryEntryStore`] (always available): for tests and ephemeral data
//! - `SurrealKvEntryStore` (behind the `kv` feature): persistent, ACID
//!
//! Filters are plain data ([`EntryFilter`]) evaluated by the backend, so the
//! same filter means the same rows everywhere.

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageResult;
use crate::model::{Entry, EntryWrite, OwnerRef, Scope};

mod memory;
#[cfg(feature = "kv")]
mod surreal;

pub use memory::MemoryEntryStore;
#[cfg(feature = "kv")]
pub use surreal::SurrealKvEntryStore;

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Owner constraint of a filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OwnerFilter {
    /// No owner constraint.
    #[default]
    Any,
    /// Only global entries (`owner_type IS NULL AND owner_id IS NULL`).
    Global,
    /// Only entries of exactly this owner.
    Owner(OwnerRef),
    /// Only entries whose owner is of this kind.
    OwnerType(String),
}

/// Namespace constraint of a filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NamespaceFilter {
    /// No namespace constraint.
    #[default]
    Any,
    /// Only the default namespace (`namespace IS NULL`).
    Default,
    /// Only this namespace.
    Equals(String),
}

/// Expiry constraint of a filter, evaluated against [`EntryFilter::now`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExpiryFilter {
    /// Expired and live rows alike.
    #[default]
    Any,
    /// `expires_at IS NULL OR expires_at > now`.
    NotExpired,
    /// `expires_at IS NOT NULL AND expires_at <= now`.
    Expired,
}

/// A row predicate over the entry table.
///
/// All set constraints must hold (logical AND).
#[derive(Debug, Clone, PartialEq)]
pub struct EntryFilter {
    /// Owner constraint.
    pub owner: OwnerFilter,
    /// Namespace constraint.
    pub namespace: NamespaceFilter,
    /// Exact key.
    pub key: Option<String>,
    /// Key must be one of these.
    pub keys: Option<Vec<String>>,
    /// Key must start with this literal prefix.
    pub key_prefix: Option<String>,
    /// Key must match every one of these LIKE patterns (`%` any run, `_`
    /// one character).
    pub key_patterns: Vec<String>,
    /// Expiry constraint.
    pub expiry: ExpiryFilter,
    /// `created_at > created_after`.
    pub created_after: Option<DateTime<Utc>>,
    /// `created_at < created_before`.
    pub created_before: Option<DateTime<Utc>>,
    /// Reference instant for the expiry constraint.
    pub now: DateTime<Utc>,
}

impl Default for EntryFilter {
    fn default() -> Self {
        Self {
            owner: OwnerFilter::Any,
            namespace: NamespaceFilter::Any,
            key: None,
            keys: None,
            key_prefix: None,
            key_patterns: Vec::new(),
            expiry: ExpiryFilter::Any,
            created_after: None,
            created_before: None,
            now: Utc::now(),
        }
    }
}

impl EntryFilter {
    /// Filter for every row in the table.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter for exactly one scope.
    ///
    /// A scope without a namespace matches only the default namespace
    /// (`namespace IS NULL`), never every namespace.
    #[must_use]
    pub fn scope(scope: &Scope) -> Self {
        Self {
            owner: scope
                .owner
                .clone()
                .map_or(OwnerFilter::Global, OwnerFilter::Owner),
            namespace: scope
                .namespace
                .clone()
                .map_or(NamespaceFilter::Default, NamespaceFilter::Equals),
            ..Self::default()
        }
    }

    /// Constrain to one key.
    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Constrain to a set of keys.
    #[must_use]
    pub fn keys(mut self, keys: Vec<String>) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Constrain to keys starting with `prefix`.
    #[must_use]
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Only live rows.
    #[must_use]
    pub fn not_expired(mut self) -> Self {
        self.expiry = ExpiryFilter::NotExpired;
        self
    }

    /// Only expired rows.
    #[must_use]
    pub fn expired(mut self) -> Self {
        self.expiry = ExpiryFilter::Expired;
        self
    }

    /// Evaluate the filter against one row.
    #[must_use]
    pub fn matches(&self, entry: &Entry) -> bool {
        self.matches_owner(entry)
            && self.matches_namespace(entry)
            && self.matches_key(&entry.key)
            && self.matches_expiry(entry)
            && self.created_after.is_none_or(|t| entry.created_at > t)
            && self.created_before.is_none_or(|t| entry.created_at < t)
    }

    fn matches_owner(&self, entry: &Entry) -> bool {
        match &self.owner {
            OwnerFilter::Any => true,
            OwnerFilter::Global => entry.owner_type.is_none() && entry.owner_id.is_none(),
            OwnerFilter::Owner(owner) => {
                entry.owner_type.as_deref() == Some(owner.owner_type.as_str())
                    && entry.owner_id == Some(owner.owner_id)
            },
            OwnerFilter::OwnerType(kind) => entry.owner_type.as_deref() == Some(kind.as_str()),
        }
    }

    fn matches_namespace(&self, entry: &Entry) -> bool {
        match &self.namespace {
            NamespaceFilter::Any => true,
            NamespaceFilter::Default => entry.namespace.is_none(),
            NamespaceFilter::Equals(ns) => entry.namespace.as_deref() == Some(ns.as_str()),
        }
    }

    fn matches_key(&self, key: &str) -> bool {
        self.key.as_deref().is_none_or(|k| k == key)
            && self.keys.as_ref().is_none_or(|ks| ks.iter().any(|k| k == key))
            && self
                .key_prefix
                .as_deref()
                .is_none_or(|p| key.starts_with(p))
            && self.key_patterns.iter().all(|p| like_match(p, key))
    }

    fn matches_expiry(&self, entry: &Entry) -> bool {
        match self.expiry {
            ExpiryFilter::Any => true,
            ExpiryFilter::NotExpired => !entry.is_expired_at(self.now),
            ExpiryFilter::Expired => entry.is_expired_at(self.now),
        }
    }
}

/// SQL `LIKE` matching: `%` matches any run of characters, `_` exactly one.
///
/// Matching is case-sensitive and has no escape character.
#[must_use]
pub fn like_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    // Position of the last `%` and the text index it was tried against.
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        match p.get(pi) {
            Some('%') => {
                backtrack = Some((pi, ti));
                pi = pi.saturating_add(1);
            },
            Some(&c) if c == '_' || c == t[ti] => {
                pi = pi.saturating_add(1);
                ti = ti.saturating_add(1);
            },
            _ => match backtrack {
                Some((star, from)) => {
                    let from = from.saturating_add(1);
                    backtrack = Some((star, from));
                    pi = star.saturating_add(1);
                    ti = from;
                },
                None => return false,
            },
        }
    }
    p[pi.min(p.len())..].iter().all(|&c| c == '%')
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Column an [`EntryQuery`] can be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderColumn {
    /// Row identifier (insertion order).
    Id,
    /// Entry key.
    Key,
    /// Namespace (`NULL` first).
    Namespace,
    /// Creation time.
    CreatedAt,
    /// Last write time.
    UpdatedAt,
    /// Expiry (`NULL` first).
    ExpiresAt,
}

impl std::str::FromStr for OrderColumn {
    type Err = crate::error::StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" => Ok(Self::Id),
            "key" => Ok(Self::Key),
            "namespace" => Ok(Self::Namespace),
            "created_at" => Ok(Self::CreatedAt),
            "updated_at" => Ok(Self::UpdatedAt),
            "expires_at" => Ok(Self::ExpiresAt),
            other => Err(crate::error::StorageError::InvalidValue(format!(
                "unknown order column '{other}'"
            ))),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

/// A filtered, ordered, paginated select.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryQuery {
    /// Row predicate.
    pub filter: EntryFilter,
    /// Sort keys, most significant first. Ties fall back to `id` ascending.
    pub order: Vec<(OrderColumn, Direction)>,
    /// Maximum number of rows.
    pub limit: Option<usize>,
    /// Rows to skip after ordering.
    pub offset: usize,
}

impl EntryQuery {
    /// Select every row matching `filter`, in id order.
    #[must_use]
    pub fn new(filter: EntryFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    /// Order, then paginate, rows that already matched the filter.
    #[must_use]
    pub fn finish(&self, mut rows: Vec<Entry>) -> Vec<Entry> {
        rows.sort_by(|a, b| self.compare(a, b));
        rows.into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }

    fn compare(&self, a: &Entry, b: &Entry) -> Ordering {
        for (column, direction) in &self.order {
            let ord = match column {
                OrderColumn::Id => a.id.cmp(&b.id),
                OrderColumn::Key => a.key.cmp(&b.key),
                OrderColumn::Namespace => a.namespace.cmp(&b.namespace),
                OrderColumn::CreatedAt => a.created_at.cmp(&b.created_at),
                OrderColumn::UpdatedAt => a.updated_at.cmp(&b.updated_at),
                OrderColumn::ExpiresAt => a.expires_at.cmp(&b.expires_at),
            };
            let ord = match direction {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.id.cmp(&b.id)
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Result of an atomic counter update.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterUpdate {
    /// The live row before the update, if there was one.
    pub previous: Option<Entry>,
    /// The row after the update.
    pub current: Entry,
    /// The new counter value.
    pub value: i64,
}

/// The entry table.
///
/// Rows are unique on (`owner_type`, `owner_id`, `namespace`, `key`).
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Select rows matching the query.
    async fn select(&self, query: &EntryQuery) -> StorageResult<Vec<Entry>>;

    /// Count rows matching the filter.
    async fn count(&self, filter: &EntryFilter) -> StorageResult<u64>;

    /// Check whether any row matches the filter.
    async fn exists(&self, filter: &EntryFilter) -> StorageResult<bool> {
        Ok(self.count(filter).await? > 0)
    }

    /// Delete rows matching the filter. Returns the number deleted.
    async fn delete(&self, filter: &EntryFilter) -> StorageResult<u64>;

    /// Insert or replace one row.
    ///
    /// Replacing keeps the row's `id` and `created_at`; `updated_at` is
    /// always the write time.
    async fn upsert(&self, write: EntryWrite) -> StorageResult<Entry>;

    /// Insert or replace several rows in one transaction.
    ///
    /// Writes apply in order (a later write to the same identity wins). If
    /// any write fails, none are applied.
    async fn upsert_many(&self, writes: Vec<EntryWrite>) -> StorageResult<Vec<Entry>>;

    /// Set `expires_at` on rows matching the filter. Returns the number updated.
    async fn update_expiry(
        &self,
        filter: &EntryFilter,
        expires_at: Option<DateTime<Utc>>,
    ) -> StorageResult<u64>;

    /// Atomically add `amount` to the integer stored at (`scope`, `key`).
    ///
    /// A live row keeps its expiry. A missing or expired row counts as 0 and
    /// is (re)written without expiry.
    async fn add_integer(&self, scope: &Scope, key: &str, amount: i64)
    -> StorageResult<CounterUpdate>;
}

/// Apply a counter update to the row currently stored under an identity.
pub(crate) fn counter_write(
    existing: Option<&Entry>,
    scope: &Scope,
    key: &str,
    amount: i64,
    now: DateTime<Utc>,
) -> StorageResult<(Option<Entry>, EntryWrite, i64)> {
    let live = existing.filter(|e| !e.is_expired_at(now)).cloned();
    let current = live.as_ref().map_or(serde_json::Value::Null, |e| e.value.clone());
    let value = crate::model::add_to_counter(&current, amount)?;
    let write = EntryWrite {
        scope: scope.clone(),
        key: key.to_owned(),
        value: serde_json::Value::from(value),
        expires_at: live.as_ref().and_then(|e| e.expires_at),
    };
    Ok((live, write, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(id: u64, key: &str, namespace: Option<&str>) -> Entry {
        EntryWrite {
            scope: Scope::new(None, namespace.map(str::to_owned)),
            key: key.into(),
            value: json!(id),
            expires_at: None,
        }
        .into_entry(None, id, Utc::now())
    }

    #[test]
    fn test_like_match() {
        assert!(like_match("user.%", "user.1.name"));
        assert!(like_match("user._.name", "user.1.name"));
        assert!(!like_match("user._.name", "user.12.name"));
        assert!(like_match("%name", "user.1.name"));
        assert!(like_match("%.1.%", "user.1.name"));
        assert!(like_match("%", ""));
        assert!(!like_match("_", ""));
        assert!(like_match("a%b%c", "aXXbYYc"));
        assert!(!like_match("a%b%c", "aXXbYY"));
        assert!(!like_match("User.%", "user.1"));
    }

    #[test]
    fn test_scope_filter_without_namespace_matches_default_only() {
        let filter = EntryFilter::scope(&Scope::default());
        assert!(filter.matches(&entry(1, "k", None)));
        assert!(!filter.matches(&entry(2, "k", Some("ns"))));
    }

    #[test]
    fn test_expiry_filters_are_complementary() {
        let now = Utc::now();
        let mut expired = entry(1, "old", None);
        expired.expires_at = Some(now);
        let live = entry(2, "new", None);

        let not_expired = EntryFilter {
            now,
            ..EntryFilter::all().not_expired()
        };
        let only_expired = EntryFilter {
            now,
            ..EntryFilter::all().expired()
        };
        assert!(!not_expired.matches(&expired));
        assert!(not_expired.matches(&live));
        assert!(only_expired.matches(&expired));
        assert!(!only_expired.matches(&live));
    }

    #[test]
    fn test_key_constraints() {
        let row = entry(1, "user.1.name", None);
        assert!(EntryFilter::all().key_prefix("user.1").matches(&row));
        assert!(!EntryFilter::all().key_prefix("user.2").matches(&row));
        assert!(
            EntryFilter::all()
                .keys(vec!["x".into(), "user.1.name".into()])
                .matches(&row)
        );
        assert!(!EntryFilter::all().keys(Vec::new()).matches(&row));
        assert!(EntryFilter::all().key("user.1.name").matches(&row));
    }

    #[test]
    fn test_owner_type_filter() {
        let mut row = entry(1, "k", None);
        row.owner_type = Some("team".into());
        row.owner_id = Some(3);
        let filter = EntryFilter {
            owner: OwnerFilter::OwnerType("team".into()),
            ..EntryFilter::all()
        };
        assert!(filter.matches(&row));
        assert!(!filter.matches(&entry(2, "k", None)));
    }

    #[test]
    fn test_finish_orders_and_paginates() {
        let rows = vec![entry(1, "b", None), entry(2, "c", None), entry(3, "a", None)];
        let query = EntryQuery {
            order: vec![(OrderColumn::Key, Direction::Desc)],
            limit: Some(2),
            offset: 1,
            ..EntryQuery::default()
        };
        let keys: Vec<_> = query.finish(rows).into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn test_finish_defaults_to_id_order() {
        let rows = vec![entry(3, "a", None), entry(1, "b", None), entry(2, "c", None)];
        let ids: Vec<_> = EntryQuery::default()
            .finish(rows)
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_order_column_from_str() {
        assert_eq!("created_at".parse::<OrderColumn>().unwrap(), OrderColumn::CreatedAt);
        assert!("value".parse::<OrderColumn>().is_err());
    }
}
