//! The persisted entry and the scope types that address it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StorageError, StorageResult};

/// Owner kind used by [`OwnerRef::user`].
pub const USER: &str = "user";
/// Owner kind used by [`OwnerRef::group`].
pub const GROUP: &str = "group";
/// Owner kind used by [`OwnerRef::team`].
pub const TEAM: &str = "team";
/// Owner kind used by [`OwnerRef::organization`].
pub const ORGANIZATION: &str = "organization";

/// An entity that can own entries.
///
/// Application types (users, teams, ...) implement this to be passed to
/// [`StorageService::for_owner`](crate::StorageService::for_owner) directly.
pub trait Storable {
    /// Kind discriminator, e.g. `"user"`.
    fn storable_type(&self) -> &str;

    /// Identifier within the kind.
    fn storable_id(&self) -> i64;

    /// Owned reference to this entity.
    fn owner_ref(&self) -> OwnerRef {
        OwnerRef::new(self.storable_type(), self.storable_id())
    }
}

/// Reference to the entity that owns a set of entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerRef {
    /// Kind discriminator.
    pub owner_type: String,
    /// Identifier within `owner_type`.
    pub owner_id: i64,
}

impl OwnerRef {
    /// Create an owner reference.
    #[must_use]
    pub fn new(owner_type: impl Into<String>, owner_id: i64) -> Self {
        Self {
            owner_type: owner_type.into(),
            owner_id,
        }
    }

    /// A user owner.
    #[must_use]
    pub fn user(id: i64) -> Self {
        Self::new(USER, id)
    }

    /// A group owner.
    #[must_use]
    pub fn group(id: i64) -> Self {
        Self::new(GROUP, id)
    }

    /// A team owner.
    #[must_use]
    pub fn team(id: i64) -> Self {
        Self::new(TEAM, id)
    }

    /// An organization owner.
    #[must_use]
    pub fn organization(id: i64) -> Self {
        Self::new(ORGANIZATION, id)
    }
}

impl Storable for OwnerRef {
    fn storable_type(&self) -> &str {
        &self.owner_type
    }

    fn storable_id(&self) -> i64 {
        self.owner_id
    }

    fn owner_ref(&self) -> OwnerRef {
        self.clone()
    }
}

impl std::fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.owner_type, self.owner_id)
    }
}

/// The (owner, namespace) pair a set of entries lives in.
///
/// `owner = None` is the global scope, `namespace = None` the default
/// namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Scope {
    /// Owning entity, `None` for global entries.
    pub owner: Option<OwnerRef>,
    /// Normalized namespace, `None` for the default namespace.
    pub namespace: Option<String>,
}

impl Scope {
    /// Create a scope.
    #[must_use]
    pub fn new(owner: Option<OwnerRef>, namespace: Option<String>) -> Self {
        Self { owner, namespace }
    }

    /// Owner kind, `None` for the global scope.
    #[must_use]
    pub fn owner_type(&self) -> Option<&str> {
        self.owner.as_ref().map(|o| o.owner_type.as_str())
    }

    /// Owner identifier, `None` for the global scope.
    #[must_use]
    pub fn owner_id(&self) -> Option<i64> {
        self.owner.as_ref().map(|o| o.owner_id)
    }

    /// Whether `entry` belongs to exactly this scope.
    #[must_use]
    pub fn contains(&self, entry: &Entry) -> bool {
        entry.owner_type.as_deref() == self.owner_type()
            && entry.owner_id == self.owner_id()
            && entry.namespace == self.namespace
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.owner {
            Some(owner) => write!(f, "{owner}")?,
            None => f.write_str("global")?,
        }
        if let Some(ns) = &self.namespace {
            write!(f, "/{ns}")?;
        }
        Ok(())
    }
}

/// One persisted key-value entry.
///
/// `owner_type` and `owner_id` are either both set or both `None`; rows are
/// only ever created from a [`Scope`], which makes the pair indivisible.
/// The tuple (`owner_type`, `owner_id`, `namespace`, `key`) is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Store-assigned row identifier, increasing in insertion order.
    pub id: u64,
    /// Owner kind, `None` for global entries.
    pub owner_type: Option<String>,
    /// Owner identifier, `None` for global entries.
    pub owner_id: Option<i64>,
    /// Namespace, `None` for the default namespace.
    pub namespace: Option<String>,
    /// Dot-joined key.
    pub key: String,
    /// Stored value, opaque to the store.
    pub value: Value,
    /// Expiry instant, `None` if the entry never expires.
    pub expires_at: Option<DateTime<Utc>>,
    /// When the row was first written.
    pub created_at: DateTime<Utc>,
    /// When the row was last written.
    pub updated_at: DateTime<Utc>,
}

impl Entry {
    /// The owning entity, `None` for global entries.
    #[must_use]
    pub fn owner(&self) -> Option<OwnerRef> {
        match (&self.owner_type, self.owner_id) {
            (Some(kind), Some(id)) => Some(OwnerRef::new(kind.clone(), id)),
            _ => None,
        }
    }

    /// The scope this entry lives in.
    #[must_use]
    pub fn scope(&self) -> Scope {
        Scope::new(self.owner(), self.namespace.clone())
    }

    /// Whether the entry has no owner.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.owner_type.is_none() && self.owner_id.is_none()
    }

    /// Whether the entry's expiry is at or before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether the entry has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Whether the entry is still live.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.is_expired()
    }
}

/// An insert-or-replace request for one entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryWrite {
    /// Scope of the entry.
    pub scope: Scope,
    /// Normalized key.
    pub key: String,
    /// Value to store.
    pub value: Value,
    /// Expiry instant, `None` for never.
    pub expires_at: Option<DateTime<Utc>>,
}

impl EntryWrite {
    /// Materialize the row this write produces.
    ///
    /// `existing` is the row currently stored under the same identity, if
    /// any; its `id` and `created_at` are kept.
    #[must_use]
    pub fn into_entry(self, existing: Option<&Entry>, next_id: u64, now: DateTime<Utc>) -> Entry {
        let (id, created_at) = existing.map_or((next_id, now), |e| (e.id, e.created_at));
        Entry {
            id,
            owner_type: self.scope.owner_type().map(str::to_owned),
            owner_id: self.scope.owner_id(),
            namespace: self.scope.namespace,
            key: self.key,
            value: self.value,
            expires_at: self.expires_at,
            created_at,
            updated_at: now,
        }
    }
}

/// Coerce a stored value to an integer for counter arithmetic.
///
/// Numbers truncate toward zero, numeric strings parse (leading sign and
/// digits only), booleans map to 0/1, empty collections and `null` to 0 and
/// non-empty collections to 1.
#[must_use]
pub fn coerce_integer(value: &Value) -> i64 {
    match value {
        Value::Null => 0,
        Value::Bool(b) => i64::from(*b),
        Value::Number(n) => n.as_i64().unwrap_or_else(|| {
            // Saturating float-to-int cast; NaN maps to 0.
            #[allow(clippy::cast_possible_truncation)]
            n.as_f64().map_or(0, |f| f as i64)
        }),
        Value::String(s) => leading_integer(s.trim()),
        Value::Array(items) => i64::from(!items.is_empty()),
        Value::Object(map) => i64::from(!map.is_empty()),
    }
}

fn leading_integer(s: &str) -> i64 {
    let digits_end = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map_or(s.len(), |(i, _)| i);
    s[..digits_end].parse().unwrap_or(0)
}

/// Add `amount` to a counter value.
///
/// # Errors
///
/// Returns [`StorageError::InvalidValue`] on integer overflow.
pub fn add_to_counter(current: &Value, amount: i64) -> StorageResult<i64> {
    coerce_integer(current)
        .checked_add(amount)
        .ok_or_else(|| StorageError::InvalidValue("counter overflow".into()))
}
