//! The storage service: scoped get/set/batch/nested/export operations.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use datastore_events::{ChangeNotifier, EventMetadata, NoopNotifier, StoreEvent};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::decode::Decoded;
use crate::error::{StorageError, StorageResult};
use crate::identity::IdentityProvider;
use crate::model::{Entry, EntryWrite, OwnerRef, Scope, Storable, add_to_counter};
use crate::nested::{Tree, build_tree};
use crate::normalize::{KeySegments, normalize, normalize_key};
use crate::query::EntryQueryBuilder;
use crate::store::{EntryFilter, EntryQuery, EntryStore};
use crate::transfer::{ExportDocument, ExportSink, parse_import};

const EVENT_SOURCE: &str = "datastore-storage";

/// Service-level defaults, usually taken from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    /// Namespace bound by [`StorageService::from_settings`].
    pub default_namespace: Option<String>,
    /// TTL in seconds applied by [`StorageService::set`] when none is given.
    pub default_ttl: Option<u64>,
    /// Pretty-print export documents.
    pub pretty_export: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            default_namespace: None,
            default_ttl: None,
            pretty_export: true,
        }
    }
}

/// Scoped access to the entry table.
///
/// A service is bound to one [`Scope`]: an optional owner and an optional
/// namespace. Every operation only sees rows of exactly that scope; with no
/// namespace bound, that means the default namespace (`namespace IS NULL`),
/// not every namespace. Scope-changing methods return a new service and
/// leave `self` untouched.
///
/// Reads filter out expired rows. Rows are only physically removed by
/// [`delete`](Self::delete), [`clear`](Self::clear) and friends, or by a
/// [`CleanupSweep`](crate::CleanupSweep).
///
/// # Example
///
/// ```rust,ignore
/// let store: Arc<dyn EntryStore> = Arc::new(MemoryEntryStore::new());
/// let prefs = StorageService::new(store)
///     .for_user(&OwnerRef::user(7))
///     .in_namespace("prefs");
///
/// prefs.set(["ui", "theme"], "dark", None).await?;
/// assert_eq!(prefs.get("ui.theme").await?, Some(json!("dark")));
/// ```
#[derive(Clone)]
pub struct StorageService {
    store: Arc<dyn EntryStore>,
    notifier: Arc<dyn ChangeNotifier>,
    identity: Option<Arc<dyn IdentityProvider>>,
    sink: Option<Arc<dyn ExportSink>>,
    scope: Scope,
    default_ttl: Option<u64>,
    pretty_export: bool,
}

impl std::fmt::Debug for StorageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageService")
            .field("scope", &self.scope)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl StorageService {
    /// Create a service over `store` bound to the global scope and the
    /// default namespace.
    #[must_use]
    pub fn new(store: Arc<dyn EntryStore>) -> Self {
        Self {
            store,
            notifier: Arc::new(NoopNotifier),
            identity: None,
            sink: None,
            scope: Scope::default(),
            default_ttl: None,
            pretty_export: true,
        }
    }

    /// Create a service with configured defaults applied.
    #[must_use]
    pub fn from_settings(store: Arc<dyn EntryStore>, settings: &StoreSettings) -> Self {
        let mut service = Self::new(store);
        service.scope.namespace = settings
            .default_namespace
            .as_deref()
            .and_then(normalize);
        service.default_ttl = settings.default_ttl.filter(|&ttl| ttl > 0);
        service.pretty_export = settings.pretty_export;
        service
    }

    /// Deliver change events to `notifier`.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn ChangeNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Resolve the current user through `identity`.
    #[must_use]
    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Use `sink` for [`export`](Self::export) and [`import`](Self::import).
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ExportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// TTL in seconds applied by [`set`](Self::set) when none is given.
    /// `0` disables the default.
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: u64) -> Self {
        self.default_ttl = (ttl > 0).then_some(ttl);
        self
    }

    // -- Scope ----------------------------------------------------------

    fn with_scope(&self, owner: Option<OwnerRef>, namespace: Option<String>) -> Self {
        Self {
            scope: Scope::new(owner, namespace),
            ..self.clone()
        }
    }

    /// Bind to `owner`, keeping the namespace.
    #[must_use]
    pub fn for_owner(&self, owner: &(impl Storable + ?Sized)) -> Self {
        self.with_scope(Some(owner.owner_ref()), self.scope.namespace.clone())
    }

    /// Bind to a user.
    #[must_use]
    pub fn for_user(&self, user: &(impl Storable + ?Sized)) -> Self {
        self.for_owner(user)
    }

    /// Bind to the user with identifier `id`.
    #[must_use]
    pub fn for_user_id(&self, id: i64) -> Self {
        self.for_owner(&OwnerRef::user(id))
    }

    /// Bind to the authenticated user.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::MissingIdentity`] if no identity provider is
    /// installed or nobody is authenticated.
    pub fn for_current_user(&self) -> StorageResult<Self> {
        let user = self
            .identity
            .as_ref()
            .and_then(|identity| identity.current_user())
            .ok_or(StorageError::MissingIdentity)?;
        Ok(self.for_owner(&user))
    }

    /// Bind to a group.
    #[must_use]
    pub fn for_group(&self, group: &(impl Storable + ?Sized)) -> Self {
        self.for_owner(group)
    }

    /// Bind to a team.
    #[must_use]
    pub fn for_team(&self, team: &(impl Storable + ?Sized)) -> Self {
        self.for_owner(team)
    }

    /// Bind to an organization.
    #[must_use]
    pub fn for_organization(&self, organization: &(impl Storable + ?Sized)) -> Self {
        self.for_owner(organization)
    }

    /// Bind to global entries, keeping the namespace.
    #[must_use]
    pub fn global(&self) -> Self {
        self.with_scope(None, self.scope.namespace.clone())
    }

    /// Bind to a namespace, keeping the owner. Empty input selects the
    /// default namespace.
    #[must_use]
    pub fn in_namespace(&self, namespace: impl KeySegments) -> Self {
        self.with_scope(self.scope.owner.clone(), normalize(namespace))
    }

    /// The bound scope.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// The bound owner, `None` for global.
    #[must_use]
    pub fn owner(&self) -> Option<&OwnerRef> {
        self.scope.owner.as_ref()
    }

    /// Kind of the bound owner.
    #[must_use]
    pub fn owner_type(&self) -> Option<&str> {
        self.scope.owner_type()
    }

    /// Identifier of the bound owner.
    #[must_use]
    pub fn owner_id(&self) -> Option<i64> {
        self.scope.owner_id()
    }

    /// The bound namespace, `None` for the default namespace.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.scope.namespace.as_deref()
    }

    /// The configured default TTL.
    #[must_use]
    pub fn default_ttl(&self) -> Option<u64> {
        self.default_ttl
    }

    /// Ad-hoc query builder seeded with this service's owner and namespace.
    ///
    /// Dimensions this service leaves unset keep the builder's defaults:
    /// no owner means global, no namespace means every namespace.
    #[must_use]
    pub fn query(&self) -> EntryQueryBuilder {
        let mut builder = EntryQueryBuilder::new(Arc::clone(&self.store));
        if let Some(owner) = &self.scope.owner {
            builder = builder.for_owner(owner);
        }
        if let Some(namespace) = &self.scope.namespace {
            builder = builder.in_namespace(namespace);
        }
        builder
    }

    // -- Helpers --------------------------------------------------------

    fn scoped(&self) -> EntryFilter {
        EntryFilter::scope(&self.scope)
    }

    async fn first(&self, filter: EntryFilter) -> StorageResult<Option<Entry>> {
        let query = EntryQuery {
            limit: Some(1),
            ..EntryQuery::new(filter)
        };
        Ok(self.store.select(&query).await?.into_iter().next())
    }

    async fn live(&self, filter: EntryFilter) -> StorageResult<Vec<Entry>> {
        self.store
            .select(&EntryQuery::new(filter.not_expired()))
            .await
    }

    fn expiry_after(ttl: Option<u64>, now: DateTime<Utc>) -> StorageResult<Option<DateTime<Utc>>> {
        let Some(seconds) = ttl.filter(|&s| s > 0) else {
            return Ok(None);
        };
        i64::try_from(seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|delta| now.checked_add_signed(delta))
            .map(Some)
            .ok_or_else(|| StorageError::InvalidValue(format!("ttl of {seconds}s is out of range")))
    }

    fn metadata() -> EventMetadata {
        EventMetadata::new(EVENT_SOURCE)
    }

    fn set_event(&self, metadata: EventMetadata, key: &str, value: Value, ttl: Option<u64>) -> StoreEvent {
        StoreEvent::Set {
            metadata,
            owner_type: self.owner_type().map(str::to_owned),
            owner_id: self.owner_id(),
            namespace: self.scope.namespace.clone(),
            key: key.to_owned(),
            value,
            ttl,
        }
    }

    fn updated_event(
        &self,
        metadata: EventMetadata,
        key: &str,
        old_value: Value,
        new_value: Value,
    ) -> StoreEvent {
        StoreEvent::Updated {
            metadata,
            owner_type: self.owner_type().map(str::to_owned),
            owner_id: self.owner_id(),
            namespace: self.scope.namespace.clone(),
            key: key.to_owned(),
            old_value,
            new_value,
        }
    }

    fn deleted_event(&self, metadata: EventMetadata, key: &str, value: Value) -> StoreEvent {
        StoreEvent::Deleted {
            metadata,
            owner_type: self.owner_type().map(str::to_owned),
            owner_id: self.owner_id(),
            namespace: self.scope.namespace.clone(),
            key: key.to_owned(),
            value,
        }
    }

    fn emit(&self, event: StoreEvent) {
        self.notifier.notify(event);
    }

    /// Upsert with an already resolved TTL (`None` never expires) and
    /// report it as set or updated.
    async fn put(&self, key: String, value: Value, ttl: Option<u64>) -> StorageResult<Entry> {
        let expires_at = Self::expiry_after(ttl, Utc::now())?;
        let ttl = expires_at.and(ttl);

        let existing = self.first(self.scoped().key(key.as_str())).await?;
        let entry = self
            .store
            .upsert(EntryWrite {
                scope: self.scope.clone(),
                key: key.clone(),
                value: value.clone(),
                expires_at,
            })
            .await?;

        debug!(scope = %self.scope, key = %key, ttl = ?ttl, updated = existing.is_some(), "Entry written");
        let event = match existing {
            Some(old) => self.updated_event(Self::metadata(), &key, old.value, value),
            None => self.set_event(Self::metadata(), &key, value, ttl),
        };
        self.emit(event);
        Ok(entry)
    }

    // -- Single keys ----------------------------------------------------

    /// Store `value` under `key`, replacing any existing entry.
    ///
    /// `ttl` is in seconds: `None` applies the default TTL, `Some(0)` never
    /// expires. Emits an updated event if a row existed (even an expired
    /// one), a set event otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] for an empty key,
    /// [`StorageError::InvalidValue`] for an unrepresentable TTL, and
    /// propagates backing store errors.
    pub async fn set(
        &self,
        key: impl KeySegments,
        value: impl Into<Value>,
        ttl: Option<u64>,
    ) -> StorageResult<Entry> {
        let key = normalize_key(key)?;
        self.put(key, value.into(), ttl.or(self.default_ttl)).await
    }

    /// Serialize `value` and store it under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if `value` cannot be
    /// represented as JSON, otherwise as [`set`](Self::set).
    pub async fn set_data<T: Serialize + ?Sized>(
        &self,
        key: impl KeySegments,
        value: &T,
        ttl: Option<u64>,
    ) -> StorageResult<Entry> {
        let value =
            serde_json::to_value(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.set(key, value, ttl).await
    }

    /// The live value under `key`.
    ///
    /// A stored JSON `null` is returned as `Some(Value::Null)`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] for an empty key and propagates
    /// backing store errors.
    pub async fn get(&self, key: impl KeySegments) -> StorageResult<Option<Value>> {
        let key = normalize_key(key)?;
        Ok(self
            .first(self.scoped().key(key).not_expired())
            .await?
            .map(|entry| entry.value))
    }

    /// The live value under `key`, or `default`.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get).
    pub async fn get_or(&self, key: impl KeySegments, default: impl Into<Value>) -> StorageResult<Value> {
        Ok(self.get(key).await?.unwrap_or_else(|| default.into()))
    }

    /// The live value under `key` decoded as `T`.
    ///
    /// Decoding never fails the call: a value that does not fit `T` comes
    /// back as [`Decoded::Raw`].
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get).
    pub async fn get_as<T: DeserializeOwned>(
        &self,
        key: impl KeySegments,
        default: impl Into<Value>,
    ) -> StorageResult<Decoded<T>> {
        Ok(match self.get(key).await? {
            Some(value) => Decoded::from_stored(value),
            None => Decoded::Default(default.into()),
        })
    }

    /// The live value under `key` as `T`, `None` if absent or not a `T`.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get).
    pub async fn data<T: DeserializeOwned>(&self, key: impl KeySegments) -> StorageResult<Option<T>> {
        Ok(self.get_as::<T>(key, Value::Null).await?.typed())
    }

    /// The live value under `key` as a list of `T`.
    ///
    /// A missing key yields [`Decoded::Default`] with an empty array.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get).
    pub async fn collection<T: DeserializeOwned>(
        &self,
        key: impl KeySegments,
    ) -> StorageResult<Decoded<Vec<T>>> {
        self.get_as::<Vec<T>>(key, Value::Array(Vec::new())).await
    }

    /// Whether a live entry exists under `key`.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get).
    pub async fn has(&self, key: impl KeySegments) -> StorageResult<bool> {
        let key = normalize_key(key)?;
        self.store
            .exists(&self.scoped().key(key).not_expired())
            .await
    }

    /// Delete the entry under `key`, expired or not.
    ///
    /// Returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get).
    pub async fn delete(&self, key: impl KeySegments) -> StorageResult<bool> {
        let key = normalize_key(key)?;
        let filter = self.scoped().key(key.as_str());
        let Some(existing) = self.first(filter.clone()).await? else {
            return Ok(false);
        };
        let deleted = self.store.delete(&filter).await? > 0;
        if deleted {
            debug!(scope = %self.scope, key = %key, "Entry deleted");
            self.emit(self.deleted_event(Self::metadata(), &key, existing.value));
        }
        Ok(deleted)
    }

    /// Replace the expiry of an existing entry without touching its value.
    ///
    /// `ttl` of `None` or `Some(0)` removes the expiry. Returns whether a
    /// row was updated. Emits no event.
    ///
    /// # Errors
    ///
    /// As [`set`](Self::set).
    pub async fn touch(&self, key: impl KeySegments, ttl: Option<u64>) -> StorageResult<bool> {
        let key = normalize_key(key)?;
        let expires_at = Self::expiry_after(ttl, Utc::now())?;
        let updated = self
            .store
            .update_expiry(&self.scoped().key(key.as_str()), expires_at)
            .await?;
        debug!(scope = %self.scope, key = %key, expires_at = ?expires_at, "Entry touched");
        Ok(updated > 0)
    }

    /// Seconds until the entry under `key` expires.
    ///
    /// `None` if there is no row or it never expires; `Some(0)` if it has
    /// already expired but not been swept.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get).
    pub async fn ttl(&self, key: impl KeySegments) -> StorageResult<Option<u64>> {
        let key = normalize_key(key)?;
        let now = Utc::now();
        Ok(self
            .first(self.scoped().key(key))
            .await?
            .and_then(|entry| entry.expires_at)
            .map(|at| u64::try_from(at.signed_duration_since(now).num_seconds()).unwrap_or(0)))
    }

    /// Add `amount` to the integer under `key` and return the new value.
    ///
    /// A missing value counts as 0; non-integers are coerced. The entry is
    /// rewritten without expiry. This is a plain read then write; use
    /// [`increment_atomic`](Self::increment_atomic) under concurrency.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidValue`] on overflow, otherwise as
    /// [`set`](Self::set).
    pub async fn increment(&self, key: impl KeySegments, amount: i64) -> StorageResult<i64> {
        let key = normalize_key(key)?;
        let current = self.get_or(key.as_str(), 0).await?;
        let value = add_to_counter(&current, amount)?;
        self.put(key, Value::from(value), None).await?;
        Ok(value)
    }

    /// Subtract `amount` from the integer under `key`.
    ///
    /// # Errors
    ///
    /// As [`increment`](Self::increment).
    pub async fn decrement(&self, key: impl KeySegments, amount: i64) -> StorageResult<i64> {
        let negated = amount
            .checked_neg()
            .ok_or_else(|| StorageError::InvalidValue("counter overflow".into()))?;
        self.increment(key, negated).await
    }

    /// Atomically add `amount` to the integer under `key`.
    ///
    /// Unlike [`increment`](Self::increment), a live entry keeps its expiry.
    /// An expired entry counts as missing.
    ///
    /// # Errors
    ///
    /// As [`increment`](Self::increment).
    pub async fn increment_atomic(&self, key: impl KeySegments, amount: i64) -> StorageResult<i64> {
        let key = normalize_key(key)?;
        let update = self.store.add_integer(&self.scope, &key, amount).await?;
        debug!(scope = %self.scope, key = %key, value = update.value, "Counter updated");

        let value = Value::from(update.value);
        let event = match update.previous {
            Some(old) => self.updated_event(Self::metadata(), &key, old.value, value),
            None => self.set_event(Self::metadata(), &key, value, None),
        };
        self.emit(event);
        Ok(update.value)
    }

    // -- Whole scope ----------------------------------------------------

    /// Live keys in the scope, in insertion order.
    ///
    /// # Errors
    ///
    /// Propagates backing store errors.
    pub async fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self
            .live(self.scoped())
            .await?
            .into_iter()
            .map(|e| e.key)
            .collect())
    }

    /// Live entries in the scope as a key to value map.
    ///
    /// # Errors
    ///
    /// Propagates backing store errors.
    pub async fn all(&self) -> StorageResult<BTreeMap<String, Value>> {
        Ok(self
            .live(self.scoped())
            .await?
            .into_iter()
            .map(|e| (e.key, e.value))
            .collect())
    }

    /// Delete every row in the scope, expired or not. Returns the count.
    ///
    /// # Errors
    ///
    /// Propagates backing store errors.
    pub async fn clear(&self) -> StorageResult<u64> {
        let count = self.store.delete(&self.scoped()).await?;
        if count > 0 {
            info!(scope = %self.scope, count, "Scope cleared");
            self.emit(StoreEvent::Cleared {
                metadata: Self::metadata(),
                owner_type: self.owner_type().map(str::to_owned),
                owner_id: self.owner_id(),
                namespace: self.scope.namespace.clone(),
                count,
            });
        }
        Ok(count)
    }

    fn prefixed(&self, prefix: impl KeySegments) -> EntryFilter {
        let filter = self.scoped();
        match normalize(prefix) {
            Some(prefix) => filter.key_prefix(prefix),
            None => filter,
        }
    }

    /// Live keys starting with `prefix`.
    ///
    /// The prefix is literal: `"user.1"` also matches `"user.10"`.
    ///
    /// # Errors
    ///
    /// Propagates backing store errors.
    pub async fn keys_starting_with(&self, prefix: impl KeySegments) -> StorageResult<Vec<String>> {
        Ok(self
            .live(self.prefixed(prefix))
            .await?
            .into_iter()
            .map(|e| e.key)
            .collect())
    }

    /// Live entries whose key starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Propagates backing store errors.
    pub async fn starting_with(
        &self,
        prefix: impl KeySegments,
    ) -> StorageResult<BTreeMap<String, Value>> {
        Ok(self
            .live(self.prefixed(prefix))
            .await?
            .into_iter()
            .map(|e| (e.key, e.value))
            .collect())
    }

    /// Live entries under `prefix` as a tree, with the prefix stripped.
    ///
    /// # Errors
    ///
    /// Propagates backing store errors.
    pub async fn nested_from(&self, prefix: impl KeySegments) -> StorageResult<Tree> {
        let prefix = normalize(prefix);
        let filter = match &prefix {
            Some(p) => self.scoped().key_prefix(p.as_str()),
            None => self.scoped(),
        };
        let entries = self.live(filter).await?;
        Ok(build_tree(
            entries.into_iter().map(|e| (e.key, e.value)),
            prefix.as_deref(),
        ))
    }

    /// All live entries as a tree.
    ///
    /// # Errors
    ///
    /// Propagates backing store errors.
    pub async fn nested(&self) -> StorageResult<Tree> {
        let entries = self.live(self.scoped()).await?;
        Ok(build_tree(entries.into_iter().map(|e| (e.key, e.value)), None))
    }

    // -- Batches --------------------------------------------------------

    /// Live values for `keys` in one query. Missing keys are absent from
    /// the result.
    ///
    /// # Errors
    ///
    /// Propagates backing store errors.
    pub async fn get_many<I, K>(&self, keys: I) -> StorageResult<BTreeMap<String, Value>>
    where
        I: IntoIterator<Item = K>,
        K: KeySegments,
    {
        let keys: Vec<String> = keys.into_iter().filter_map(normalize).collect();
        Ok(self
            .live(self.scoped().keys(keys))
            .await?
            .into_iter()
            .map(|e| (e.key, e.value))
            .collect())
    }

    /// Store several values in one transaction.
    ///
    /// Either every write lands or none does. Events are emitted, in input
    /// order, only after the transaction commits.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] if any key is empty (nothing is
    /// written), otherwise as [`set`](Self::set).
    pub async fn set_many<I, K, V>(&self, values: I, ttl: Option<u64>) -> StorageResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: KeySegments,
        V: Into<Value>,
    {
        let pairs = values
            .into_iter()
            .map(|(k, v)| Ok((normalize_key(k)?, v.into())))
            .collect::<StorageResult<Vec<(String, Value)>>>()?;
        if pairs.is_empty() {
            return Ok(());
        }

        let ttl = ttl.or(self.default_ttl);
        let expires_at = Self::expiry_after(ttl, Utc::now())?;
        let ttl = expires_at.and(ttl);

        let keys: Vec<String> = pairs.iter().map(|(k, _)| k.clone()).collect();
        let mut current: HashMap<String, Value> = self
            .store
            .select(&EntryQuery::new(self.scoped().keys(keys)))
            .await?
            .into_iter()
            .map(|e| (e.key, e.value))
            .collect();

        let batch = Uuid::new_v4();
        let mut events = Vec::with_capacity(pairs.len());
        let mut writes = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let metadata = Self::metadata().with_correlation_id(batch);
            events.push(match current.insert(key.clone(), value.clone()) {
                Some(old) => self.updated_event(metadata, &key, old, value.clone()),
                None => self.set_event(metadata, &key, value.clone(), ttl),
            });
            writes.push(EntryWrite {
                scope: self.scope.clone(),
                key,
                value,
                expires_at,
            });
        }

        let written = self.store.upsert_many(writes).await?;
        debug!(scope = %self.scope, count = written.len(), "Batch written");
        for event in events {
            self.emit(event);
        }
        Ok(())
    }

    /// Delete several keys, expired or not. Returns the number removed.
    ///
    /// One deleted event is emitted per removed row.
    ///
    /// # Errors
    ///
    /// Propagates backing store errors.
    pub async fn delete_many<I, K>(&self, keys: I) -> StorageResult<u64>
    where
        I: IntoIterator<Item = K>,
        K: KeySegments,
    {
        let keys: Vec<String> = keys.into_iter().filter_map(normalize).collect();
        let filter = self.scoped().keys(keys);
        let doomed = self.store.select(&EntryQuery::new(filter.clone())).await?;
        if doomed.is_empty() {
            return Ok(0);
        }
        let deleted = self.store.delete(&filter).await?;
        debug!(scope = %self.scope, count = deleted, "Batch deleted");
        let batch = Uuid::new_v4();
        for entry in doomed {
            let metadata = Self::metadata().with_correlation_id(batch);
            self.emit(self.deleted_event(metadata, &entry.key, entry.value));
        }
        Ok(deleted)
    }

    // -- Export / import ------------------------------------------------

    fn installed_sink(&self) -> StorageResult<&dyn ExportSink> {
        self.sink
            .as_deref()
            .ok_or_else(|| StorageError::Internal("no export sink configured".into()))
    }

    /// Export the live entries of the scope to `destination` through the
    /// installed sink. Returns the number of entries exported.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`] if no sink is installed, otherwise
    /// as [`export_to`](Self::export_to).
    pub async fn export(&self, destination: &str) -> StorageResult<usize> {
        let sink = self.installed_sink()?;
        self.export_to(destination, sink).await
    }

    /// Export the live entries of the scope to `destination` through `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if encoding fails and
    /// propagates sink and backing store errors.
    pub async fn export_to(&self, destination: &str, sink: &dyn ExportSink) -> StorageResult<usize> {
        let entries = self.live(self.scoped()).await?;
        let document = ExportDocument::new(&self.scope, entries, Utc::now());
        let bytes = document.to_json(self.pretty_export)?;
        sink.write(destination, &bytes).await?;
        info!(scope = %self.scope, destination, count = document.count, "Export written");
        Ok(document.count)
    }

    /// Import entries from `source` through the installed sink.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`] if no sink is installed, otherwise
    /// as [`import_from`](Self::import_from).
    pub async fn import(&self, source: &str, overwrite: bool) -> StorageResult<u64> {
        let sink = self.installed_sink()?;
        self.import_from(source, sink, overwrite).await
    }

    /// Import entries from `source` through `sink` into this scope.
    ///
    /// Rows whose snapshot expiry has passed are skipped; the rest keep
    /// their remaining lifetime. With `overwrite` false, keys that have a
    /// live entry are skipped. Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if `source` does not exist and
    /// [`StorageError::InvalidImport`] if the document is malformed; in both
    /// cases nothing is written.
    pub async fn import_from(
        &self,
        source: &str,
        sink: &dyn ExportSink,
        overwrite: bool,
    ) -> StorageResult<u64> {
        if !sink.exists(source).await? {
            return Err(StorageError::NotFound(format!("import source '{source}'")));
        }
        let rows = parse_import(&sink.read(source).await?)?;

        let mut imported = 0u64;
        for row in rows {
            if !overwrite && self.has(row.key.as_str()).await? {
                debug!(scope = %self.scope, key = %row.key, "Import skipped existing key");
                continue;
            }
            let ttl = row.remaining_ttl(Utc::now());
            if ttl == Some(0) {
                warn!(scope = %self.scope, key = %row.key, "Import skipped expired row");
                continue;
            }
            self.put(row.key, row.value, ttl).await?;
            imported = imported.saturating_add(1);
        }
        info!(scope = %self.scope, source, imported, "Import finished");
        Ok(imported)
    }
}
