use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reprint_core::{CacheKey, CachedEntry, VaryDescriptor};
use smol_str::SmolStr;

use crate::{DeleteStatus, StoreError};

pub type StoreResult<T> = Result<T, StoreError>;

/// A value held under a cache key.
///
/// The bare keyspace holds vary descriptors (and, for families that do not
/// vary at all, entries directly); the varied keyspace holds entries. Both
/// travel as `Arc` so a hit never copies response material.
#[derive(Debug, Clone)]
pub enum StoredValue {
    /// Vary descriptor stored under a bare key.
    Vary(Arc<VaryDescriptor>),
    /// Cached response stored under a bare or varied key.
    Entry(Arc<CachedEntry>),
}

impl StoredValue {
    /// The descriptor, when this value is one.
    pub fn as_vary(&self) -> Option<&Arc<VaryDescriptor>> {
        match self {
            StoredValue::Vary(descriptor) => Some(descriptor),
            StoredValue::Entry(_) => None,
        }
    }

    /// The cached entry, when this value is one.
    pub fn as_entry(&self) -> Option<&Arc<CachedEntry>> {
        match self {
            StoredValue::Entry(entry) => Some(entry),
            StoredValue::Vary(_) => None,
        }
    }
}

/// When a stored value stops being servable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
    /// Lives until removed or replaced.
    #[default]
    Never,
    /// Expires at an absolute instant.
    At(DateTime<Utc>),
    /// Expires when unread for the given window; every read renews it.
    Sliding(Duration),
}

/// Outcome of a first-writer-wins [`Store::add`].
#[derive(Debug, Clone)]
pub enum Added {
    /// The key was free (or held only an expired value); the value is now
    /// stored.
    Inserted,
    /// A live value was already present and was left untouched.
    Existing(StoredValue),
}

/// Why a value left the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// Removed by a direct [`Store::remove`] call.
    Explicit,
    /// Lazily dropped after its expiry passed.
    Expired,
    /// Overwritten by [`Store::insert`].
    Replaced,
    /// Dropped because a dependency token fired.
    Invalidated,
}

/// Host callback fired after a value has left the store.
pub type RemovalListener = Arc<dyn Fn(&CacheKey, RemovalCause) + Send + Sync>;

/// Opaque invalidation handle. Every value registered under a token is
/// dropped together when the token fires.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyToken(SmolStr);

impl DependencyToken {
    /// Wraps a token string.
    pub fn new(token: impl Into<SmolStr>) -> Self {
        Self(token.into())
    }

    /// The token text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DependencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything that accompanies a value into the store.
#[derive(Clone, Default)]
pub struct InsertOptions {
    /// Expiration rule.
    pub expiry: Expiry,
    /// Invalidation tokens the value is registered under.
    pub dependencies: Vec<DependencyToken>,
    /// Fired when the value leaves the store, with the cause.
    pub on_removed: Option<RemovalListener>,
}

impl InsertOptions {
    /// Options with no expiration, dependencies or listener.
    pub fn never() -> Self {
        Self::default()
    }

    /// Options carrying just an expiration rule.
    pub fn with_expiry(expiry: Expiry) -> Self {
        Self {
            expiry,
            ..Self::default()
        }
    }
}

impl fmt::Debug for InsertOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InsertOptions")
            .field("expiry", &self.expiry)
            .field("dependencies", &self.dependencies)
            .field("on_removed", &self.on_removed.is_some())
            .finish()
    }
}

/// Asynchronous key-value contract the cache engine runs against.
///
/// [`add`](Store::add) is the at-most-one-writer primitive: when two
/// requests race to install a value under the same key, exactly one wins
/// and the loser gets the incumbent back.
#[async_trait]
pub trait Store: Send + Sync {
    /// Reads the live value under `key`, if any.
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<StoredValue>>;

    /// Stores `value` only when `key` is free or holds an expired value.
    async fn add(
        &self,
        key: &CacheKey,
        value: StoredValue,
        options: InsertOptions,
    ) -> StoreResult<Added>;

    /// Stores `value` unconditionally, replacing any incumbent.
    async fn insert(
        &self,
        key: &CacheKey,
        value: StoredValue,
        options: InsertOptions,
    ) -> StoreResult<()>;

    /// Removes the value under `key`.
    async fn remove(&self, key: &CacheKey) -> StoreResult<DeleteStatus>;
}

#[async_trait]
impl<S> Store for &S
where
    S: Store + ?Sized,
{
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<StoredValue>> {
        (**self).get(key).await
    }

    async fn add(
        &self,
        key: &CacheKey,
        value: StoredValue,
        options: InsertOptions,
    ) -> StoreResult<Added> {
        (**self).add(key, value, options).await
    }

    async fn insert(
        &self,
        key: &CacheKey,
        value: StoredValue,
        options: InsertOptions,
    ) -> StoreResult<()> {
        (**self).insert(key, value, options).await
    }

    async fn remove(&self, key: &CacheKey) -> StoreResult<DeleteStatus> {
        (**self).remove(key).await
    }
}

#[async_trait]
impl<S> Store for Box<S>
where
    S: Store + ?Sized,
{
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<StoredValue>> {
        (**self).get(key).await
    }

    async fn add(
        &self,
        key: &CacheKey,
        value: StoredValue,
        options: InsertOptions,
    ) -> StoreResult<Added> {
        (**self).add(key, value, options).await
    }

    async fn insert(
        &self,
        key: &CacheKey,
        value: StoredValue,
        options: InsertOptions,
    ) -> StoreResult<()> {
        (**self).insert(key, value, options).await
    }

    async fn remove(&self, key: &CacheKey) -> StoreResult<DeleteStatus> {
        (**self).remove(key).await
    }
}

#[async_trait]
impl<S> Store for Arc<S>
where
    S: Store + ?Sized,
{
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<StoredValue>> {
        (**self).get(key).await
    }

    async fn add(
        &self,
        key: &CacheKey,
        value: StoredValue,
        options: InsertOptions,
    ) -> StoreResult<Added> {
        (**self).add(key, value, options).await
    }

    async fn insert(
        &self,
        key: &CacheKey,
        value: StoredValue,
        options: InsertOptions,
    ) -> StoreResult<()> {
        (**self).insert(key, value, options).await
    }

    async fn remove(&self, key: &CacheKey) -> StoreResult<DeleteStatus> {
        (**self).remove(key).await
    }
}
