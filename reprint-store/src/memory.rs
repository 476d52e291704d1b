//! In-memory store built on sharded concurrent maps.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use reprint_core::CacheKey;

use crate::DeleteStatus;
use crate::store::{
    Added, DependencyToken, Expiry, InsertOptions, RemovalCause, RemovalListener, Store,
    StoreResult, StoredValue,
};

struct Slot {
    value: StoredValue,
    expires_at: Option<DateTime<Utc>>,
    sliding: Option<Duration>,
    dependencies: Vec<DependencyToken>,
    on_removed: Option<RemovalListener>,
}

impl Slot {
    fn new(value: StoredValue, options: InsertOptions, now: DateTime<Utc>) -> Self {
        let (expires_at, sliding) = match options.expiry {
            Expiry::Never => (None, None),
            Expiry::At(at) => (Some(at), None),
            Expiry::Sliding(window) => (Some(now + window), Some(window)),
        };
        Self {
            value,
            expires_at,
            sliding,
            dependencies: options.dependencies,
            on_removed: options.on_removed,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn notify(&self, key: &CacheKey, cause: RemovalCause) {
        if let Some(listener) = &self.on_removed {
            listener(key, cause);
        }
    }
}

/// Thread-safe in-memory store with lazy expiration.
///
/// Expired values are dropped by the read that finds them, not by a
/// background task. Sliding windows renew on every successful read.
/// Removal listeners run on the calling thread, after the value has been
/// detached from the map, so a listener may call back into the store.
#[derive(Default)]
pub struct MemoryStore {
    slots: DashMap<CacheKey, Slot>,
    dependencies: DashMap<DependencyToken, Vec<CacheKey>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of values currently held, expired stragglers included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the store holds nothing at all.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drops every value registered under `token`, firing listeners with
    /// [`RemovalCause::Invalidated`]. Returns how many values were dropped.
    pub fn invalidate_dependency(&self, token: &DependencyToken) -> usize {
        let Some((_, keys)) = self.dependencies.remove(token) else {
            return 0;
        };
        let mut dropped = 0;
        for key in keys {
            if let Some((key, slot)) = self.slots.remove(&key) {
                self.forget_dependencies(&key, &slot.dependencies);
                slot.notify(&key, RemovalCause::Invalidated);
                dropped += 1;
            }
        }
        tracing::debug!(token = %token, dropped, "dependency invalidated");
        dropped
    }

    fn register_dependencies(&self, key: &CacheKey, tokens: &[DependencyToken]) {
        for token in tokens {
            self.dependencies
                .entry(token.clone())
                .or_default()
                .push(key.clone());
        }
    }

    /// Prunes `key` from the reverse index so that a later re-insert under
    /// the same key is not swept by a token it no longer depends on.
    fn forget_dependencies(&self, key: &CacheKey, tokens: &[DependencyToken]) {
        for token in tokens {
            if let Some(mut keys) = self.dependencies.get_mut(token) {
                keys.retain(|registered| registered != key);
            }
        }
    }

    fn get_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<StoredValue> {
        if let Some(mut slot) = self.slots.get_mut(key) {
            if !slot.is_expired(now) {
                if let Some(window) = slot.sliding {
                    slot.expires_at = Some(now + window);
                }
                return Some(slot.value.clone());
            }
        } else {
            return None;
        }
        // The guard is gone; re-check under the shard lock before dropping.
        if let Some((expired, slot)) = self.slots.remove_if(key, |_, slot| slot.is_expired(now)) {
            self.forget_dependencies(&expired, &slot.dependencies);
            slot.notify(&expired, RemovalCause::Expired);
            tracing::trace!(key = expired.as_str(), "expired value dropped");
        }
        None
    }

    fn add_at(
        &self,
        key: &CacheKey,
        value: StoredValue,
        options: InsertOptions,
        now: DateTime<Utc>,
    ) -> Added {
        let dependencies = options.dependencies.clone();
        let mut evicted = None;
        let added = match self.slots.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    evicted = Some(occupied.insert(Slot::new(value, options, now)));
                    Added::Inserted
                } else {
                    Added::Existing(occupied.get().value.clone())
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::new(value, options, now));
                Added::Inserted
            }
        };
        if let Some(slot) = evicted {
            self.forget_dependencies(key, &slot.dependencies);
            slot.notify(key, RemovalCause::Expired);
        }
        if matches!(added, Added::Inserted) {
            self.register_dependencies(key, &dependencies);
        }
        added
    }

    fn insert_at(
        &self,
        key: &CacheKey,
        value: StoredValue,
        options: InsertOptions,
        now: DateTime<Utc>,
    ) {
        let dependencies = options.dependencies.clone();
        let replaced = self.slots.insert(key.clone(), Slot::new(value, options, now));
        if let Some(slot) = replaced {
            self.forget_dependencies(key, &slot.dependencies);
            let cause = if slot.is_expired(now) {
                RemovalCause::Expired
            } else {
                RemovalCause::Replaced
            };
            slot.notify(key, cause);
        }
        self.register_dependencies(key, &dependencies);
    }

    fn remove_with_cause(&self, key: &CacheKey, cause: RemovalCause) -> DeleteStatus {
        match self.slots.remove(key) {
            Some((key, slot)) => {
                self.forget_dependencies(&key, &slot.dependencies);
                slot.notify(&key, cause);
                DeleteStatus::Deleted(1)
            }
            None => DeleteStatus::Missing,
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<StoredValue>> {
        Ok(self.get_at(key, Utc::now()))
    }

    async fn add(
        &self,
        key: &CacheKey,
        value: StoredValue,
        options: InsertOptions,
    ) -> StoreResult<Added> {
        Ok(self.add_at(key, value, options, Utc::now()))
    }

    async fn insert(
        &self,
        key: &CacheKey,
        value: StoredValue,
        options: InsertOptions,
    ) -> StoreResult<()> {
        self.insert_at(key, value, options, Utc::now());
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> StoreResult<DeleteStatus> {
        Ok(self.remove_with_cause(key, RemovalCause::Explicit))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::TimeZone;
    use reprint_core::VaryDescriptor;
    use smol_str::SmolStr;

    use super::*;

    fn key(text: &str) -> CacheKey {
        CacheKey::from(text.to_string())
    }

    fn value() -> StoredValue {
        StoredValue::Vary(Arc::new(VaryDescriptor::new(
            None,
            Some(vec![SmolStr::new("accept-language")]),
            None,
            false,
            None,
        )))
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::from_secs(seconds as u64)
    }

    fn recording() -> (RemovalListener, Arc<Mutex<Vec<(CacheKey, RemovalCause)>>>) {
        let log: Arc<Mutex<Vec<(CacheKey, RemovalCause)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let listener: RemovalListener = Arc::new(move |key: &CacheKey, cause| {
            sink.lock().unwrap().push((key.clone(), cause));
        });
        (listener, log)
    }

    #[test]
    fn add_first_writer_wins() {
        let store = MemoryStore::new();
        let added = store.add_at(&key("k"), value(), InsertOptions::never(), at(0));
        assert!(matches!(added, Added::Inserted));

        let added = store.add_at(&key("k"), value(), InsertOptions::never(), at(1));
        match added {
            Added::Existing(StoredValue::Vary(_)) => {}
            other => panic!("expected the incumbent back, got {other:?}"),
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn add_treats_an_expired_incumbent_as_vacant() {
        let store = MemoryStore::new();
        let (listener, log) = recording();
        let options = InsertOptions {
            expiry: Expiry::At(at(10)),
            on_removed: Some(listener),
            ..InsertOptions::default()
        };
        store.add_at(&key("k"), value(), options, at(0));

        let added = store.add_at(&key("k"), value(), InsertOptions::never(), at(10));
        assert!(matches!(added, Added::Inserted));
        assert_eq!(
            log.lock().unwrap().as_slice(),
            &[(key("k"), RemovalCause::Expired)]
        );
    }

    #[test]
    fn get_drops_expired_values_lazily() {
        let store = MemoryStore::new();
        let (listener, log) = recording();
        let options = InsertOptions {
            expiry: Expiry::At(at(10)),
            on_removed: Some(listener),
            ..InsertOptions::default()
        };
        store.add_at(&key("k"), value(), options, at(0));

        assert!(store.get_at(&key("k"), at(9)).is_some());
        assert!(log.lock().unwrap().is_empty());

        assert!(store.get_at(&key("k"), at(10)).is_none());
        assert!(store.is_empty());
        assert_eq!(
            log.lock().unwrap().as_slice(),
            &[(key("k"), RemovalCause::Expired)]
        );
    }

    #[test]
    fn sliding_window_renews_on_read() {
        let store = MemoryStore::new();
        let options = InsertOptions::with_expiry(Expiry::Sliding(Duration::from_secs(60)));
        store.add_at(&key("k"), value(), options, at(0));

        // Each read pushes the deadline out; the untouched deadline would
        // have been t+60.
        assert!(store.get_at(&key("k"), at(50)).is_some());
        assert!(store.get_at(&key("k"), at(100)).is_some());
        assert!(store.get_at(&key("k"), at(200)).is_none());
    }

    #[test]
    fn insert_replaces_and_notifies() {
        let store = MemoryStore::new();
        let (listener, log) = recording();
        let options = InsertOptions {
            on_removed: Some(listener),
            ..InsertOptions::default()
        };
        store.add_at(&key("k"), value(), options, at(0));

        store.insert_at(&key("k"), value(), InsertOptions::never(), at(1));
        assert_eq!(
            log.lock().unwrap().as_slice(),
            &[(key("k"), RemovalCause::Replaced)]
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_reports_missing_keys() {
        let store = MemoryStore::new();
        store.add_at(&key("k"), value(), InsertOptions::never(), at(0));
        assert_eq!(
            store.remove_with_cause(&key("k"), RemovalCause::Explicit),
            DeleteStatus::Deleted(1)
        );
        assert_eq!(
            store.remove_with_cause(&key("k"), RemovalCause::Explicit),
            DeleteStatus::Missing
        );
    }

    #[test]
    fn invalidation_drops_every_registered_value() {
        let store = MemoryStore::new();
        let token = DependencyToken::new("articles");
        let (listener, log) = recording();
        for name in ["a", "b"] {
            let options = InsertOptions {
                dependencies: vec![token.clone()],
                on_removed: Some(listener.clone()),
                ..InsertOptions::default()
            };
            store.add_at(&key(name), value(), options, at(0));
        }
        store.add_at(&key("unrelated"), value(), InsertOptions::never(), at(0));

        assert_eq!(store.invalidate_dependency(&token), 2);
        assert_eq!(store.len(), 1);
        assert!(store.get_at(&key("unrelated"), at(1)).is_some());

        let causes: Vec<_> = log.lock().unwrap().iter().map(|(_, c)| *c).collect();
        assert_eq!(causes, vec![RemovalCause::Invalidated; 2]);

        assert_eq!(store.invalidate_dependency(&token), 0);
    }

    #[test]
    fn reinserted_key_is_not_swept_by_a_stale_token() {
        let store = MemoryStore::new();
        let token = DependencyToken::new("articles");
        let options = InsertOptions {
            dependencies: vec![token.clone()],
            ..InsertOptions::default()
        };
        store.add_at(&key("k"), value(), options, at(0));
        store.remove_with_cause(&key("k"), RemovalCause::Explicit);

        store.add_at(&key("k"), value(), InsertOptions::never(), at(1));
        assert_eq!(store.invalidate_dependency(&token), 0);
        assert!(store.get_at(&key("k"), at(2)).is_some());
    }

    #[tokio::test]
    async fn trait_surface_works_through_a_box() {
        let store: Box<dyn Store> = Box::new(MemoryStore::new());
        let k = key("k");

        assert!(store.get(&k).await.unwrap().is_none());
        let added = store
            .add(&k, value(), InsertOptions::never())
            .await
            .unwrap();
        assert!(matches!(added, Added::Inserted));
        assert!(store.get(&k).await.unwrap().is_some());

        store.insert(&k, value(), InsertOptions::never()).await.unwrap();
        assert_eq!(store.remove(&k).await.unwrap(), DeleteStatus::Deleted(1));
        assert_eq!(store.remove(&k).await.unwrap(), DeleteStatus::Missing);
    }
}
