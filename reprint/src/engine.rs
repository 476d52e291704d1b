//! The engine tying lookups, admission, and the store together.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use reprint_core::entry::CachedEntry;
use reprint_core::key::{CacheKey, KeyBuilder};
use reprint_core::request::{CacheRequest, Verb};
use reprint_core::response::CacheResponse;
use reprint_core::vary::{CustomVaryResolver, VaryDescriptor, VaryId};
use reprint_store::{Added, InsertOptions, RemovalCause, RemovalListener, Store, StoredValue};
use smol_str::SmolStr;

use crate::admission::{self, Admission, RejectReason};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::lookup::{self, Lookup, LookupContext};
use crate::metrics;
use crate::policy::CachePolicy;

/// The output cache: lookups on the way in, admission on the way out.
///
/// Generic over its [`Store`]; every piece of engine state is injected at
/// construction, so several independent caches can coexist in one process.
pub struct OutputCache<S> {
    store: S,
    config: CacheConfig,
    key_builder: KeyBuilder,
    custom: Option<Arc<dyn CustomVaryResolver>>,
    on_removed: Option<RemovalListener>,
}

impl<S> OutputCache<S>
where
    S: Store,
{
    /// An engine over `store` with default configuration.
    pub fn new(store: S) -> Self {
        Self::with_config(store, CacheConfig::default())
    }

    /// An engine over `store` with explicit configuration.
    pub fn with_config(store: S, config: CacheConfig) -> Self {
        let key_builder = KeyBuilder::new(config.max_post_body_bytes);
        Self {
            store,
            config,
            key_builder,
            custom: None,
            on_removed: None,
        }
    }

    /// Installs the resolver for `vary_by_custom` declarations.
    pub fn custom_vary(mut self, resolver: impl CustomVaryResolver + 'static) -> Self {
        self.custom = Some(Arc::new(resolver));
        self
    }

    /// Installs a listener notified whenever an entry leaves the store,
    /// with the removal cause. Hosts use it to invalidate kernel-cache
    /// entries in step with the managed ones.
    pub fn on_removed(
        mut self,
        listener: impl Fn(&CacheKey, RemovalCause) + Send + Sync + 'static,
    ) -> Self {
        self.on_removed = Some(Arc::new(listener));
        self
    }

    /// The engine configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Answers one request from the cache.
    ///
    /// Requests the cache cannot take part in at all (a disabled cache, or
    /// a verb outside GET, HEAD, and POST) come back as [`Lookup::Bypass`]
    /// without touching the store.
    pub async fn lookup(&self, request: &CacheRequest) -> Lookup {
        let outcome = if !self.config.enabled || !request.verb().servable() {
            Lookup::Bypass
        } else {
            let ctx = LookupContext {
                store: &self.store,
                key_builder: &self.key_builder,
                custom: self.custom.as_deref(),
            };
            lookup::run(&ctx, request).await
        };
        metrics::record_lookup(&outcome);
        outcome
    }

    /// Offers a completed response to the cache.
    ///
    /// Runs the admission gates; on admission the vary descriptor goes in
    /// under the bare key (first writer wins) and the response entry under
    /// its varied key as a second, separate write. Store write failures
    /// propagate: the response has already been sent, so hosts typically
    /// log them and move on.
    pub async fn consider(
        &self,
        request: &CacheRequest,
        response: &CacheResponse,
        policy: &CachePolicy,
    ) -> Result<Admission, CacheError> {
        let plan = match admission::evaluate(request, response, policy, &self.config, Utc::now()) {
            Ok(plan) => plan,
            Err(reason) => return Ok(self.rejected(reason)),
        };

        let bare = self.key_builder.bare_key(request.verb(), request.path());
        let descriptor = plan.settings.vary.to_descriptor().map(Arc::new);
        let (key, descriptor) = match descriptor {
            None => (bare, None),
            Some(descriptor) => {
                let descriptor = self.install_descriptor(&bare, descriptor).await?;
                let varied = match self.key_builder.build(
                    request,
                    Some(&descriptor),
                    self.custom.as_deref(),
                ) {
                    Some(varied) => varied,
                    None => return Ok(self.rejected(RejectReason::UncacheableBody)),
                };
                let varied = match write_encoding(&descriptor, response) {
                    Some(token) => varied.with_encoding(token),
                    None => varied,
                };
                (varied, Some(descriptor))
            }
        };

        let vary_id = descriptor.as_ref().map_or(VaryId::nil(), |d| d.id());
        let entry = CachedEntry::new(
            response.snapshot(),
            plan.settings,
            response.kernel_cache_handle().map(SmolStr::new),
            vary_id,
        );
        let options = InsertOptions {
            expiry: plan.expiry,
            dependencies: policy.dependencies().to_vec(),
            on_removed: self.on_removed.clone(),
        };
        self.store
            .insert(&key, StoredValue::Entry(Arc::new(entry)), options)
            .await?;
        tracing::debug!(key = key.as_str(), "response admitted");
        metrics::record_admitted();
        Ok(Admission::Admitted {
            key,
            descriptor,
            expiry: plan.expiry,
        })
    }

    /// Removes the bare keys for `path` in both verb keyspaces.
    ///
    /// With the bare key gone the whole family is out of reach: varied
    /// keys can no longer be derived, and a re-admission writes a fresh
    /// descriptor id, so surviving variants stay unservable until they
    /// expire or are evicted as stale.
    pub async fn remove_path(&self, path: &str) -> Result<(), CacheError> {
        for verb in [Verb::Get, Verb::Post] {
            let key = self.key_builder.bare_key(verb, path);
            self.store.remove(&key).await?;
        }
        Ok(())
    }

    /// Puts the descriptor under the bare key, first writer wins. A racing
    /// writer with the same shape keeps the incumbent and its id; a shape
    /// change overwrites, stranding old variants for the stale-id check.
    async fn install_descriptor(
        &self,
        bare: &CacheKey,
        descriptor: Arc<VaryDescriptor>,
    ) -> Result<Arc<VaryDescriptor>, CacheError> {
        let added = self
            .store
            .add(bare, StoredValue::Vary(descriptor.clone()), InsertOptions::never())
            .await?;
        match added {
            Added::Inserted => Ok(descriptor),
            Added::Existing(StoredValue::Vary(existing)) if *existing == *descriptor => {
                Ok(existing)
            }
            Added::Existing(_) => {
                self.store
                    .insert(bare, StoredValue::Vary(descriptor.clone()), InsertOptions::never())
                    .await?;
                Ok(descriptor)
            }
        }
    }

    fn rejected(&self, reason: RejectReason) -> Admission {
        tracing::debug!(reason = reason.as_str(), "response rejected");
        metrics::record_rejected(reason);
        Admission::Rejected(reason)
    }
}

impl<S> fmt::Debug for OutputCache<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputCache")
            .field("config", &self.config)
            .field("custom", &self.custom.is_some())
            .field("on_removed", &self.on_removed.is_some())
            .finish_non_exhaustive()
    }
}

/// The token appended to the write key, in its declared casing so read and
/// write paths build identical keys.
fn write_encoding<'a>(
    descriptor: &'a VaryDescriptor,
    response: &CacheResponse,
) -> Option<&'a SmolStr> {
    let candidates = descriptor.content_encodings()?;
    let token = response.content_encoding()?;
    candidates
        .iter()
        .find(|candidate| candidate.eq_ignore_ascii_case(token))
}
