#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Admission gates for completed responses.
///
/// Defines [`RejectReason`](admission::RejectReason), one variant per gate,
/// and the pure [`evaluate`](admission::evaluate) that
/// [`OutputCache::consider`] drives.
pub mod admission;

/// Engine configuration.
///
/// [`CacheConfig`] is serde-deserializable from host configuration and
/// covers the master switch, the POST-body digest cap, and `Vary: *`
/// suppression.
pub mod config;

/// The cache engine itself.
///
/// [`OutputCache`] owns the store, the key builder, and the optional
/// custom-vary resolver and removal listener; it exposes the whole
/// request-path surface: [`lookup`](OutputCache::lookup),
/// [`consider`](OutputCache::consider), and
/// [`remove_path`](OutputCache::remove_path).
pub mod engine;

/// Error types for cache operations.
pub mod error;

/// Lookup orchestration.
///
/// The state machine behind [`OutputCache::lookup`] and its outcome,
/// [`Lookup`]: miss, bypass, serve, or `304 Not Modified`.
pub mod lookup;

/// Metrics collection for cache accounting.
///
/// When the `metrics` feature is enabled, this module provides counters
/// for:
/// - hits, misses, and bypasses (bypasses are not misses)
/// - `304 Not Modified` answers
/// - admitted and rejected responses, rejects labeled by gate
/// - stale-variant evictions
pub mod metrics;

/// The in-flight caching policy.
///
/// Hosts mutate a [`CachePolicy`] while generating a response; repeated
/// declarations merge toward the safe side, and the vary sub-objects
/// ([`VaryByHeaders`](policy::VaryByHeaders),
/// [`VaryByParams`](policy::VaryByParams),
/// [`VaryByContentEncodings`](policy::VaryByContentEncodings)) collect the
/// dimensions the response varies by.
pub mod policy;

pub use admission::{Admission, AdmissionPlan, RejectReason};
pub use config::CacheConfig;
pub use engine::OutputCache;
pub use error::CacheError;
pub use lookup::Lookup;
pub use policy::{CachePolicy, PolicyError};

pub use reprint_core::{
    CacheKey, CacheRequest, CacheResponse, Cacheability, CachedEntry, ConditionalDecision,
    CustomVaryError, CustomVaryResolver, DEFAULT_MAX_POST_BODY, KeyBuilder, Negotiated, Params,
    PolicySettings, RawResponse, RequestBody, ValidationCallback, ValidationStatus, VaryDescriptor,
    VaryId, VaryMaterials, Verb,
};

pub use reprint_store::{
    Added, DeleteStatus, DependencyToken, Expiry, InsertOptions, MemoryStore, RemovalCause,
    RemovalListener, Store, StoreError, StoreResult, StoredValue,
};

/// The `reprint` prelude.
///
/// Provides convenient access to the most commonly used types:
///
/// ```rust
/// use reprint::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{CacheConfig, CachePolicy, CacheRequest, CacheResponse, Lookup, OutputCache};
}
