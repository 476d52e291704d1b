//! Immutable caching-policy snapshot attached to each cached entry.
//!
//! While a response is being generated the host mutates an in-flight policy
//! object. At admission time that object is frozen into a [`PolicySettings`]
//! value which travels with the [`CachedEntry`](crate::entry::CachedEntry)
//! and is read concurrently, never written again.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use smol_str::SmolStr;

use crate::request::CacheRequest;
use crate::vary::VaryDescriptor;

/// Server-side cacheability classes.
///
/// Declaration order is the most-restrictive-first scale used when several
/// directives combine: whichever class is declared earlier here wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cacheability {
    /// Must not be cached anywhere.
    NoCache,
    /// Cacheable by this server only; clients are told not to cache.
    ServerAndNoCache,
    /// Cacheable by the requesting client only.
    #[default]
    Private,
    /// Cacheable by this server and the requesting client.
    ServerAndPrivate,
    /// Cacheable by everyone.
    Public,
}

impl Cacheability {
    /// Position on the most-restrictive-wins scale; lower is stricter.
    pub const fn restrictiveness(self) -> u8 {
        match self {
            Cacheability::NoCache => 0,
            Cacheability::ServerAndNoCache => 1,
            Cacheability::Private => 2,
            Cacheability::ServerAndPrivate => 3,
            Cacheability::Public => 4,
        }
    }

    /// The stricter of the two classes.
    pub fn most_restrictive(self, other: Self) -> Self {
        if other.restrictiveness() < self.restrictiveness() {
            other
        } else {
            self
        }
    }

    /// Whether this server may hold the response at all.
    pub const fn server_cacheable(self) -> bool {
        matches!(
            self,
            Cacheability::Public | Cacheability::ServerAndPrivate | Cacheability::ServerAndNoCache
        )
    }
}

/// Verdict of a revalidation callback run against a cached entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationStatus {
    /// The entry is still good; keep serving it.
    #[default]
    Valid,
    /// Skip the cache for this request only; the entry stays stored.
    IgnoreThisRequest,
    /// The entry is no longer valid; evict it and regenerate.
    Invalid,
}

/// Host-registered revalidation hook, run after a raw hit and before the
/// entry is served. State the callback needs is captured by the closure.
pub type ValidationCallback = Arc<dyn Fn(&CacheRequest) -> ValidationStatus + Send + Sync>;

/// Vary dimensions as recorded by the in-flight policy, before they are
/// canonicalized into a [`VaryDescriptor`] at admission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VaryMaterials {
    /// Candidate content encodings, server preference order.
    pub content_encodings: Vec<SmolStr>,
    /// Request header names, canonicalized to lookup form.
    pub headers: Vec<SmolStr>,
    /// Parameter names, lower-cased; empty when varying by all params.
    pub params: Vec<SmolStr>,
    /// Vary on every parameter the request carries.
    pub all_params: bool,
    /// The response depends on request inputs the cache cannot model; such
    /// a response is never admitted.
    pub vary_by_unspecified: bool,
    /// Parameters were deliberately declared irrelevant, so a paramless
    /// entry may be served to requests that do carry parameters.
    pub ignore_params: bool,
    /// Opaque argument for the custom vary resolver.
    pub custom: Option<SmolStr>,
}

impl VaryMaterials {
    /// True when some dimension requires a descriptor.
    pub fn any(&self) -> bool {
        !self.content_encodings.is_empty()
            || !self.headers.is_empty()
            || !self.params.is_empty()
            || self.all_params
            || self.custom.is_some()
    }

    /// Whether parameters on a request are accounted for, either by varying
    /// on them or by an explicit ignore declaration.
    pub fn accepts_params(&self) -> bool {
        self.ignore_params || self.all_params || !self.params.is_empty()
    }

    /// Builds the immutable descriptor, or `None` when nothing varies.
    pub fn to_descriptor(&self) -> Option<VaryDescriptor> {
        self.any().then(|| {
            VaryDescriptor::new(
                non_empty(&self.content_encodings),
                non_empty(&self.headers),
                if self.all_params {
                    None
                } else {
                    non_empty(&self.params)
                },
                self.all_params,
                self.custom.clone(),
            )
        })
    }
}

fn non_empty(values: &[SmolStr]) -> Option<Vec<SmolStr>> {
    (!values.is_empty()).then(|| values.to_vec())
}

/// Immutable snapshot of a response's caching policy.
///
/// Fields are public: the snapshot is plain data, self-describing enough to
/// reconstruct the descriptor that owned it.
#[derive(Clone)]
pub struct PolicySettings {
    /// Cacheability class, after any authorization demotion.
    pub cacheability: Cacheability,
    /// A Public response was demoted to Private because the request
    /// required authorization.
    pub demoted_for_authorization: bool,
    /// UTC start of the request that produced the response.
    pub created: DateTime<Utc>,
    /// Explicit absolute expiration.
    pub expires: Option<DateTime<Utc>>,
    /// Maximum age, measured from `created`.
    pub max_age: Option<Duration>,
    /// Expire relative to the latest access instead of an absolute instant.
    pub sliding_expiration: bool,
    /// Revalidation callbacks, run in registration order.
    pub validation_callbacks: Arc<[ValidationCallback]>,
    /// Literal entity tag for `If-None-Match` comparison.
    pub etag: Option<SmolStr>,
    /// Literal modification instant for `If-Modified-Since` comparison.
    pub last_modified: Option<DateTime<Utc>>,
    /// Derive the entity tag from the entry's dependencies (carried for the
    /// host, not interpreted here).
    pub etag_from_dependencies: bool,
    /// Derive Last-Modified from the entry's dependencies.
    pub last_modified_from_dependencies: bool,
    /// Vary dimensions, kept redundantly so the snapshot stands alone.
    pub vary: VaryMaterials,
    /// Clients must not store the response.
    pub no_store: bool,
    /// Proxies must not transform the body.
    pub no_transforms: bool,
    /// Serve range requests by bypassing the cache instead of replaying.
    pub ignore_range_requests: bool,
    /// The response carried a cookie visible to the cache.
    pub has_set_cookie: bool,
    /// Suppress the `Vary: *` header the host would otherwise emit.
    pub omit_vary_star: bool,
    /// The host registered invalidation dependencies for this entry.
    pub has_user_provided_dependencies: bool,
    /// This server must not cache, regardless of cacheability class.
    pub no_server_caching: bool,
}

impl PolicySettings {
    /// An empty snapshot stamped with the given creation instant.
    pub fn new(created: DateTime<Utc>) -> Self {
        Self {
            cacheability: Cacheability::default(),
            demoted_for_authorization: false,
            created,
            expires: None,
            max_age: None,
            sliding_expiration: false,
            validation_callbacks: Arc::from([]),
            etag: None,
            last_modified: None,
            etag_from_dependencies: false,
            last_modified_from_dependencies: false,
            vary: VaryMaterials::default(),
            no_store: false,
            no_transforms: false,
            ignore_range_requests: false,
            has_set_cookie: false,
            omit_vary_star: false,
            has_user_provided_dependencies: false,
            no_server_caching: false,
        }
    }

    /// Whether a non-sliding expiration rule is present.
    pub fn has_expiration_policy(&self) -> bool {
        !self.sliding_expiration && (self.expires.is_some() || self.max_age.is_some())
    }

    /// Whether anything can revalidate the entry: callbacks, derived
    /// validators, or literal ones.
    pub fn has_validation_policy(&self) -> bool {
        !self.validation_callbacks.is_empty()
            || self.etag_from_dependencies
            || self.last_modified_from_dependencies
            || self.etag.is_some()
            || self.last_modified.is_some()
    }
}

impl fmt::Debug for PolicySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicySettings")
            .field("cacheability", &self.cacheability)
            .field("demoted_for_authorization", &self.demoted_for_authorization)
            .field("created", &self.created)
            .field("expires", &self.expires)
            .field("max_age", &self.max_age)
            .field("sliding_expiration", &self.sliding_expiration)
            .field("validation_callbacks", &self.validation_callbacks.len())
            .field("etag", &self.etag)
            .field("last_modified", &self.last_modified)
            .field("etag_from_dependencies", &self.etag_from_dependencies)
            .field(
                "last_modified_from_dependencies",
                &self.last_modified_from_dependencies,
            )
            .field("vary", &self.vary)
            .field("no_store", &self.no_store)
            .field("no_transforms", &self.no_transforms)
            .field("ignore_range_requests", &self.ignore_range_requests)
            .field("has_set_cookie", &self.has_set_cookie)
            .field("omit_vary_star", &self.omit_vary_star)
            .field(
                "has_user_provided_dependencies",
                &self.has_user_provided_dependencies,
            )
            .field("no_server_caching", &self.no_server_caching)
            .finish()
    }
}
