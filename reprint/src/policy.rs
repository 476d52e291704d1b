//! In-flight caching policy for the response being generated.
//!
//! While a response is produced the host mutates one [`CachePolicy`];
//! nothing is decided until the response is complete and the policy is
//! offered to [`OutputCache::consider`](crate::OutputCache::consider).
//! Page code, filters, and framework layers all write to the same policy,
//! so repeated declarations merge toward the safe side: the strictest
//! cacheability, the earliest expiration, the smallest max-age, the latest
//! modification instant. An untouched policy admits nothing.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reprint_core::settings::{Cacheability, PolicySettings, ValidationCallback, VaryMaterials};
use reprint_store::DependencyToken;
use smol_str::SmolStr;
use thiserror::Error;

/// Contradictory policy declarations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    /// A literal entity tag may be declared once.
    #[error("entity tag is already set")]
    EtagAlreadySet,
    /// A literal entity tag cannot be combined with dependency-derived tag
    /// generation.
    #[error("entity tag conflicts with dependency-derived tag generation")]
    EtagFromDependencies,
}

/// Request header names the response varies by.
#[derive(Debug, Clone, Default)]
pub struct VaryByHeaders {
    names: Vec<SmolStr>,
    star: bool,
    modified: bool,
}

impl VaryByHeaders {
    /// Adds one header name, canonicalized to its lower-case lookup form.
    /// A `*` declares the response varies by request inputs the cache
    /// cannot enumerate, which makes it inadmissible.
    pub fn add(&mut self, name: &str) {
        self.modified = true;
        if name == "*" {
            self.star = true;
            return;
        }
        if !self.names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            self.names.push(SmolStr::new(name.to_ascii_lowercase()));
        }
    }

    /// Declared names, in lookup form.
    pub fn names(&self) -> &[SmolStr] {
        &self.names
    }

    /// Whether `*` was declared.
    pub fn is_star(&self) -> bool {
        self.star
    }

    fn is_modified(&self) -> bool {
        self.modified
    }
}

/// Parameter names (query string or form fields) the response varies by.
#[derive(Debug, Clone, Default)]
pub struct VaryByParams {
    names: Vec<SmolStr>,
    all: bool,
    ignore: bool,
    modified: bool,
}

impl VaryByParams {
    /// Adds one parameter name, lower-cased. A `*` collapses the whole
    /// declaration to vary-by-all-params.
    pub fn add(&mut self, name: &str) {
        self.modified = true;
        if name == "*" {
            self.all = true;
            return;
        }
        let lowered = name.to_ascii_lowercase();
        if !self.names.iter().any(|n| *n == lowered) {
            self.names.push(SmolStr::new(lowered));
        }
    }

    /// Declares parameters deliberately irrelevant: a parameterless entry
    /// may then answer requests that do carry parameters.
    pub fn set_ignore(&mut self, ignore: bool) {
        self.modified = true;
        self.ignore = ignore;
    }

    /// Declared names, lower-cased.
    pub fn names(&self) -> &[SmolStr] {
        &self.names
    }

    /// Whether the response varies by every parameter.
    pub fn is_all(&self) -> bool {
        self.all
    }

    /// Whether parameters were declared irrelevant.
    pub fn is_ignored(&self) -> bool {
        self.ignore
    }

    fn is_modified(&self) -> bool {
        self.modified
    }
}

/// Content-encoding candidates the response varies by, in server
/// preference order. Order matters: negotiation walks it front to back.
#[derive(Debug, Clone, Default)]
pub struct VaryByContentEncodings {
    encodings: Vec<SmolStr>,
    modified: bool,
}

impl VaryByContentEncodings {
    /// Appends one candidate coding.
    pub fn add(&mut self, coding: &str) {
        self.modified = true;
        if !self.encodings.iter().any(|c| c.eq_ignore_ascii_case(coding)) {
            self.encodings.push(SmolStr::new(coding));
        }
    }

    /// Declared codings, in declaration order.
    pub fn encodings(&self) -> &[SmolStr] {
        &self.encodings
    }

    fn is_modified(&self) -> bool {
        self.modified
    }
}

/// Mutable caching policy accumulated while one response is generated.
///
/// Owned exclusively by its request; it is never shared across threads
/// while mutable. [`OutputCache::consider`](crate::OutputCache::consider)
/// freezes it into a [`PolicySettings`] snapshot on admission.
///
/// ```
/// use chrono::Utc;
/// use reprint::{CachePolicy, Cacheability};
/// use std::time::Duration;
///
/// let mut policy = CachePolicy::new(Utc::now());
/// assert!(!policy.is_modified());
///
/// policy.set_cacheability(Cacheability::Public);
/// policy.set_max_age(Duration::from_secs(120));
/// policy.vary_by_headers_mut().add("Accept-Language");
/// assert!(policy.is_modified());
/// ```
pub struct CachePolicy {
    created: DateTime<Utc>,
    cacheability: Option<Cacheability>,
    expires: Option<DateTime<Utc>>,
    max_age: Option<Duration>,
    sliding_expiration: bool,
    validation_callbacks: Vec<ValidationCallback>,
    etag: Option<SmolStr>,
    etag_from_dependencies: bool,
    last_modified: Option<DateTime<Utc>>,
    last_modified_from_dependencies: bool,
    vary_by_headers: VaryByHeaders,
    vary_by_params: VaryByParams,
    vary_by_content_encodings: VaryByContentEncodings,
    custom: Option<SmolStr>,
    no_store: bool,
    no_transforms: bool,
    ignore_range_requests: bool,
    omit_vary_star: bool,
    no_server_caching: bool,
    dependencies: Vec<DependencyToken>,
    modified: bool,
}

impl CachePolicy {
    /// An untouched policy stamped with the request's UTC start time.
    pub fn new(created: DateTime<Utc>) -> Self {
        Self {
            created,
            cacheability: None,
            expires: None,
            max_age: None,
            sliding_expiration: false,
            validation_callbacks: Vec::new(),
            etag: None,
            etag_from_dependencies: false,
            last_modified: None,
            last_modified_from_dependencies: false,
            vary_by_headers: VaryByHeaders::default(),
            vary_by_params: VaryByParams::default(),
            vary_by_content_encodings: VaryByContentEncodings::default(),
            custom: None,
            no_store: false,
            no_transforms: false,
            ignore_range_requests: false,
            omit_vary_star: false,
            no_server_caching: false,
            dependencies: Vec::new(),
            modified: false,
        }
    }

    /// Whether any declaration was made. Untouched policies fail the first
    /// admission gate.
    pub fn is_modified(&self) -> bool {
        self.modified
            || self.vary_by_headers.is_modified()
            || self.vary_by_params.is_modified()
            || self.vary_by_content_encodings.is_modified()
    }

    /// The request's UTC start time.
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Declares a cacheability class. The first declaration sticks; later
    /// ones only apply when they are more restrictive.
    pub fn set_cacheability(&mut self, cacheability: Cacheability) {
        self.modified = true;
        self.cacheability = Some(match self.cacheability {
            Some(current) => current.most_restrictive(cacheability),
            None => cacheability,
        });
    }

    /// Declares an absolute expiration instant; the earliest one wins.
    pub fn set_expires(&mut self, when: DateTime<Utc>) {
        self.modified = true;
        self.expires = Some(match self.expires {
            Some(current) => current.min(when),
            None => when,
        });
    }

    /// Declares a maximum age measured from `created`; the smallest wins.
    pub fn set_max_age(&mut self, age: Duration) {
        self.modified = true;
        self.max_age = Some(match self.max_age {
            Some(current) => current.min(age),
            None => age,
        });
    }

    /// Expire relative to the latest read instead of an absolute instant.
    pub fn set_sliding_expiration(&mut self, sliding: bool) {
        self.modified = true;
        self.sliding_expiration = sliding;
    }

    /// Declares the content's modification instant; the latest one wins.
    pub fn set_last_modified(&mut self, when: DateTime<Utc>) {
        self.modified = true;
        self.last_modified = Some(match self.last_modified {
            Some(current) => current.max(when),
            None => when,
        });
    }

    /// Derive Last-Modified from the entry's dependencies.
    pub fn set_last_modified_from_dependencies(&mut self) {
        self.modified = true;
        self.last_modified_from_dependencies = true;
    }

    /// Declares the literal entity tag. At most one declaration, and never
    /// combined with [`set_etag_from_dependencies`](Self::set_etag_from_dependencies).
    pub fn set_etag(&mut self, etag: impl Into<SmolStr>) -> Result<(), PolicyError> {
        if self.etag.is_some() {
            return Err(PolicyError::EtagAlreadySet);
        }
        if self.etag_from_dependencies {
            return Err(PolicyError::EtagFromDependencies);
        }
        self.modified = true;
        self.etag = Some(etag.into());
        Ok(())
    }

    /// Derive the entity tag from the entry's dependencies instead of a
    /// literal value.
    pub fn set_etag_from_dependencies(&mut self) -> Result<(), PolicyError> {
        if self.etag.is_some() {
            return Err(PolicyError::EtagFromDependencies);
        }
        self.modified = true;
        self.etag_from_dependencies = true;
        Ok(())
    }

    /// Registers a revalidation callback, run with the live request on
    /// every later hit against the entry.
    pub fn add_validation_callback(&mut self, callback: ValidationCallback) {
        self.modified = true;
        self.validation_callbacks.push(callback);
    }

    /// Registers an invalidation dependency for the entry.
    pub fn add_dependency(&mut self, token: DependencyToken) {
        self.modified = true;
        self.dependencies.push(token);
    }

    /// Registered dependency tokens.
    pub fn dependencies(&self) -> &[DependencyToken] {
        &self.dependencies
    }

    /// Header vary declarations.
    pub fn vary_by_headers(&self) -> &VaryByHeaders {
        &self.vary_by_headers
    }

    /// Header vary declarations, mutable.
    pub fn vary_by_headers_mut(&mut self) -> &mut VaryByHeaders {
        &mut self.vary_by_headers
    }

    /// Parameter vary declarations.
    pub fn vary_by_params(&self) -> &VaryByParams {
        &self.vary_by_params
    }

    /// Parameter vary declarations, mutable.
    pub fn vary_by_params_mut(&mut self) -> &mut VaryByParams {
        &mut self.vary_by_params
    }

    /// Content-encoding vary declarations.
    pub fn vary_by_content_encodings(&self) -> &VaryByContentEncodings {
        &self.vary_by_content_encodings
    }

    /// Content-encoding vary declarations, mutable.
    pub fn vary_by_content_encodings_mut(&mut self) -> &mut VaryByContentEncodings {
        &mut self.vary_by_content_encodings
    }

    /// Declares the opaque argument handed to the custom vary resolver.
    pub fn set_vary_by_custom(&mut self, custom: impl Into<SmolStr>) {
        self.modified = true;
        self.custom = Some(custom.into());
    }

    /// Forbids clients from storing the response.
    pub fn set_no_store(&mut self) {
        self.modified = true;
        self.no_store = true;
    }

    /// Forbids proxies from transforming the body.
    pub fn set_no_transforms(&mut self) {
        self.modified = true;
        self.no_transforms = true;
    }

    /// Serve range requests by bypassing the cache instead of replaying the
    /// full entry.
    pub fn set_ignore_range_requests(&mut self, ignore: bool) {
        self.modified = true;
        self.ignore_range_requests = ignore;
    }

    /// Suppress the `Vary: *` marker the host would otherwise emit.
    pub fn set_omit_vary_star(&mut self, omit: bool) {
        self.modified = true;
        self.omit_vary_star = omit;
    }

    /// Forbids this server from caching, whatever the cacheability class
    /// says. Cannot be undone.
    pub fn set_no_server_caching(&mut self) {
        self.modified = true;
        self.no_server_caching = true;
    }

    /// Freezes the policy into an immutable snapshot.
    pub(crate) fn snapshot(&self) -> PolicySettings {
        let mut settings = PolicySettings::new(self.created);
        settings.cacheability = self.cacheability.unwrap_or_default();
        settings.expires = self.expires;
        settings.max_age = self.max_age;
        settings.sliding_expiration = self.sliding_expiration;
        settings.validation_callbacks = Arc::from(self.validation_callbacks.clone());
        settings.etag = self.etag.clone();
        settings.etag_from_dependencies = self.etag_from_dependencies;
        settings.last_modified = self.last_modified;
        settings.last_modified_from_dependencies = self.last_modified_from_dependencies;
        settings.vary = VaryMaterials {
            content_encodings: self.vary_by_content_encodings.encodings.clone(),
            headers: self.vary_by_headers.names.clone(),
            params: if self.vary_by_params.all {
                Vec::new()
            } else {
                self.vary_by_params.names.clone()
            },
            all_params: self.vary_by_params.all,
            vary_by_unspecified: self.vary_by_headers.star,
            ignore_params: self.vary_by_params.ignore,
            custom: self.custom.clone(),
        };
        settings.no_store = self.no_store;
        settings.no_transforms = self.no_transforms;
        settings.ignore_range_requests = self.ignore_range_requests;
        settings.omit_vary_star = self.omit_vary_star;
        settings.has_user_provided_dependencies = !self.dependencies.is_empty();
        settings.no_server_caching = self.no_server_caching;
        settings
    }
}

impl fmt::Debug for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePolicy")
            .field("created", &self.created)
            .field("cacheability", &self.cacheability)
            .field("expires", &self.expires)
            .field("max_age", &self.max_age)
            .field("sliding_expiration", &self.sliding_expiration)
            .field("validation_callbacks", &self.validation_callbacks.len())
            .field("etag", &self.etag)
            .field("etag_from_dependencies", &self.etag_from_dependencies)
            .field("last_modified", &self.last_modified)
            .field("last_modified_from_dependencies", &self.last_modified_from_dependencies)
            .field("vary_by_headers", &self.vary_by_headers)
            .field("vary_by_params", &self.vary_by_params)
            .field("vary_by_content_encodings", &self.vary_by_content_encodings)
            .field("custom", &self.custom)
            .field("no_store", &self.no_store)
            .field("no_transforms", &self.no_transforms)
            .field("ignore_range_requests", &self.ignore_range_requests)
            .field("omit_vary_star", &self.omit_vary_star)
            .field("no_server_caching", &self.no_server_caching)
            .field("dependencies", &self.dependencies)
            .field("modified", &self.modified)
            .finish()
    }
}
