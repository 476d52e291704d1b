//! Vary dimensions and their descriptor.
//!
//! A [`VaryDescriptor`] records which request attributes split one path into
//! a family of cached responses. The descriptor is stored under the bare key;
//! each concrete response is stored under a varied key derived from the
//! descriptor plus the live request. The descriptor's [`VaryId`] ties the two
//! together: a response entry whose id no longer equals the descriptor's was
//! written for an older shape of the family and must not be served.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use smol_str::SmolStr;
use uuid::Uuid;

use crate::request::CacheRequest;

/// 128-bit identity of one descriptor generation.
///
/// Fresh ids are random; [`VaryId::nil`] marks entries that do not vary at
/// all. Equality of ids is what proves a varied entry still belongs to the
/// descriptor that produced its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VaryId(Uuid);

impl VaryId {
    /// A new random id.
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }

    /// The all-zero id used by entries without a vary descriptor.
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// True for the all-zero id.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for VaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Error type surfaced by a [`CustomVaryResolver`].
pub type CustomVaryError = Box<dyn Error + Send + Sync>;

/// Resolves the application-defined custom vary string.
///
/// `custom` is the opaque argument the response declared; the resolver turns
/// it plus the live request into the discriminator value baked into the key.
/// Returning `Ok(None)` means "no opinion" and keys like an absent value.
/// Errors are logged and folded into a distinguished sentinel by the key
/// builder, so a failing resolver still yields a stable key.
pub trait CustomVaryResolver: Send + Sync {
    /// Produces the discriminator for `custom` on this request.
    fn resolve(
        &self,
        request: &CacheRequest,
        custom: &str,
    ) -> Result<Option<SmolStr>, CustomVaryError>;
}

impl<F> CustomVaryResolver for F
where
    F: Fn(&CacheRequest, &str) -> Result<Option<SmolStr>, CustomVaryError> + Send + Sync,
{
    fn resolve(
        &self,
        request: &CacheRequest,
        custom: &str,
    ) -> Result<Option<SmolStr>, CustomVaryError> {
        self(request, custom)
    }
}

impl<T> CustomVaryResolver for Arc<T>
where
    T: CustomVaryResolver + ?Sized,
{
    fn resolve(
        &self,
        request: &CacheRequest,
        custom: &str,
    ) -> Result<Option<SmolStr>, CustomVaryError> {
        (**self).resolve(request, custom)
    }
}

/// The dimensions a cached response family varies on.
///
/// Collections are immutable shared slices; a descriptor is built once at
/// admission and then read concurrently without copying. Structural equality
/// deliberately ignores [`VaryDescriptor::id`]: two descriptors with the same
/// materials are interchangeable even when constructed independently.
#[derive(Debug, Clone)]
pub struct VaryDescriptor {
    content_encodings: Option<Arc<[SmolStr]>>,
    headers: Option<Arc<[SmolStr]>>,
    params: Option<Arc<[SmolStr]>>,
    vary_by_all_params: bool,
    custom: Option<SmolStr>,
    id: VaryId,
}

impl VaryDescriptor {
    /// Builds a descriptor with a fresh [`VaryId`].
    ///
    /// Empty collections normalize to `None` so structural equality cannot
    /// distinguish "no names" from "an empty list of names". `params` and
    /// `vary_by_all_params` are mutually exclusive.
    pub fn new(
        content_encodings: Option<Vec<SmolStr>>,
        headers: Option<Vec<SmolStr>>,
        params: Option<Vec<SmolStr>>,
        vary_by_all_params: bool,
        custom: Option<SmolStr>,
    ) -> Self {
        debug_assert!(params.is_none() || !vary_by_all_params);
        Self {
            content_encodings: normalize(content_encodings),
            headers: normalize(headers),
            params: if vary_by_all_params {
                None
            } else {
                normalize(params)
            },
            vary_by_all_params,
            custom,
            id: VaryId::fresh(),
        }
    }

    /// Candidate content encodings, server preference order.
    pub fn content_encodings(&self) -> Option<&[SmolStr]> {
        self.content_encodings.as_deref()
    }

    /// Request header names the family varies by.
    pub fn headers(&self) -> Option<&[SmolStr]> {
        self.headers.as_deref()
    }

    /// Query/form parameter names the family varies by.
    pub fn params(&self) -> Option<&[SmolStr]> {
        self.params.as_deref()
    }

    /// Whether every request parameter participates in the key.
    pub fn vary_by_all_params(&self) -> bool {
        self.vary_by_all_params
    }

    /// Opaque argument for the custom vary resolver.
    pub fn custom(&self) -> Option<&str> {
        self.custom.as_deref()
    }

    /// This generation's identity token.
    pub fn id(&self) -> VaryId {
        self.id
    }
}

impl PartialEq for VaryDescriptor {
    fn eq(&self, other: &Self) -> bool {
        // id is identity, not shape; two independently built descriptors
        // with the same materials must compare equal
        self.content_encodings == other.content_encodings
            && self.headers == other.headers
            && self.params == other.params
            && self.vary_by_all_params == other.vary_by_all_params
            && self.custom == other.custom
    }
}

impl Eq for VaryDescriptor {}

fn normalize(values: Option<Vec<SmolStr>>) -> Option<Arc<[SmolStr]>> {
    values.filter(|v| !v.is_empty()).map(Arc::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(values: &[&str]) -> Option<Vec<SmolStr>> {
        Some(values.iter().map(|v| SmolStr::new(v)).collect())
    }

    #[test]
    fn structural_equality_ignores_id() {
        let a = VaryDescriptor::new(None, names(&["accept-language"]), None, false, None);
        let b = VaryDescriptor::new(None, names(&["accept-language"]), None, false, None);
        assert_eq!(a, b);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn different_materials_compare_unequal() {
        let a = VaryDescriptor::new(None, names(&["accept-language"]), None, false, None);
        let b = VaryDescriptor::new(None, names(&["accept-charset"]), None, false, None);
        assert_ne!(a, b);
    }

    #[test]
    fn empty_collections_normalize_to_none() {
        let a = VaryDescriptor::new(Some(Vec::new()), None, None, false, None);
        let b = VaryDescriptor::new(None, None, None, false, None);
        assert_eq!(a, b);
        assert!(a.content_encodings().is_none());
    }

    #[test]
    fn fresh_ids_are_unique_and_not_nil() {
        let a = VaryDescriptor::new(None, None, None, true, None);
        assert!(!a.id().is_nil());
        assert!(VaryId::nil().is_nil());
        assert_ne!(VaryId::fresh(), VaryId::fresh());
    }
}
