//! Stored representation of a cached response.

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use smol_str::SmolStr;

use crate::settings::PolicySettings;
use crate::vary::VaryId;

/// Captured response material: status, headers and the buffered body.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// Response status.
    pub status: StatusCode,
    /// Response headers as captured at admission.
    pub headers: HeaderMap,
    /// Body chunks in write order; replayed without re-buffering.
    pub chunks: Vec<Bytes>,
    /// The body embeds post-cache substitution markers, so conditional
    /// shortcuts must not apply.
    pub has_substitution: bool,
}

impl RawResponse {
    /// `Content-Encoding` token of the captured response, if any.
    pub fn content_encoding(&self) -> Option<&str> {
        self.headers
            .get(http::header::CONTENT_ENCODING)
            .and_then(|value| value.to_str().ok())
    }

    /// Total buffered body size in bytes.
    pub fn body_size(&self) -> usize {
        self.chunks.iter().map(Bytes::len).sum()
    }
}

/// A cached response together with the policy it was admitted under.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    raw: RawResponse,
    settings: PolicySettings,
    kernel_cache_handle: Option<SmolStr>,
    vary_id: VaryId,
}

impl CachedEntry {
    /// Packs response material with its frozen policy.
    ///
    /// `vary_id` is [`VaryId::nil`] for entries stored under a bare key.
    pub fn new(
        raw: RawResponse,
        settings: PolicySettings,
        kernel_cache_handle: Option<SmolStr>,
        vary_id: VaryId,
    ) -> Self {
        Self {
            raw,
            settings,
            kernel_cache_handle,
            vary_id,
        }
    }

    /// Captured response material.
    pub fn raw(&self) -> &RawResponse {
        &self.raw
    }

    /// Frozen policy snapshot.
    pub fn settings(&self) -> &PolicySettings {
        &self.settings
    }

    /// Handle of a lower-level kernel cache entry shadowing this one.
    pub fn kernel_cache_handle(&self) -> Option<&str> {
        self.kernel_cache_handle.as_deref()
    }

    /// Id of the vary descriptor this entry was keyed under.
    pub fn vary_id(&self) -> VaryId {
        self.vary_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn raw(chunks: &[&[u8]]) -> RawResponse {
        RawResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            chunks: chunks.iter().map(|c| Bytes::copy_from_slice(c)).collect(),
            has_substitution: false,
        }
    }

    #[test]
    fn body_size_sums_chunks() {
        assert_eq!(raw(&[]).body_size(), 0);
        assert_eq!(raw(&[b"hello", b" ", b"world"]).body_size(), 11);
    }

    #[test]
    fn content_encoding_reads_the_header() {
        let mut response = raw(&[b"x"]);
        assert_eq!(response.content_encoding(), None);
        response.headers.insert(
            http::header::CONTENT_ENCODING,
            http::HeaderValue::from_static("gzip"),
        );
        assert_eq!(response.content_encoding(), Some("gzip"));
    }

    #[test]
    fn bare_entries_carry_the_nil_id() {
        let entry = CachedEntry::new(
            raw(&[b"x"]),
            PolicySettings::new(Utc::now()),
            None,
            VaryId::nil(),
        );
        assert!(entry.vary_id().is_nil());
        assert_eq!(entry.kernel_cache_handle(), None);
    }
}
