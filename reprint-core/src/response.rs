//! In-flight response as seen by the cache at admission time.

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use smol_str::SmolStr;

use crate::entry::RawResponse;

/// Response material the host hands over when a request finishes.
///
/// Built incrementally while the response streams out. [`snapshot`] freezes
/// it into the stored [`RawResponse`] form; `Bytes` chunks make that cheap.
///
/// [`snapshot`]: CacheResponse::snapshot
#[derive(Debug, Clone)]
pub struct CacheResponse {
    status: StatusCode,
    headers: HeaderMap,
    chunks: Vec<Bytes>,
    buffered: bool,
    has_non_shareable_cookies: bool,
    has_substitution: bool,
    kernel_cache_handle: Option<SmolStr>,
}

impl CacheResponse {
    /// A buffered response with the given status and no body yet.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            chunks: Vec::new(),
            buffered: true,
            has_non_shareable_cookies: false,
            has_substitution: false,
            kernel_cache_handle: None,
        }
    }

    /// Replaces the response headers.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Appends a body chunk.
    pub fn push_chunk(mut self, chunk: Bytes) -> Self {
        self.chunks.push(chunk);
        self
    }

    /// Marks whether the whole body passed through the buffer.
    ///
    /// A response that streamed past the buffer cannot be replayed and is
    /// never admitted.
    pub fn with_buffered(mut self, buffered: bool) -> Self {
        self.buffered = buffered;
        self
    }

    /// Marks that a cookie not shareable across clients was written.
    pub fn with_non_shareable_cookies(mut self, value: bool) -> Self {
        self.has_non_shareable_cookies = value;
        self
    }

    /// Marks that the body embeds post-cache substitution markers.
    pub fn with_substitution(mut self, value: bool) -> Self {
        self.has_substitution = value;
        self
    }

    /// Attaches the handle of a kernel cache entry shadowing this response.
    pub fn with_kernel_cache_handle(mut self, handle: impl Into<SmolStr>) -> Self {
        self.kernel_cache_handle = Some(handle.into());
        self
    }

    /// Response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Body chunks accumulated so far.
    pub fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }

    /// Whether the whole body passed through the buffer.
    pub fn is_buffered(&self) -> bool {
        self.buffered
    }

    /// Whether a non-shareable cookie was written.
    pub fn has_non_shareable_cookies(&self) -> bool {
        self.has_non_shareable_cookies
    }

    /// Whether the body embeds substitution markers.
    pub fn has_substitution(&self) -> bool {
        self.has_substitution
    }

    /// Handle of a kernel cache entry shadowing this response.
    pub fn kernel_cache_handle(&self) -> Option<&str> {
        self.kernel_cache_handle.as_deref()
    }

    /// `Content-Encoding` token of the response, if any.
    pub fn content_encoding(&self) -> Option<&str> {
        self.headers
            .get(http::header::CONTENT_ENCODING)
            .and_then(|value| value.to_str().ok())
    }

    /// Freezes the response into its stored form.
    pub fn snapshot(&self) -> RawResponse {
        RawResponse {
            status: self.status,
            headers: self.headers.clone(),
            chunks: self.chunks.clone(),
            has_substitution: self.has_substitution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_carries_body_and_markers() {
        let response = CacheResponse::new(StatusCode::OK)
            .push_chunk(Bytes::from_static(b"<html>"))
            .push_chunk(Bytes::from_static(b"</html>"))
            .with_substitution(true);
        let raw = response.snapshot();
        assert_eq!(raw.status, StatusCode::OK);
        assert_eq!(raw.body_size(), 13);
        assert!(raw.has_substitution);
    }

    #[test]
    fn new_responses_start_buffered() {
        let response = CacheResponse::new(StatusCode::OK);
        assert!(response.is_buffered());
        assert!(!response.with_buffered(false).is_buffered());
    }
}
