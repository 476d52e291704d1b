//! Conditional-request evaluation against a cached entry.
//!
//! Decides whether a request carrying `If-Modified-Since` or `If-None-Match`
//! can be answered with `304 Not Modified` instead of replaying the entry.

use crate::entry::CachedEntry;
use crate::http_date;
use crate::request::CacheRequest;

/// Outcome of evaluating the conditional headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalDecision {
    /// Replay the full cached response.
    Serve,
    /// Answer `304 Not Modified`: status only, no body, and any headers
    /// already staged for the cached variant cleared first.
    NotModified,
}

/// Evaluates the request's conditional headers against `entry`.
///
/// An entry whose body still contains substitution markers is always
/// re-rendered in full, so conditional shortcuts are skipped for it.
///
/// `If-Modified-Since` is satisfied only when the entry carries an explicit
/// last-modified instant that is at or before the header's instant, and the
/// header's instant is not in the future of the request itself. A header
/// that fails to parse as an HTTP date is ignored. `If-None-Match` is
/// consulted unless `If-Modified-Since` already failed, and its verdict then
/// replaces the earlier one, so a non-matching tag vetoes a satisfied date
/// check. Tokens are compared byte for byte against the entry's tag, except
/// a leading `*` which matches any entry.
///
/// # Example
///
/// ```rust
/// use chrono::{Duration, TimeZone, Utc};
/// use http::{HeaderMap, HeaderValue, StatusCode};
/// use reprint_core::conditional::{self, ConditionalDecision};
/// use reprint_core::entry::{CachedEntry, RawResponse};
/// use reprint_core::request::{CacheRequest, Verb};
/// use reprint_core::settings::PolicySettings;
/// use reprint_core::vary::VaryId;
///
/// let modified = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
/// let mut settings = PolicySettings::new(modified);
/// settings.last_modified = Some(modified);
/// let raw = RawResponse {
///     status: StatusCode::OK,
///     headers: HeaderMap::new(),
///     chunks: Vec::new(),
///     has_substitution: false,
/// };
/// let entry = CachedEntry::new(raw, settings, None, VaryId::nil());
///
/// let mut headers = HeaderMap::new();
/// headers.insert(
///     "if-modified-since",
///     HeaderValue::from_static("Sun, 01 Jun 2025 00:00:00 GMT"),
/// );
/// let request = CacheRequest::new(Verb::Get, "/page")
///     .with_headers(headers)
///     .with_received_at(modified + Duration::hours(1));
///
/// assert_eq!(
///     conditional::evaluate(&request, &entry),
///     ConditionalDecision::NotModified
/// );
/// ```
pub fn evaluate(request: &CacheRequest, entry: &CachedEntry) -> ConditionalDecision {
    if entry.raw().has_substitution {
        return ConditionalDecision::Serve;
    }
    let settings = entry.settings();

    // None: no conditional header said anything yet. Some(false) is final,
    // Some(true) can still be overturned by If-None-Match.
    let mut not_modified: Option<bool> = None;

    if let Some(raw) = request.header("if-modified-since")
        && let Some(since) = http_date::parse(raw)
    {
        not_modified = Some(match settings.last_modified {
            Some(last_modified) => last_modified <= since && since <= request.received_at(),
            None => false,
        });
    }

    if not_modified != Some(false)
        && let Some(tags) = request.header_values("if-none-match")
    {
        let mut tokens = tags.split([',', ' ']).filter(|token| !token.is_empty());
        let matched = match tokens.next() {
            Some("*") => true,
            Some(first) => std::iter::once(first)
                .chain(tokens)
                .any(|token| Some(token) == settings.etag.as_deref()),
            None => false,
        };
        not_modified = Some(matched);
    }

    if not_modified == Some(true) {
        ConditionalDecision::NotModified
    } else {
        ConditionalDecision::Serve
    }
}
