//! Request-side view consumed by the cache engine.
//!
//! The host pipeline captures the facts the engine needs into a
//! [`CacheRequest`] before asking for a lookup, and again when offering the
//! finished response for admission. The engine never touches the transport
//! itself.
//!
//! Two collections deserve a note:
//!
//! - [`Params`] is an ordered multi-value map for query strings and form
//!   bodies. Name lookups are ASCII case-insensitive and repeated names keep
//!   every value.
//! - [`RequestBody`] distinguishes "no body" from "body we could not buffer".
//!   The latter makes body-keyed POST requests uncacheable instead of silently
//!   mis-keying them.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderMap, Method};
use smol_str::SmolStr;

/// HTTP verbs the output cache distinguishes.
///
/// `Head` shares the GET keyspace: a HEAD request can be answered from a
/// cached GET response with the body suppressed, but HEAD responses are never
/// admitted on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// GET request.
    Get,
    /// HEAD request, served from the GET keyspace.
    Head,
    /// POST request, keyed in its own keyspace.
    Post,
    /// Any other method, invisible to the cache.
    Other,
}

impl Verb {
    /// Whether a response to this verb may enter the cache.
    pub const fn admissible(self) -> bool {
        matches!(self, Verb::Get | Verb::Post)
    }

    /// Whether a request with this verb may be served from the cache.
    pub const fn servable(self) -> bool {
        matches!(self, Verb::Get | Verb::Head | Verb::Post)
    }
}

impl From<&Method> for Verb {
    fn from(method: &Method) -> Self {
        match *method {
            Method::GET => Verb::Get,
            Method::HEAD => Verb::Head,
            Method::POST => Verb::Post,
            _ => Verb::Other,
        }
    }
}

/// An ordered multi-value parameter collection (query string or form body).
///
/// Iteration follows insertion order. Lookups are ASCII case-insensitive, and
/// a name that appears several times yields all of its values joined with
/// `,`, the way header-style collections concatenate repeated fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    pairs: Vec<(SmolStr, SmolStr)>,
}

impl Params {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a collection from `(name, value)` pairs, keeping order.
    pub fn from_pairs<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<SmolStr>,
        V: Into<SmolStr>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        }
    }

    /// Appends one `(name, value)` pair.
    pub fn push(&mut self, name: impl Into<SmolStr>, value: impl Into<SmolStr>) {
        self.pairs.push((name.into(), value.into()));
    }

    /// Joined value for `name`, or `None` when the name never occurs.
    ///
    /// A name that is present with an empty value returns `Some("")`, which
    /// key construction keeps distinct from an absent name.
    pub fn get(&self, name: &str) -> Option<SmolStr> {
        let mut values = self
            .pairs
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str());
        let first = values.next()?;
        match values.next() {
            None => Some(SmolStr::new(first)),
            Some(second) => {
                let mut joined = String::with_capacity(first.len() + second.len() + 1);
                joined.push_str(first);
                joined.push(',');
                joined.push_str(second);
                for value in values {
                    joined.push(',');
                    joined.push_str(value);
                }
                Some(SmolStr::new(joined))
            }
        }
    }

    /// Distinct names in first-occurrence order (ASCII case-insensitive).
    pub fn names(&self) -> impl Iterator<Item = &SmolStr> {
        self.pairs
            .iter()
            .enumerate()
            .filter(|(i, (name, _))| {
                !self.pairs[..*i]
                    .iter()
                    .any(|(seen, _)| seen.eq_ignore_ascii_case(name))
            })
            .map(|(_, (name, _))| name)
    }

    /// Number of stored pairs, repeats included.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// True when no pair is stored.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Raw request body as seen by the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RequestBody {
    /// No body at all.
    #[default]
    Empty,
    /// Fully buffered body bytes.
    Buffered(Bytes),
    /// A body exists but could not be fully buffered, or its length is
    /// unknown. Requests that would be keyed by body content become
    /// uncacheable in this state.
    Unavailable,
}

/// The request-side facts the engine needs, captured once by the host.
///
/// Construction is builder-flavored:
///
/// ```
/// use reprint_core::request::{CacheRequest, Params, Verb};
///
/// let request = CacheRequest::new(Verb::Get, "/news/Today")
///     .with_query(Params::from_pairs([("page", "2")]));
/// assert_eq!(request.path(), "/news/Today");
/// ```
#[derive(Debug, Clone)]
pub struct CacheRequest {
    verb: Verb,
    path: SmolStr,
    headers: HeaderMap,
    query: Params,
    form: Params,
    body: RequestBody,
    received_at: DateTime<Utc>,
    requires_authorization: bool,
}

impl CacheRequest {
    /// Creates a request view with empty collections and `received_at` set
    /// to the current instant.
    pub fn new(verb: Verb, path: impl Into<SmolStr>) -> Self {
        Self {
            verb,
            path: path.into(),
            headers: HeaderMap::new(),
            query: Params::new(),
            form: Params::new(),
            body: RequestBody::Empty,
            received_at: Utc::now(),
            requires_authorization: false,
        }
    }

    /// Replaces the header map.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Replaces the query-string collection.
    pub fn with_query(mut self, query: Params) -> Self {
        self.query = query;
        self
    }

    /// Replaces the parsed form collection.
    pub fn with_form(mut self, form: Params) -> Self {
        self.form = form;
        self
    }

    /// Replaces the raw body.
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// Overrides the request-start timestamp.
    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    /// Marks whether the request required authorization to run.
    pub fn with_authorization(mut self, required: bool) -> Self {
        self.requires_authorization = required;
        self
    }

    /// The request verb.
    pub fn verb(&self) -> Verb {
        self.verb
    }

    /// The request path, as received (lower-casing happens in the key).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The full header map.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of `name` as UTF-8 text, if present and decodable.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Every value of `name` joined with `,`, decoded lossily.
    ///
    /// Returns `None` when the header is absent entirely, which the key
    /// builder maps to the absent-value sentinel.
    pub fn header_values(&self, name: &str) -> Option<SmolStr> {
        let mut values = self.headers.get_all(name).iter();
        let first = values.next()?;
        let mut joined = String::from_utf8_lossy(first.as_bytes()).into_owned();
        for value in values {
            joined.push(',');
            joined.push_str(&String::from_utf8_lossy(value.as_bytes()));
        }
        Some(SmolStr::new(joined))
    }

    /// The query-string collection.
    pub fn query(&self) -> &Params {
        &self.query
    }

    /// The parsed form collection (empty when the body was not a form).
    pub fn form(&self) -> &Params {
        &self.form
    }

    /// The raw body.
    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// UTC instant the request started.
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Whether authorization was required to run this request.
    pub fn requires_authorization(&self) -> bool {
        self.requires_authorization
    }
}
