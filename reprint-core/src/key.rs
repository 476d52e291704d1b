//! Cache key construction.
//!
//! Every cached response family is addressed by string keys with a fixed
//! grammar:
//!
//! - the **bare key** is `prefix + lowercased path`, where the prefix keeps
//!   the POST keyspace apart from the GET/HEAD keyspace. It addresses the
//!   family's [`VaryDescriptor`], or the response itself when nothing varies.
//! - the **varied key** extends the bare key with one section per vary
//!   dimension, in fixed order: `H` (headers), `Q` (query params), `F` (form
//!   params), `C` (custom string), `D` (POST body digest), `E` (content
//!   encoding). Sections append `N<name>V<value>` pairs; a vary-listed name
//!   with no value is encoded with a sentinel distinct from the empty string,
//!   so "absent" and "present but empty" never collide.
//!
//! The `E` marker always terminates a varied key but the encoding token is
//! never filled in here. The read path appends the negotiated token, the
//! write path appends the response's own `Content-Encoding`.
//!
//! Identical inputs always produce identical keys. Requests that cannot be
//! keyed safely (an unbuffered or oversized POST body that would need
//! digesting) yield no key at all and stay uncacheable.

use std::fmt;

use sha2::{Digest, Sha256};
use smol_str::SmolStr;

use crate::request::{CacheRequest, Params, RequestBody, Verb};
use crate::vary::{CustomVaryResolver, VaryDescriptor};

const GET_KEY_PREFIX: &str = "a2";
const POST_KEY_PREFIX: &str = "a1";

/// Sentinel for a vary-listed name with no value on this request.
const ABSENT_VALUE: &str = "+n+";
/// Sentinel replacing the custom-vary value when the resolver fails.
const RESOLVER_ERROR_VALUE: &str = "+e+";

/// Largest POST body the key builder will digest, in bytes.
pub const DEFAULT_MAX_POST_BODY: usize = 15_000;

/// A canonical output-cache key.
///
/// Cheap to clone and usable directly as a map key.
///
/// ```
/// use reprint_core::key::KeyBuilder;
/// use reprint_core::request::Verb;
///
/// let key = KeyBuilder::default().bare_key(Verb::Get, "/News/Index");
/// assert_eq!(key.as_str(), "a2/news/index");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(SmolStr);

impl CacheKey {
    /// The key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A new key with an encoding token appended after the trailing `E`
    /// marker, addressing one encoded variant of a varying family.
    pub fn with_encoding(&self, token: &str) -> CacheKey {
        let mut key = String::with_capacity(self.0.len() + token.len());
        key.push_str(&self.0);
        key.push_str(token);
        CacheKey(SmolStr::new(key))
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        CacheKey(SmolStr::new(key))
    }
}

/// Builds bare and varied cache keys.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    max_post_body: usize,
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POST_BODY)
    }
}

impl KeyBuilder {
    /// A builder that digests POST bodies up to `max_post_body` bytes.
    pub fn new(max_post_body: usize) -> Self {
        Self { max_post_body }
    }

    /// Key for a path before any vary materials are known.
    ///
    /// HEAD shares the GET keyspace; POST gets its own prefix so a GET and a
    /// POST to the same path can never collide.
    pub fn bare_key(&self, verb: Verb, path: &str) -> CacheKey {
        CacheKey::from(bare(verb, path))
    }

    /// Full key for `request` under `descriptor`.
    ///
    /// With no descriptor this is exactly the bare key. Returns `None` when
    /// the request cannot be keyed: a body-digested POST whose body is
    /// unavailable or larger than the configured cap.
    pub fn build(
        &self,
        request: &CacheRequest,
        descriptor: Option<&VaryDescriptor>,
        custom: Option<&dyn CustomVaryResolver>,
    ) -> Option<CacheKey> {
        let mut key = bare(request.verb(), request.path());
        let Some(descriptor) = descriptor else {
            return Some(CacheKey::from(key));
        };

        // Section order is part of the grammar; reordering changes every key.
        key.push('H');
        if let Some(names) = descriptor.headers() {
            for name in names {
                append_pair(&mut key, name, request.header_values(name));
            }
        }

        key.push('Q');
        if let Some(names) = descriptor.params() {
            for name in names {
                append_pair(&mut key, name, request.query().get(name));
            }
        } else if descriptor.vary_by_all_params() {
            append_all_params(&mut key, request.query());
        }

        key.push('F');
        if request.verb() == Verb::Post {
            if let Some(names) = descriptor.params() {
                let form = (!request.form().is_empty()).then(|| request.form());
                for name in names {
                    append_pair(&mut key, name, form.and_then(|f| f.get(name)));
                }
            } else if descriptor.vary_by_all_params() && !request.form().is_empty() {
                append_all_params(&mut key, request.form());
            }
        }

        key.push('C');
        if let Some(custom_arg) = descriptor.custom() {
            key.push('N');
            key.push_str(custom_arg);
            key.push('V');
            let value = match custom.map(|r| r.resolve(request, custom_arg)) {
                Some(Ok(Some(value))) => value,
                Some(Ok(None)) | None => SmolStr::new_static(ABSENT_VALUE),
                Some(Err(error)) => {
                    tracing::warn!(custom = custom_arg, %error, "custom vary resolver failed");
                    SmolStr::new_static(RESOLVER_ERROR_VALUE)
                }
            };
            key.push_str(&value);
        }

        key.push('D');
        if request.verb() == Verb::Post
            && descriptor.vary_by_all_params()
            && request.form().is_empty()
        {
            match request.body() {
                RequestBody::Empty => {}
                RequestBody::Buffered(bytes) => {
                    if bytes.len() > self.max_post_body {
                        return None;
                    }
                    if !bytes.is_empty() {
                        key.push_str(&hex::encode(Sha256::digest(bytes)));
                    }
                }
                RequestBody::Unavailable => return None,
            }
        }

        // The key must end in E or encoded variants cannot be addressed
        // by appending their token.
        key.push('E');
        Some(CacheKey::from(key))
    }
}

fn bare(verb: Verb, path: &str) -> String {
    let prefix = match verb {
        Verb::Post => POST_KEY_PREFIX,
        _ => GET_KEY_PREFIX,
    };
    let mut key = String::with_capacity(prefix.len() + path.len());
    key.push_str(prefix);
    key.push_str(&path.to_lowercase());
    key
}

fn append_pair(key: &mut String, name: &str, value: Option<SmolStr>) {
    key.push('N');
    key.push_str(name);
    key.push('V');
    match value {
        Some(value) => key.push_str(&value),
        None => key.push_str(ABSENT_VALUE),
    }
}

fn append_all_params(key: &mut String, params: &Params) {
    let mut names: Vec<String> = params.names().map(|n| n.to_lowercase()).collect();
    names.sort_unstable();
    names.dedup();
    for name in &names {
        append_pair(key, name, params.get(name));
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::HeaderMap;
    use http::header::{ACCEPT_CHARSET, ACCEPT_LANGUAGE};

    use super::*;
    use crate::vary::CustomVaryError;

    fn vary_headers(names: &[&str]) -> VaryDescriptor {
        VaryDescriptor::new(
            None,
            Some(names.iter().map(|n| SmolStr::new(n)).collect()),
            None,
            false,
            None,
        )
    }

    fn all_params() -> VaryDescriptor {
        VaryDescriptor::new(None, None, None, true, None)
    }

    #[test]
    fn bare_key_lowers_path_and_separates_verbs() {
        let builder = KeyBuilder::default();
        let get = builder.bare_key(Verb::Get, "/Shop/Basket");
        let head = builder.bare_key(Verb::Head, "/Shop/Basket");
        let post = builder.bare_key(Verb::Post, "/Shop/Basket");
        assert_eq!(get.as_str(), "a2/shop/basket");
        assert_eq!(get, head);
        assert_ne!(get, post);
        assert_eq!(post.as_str(), "a1/shop/basket");
    }

    #[test]
    fn identical_inputs_build_identical_keys() {
        let builder = KeyBuilder::default();
        let descriptor = vary_headers(&["accept-language"]);
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, "da".parse().unwrap());
        let request = CacheRequest::new(Verb::Get, "/index").with_headers(headers);

        let first = builder.build(&request, Some(&descriptor), None).unwrap();
        let second = builder.build(&request, Some(&descriptor), None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn changing_a_vary_listed_header_changes_the_key() {
        let builder = KeyBuilder::default();
        let descriptor = vary_headers(&["accept-language"]);
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, "da".parse().unwrap());
        let danish = CacheRequest::new(Verb::Get, "/index").with_headers(headers);
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, "en".parse().unwrap());
        let english = CacheRequest::new(Verb::Get, "/index").with_headers(headers);

        let a = builder.build(&danish, Some(&descriptor), None).unwrap();
        let b = builder.build(&english, Some(&descriptor), None).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn absent_header_and_empty_header_never_collide() {
        let builder = KeyBuilder::default();
        let descriptor = vary_headers(&["accept-charset"]);
        let absent = CacheRequest::new(Verb::Get, "/index");
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_CHARSET, "".parse().unwrap());
        let empty = CacheRequest::new(Verb::Get, "/index").with_headers(headers);

        let a = builder.build(&absent, Some(&descriptor), None).unwrap();
        let b = builder.build(&empty, Some(&descriptor), None).unwrap();
        assert_ne!(a, b);
        assert!(a.as_str().contains("Naccept-charsetV+n+"));
        assert!(b.as_str().contains("Naccept-charsetV"));
    }

    #[test]
    fn sections_appear_even_when_empty() {
        let builder = KeyBuilder::default();
        let descriptor = vary_headers(&["accept-language"]);
        let request = CacheRequest::new(Verb::Get, "/p");
        let key = builder.build(&request, Some(&descriptor), None).unwrap();
        assert_eq!(key.as_str(), "a2/pHNaccept-languageV+n+QFCDE");
    }

    #[test]
    fn all_params_lowercases_and_sorts_names_but_not_values() {
        let builder = KeyBuilder::default();
        let request = CacheRequest::new(Verb::Get, "/p")
            .with_query(Params::from_pairs([("Zeta", "B"), ("alpha", "A")]));
        let key = builder.build(&request, Some(&all_params()), None).unwrap();
        assert_eq!(key.as_str(), "a2/pHQNalphaVANzetaVBFCDE");
    }

    #[test]
    fn named_form_params_without_a_form_use_the_absent_sentinel() {
        let builder = KeyBuilder::default();
        let descriptor = VaryDescriptor::new(
            None,
            None,
            Some(vec![SmolStr::new("id")]),
            false,
            None,
        );
        let request = CacheRequest::new(Verb::Post, "/p");
        let key = builder.build(&request, Some(&descriptor), None).unwrap();
        assert_eq!(key.as_str(), "a1/pHQNidV+n+FNidV+n+CDE");
    }

    #[test]
    fn form_section_is_bare_for_get_requests() {
        let builder = KeyBuilder::default();
        let descriptor = VaryDescriptor::new(
            None,
            None,
            Some(vec![SmolStr::new("id")]),
            false,
            None,
        );
        let request = CacheRequest::new(Verb::Get, "/p")
            .with_query(Params::from_pairs([("id", "7")]));
        let key = builder.build(&request, Some(&descriptor), None).unwrap();
        assert_eq!(key.as_str(), "a2/pHQNidV7FCDE");
    }

    #[test]
    fn post_body_digest_only_without_a_parsed_form() {
        let builder = KeyBuilder::default();
        let body = Bytes::from_static(b"raw payload");
        let request = CacheRequest::new(Verb::Post, "/p")
            .with_body(RequestBody::Buffered(body.clone()));
        let keyed = builder.build(&request, Some(&all_params()), None).unwrap();
        let digest = hex::encode(Sha256::digest(&body));
        assert!(keyed.as_str().contains(&digest));

        let with_form = CacheRequest::new(Verb::Post, "/p")
            .with_form(Params::from_pairs([("a", "1")]))
            .with_body(RequestBody::Buffered(body));
        let unkeyed = builder.build(&with_form, Some(&all_params()), None).unwrap();
        assert!(!unkeyed.as_str().contains(&digest));
    }

    #[test]
    fn oversized_or_unavailable_bodies_are_uncacheable() {
        let builder = KeyBuilder::new(4);
        let big = CacheRequest::new(Verb::Post, "/p")
            .with_body(RequestBody::Buffered(Bytes::from_static(b"12345")));
        assert!(builder.build(&big, Some(&all_params()), None).is_none());

        let unknown =
            CacheRequest::new(Verb::Post, "/p").with_body(RequestBody::Unavailable);
        assert!(builder.build(&unknown, Some(&all_params()), None).is_none());

        let fits = CacheRequest::new(Verb::Post, "/p")
            .with_body(RequestBody::Buffered(Bytes::from_static(b"1234")));
        assert!(builder.build(&fits, Some(&all_params()), None).is_some());
    }

    #[test]
    fn resolver_failure_keys_with_the_error_sentinel() {
        let builder = KeyBuilder::default();
        let descriptor =
            VaryDescriptor::new(None, None, None, false, Some(SmolStr::new("browser")));
        let request = CacheRequest::new(Verb::Get, "/p");

        let failing = |_: &CacheRequest, _: &str| -> Result<Option<SmolStr>, CustomVaryError> {
            Err("resolver exploded".into())
        };
        let key = builder
            .build(&request, Some(&descriptor), Some(&failing))
            .unwrap();
        assert_eq!(key.as_str(), "a2/pHQFCNbrowserV+e+DE");

        let resolving =
            |_: &CacheRequest, custom: &str| -> Result<Option<SmolStr>, CustomVaryError> {
                Ok(Some(SmolStr::new(custom.to_uppercase())))
            };
        let key = builder
            .build(&request, Some(&descriptor), Some(&resolving))
            .unwrap();
        assert_eq!(key.as_str(), "a2/pHQFCNbrowserVBROWSERDE");

        let silent = |_: &CacheRequest, _: &str| -> Result<Option<SmolStr>, CustomVaryError> {
            Ok(None)
        };
        let key = builder
            .build(&request, Some(&descriptor), Some(&silent))
            .unwrap();
        assert_eq!(key.as_str(), "a2/pHQFCNbrowserV+n+DE");
    }

    #[test]
    fn encoding_suffix_extends_a_varied_key() {
        let builder = KeyBuilder::default();
        let descriptor = VaryDescriptor::new(
            Some(vec![SmolStr::new("gzip")]),
            None,
            None,
            false,
            None,
        );
        let request = CacheRequest::new(Verb::Get, "/p");
        let key = builder.build(&request, Some(&descriptor), None).unwrap();
        assert_eq!(key.as_str(), "a2/pHQFCDE");
        assert_eq!(key.with_encoding("gzip").as_str(), "a2/pHQFCDEgzip");
    }
}
