//! Admission gates for completed responses.
//!
//! After the host finishes generating a response it offers the response,
//! the request that produced it, and the accumulated [`CachePolicy`] to the
//! cache. A fixed gate sequence decides whether the response may be stored;
//! the first failing gate wins and nothing is written. [`evaluate`] is the
//! pure half of that decision, [`OutputCache::consider`](crate::OutputCache::consider)
//! performs the store writes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use http::StatusCode;
use reprint_core::key::CacheKey;
use reprint_core::request::{CacheRequest, Verb};
use reprint_core::response::CacheResponse;
use reprint_core::settings::{Cacheability, PolicySettings};
use reprint_core::vary::VaryDescriptor;
use reprint_store::Expiry;

use crate::config::CacheConfig;
use crate::policy::CachePolicy;

/// The gate that turned a response away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The cache is disabled by configuration.
    Disabled,
    /// No caching declaration was ever made for the response.
    PolicyUntouched,
    /// Only `200 OK` responses are cacheable.
    NonSuccessStatus,
    /// Only GET and POST responses are cacheable.
    UnsupportedVerb,
    /// The response was streamed instead of buffered.
    Unbuffered,
    /// The declared cacheability keeps the response off this server.
    NotServerCacheable,
    /// The policy forbids caching on this server outright.
    NoServerCaching,
    /// The response set cookies that must not be shared.
    NonShareableCookies,
    /// Neither an expiration rule nor any way to revalidate.
    NoExpirationOrValidation,
    /// The response varies by request inputs the cache cannot model.
    VariesByUnspecified,
    /// The request carried parameters no vary declaration accounts for.
    UnkeyedParams,
    /// The emitted `Content-Encoding` is not among the declared candidates.
    EncodingNotDeclared,
    /// The computed absolute expiration was already in the past.
    AlreadyExpired,
    /// The POST body needed for the key was unavailable or over the cap.
    UncacheableBody,
}

impl RejectReason {
    /// Stable label for accounting.
    pub const fn as_str(self) -> &'static str {
        match self {
            RejectReason::Disabled => "disabled",
            RejectReason::PolicyUntouched => "policy_untouched",
            RejectReason::NonSuccessStatus => "non_success_status",
            RejectReason::UnsupportedVerb => "unsupported_verb",
            RejectReason::Unbuffered => "unbuffered",
            RejectReason::NotServerCacheable => "not_server_cacheable",
            RejectReason::NoServerCaching => "no_server_caching",
            RejectReason::NonShareableCookies => "non_shareable_cookies",
            RejectReason::NoExpirationOrValidation => "no_expiration_or_validation",
            RejectReason::VariesByUnspecified => "varies_by_unspecified",
            RejectReason::UnkeyedParams => "unkeyed_params",
            RejectReason::EncodingNotDeclared => "encoding_not_declared",
            RejectReason::AlreadyExpired => "already_expired",
            RejectReason::UncacheableBody => "uncacheable_body",
        }
    }
}

/// What an admitted response will be stored with.
#[derive(Debug, Clone)]
pub struct AdmissionPlan {
    /// Frozen policy snapshot, authorization demotion applied.
    pub settings: PolicySettings,
    /// Store-facing expiration rule.
    pub expiry: Expiry,
}

/// Outcome of offering one response to the cache.
#[derive(Debug)]
pub enum Admission {
    /// The response was stored.
    Admitted {
        /// Key the response entry was stored under.
        key: CacheKey,
        /// Descriptor installed under the bare key; `None` when the
        /// response does not vary.
        descriptor: Option<Arc<VaryDescriptor>>,
        /// Expiration rule applied to the entry.
        expiry: Expiry,
    },
    /// A gate turned the response away; nothing was stored.
    Rejected(RejectReason),
}

/// Runs the admission gates and computes the storage plan.
///
/// Pure: no clock reads and no store access. `now` anchors the check for
/// expirations that are already over before the entry would be written.
///
/// The gates run in declaration order and the first failure wins:
/// untouched policy, non-200 status, verb, unbuffered response,
/// cacheability (a Public response on an authorized request is demoted to
/// Private in the snapshot and passes), the no-server-caching flag,
/// non-shareable cookies, the existence of an expiration or validation
/// policy, vary-by-unspecified, unkeyed parameters, an emitted encoding
/// outside the declared candidates.
pub fn evaluate(
    request: &CacheRequest,
    response: &CacheResponse,
    policy: &CachePolicy,
    config: &CacheConfig,
    now: DateTime<Utc>,
) -> Result<AdmissionPlan, RejectReason> {
    if !config.enabled {
        return Err(RejectReason::Disabled);
    }
    if !policy.is_modified() {
        return Err(RejectReason::PolicyUntouched);
    }
    if response.status() != StatusCode::OK {
        return Err(RejectReason::NonSuccessStatus);
    }
    if !request.verb().admissible() {
        return Err(RejectReason::UnsupportedVerb);
    }
    if !response.is_buffered() {
        return Err(RejectReason::Unbuffered);
    }

    let mut settings = policy.snapshot();
    settings.has_set_cookie = response.has_non_shareable_cookies();
    if config.omit_vary_star {
        settings.omit_vary_star = true;
    }

    if settings.cacheability == Cacheability::Public && request.requires_authorization() {
        // Not rejected: the response stays cacheable, but the snapshot must
        // say Private so later consumers treat it as non-shared.
        settings.cacheability = Cacheability::Private;
        settings.demoted_for_authorization = true;
    } else if !settings.cacheability.server_cacheable() {
        return Err(RejectReason::NotServerCacheable);
    }
    if settings.no_server_caching {
        return Err(RejectReason::NoServerCaching);
    }
    if response.has_non_shareable_cookies() {
        return Err(RejectReason::NonShareableCookies);
    }
    if !settings.has_expiration_policy() && !settings.has_validation_policy() {
        return Err(RejectReason::NoExpirationOrValidation);
    }
    if settings.vary.vary_by_unspecified {
        return Err(RejectReason::VariesByUnspecified);
    }
    if !settings.vary.accepts_params()
        && (request.verb() == Verb::Post || !request.query().is_empty())
    {
        return Err(RejectReason::UnkeyedParams);
    }
    if let Some(token) = response.content_encoding()
        && !settings.vary.content_encodings.is_empty()
        && !settings
            .vary
            .content_encodings
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(token))
    {
        return Err(RejectReason::EncodingNotDeclared);
    }

    let expiry = expiry_for(&settings, now)?;
    Ok(AdmissionPlan { settings, expiry })
}

/// Expiration priority is sliding over max-age over absolute expires.
///
/// A sliding window defaults to the max-age, then to the distance between
/// creation and the absolute expiration. A validation-only policy stores
/// without expiration.
fn expiry_for(settings: &PolicySettings, now: DateTime<Utc>) -> Result<Expiry, RejectReason> {
    if settings.sliding_expiration {
        let window = settings.max_age.or_else(|| {
            settings
                .expires
                .and_then(|when| (when - settings.created).to_std().ok())
        });
        return Ok(match window {
            Some(window) => Expiry::Sliding(window),
            None => Expiry::Never,
        });
    }
    let at = match (settings.max_age, settings.expires) {
        (Some(age), _) => settings.created + age,
        (None, Some(when)) => when,
        (None, None) => return Ok(Expiry::Never),
    };
    if at <= now {
        return Err(RejectReason::AlreadyExpired);
    }
    Ok(Expiry::At(at))
}
