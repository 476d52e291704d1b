//! Cache lookup orchestration.
//!
//! One lookup is a small state machine: the bare key resolves either a
//! response directly or a vary descriptor; a descriptor leads to a varied
//! key, retried across encoding variants when the family varies by
//! encoding; and a raw hit still has to clear the policy checks and the
//! conditional evaluation before anything is served. Transitions are
//! logged at trace level. Store read failures never propagate; they
//! degrade to a miss and the host regenerates.

use std::fmt;
use std::sync::Arc;

use reprint_core::conditional::{self, ConditionalDecision};
use reprint_core::encoding::{self, Negotiated};
use reprint_core::entry::CachedEntry;
use reprint_core::key::{CacheKey, KeyBuilder};
use reprint_core::request::{CacheRequest, Verb};
use reprint_core::settings::ValidationStatus;
use reprint_core::vary::{CustomVaryResolver, VaryDescriptor};
use reprint_store::{Store, StoredValue};

use crate::metrics;

/// Outcome of one cache lookup.
#[derive(Debug)]
pub enum Lookup {
    /// No servable entry. The host generates the response and may offer it
    /// back through [`OutputCache::consider`](crate::OutputCache::consider).
    Miss,
    /// The cache declined to take part in this request; distinct from a
    /// miss for accounting.
    Bypass,
    /// Replay the stored response.
    Serve {
        /// The cached response to replay.
        entry: Arc<CachedEntry>,
        /// False for HEAD requests: send status and headers only.
        include_body: bool,
    },
    /// The client's copy is current; answer `304 Not Modified` with status
    /// only, no variant headers and no body.
    NotModified {
        /// The entry the conditional headers were evaluated against.
        entry: Arc<CachedEntry>,
    },
}

/// Engine pieces one lookup borrows.
pub(crate) struct LookupContext<'a, S> {
    pub store: &'a S,
    pub key_builder: &'a KeyBuilder,
    pub custom: Option<&'a dyn CustomVaryResolver>,
}

enum State {
    BareLookup,
    VariedLookup { descriptor: Arc<VaryDescriptor> },
    PolicyChecks { entry: Arc<CachedEntry>, found_under: CacheKey },
    Conditional { entry: Arc<CachedEntry> },
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::BareLookup => f.write_str("State::BareLookup"),
            State::VariedLookup { .. } => f.write_str("State::VariedLookup"),
            State::PolicyChecks { .. } => f.write_str("State::PolicyChecks"),
            State::Conditional { .. } => f.write_str("State::Conditional"),
        }
    }
}

enum VariedOutcome {
    Found { entry: Arc<CachedEntry>, key: CacheKey },
    Miss,
}

pub(crate) async fn run<S: Store>(ctx: &LookupContext<'_, S>, request: &CacheRequest) -> Lookup {
    let bare = ctx.key_builder.bare_key(request.verb(), request.path());
    let mut state = State::BareLookup;
    loop {
        tracing::trace!(state = ?state, key = bare.as_str(), "lookup");
        state = match state {
            State::BareLookup => match read(ctx.store, &bare).await {
                None => return Lookup::Miss,
                Some(StoredValue::Entry(entry)) => State::PolicyChecks {
                    entry,
                    found_under: bare.clone(),
                },
                Some(StoredValue::Vary(descriptor)) => State::VariedLookup { descriptor },
            },
            State::VariedLookup { descriptor } => {
                match varied_lookup(ctx, request, &descriptor).await {
                    VariedOutcome::Miss => return Lookup::Miss,
                    VariedOutcome::Found { entry, key } => {
                        if entry.vary_id() != descriptor.id() {
                            // Written for an older shape of the family.
                            tracing::debug!(key = key.as_str(), "stale variant evicted");
                            if let Err(error) = ctx.store.remove(&key).await {
                                tracing::warn!(%error, "stale variant eviction failed");
                            }
                            metrics::record_stale_vary_eviction();
                            return Lookup::Miss;
                        }
                        State::PolicyChecks {
                            entry,
                            found_under: key,
                        }
                    }
                }
            }
            State::PolicyChecks { entry, found_under } => {
                match policy_checks(ctx, request, &entry, &found_under).await {
                    Some(outcome) => return outcome,
                    None => State::Conditional { entry },
                }
            }
            State::Conditional { entry } => {
                return match conditional::evaluate(request, &entry) {
                    ConditionalDecision::NotModified => Lookup::NotModified { entry },
                    ConditionalDecision::Serve => Lookup::Serve {
                        entry,
                        include_body: request.verb() != Verb::Head,
                    },
                };
            }
        };
    }
}

/// Resolves the concrete variant for a descriptor hit.
///
/// With an encoding vary this is the negotiation loop: a negotiated
/// candidate whose variant is not stored resumes the scan behind it, and
/// once any concrete candidate was negotiated the identity variant is off
/// the table.
async fn varied_lookup<S: Store>(
    ctx: &LookupContext<'_, S>,
    request: &CacheRequest,
    descriptor: &VaryDescriptor,
) -> VariedOutcome {
    // No key means the request cannot address this family at all, for
    // example a POST body over the digest cap.
    let Some(base) = ctx.key_builder.build(request, Some(descriptor), ctx.custom) else {
        return VariedOutcome::Miss;
    };
    let Some(candidates) = descriptor.content_encodings() else {
        return entry_at(ctx.store, base).await;
    };

    let header = request.header_values("accept-encoding");
    let header = header.as_deref();
    let mut start = 0;
    let mut identity_allowed = true;
    loop {
        match encoding::select_encoding(candidates, start, header) {
            Negotiated::Candidate(index) => {
                identity_allowed = false;
                let key = base.with_encoding(&candidates[index]);
                if let found @ VariedOutcome::Found { .. } = entry_at(ctx.store, key).await {
                    return found;
                }
                // Variant not stored; resume the scan behind it.
                start = index + 1;
            }
            Negotiated::Identity if identity_allowed => {
                return entry_at(ctx.store, base).await;
            }
            Negotiated::Identity | Negotiated::NotAcceptable => return VariedOutcome::Miss,
        }
    }
}

async fn entry_at<S: Store>(store: &S, key: CacheKey) -> VariedOutcome {
    match read(store, &key).await {
        Some(StoredValue::Entry(entry)) => VariedOutcome::Found { entry, key },
        Some(StoredValue::Vary(_)) => {
            debug_assert!(false, "vary descriptor stored under a varied key");
            VariedOutcome::Miss
        }
        None => VariedOutcome::Miss,
    }
}

/// Post-hit gates. `None` lets the entry move on to conditional
/// evaluation; `Some` ends the lookup.
async fn policy_checks<S: Store>(
    ctx: &LookupContext<'_, S>,
    request: &CacheRequest,
    entry: &Arc<CachedEntry>,
    found_under: &CacheKey,
) -> Option<Lookup> {
    let settings = entry.settings();

    // A no-vary entry cannot answer a request that carries parameters,
    // unless parameters were declared irrelevant.
    if entry.vary_id().is_nil()
        && !settings.vary.ignore_params
        && (request.verb() == Verb::Post || !request.query().is_empty())
    {
        return Some(Lookup::Miss);
    }

    if settings.ignore_range_requests && is_range_request(request) {
        tracing::debug!(key = found_under.as_str(), "range request bypasses the cache");
        return Some(Lookup::Bypass);
    }

    let mut ignore = false;
    for callback in settings.validation_callbacks.iter() {
        match callback(request) {
            ValidationStatus::Valid => {}
            ValidationStatus::IgnoreThisRequest => ignore = true,
            ValidationStatus::Invalid => {
                tracing::debug!(key = found_under.as_str(), "entry invalidated by callback");
                if let Err(error) = ctx.store.remove(found_under).await {
                    tracing::warn!(%error, "eviction of invalidated entry failed");
                }
                return Some(Lookup::Miss);
            }
        }
    }
    if ignore {
        return Some(Lookup::Miss);
    }

    if !encoding::is_acceptable_encoding(
        entry.raw().content_encoding(),
        request.header_values("accept-encoding").as_deref(),
    ) {
        return Some(Lookup::Miss);
    }

    None
}

fn is_range_request(request: &CacheRequest) -> bool {
    request.header("range").is_some_and(|range| {
        let bytes = range.as_bytes();
        bytes.len() >= 5 && bytes[..5].eq_ignore_ascii_case(b"bytes")
    })
}

/// Reads one key, degrading store failures to a miss.
async fn read<S: Store>(store: &S, key: &CacheKey) -> Option<StoredValue> {
    match store.get(key).await {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!(key = key.as_str(), %error, "store read failed; treating as miss");
            None
        }
    }
}
