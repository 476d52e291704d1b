//! Metrics declaration and initialization.

use crate::admission::RejectReason;
use crate::lookup::Lookup;

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    // Lookup outcome metrics

    /// Track number of cache hit events.
    pub static ref CACHE_HIT_COUNTER: &'static str = {
        metrics::describe_counter!(
            "reprint_cache_hit_total",
            "Total number of output-cache hits."
        );
        "reprint_cache_hit_total"
    };
    /// Track number of cache miss events.
    pub static ref CACHE_MISS_COUNTER: &'static str = {
        metrics::describe_counter!(
            "reprint_cache_miss_total",
            "Total number of output-cache misses, post-hit gate failures included."
        );
        "reprint_cache_miss_total"
    };
    /// Track number of cache bypass events.
    pub static ref CACHE_BYPASS_COUNTER: &'static str = {
        metrics::describe_counter!(
            "reprint_cache_bypass_total",
            "Total number of requests the cache declined to answer, distinct from misses."
        );
        "reprint_cache_bypass_total"
    };
    /// Track number of 304 Not Modified answers.
    pub static ref CACHE_NOT_MODIFIED_COUNTER: &'static str = {
        metrics::describe_counter!(
            "reprint_cache_not_modified_total",
            "Total number of hits answered 304 Not Modified."
        );
        "reprint_cache_not_modified_total"
    };

    // Write path metrics

    /// Track number of admitted responses.
    pub static ref CACHE_ADMIT_COUNTER: &'static str = {
        metrics::describe_counter!(
            "reprint_cache_admit_total",
            "Total number of responses admitted to the cache."
        );
        "reprint_cache_admit_total"
    };
    /// Track number of rejected responses, labeled by gate.
    pub static ref CACHE_REJECT_COUNTER: &'static str = {
        metrics::describe_counter!(
            "reprint_cache_reject_total",
            "Total number of responses the admission gates rejected."
        );
        "reprint_cache_reject_total"
    };

    // Consistency metrics

    /// Track number of stale-variant evictions.
    pub static ref STALE_VARY_EVICTION_COUNTER: &'static str = {
        metrics::describe_counter!(
            "reprint_stale_vary_eviction_total",
            "Total number of variants evicted because their descriptor changed shape."
        );
        "reprint_stale_vary_eviction_total"
    };
}

/// Record the outcome of one lookup.
///
/// A 304 answer counts as a hit and additionally as a not-modified event, so
/// the hit/miss ratio stays meaningful.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_lookup(outcome: &Lookup) {
    let counter = match outcome {
        Lookup::Serve { .. } | Lookup::NotModified { .. } => *CACHE_HIT_COUNTER,
        Lookup::Miss => *CACHE_MISS_COUNTER,
        Lookup::Bypass => *CACHE_BYPASS_COUNTER,
    };
    metrics::counter!(counter).increment(1);
    if let Lookup::NotModified { .. } = outcome {
        metrics::counter!(*CACHE_NOT_MODIFIED_COUNTER).increment(1);
    }
}

/// No-op version when the metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_lookup(_outcome: &Lookup) {}

/// Record an admitted response.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_admitted() {
    metrics::counter!(*CACHE_ADMIT_COUNTER).increment(1);
}

/// No-op version when the metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_admitted() {}

/// Record a rejected response with the failing gate as a label.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_rejected(reason: RejectReason) {
    metrics::counter!(*CACHE_REJECT_COUNTER, "reason" => reason.as_str()).increment(1);
}

/// No-op version when the metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_rejected(_reason: RejectReason) {}

/// Record the eviction of a variant whose descriptor changed shape.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_stale_vary_eviction() {
    metrics::counter!(*STALE_VARY_EVICTION_COUNTER).increment(1);
}

/// No-op version when the metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_stale_vary_eviction() {}
