//! Accept-Encoding negotiation.
//!
//! Picks which stored variant of a varying-by-encoding family may be served
//! to a request, following the `Accept-Encoding` grammar: comma-separated
//! codings, each optionally weighted with `;q=<0..1>`.
//!
//! Candidate order is the server's preference order, not the client's. Among
//! equally weighted acceptable candidates the earliest declared one wins; a
//! candidate with weight 1 wins immediately.
//!
//! Malformed weight syntax fails open to weight 1. Real-world headers are
//! built permissively and a response is better served slightly wrong than
//! not at all.

use smol_str::SmolStr;

const IDENTITY: &str = "identity";
const ANY: &str = "*";

/// Outcome of negotiating a response encoding for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiated {
    /// Serve the candidate at this index.
    Candidate(usize),
    /// Serve the identity (unencoded) variant.
    Identity,
    /// Neither any candidate nor identity is acceptable; the response cannot
    /// be served from the cache.
    NotAcceptable,
}

/// Selects the best candidate encoding for an `Accept-Encoding` header.
///
/// `start` skips candidates already tried; the lookup path resumes the scan
/// there when a negotiated variant turns out not to be stored. A missing or
/// empty header selects identity.
///
/// ```
/// use reprint_core::encoding::{Negotiated, select_encoding};
/// use smol_str::SmolStr;
///
/// let candidates = [SmolStr::new("gzip"), SmolStr::new("deflate")];
/// assert_eq!(
///     select_encoding(&candidates, 0, Some("gzip;q=0,deflate")),
///     Negotiated::Candidate(1),
/// );
/// assert_eq!(select_encoding(&candidates, 0, None), Negotiated::Identity);
/// ```
pub fn select_encoding(
    candidates: &[SmolStr],
    start: usize,
    accept_encoding: Option<&str>,
) -> Negotiated {
    let header = match accept_encoding {
        None | Some("") => return Negotiated::Identity,
        Some(header) => header,
    };
    debug_assert!(start <= candidates.len());

    // Common case: a single coding with no weight.
    if !header.contains([',', ';']) {
        let token = header.trim();
        if token == ANY {
            return if start < candidates.len() {
                Negotiated::Candidate(start)
            } else {
                Negotiated::Identity
            };
        }
        for (index, candidate) in candidates.iter().enumerate().skip(start) {
            if candidate.eq_ignore_ascii_case(token) {
                return Negotiated::Candidate(index);
            }
        }
        return Negotiated::Identity;
    }

    let mut best: Option<(usize, f64)> = None;
    for (index, candidate) in candidates.iter().enumerate().skip(start) {
        match coding_weight(candidate, header) {
            Some(weight) if weight >= 1.0 => return Negotiated::Candidate(index),
            Some(weight) if weight > 0.0 => {
                // strictly greater keeps the earliest candidate on ties
                if best.is_none_or(|(_, current)| weight > current) {
                    best = Some((index, weight));
                }
            }
            _ => {}
        }
    }
    if let Some((index, _)) = best {
        return Negotiated::Candidate(index);
    }
    if identity_acceptable(header) {
        Negotiated::Identity
    } else {
        Negotiated::NotAcceptable
    }
}

/// Whether the identity (unencoded) form may be served under this header.
///
/// Identity is implied unless excluded outright: an explicit `identity;q=0`,
/// or a zero-weighted `*` with identity not mentioned positively.
pub fn identity_acceptable(accept_encoding: &str) -> bool {
    match coding_weight(IDENTITY, accept_encoding) {
        Some(weight) => weight > 0.0,
        None => coding_weight(ANY, accept_encoding).is_none_or(|weight| weight > 0.0),
    }
}

/// Whether a cached response carrying `content_encoding` may be served to a
/// request with the given `Accept-Encoding` header.
///
/// This is the check for entries that do not vary by encoding: an unencoded
/// entry suits anyone, an encoded one needs its coding named with positive
/// weight, or left unmentioned while `*` is positive.
pub fn is_acceptable_encoding(
    content_encoding: Option<&str>,
    accept_encoding: Option<&str>,
) -> bool {
    let coding = match content_encoding {
        None | Some("") => return true,
        Some(coding) => coding,
    };
    let header = match accept_encoding {
        None | Some("") => return false,
        Some(header) => header,
    };
    match coding_weight(coding, header) {
        Some(weight) => weight > 0.0,
        None => coding_weight(ANY, header).is_some_and(|weight| weight > 0.0),
    }
}

/// Weight of `coding` inside the header, or `None` when it never occurs on a
/// token boundary. A boundary match must be preceded by the string start, a
/// space, or a comma, and followed by the string end, a space, a comma, or a
/// semicolon introducing the weight.
fn coding_weight(coding: &str, accept_encoding: &str) -> Option<f64> {
    debug_assert!(!coding.is_empty());
    let header = accept_encoding.to_ascii_lowercase();
    let coding = coding.to_ascii_lowercase();
    let mut from = 0;
    while let Some(found) = header[from..].find(&coding) {
        let at = from + found;
        let end = at + coding.len();
        let preceded = at == 0 || matches!(header.as_bytes()[at - 1], b' ' | b',');
        let next = header.as_bytes().get(end).copied();
        let followed = matches!(next, None | Some(b' ') | Some(b',') | Some(b';'));
        if preceded && followed {
            return Some(match next {
                Some(b';') => parse_weight(&header, end),
                _ => 1.0,
            });
        }
        from = at + 1;
    }
    None
}

/// Parses the `;q=<value>` weight that starts at the semicolon `from` points
/// at. Anything that does not parse as a plain decimal inside `0..=1` counts
/// as weight 1.
fn parse_weight(accept_encoding: &str, from: usize) -> f64 {
    let token = &accept_encoding[from..];
    let token = &token[..token.find(',').unwrap_or(token.len())];
    let Some(q) = token.find('q') else {
        return 1.0;
    };
    let Some(equals) = token[q..].find('=') else {
        return 1.0;
    };
    let value = token[q + equals + 1..].trim_end();
    if value.starts_with(|c: char| c.is_ascii_digit() || c == '.')
        && let Ok(weight) = value.parse::<f64>()
        && (0.0..=1.0).contains(&weight)
    {
        return weight;
    }
    1.0
}
