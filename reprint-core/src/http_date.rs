//! HTTP date parsing.
//!
//! HTTP/1.1 allows three date formats in request headers: the preferred
//! RFC 1123 fixed-length form, the obsolete RFC 850 form, and C's `asctime`
//! form. All three are parsed as UTC; anything else is rejected with `None`
//! and the caller treats the header as absent.

use chrono::{DateTime, NaiveDateTime, Utc};

const RFC850_FORMAT: &str = "%A, %d-%b-%y %H:%M:%S GMT";
const ASCTIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Parses an HTTP date header value.
///
/// ```
/// use reprint_core::http_date;
///
/// let rfc1123 = http_date::parse("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
/// let rfc850 = http_date::parse("Sunday, 06-Nov-94 08:49:37 GMT").unwrap();
/// let asctime = http_date::parse("Sun Nov  6 08:49:37 1994").unwrap();
/// assert_eq!(rfc1123, rfc850);
/// assert_eq!(rfc1123, asctime);
/// assert!(http_date::parse("last tuesday").is_none());
/// ```
pub fn parse(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc2822(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in [RFC850_FORMAT, ASCTIME_FORMAT] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed.and_utc());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn all_three_formats_parse_to_the_same_instant() {
        let expected = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
        assert_eq!(parse("Sun, 06 Nov 1994 08:49:37 GMT"), Some(expected));
        assert_eq!(parse("Sunday, 06-Nov-94 08:49:37 GMT"), Some(expected));
        assert_eq!(parse("Sun Nov  6 08:49:37 1994"), Some(expected));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse("").is_none());
        assert!(parse("yesterday").is_none());
        assert!(parse("06/11/1994 08:49").is_none());
    }

    #[test]
    fn surrounding_whitespace_is_tolerated() {
        assert!(parse("  Sun, 06 Nov 1994 08:49:37 GMT  ").is_some());
    }
}
