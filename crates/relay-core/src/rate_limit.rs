//! Rate-Limit Classifier (spec §4.6): distinguishes a 429's cause
//! (concurrency vs requests-per-minute vs unknown) from response headers,
//! a pure function with no state of its own. Grounded directly in
//! `original_source/src/services/rate_limit/detector.py`'s per-vendor
//! header parsing and "remaining == 0 -> rpm, else in-flight >= 2 and a
//! short retry-after -> concurrency" heuristic.

use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;

use crate::error::RateLimitKind;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitInfo {
    pub kind: RateLimitKind,
    pub retry_after_s: Option<u64>,
    pub limit: Option<i64>,
    pub remaining: Option<i64>,
    pub reset_at: Option<String>,
}

impl Default for RateLimitKind {
    fn default() -> Self {
        RateLimitKind::Unknown
    }
}

/// Which vendor's header prefix to try first; falls through to the
/// generic `x-ratelimit-*` / `retry-after` pair regardless (spec §4.6
/// "Generic").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorHint {
    Anthropic,
    OpenAi,
    Generic,
}

/// Classifies a 429 response (spec §4.6). `headers` need not be
/// pre-lowercased; lookups are case-insensitive.
pub fn classify(headers: &relay_common::Headers, vendor: VendorHint, current_in_flight: Option<u32>) -> RateLimitInfo {
    let retry_after_s = parse_retry_after(headers);

    let (limit, remaining, reset_at) = match vendor {
        VendorHint::Anthropic => (
            parse_int(lookup(headers, "anthropic-ratelimit-requests-limit")),
            parse_int(lookup(headers, "anthropic-ratelimit-requests-remaining")),
            lookup(headers, "anthropic-ratelimit-requests-reset"),
        ),
        VendorHint::OpenAi => (
            parse_int(lookup(headers, "x-ratelimit-limit-requests")),
            parse_int(lookup(headers, "x-ratelimit-remaining-requests")),
            lookup(headers, "x-ratelimit-reset-requests"),
        ),
        VendorHint::Generic => (
            parse_int(lookup(headers, "x-ratelimit-limit")),
            parse_int(lookup(headers, "x-ratelimit-remaining")),
            lookup(headers, "x-ratelimit-reset"),
        ),
    };

    if remaining == Some(0) {
        return RateLimitInfo {
            kind: RateLimitKind::Rpm,
            retry_after_s,
            limit,
            remaining,
            reset_at,
        };
    }

    let looks_concurrent = current_in_flight.is_some_and(|n| n >= 2)
        && remaining.is_none_or(|r| r > 0)
        && retry_after_s.is_none_or(|s| s <= 30);

    if looks_concurrent {
        return RateLimitInfo {
            kind: RateLimitKind::Concurrency,
            retry_after_s,
            limit,
            remaining,
            reset_at,
        };
    }

    RateLimitInfo {
        kind: RateLimitKind::Unknown,
        retry_after_s,
        limit,
        remaining,
        reset_at,
    }
}

fn lookup(headers: &relay_common::Headers, name: &str) -> Option<String> {
    relay_common::header_get(headers, name).map(|s| s.to_string())
}

fn parse_int(value: Option<String>) -> Option<i64> {
    value?.trim().parse().ok()
}

/// `retry-after` may be an integer number of seconds or an HTTP-date
/// (spec §4.6). A past date yields `0`, never a negative duration.
fn parse_retry_after(headers: &relay_common::Headers) -> Option<u64> {
    let raw = lookup(headers, "retry-after")?;
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(secs);
    }
    let target = OffsetDateTime::parse(raw, &Rfc2822).ok()?;
    let now = OffsetDateTime::now_utc();
    let delta = (target - now).whole_seconds();
    Some(delta.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> relay_common::Headers {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn anthropic_zero_remaining_is_rpm() {
        let h = headers(&[("anthropic-ratelimit-requests-remaining", "0"), ("retry-after", "60")]);
        let info = classify(&h, VendorHint::Anthropic, Some(5));
        assert_eq!(info.kind, RateLimitKind::Rpm);
        assert_eq!(info.retry_after_s, Some(60));
    }

    #[test]
    fn anthropic_high_concurrency_short_retry_is_concurrency() {
        let h = headers(&[("anthropic-ratelimit-requests-remaining", "10"), ("retry-after", "5")]);
        let info = classify(&h, VendorHint::Anthropic, Some(3));
        assert_eq!(info.kind, RateLimitKind::Concurrency);
    }

    #[test]
    fn low_in_flight_count_is_unknown_not_concurrency() {
        let h = headers(&[("x-ratelimit-remaining-requests", "10"), ("retry-after", "5")]);
        let info = classify(&h, VendorHint::OpenAi, Some(1));
        assert_eq!(info.kind, RateLimitKind::Unknown);
    }

    #[test]
    fn long_retry_after_rules_out_concurrency() {
        let h = headers(&[("x-ratelimit-remaining", "10"), ("retry-after", "120")]);
        let info = classify(&h, VendorHint::Generic, Some(4));
        assert_eq!(info.kind, RateLimitKind::Unknown);
    }

    #[test]
    fn missing_headers_is_unknown_with_no_retry_after() {
        let h = headers(&[]);
        let info = classify(&h, VendorHint::Generic, Some(4));
        assert_eq!(info.kind, RateLimitKind::Unknown);
        assert_eq!(info.retry_after_s, None);
    }

    #[test]
    fn retry_after_header_is_case_insensitive() {
        let h = headers(&[("Retry-After", "7")]);
        assert_eq!(parse_retry_after(&h), Some(7));
    }
}
