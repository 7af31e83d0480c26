//! Admission outcomes, the rate header contract, and the rejection signal.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;

/// `X-RateLimit-Limit` — the configured ceiling, attached to every response.
pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
/// `X-RateLimit-Remaining` — requests left in the window, attached to every
/// response, never negative.
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
/// `X-RateLimit-Reset` — when the window resets, as an RFC 3339 UTC
/// timestamp, attached to every response.
pub const HEADER_RESET: &str = "x-ratelimit-reset";
/// `Retry-After` — whole seconds until the next admissible request, attached
/// only to rejections.
pub const HEADER_RETRY_AFTER: &str = "retry-after";

/// The result of one admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitOutcome {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// The configured ceiling per window.
    pub limit: u32,
    /// Requests left in the current window, never negative.
    pub remaining: u32,
    /// When the current window resets.
    pub reset_time: DateTime<Utc>,
    /// Whole seconds until the next admissible request; populated only when
    /// the request was rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl RateLimitOutcome {
    /// An allowed outcome.
    pub fn allowed(limit: u32, remaining: u32, reset_time: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_time,
            retry_after_secs: None,
        }
    }

    /// A rejected outcome.
    pub fn rejected(limit: u32, reset_time: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_time,
            retry_after_secs: Some(seconds_until(reset_time, now)),
        }
    }

    /// The rate headers for this outcome, in the order they are attached.
    ///
    /// Limit, remaining, and reset are always present; `Retry-After` only on
    /// rejection.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
            (
                HEADER_RESET,
                self.reset_time.to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
        ];
        if let Some(retry_after) = self.retry_after_secs {
            headers.push((HEADER_RETRY_AFTER, retry_after.to_string()));
        }
        headers
    }
}

/// Whole seconds from `now` until `reset_time`, rounded up, clamped at zero.
pub(crate) fn seconds_until(reset_time: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (reset_time - now).num_milliseconds().max(0);
    ((millis + 999) / 1000) as u64
}

/// Raised by the façade when a caller has exceeded the allotted rate.
///
/// Always recoverable: the request pipeline translates it into a 429
/// response with a `Retry-After` header. No other component may catch or
/// suppress it.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RateLimitExceeded {
    /// The configured rejection reason, surfaced in the response body.
    pub message: String,
    /// The rejected outcome, carrying limit, remaining, reset time, and
    /// retry-after.
    pub outcome: RateLimitOutcome,
}

impl RateLimitExceeded {
    /// Seconds the caller should wait before retrying.
    pub fn retry_after_secs(&self) -> u64 {
        self.outcome.retry_after_secs.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_seconds_until_rounds_up() {
        let reset = at(60);
        assert_eq!(seconds_until(reset, at(3)), 57);
        assert_eq!(seconds_until(reset, at(3) + chrono::Duration::milliseconds(500)), 57);
        assert_eq!(seconds_until(reset, at(59) + chrono::Duration::milliseconds(1)), 1);
    }

    #[test]
    fn test_seconds_until_clamps_at_zero() {
        assert_eq!(seconds_until(at(0), at(10)), 0);
    }

    #[test]
    fn test_retry_after_decreases_toward_reset() {
        let reset = at(60);
        let early = RateLimitOutcome::rejected(5, reset, at(3));
        let late = RateLimitOutcome::rejected(5, reset, at(30));
        assert!(early.retry_after_secs.unwrap() > late.retry_after_secs.unwrap());
    }

    #[test]
    fn test_allowed_headers_omit_retry_after() {
        let outcome = RateLimitOutcome::allowed(100, 42, at(900));
        let headers = outcome.headers();
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0], (HEADER_LIMIT, "100".to_string()));
        assert_eq!(headers[1], (HEADER_REMAINING, "42".to_string()));
        assert!(!headers.iter().any(|(name, _)| *name == HEADER_RETRY_AFTER));
    }

    #[test]
    fn test_rejected_headers_include_retry_after() {
        let outcome = RateLimitOutcome::rejected(100, at(60), at(3));
        let headers = outcome.headers();
        assert_eq!(headers.len(), 4);
        assert_eq!(headers[1], (HEADER_REMAINING, "0".to_string()));
        assert_eq!(headers[3], (HEADER_RETRY_AFTER, "57".to_string()));
    }

    #[test]
    fn test_reset_header_is_rfc3339_utc() {
        let outcome = RateLimitOutcome::allowed(10, 9, at(0));
        let headers = outcome.headers();
        let reset = &headers[2].1;
        assert!(reset.ends_with('Z'), "reset header not UTC: {reset}");
        assert!(DateTime::parse_from_rfc3339(reset).is_ok());
    }
}
