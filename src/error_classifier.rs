//! Layer C4 — maps raw provider errors to a `(kind, sub)` pair.
//!
//! Pure and deterministic: same `(status_code, message)` always yields the same
//! classification, independent of call order (spec §8 testable property). Pattern
//! tables are transliterated from the original `classify_error` in `tasks.py`, which
//! is where the two code paths the distilled spec calls out (Executor classifier and
//! worker-side reporter) are unified, per the REDESIGN FLAGS note in SPEC_FULL §9.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Permanent,
    Dependency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSubKind {
    RateLimited,
    CreditsExhausted,
    ServiceUnavailable,
    NetworkTimeout,
    ApiKeyInvalid,
    BadRequest,
    JsonParse,
    MissingDependency,
    Unknown,
}

impl ErrorSubKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSubKind::RateLimited => "rate_limited",
            ErrorSubKind::CreditsExhausted => "credits_exhausted",
            ErrorSubKind::ServiceUnavailable => "service_unavailable",
            ErrorSubKind::NetworkTimeout => "network_timeout",
            ErrorSubKind::ApiKeyInvalid => "api_key_invalid",
            ErrorSubKind::BadRequest => "bad_request",
            ErrorSubKind::JsonParse => "json_parse",
            ErrorSubKind::MissingDependency => "missing_dependency",
            ErrorSubKind::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    pub sub: ErrorSubKind,
}

/// Substring patterns that indicate a missing/broken infrastructure dependency
/// rather than a provider-side failure. Checked first: these never retry.
const DEPENDENCY_PATTERNS: &[&str] = &[
    "poppler installed and in path",
    "command not found",
    "no such file or directory",
    "permission denied",
    "module not found",
    "import error",
    "library not found",
    "missing dependency",
    "environment variable not set",
    "configuration error",
    "invalid configuration",
    "database connection failed",
    "redis connection failed",
];

/// Substring patterns that indicate a permanent, non-retriable failure.
const PERMANENT_PATTERNS: &[&str] = &[
    "invalid api key",
    "authentication failed",
    "unauthorized",
    "forbidden",
    "not found",
    "bad request",
    "invalid request",
    "malformed",
    "syntax error",
    "parse error",
    "invalid json",
    "invalid format",
    "unsupported format",
    "file too large",
    "quota exceeded",
    "limit exceeded",
];

/// Classify a raw provider failure. `cause` is an optional free-text hint (e.g.
/// the lower-level I/O error) consulted alongside `message`; both are matched
/// against the same pattern tables.
pub fn classify(status_code: u16, message: &str, cause: Option<&str>) -> Classification {
    let haystack = match cause {
        Some(c) => format!("{message} {c}").to_lowercase(),
        None => message.to_lowercase(),
    };

    for pattern in DEPENDENCY_PATTERNS {
        if haystack.contains(pattern) {
            return Classification { kind: ErrorKind::Dependency, sub: ErrorSubKind::MissingDependency };
        }
    }

    for pattern in PERMANENT_PATTERNS {
        if haystack.contains(pattern) {
            return Classification { kind: ErrorKind::Permanent, sub: ErrorSubKind::BadRequest };
        }
    }

    match status_code {
        400 | 401 | 403 | 404 => Classification { kind: ErrorKind::Permanent, sub: ErrorSubKind::ApiKeyInvalid },
        402 => Classification { kind: ErrorKind::Transient, sub: ErrorSubKind::CreditsExhausted },
        429 => Classification { kind: ErrorKind::Transient, sub: ErrorSubKind::RateLimited },
        500 => Classification { kind: ErrorKind::Transient, sub: ErrorSubKind::NetworkTimeout },
        503 => Classification { kind: ErrorKind::Transient, sub: ErrorSubKind::ServiceUnavailable },
        _ => Classification { kind: ErrorKind::Transient, sub: ErrorSubKind::Unknown },
    }
}

/// `circuit_open` is surfaced by the breaker itself, not the provider; the
/// Executor maps it to `transient/service_unavailable` per spec §7.
pub fn classify_circuit_open() -> Classification {
    Classification { kind: ErrorKind::Transient, sub: ErrorSubKind::ServiceUnavailable }
}

/// `rate_limit_timeout` is surfaced by the rate limiter itself; the Executor
/// maps it to `transient/rate_limited` per spec §7.
pub fn classify_rate_limit_timeout() -> Classification {
    Classification { kind: ErrorKind::Transient, sub: ErrorSubKind::RateLimited }
}

/// Maps a classified sub-kind to the provider state label stored at
/// `openrouter:state` (spec §4.8), mirroring `error_state_map` in the original
/// `openrouter_state_reporter.py`. Sub-kinds with no dedicated state collapse
/// to the generic `error` label.
pub fn provider_state_label(sub: ErrorSubKind) -> &'static str {
    match sub {
        ErrorSubKind::ApiKeyInvalid => "api_key_invalid",
        ErrorSubKind::CreditsExhausted => "credits_exhausted",
        ErrorSubKind::RateLimited => "rate_limited",
        ErrorSubKind::ServiceUnavailable => "service_unavailable",
        ErrorSubKind::NetworkTimeout
        | ErrorSubKind::BadRequest
        | ErrorSubKind::JsonParse
        | ErrorSubKind::MissingDependency
        | ErrorSubKind::Unknown => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn classify_is_deterministic(status in 100u16..600, message in ".{0,40}") {
            let a = classify(status, &message, None);
            let b = classify(status, &message, None);
            prop_assert_eq!(a, b);
        }
    }

    #[test]
    fn dependency_patterns_win_over_status_code() {
        let c = classify(500, "poppler installed and in PATH is required", None);
        assert_eq!(c.kind, ErrorKind::Dependency);
    }

    #[test]
    fn permanent_patterns_win_over_status_code() {
        let c = classify(500, "Invalid API key supplied", None);
        assert_eq!(c.kind, ErrorKind::Permanent);
    }

    #[test]
    fn status_code_table_is_exhaustive_for_listed_codes() {
        assert_eq!(classify(400, "bad", None).kind, ErrorKind::Permanent);
        assert_eq!(classify(401, "bad", None).kind, ErrorKind::Permanent);
        assert_eq!(classify(403, "bad", None).kind, ErrorKind::Permanent);
        assert_eq!(classify(404, "bad", None).kind, ErrorKind::Permanent);
        assert_eq!(classify(402, "bad", None).sub, ErrorSubKind::CreditsExhausted);
        assert_eq!(classify(429, "bad", None).sub, ErrorSubKind::RateLimited);
        assert_eq!(classify(500, "bad", None).sub, ErrorSubKind::NetworkTimeout);
        assert_eq!(classify(503, "bad", None).sub, ErrorSubKind::ServiceUnavailable);
    }

    #[test]
    fn unknown_status_falls_back_to_transient_unknown() {
        let c = classify(418, "teapot", None);
        assert_eq!(c.kind, ErrorKind::Transient);
        assert_eq!(c.sub, ErrorSubKind::Unknown);
    }

    #[test]
    fn classification_is_pure_and_order_independent() {
        let a = classify(503, "temporary outage", None);
        let b = classify(503, "temporary outage", None);
        assert_eq!(a, b);
    }
}
