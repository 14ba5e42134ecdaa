//! GitHub API error types for the status fetcher.
//!
//! The fetcher distinguishes transient from permanent failures. The
//! distinction drives retry logic:
//!
//! - **Transient** errors are retriable (5xx, rate limits, network failures)
//! - **Permanent** errors are not (most 4xx, authentication failures)
//!
//! The check waiter consumes both kinds through its error-counting path; the
//! categorization only controls whether the fetcher retries internally before
//! surfacing the error.

use std::fmt;
use thiserror::Error;

/// The kind of fetch error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Transient error - safe to retry with backoff.
    ///
    /// Examples:
    /// - HTTP 5xx (server errors)
    /// - HTTP 429 (rate limited)
    /// - HTTP 403 with rate limit headers
    /// - Network timeouts
    /// - Merged PR whose merge data has not propagated yet
    Transient,

    /// Permanent error - retrying the same call will not help.
    ///
    /// Examples:
    /// - PR not found (404)
    /// - Authentication failures (401, 403 non-rate-limit)
    /// - Malformed responses
    Permanent,
}

impl FetchErrorKind {
    /// Returns true if this error is retriable.
    pub fn is_retriable(&self) -> bool {
        matches!(self, FetchErrorKind::Transient)
    }
}

/// A status-fetch error with categorization for retry decisions.
#[derive(Debug, Error)]
pub struct FetchError {
    /// The kind of error (transient or permanent).
    pub kind: FetchErrorKind,

    /// The HTTP status code, if available.
    pub status_code: Option<u16>,

    /// A human-readable description of the error.
    pub message: String,

    /// The underlying octocrab error, if available.
    #[source]
    pub source: Option<octocrab::Error>,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "GitHub API error (HTTP {}): {}", code, self.message),
            None => write!(f, "GitHub API error: {}", self.message),
        }
    }
}

impl FetchError {
    /// Creates a transient error without an octocrab source.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Transient,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a permanent error without an octocrab source.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Permanent,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Categorizes an octocrab error.
    ///
    /// The categorization is based on HTTP status codes and error message
    /// patterns for known GitHub API responses.
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let status_code = extract_status_code(&err);
        let message = err.to_string();

        let kind = match status_code {
            Some(429) => FetchErrorKind::Transient, // Rate limited
            Some(403) if is_rate_limit_error(&message) => FetchErrorKind::Transient,
            Some(code) if (500..600).contains(&code) => FetchErrorKind::Transient,
            Some(_) => FetchErrorKind::Permanent,
            None => {
                // No status code - check if it's a network error
                if is_network_error(&message) {
                    FetchErrorKind::Transient
                } else {
                    FetchErrorKind::Permanent
                }
            }
        };

        Self {
            kind,
            status_code,
            message,
            source: Some(err),
        }
    }
}

/// Extracts the HTTP status code from an octocrab error, if present.
///
/// Uses string parsing: octocrab's `Error` type doesn't expose a stable
/// status-code accessor across all variants, and the fallback (`None`)
/// results in conservative categorization.
fn extract_status_code(err: &octocrab::Error) -> Option<u16> {
    let err_str = err.to_string();

    // octocrab formats some errors with "status: <code>"
    if let Some(idx) = err_str.find("status: ") {
        let rest = &err_str[idx + 8..];
        if let Some(end) = rest.find(|c: char| !c.is_ascii_digit()) {
            if let Ok(code) = rest[..end].parse() {
                return Some(code);
            }
        } else if let Ok(code) = rest.trim().parse() {
            return Some(code);
        }
    }

    for code in [404u16, 401, 403, 409, 422, 429, 500, 502, 503] {
        if err_str.contains(&code.to_string()) {
            return Some(code);
        }
    }

    None
}

/// Checks for rate-limit phrasing in a 403 response body.
fn is_rate_limit_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit") || lower.contains("secondary rate") || lower.contains("abuse")
}

/// Checks for network-level failure phrasing (no HTTP response at all).
fn is_network_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("connection")
        || lower.contains("dns")
        || lower.contains("network")
}
